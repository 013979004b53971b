use std::env;
use std::error::Error;

use outbound_auth_agents::client::new_session_id;
use outbound_auth_agents::{RuntimeClient, RuntimeClientConfig, init_logging};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging("warn");

    let prompt = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        return Err("usage: invoke_runtime <prompt>".into());
    }

    let client = RuntimeClient::new(RuntimeClientConfig::from_env()?);
    let session_id = env::var("AGENT_RUNTIME_SESSION_ID").unwrap_or_else(|_| new_session_id());
    eprintln!("session: {session_id}");

    let response = client.invoke(&prompt, &session_id).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
