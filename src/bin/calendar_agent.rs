use std::env;
use std::error::Error;
use std::io::{self, BufRead};
use std::sync::Arc;

use futures_util::StreamExt;
use outbound_auth_agents::tools::calendar::{
    CALENDAR_PROVIDER, CALENDAR_SYSTEM_PROMPT, calendar_events_today_tool,
};
use outbound_auth_agents::{
    AccessToken, Agent, AgentApp, AnthropicModel, AppConfig, InMemoryTokenBroker,
    OAuthProviderConfig, init_logging,
};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging("info");

    let prompt = env::args().skip(1).collect::<Vec<_>>().join(" ");
    let prompt = if prompt.trim().is_empty() {
        "What is on my calendar today?".to_string()
    } else {
        prompt
    };

    let config = AppConfig::from_env()?;
    let model = AnthropicModel::from_app_config(&config)?;

    // The calendar tool always forces a fresh authorization. The turn waits
    // until an access token for the printed URL is pasted on stdin.
    let client_id = env::var("GOOGLE_CLIENT_ID").unwrap_or_default();
    let broker = Arc::new(
        InMemoryTokenBroker::new()
            .with_provider(CALENDAR_PROVIDER, OAuthProviderConfig::google(client_id)),
    );
    spawn_token_reader(broker.clone());

    let agent = Agent::builder()
        .model(model)
        .system_prompt(CALENDAR_SYSTEM_PROMPT)
        .tool(calendar_events_today_tool(&config))
        .shared_token_broker(broker)
        .build()?;
    let app = AgentApp::new(agent);

    let mut stream = app.invoke(&json!({ "prompt": prompt }));
    while let Some(item) = stream.next().await {
        println!("{}", serde_json::to_string(&item)?);
    }

    Ok(())
}

/// Completes every pending authorization with each token read from stdin.
/// A plain thread so a blocked read does not hold up runtime shutdown.
fn spawn_token_reader(broker: Arc<InMemoryTokenBroker>) {
    eprintln!("Open the authorization url, then paste the access token here.");
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let token = line.trim();
            if token.is_empty() {
                continue;
            }
            for state in broker.pending_states() {
                if let Err(err) =
                    broker.complete_authorization(&state, AccessToken::new(token), None)
                {
                    tracing::warn!(error = %err, "could not complete authorization");
                }
            }
        }
    });
}
