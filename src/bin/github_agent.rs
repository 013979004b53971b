use std::env;
use std::error::Error;

use futures_util::StreamExt;
use outbound_auth_agents::tools::github::{
    GITHUB_PROVIDER, GITHUB_SCOPES, GITHUB_SYSTEM_PROMPT, inspect_github_repos_tool,
};
use outbound_auth_agents::{
    AccessToken, Agent, AgentApp, AnthropicModel, AppConfig, AuthFlow, InMemoryTokenBroker,
    OAuthProviderConfig, init_logging,
};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging("info");

    let prompt = env::args().skip(1).collect::<Vec<_>>().join(" ");
    let prompt = if prompt.trim().is_empty() {
        "List my private GitHub repositories".to_string()
    } else {
        prompt
    };

    let config = AppConfig::from_env()?;
    let model = AnthropicModel::from_app_config(&config)?;

    let client_id = env::var("GITHUB_CLIENT_ID").unwrap_or_default();
    let broker = InMemoryTokenBroker::new()
        .with_provider(GITHUB_PROVIDER, OAuthProviderConfig::github(client_id));
    if let Ok(token) = env::var("GITHUB_TOKEN") {
        broker.store_token(
            GITHUB_PROVIDER,
            &GITHUB_SCOPES,
            AuthFlow::UserFederation,
            AccessToken::new(token),
            None,
        );
    }

    let agent = Agent::builder()
        .model(model)
        .system_prompt(GITHUB_SYSTEM_PROMPT)
        .tool(inspect_github_repos_tool(&config))
        .token_broker(broker)
        .build()?;
    let app = AgentApp::new(agent);

    let mut stream = app.invoke(&json!({ "prompt": prompt }));
    while let Some(item) = stream.next().await {
        println!("{}", serde_json::to_string(&item)?);
    }

    Ok(())
}
