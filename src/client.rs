//! Client for invoking an agent hosted behind a runtime endpoint.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Value, json};

use crate::error::{ConfigError, RuntimeError};

pub const SESSION_HEADER: &str = "x-runtime-session-id";
pub const MIN_SESSION_ID_LEN: usize = 33;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeClientConfig {
    /// Invocation endpoint of the hosted agent.
    pub endpoint: String,
    /// Endpoint qualifier; the runtime's default endpoint is used when unset.
    pub qualifier: Option<String>,
}

impl RuntimeClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            qualifier: None,
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Reads `AGENT_RUNTIME_URL` (required) and `AGENT_RUNTIME_QUALIFIER`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = std::env::var("AGENT_RUNTIME_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingVar("AGENT_RUNTIME_URL"))?;

        reqwest::Url::parse(&endpoint).map_err(|err| ConfigError::InvalidVar {
            name: "AGENT_RUNTIME_URL",
            message: err.to_string(),
        })?;

        let mut config = Self::new(endpoint);
        config.qualifier = std::env::var("AGENT_RUNTIME_QUALIFIER")
            .ok()
            .filter(|value| !value.trim().is_empty());
        Ok(config)
    }
}

/// A fresh session id. Reusing one keeps the runtime's conversation state.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone)]
pub struct RuntimeClient {
    http: reqwest::Client,
    config: RuntimeClientConfig,
}

impl RuntimeClient {
    pub fn new(config: RuntimeClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeClientConfig {
        &self.config
    }

    /// Sends `prompt` to the runtime and decodes the whole response body as
    /// JSON.
    pub async fn invoke(&self, prompt: &str, session_id: &str) -> Result<Value, RuntimeError> {
        if session_id.len() < MIN_SESSION_ID_LEN {
            return Err(RuntimeError::InvalidSessionId {
                min: MIN_SESSION_ID_LEN,
                actual: session_id.len(),
            });
        }

        let mut request = self
            .http
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(SESSION_HEADER, session_id)
            .json(&json!({ "prompt": prompt }));
        if let Some(qualifier) = &self.config.qualifier {
            request = request.query(&[("qualifier", qualifier.as_str())]);
        }

        tracing::info!(endpoint = %self.config.endpoint, "invoking agent runtime");
        let response = request
            .send()
            .await
            .map_err(|err| RuntimeError::Request(err.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| RuntimeError::Request(err.to_string()))?;

        if !status.is_success() {
            return Err(RuntimeError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        serde_json::from_slice(&body).map_err(|err| RuntimeError::Decode(err.to_string()))
    }
}
