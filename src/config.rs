use crate::error::ConfigError;

pub const DEFAULT_MODEL: &str = "claude-haiku-4-5";

/// Startup configuration shared by the agent binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Redirect target for interactive OAuth flows.
    pub callback_url: String,
    /// Model id passed to the chat model adapter.
    pub model: String,
}

impl AppConfig {
    pub fn new(callback_url: impl Into<String>) -> Self {
        Self {
            callback_url: callback_url.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Reads `CALLBACK_URL` (required) and `AGENT_MODEL` (optional).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let callback_url = lookup("CALLBACK_URL")
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingVar("CALLBACK_URL"))?;

        reqwest::Url::parse(&callback_url).map_err(|err| ConfigError::InvalidVar {
            name: "CALLBACK_URL",
            message: err.to_string(),
        })?;

        let mut config = Self::new(callback_url);
        if let Some(model) = lookup("AGENT_MODEL").filter(|value| !value.trim().is_empty()) {
            config.model = model;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn callback_url_is_required() {
        let err = AppConfig::from_lookup(lookup_from(&[])).expect_err("must fail");
        assert!(matches!(err, ConfigError::MissingVar("CALLBACK_URL")));

        let err = AppConfig::from_lookup(lookup_from(&[("CALLBACK_URL", "  ")]))
            .expect_err("blank must fail");
        assert!(matches!(err, ConfigError::MissingVar("CALLBACK_URL")));
    }

    #[test]
    fn callback_url_must_parse() {
        let err = AppConfig::from_lookup(lookup_from(&[("CALLBACK_URL", "not a url")]))
            .expect_err("must fail");
        assert!(matches!(err, ConfigError::InvalidVar { name: "CALLBACK_URL", .. }));
    }

    #[test]
    fn model_defaults_and_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[(
            "CALLBACK_URL",
            "https://app.test/oauth2/callback",
        )]))
        .expect("valid");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.callback_url, "https://app.test/oauth2/callback");

        let config = AppConfig::from_lookup(lookup_from(&[
            ("CALLBACK_URL", "https://app.test/cb"),
            ("AGENT_MODEL", "claude-sonnet-4-5"),
        ]))
        .expect("valid");
        assert_eq!(config.model, "claude-sonnet-4-5");
    }
}
