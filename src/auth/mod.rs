//! Access gating for tools that call third-party APIs on behalf of a user.
//!
//! A gated tool declares an [`AuthorizationContext`]. Before its body runs,
//! [`authorize`] asks the registered [`TokenBroker`] for a token. When the
//! broker needs the user to authorize first, the redirect URL is handed to the
//! registered [`AuthUrlHandler`] and the broker may then wait for the user to
//! finish. No token is injected if that wait ends empty.

mod broker;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::relay::RelaySender;
use crate::tools::DependencyMap;

pub use broker::{InMemoryTokenBroker, OAuthProviderConfig};

const TOKEN_PREFIX_LEN: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthFlow {
    /// Three-legged flow where the user grants access in a browser.
    UserFederation,
    /// Client credentials, no user interaction.
    #[serde(rename = "M2M")]
    M2M,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationContext {
    pub provider_name: String,
    pub scopes: Vec<String>,
    pub auth_flow: AuthFlow,
    pub callback_url: String,
    pub force_authentication: bool,
}

impl AuthorizationContext {
    pub fn new(provider_name: impl Into<String>, callback_url: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            scopes: Vec::new(),
            auth_flow: AuthFlow::UserFederation,
            callback_url: callback_url.into(),
            force_authentication: false,
        }
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn auth_flow(mut self, auth_flow: AuthFlow) -> Self {
        self.auth_flow = auth_flow;
        self
    }

    pub fn force_authentication(mut self, force: bool) -> Self {
        self.force_authentication = force;
        self
    }
}

/// Opaque bearer token. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First characters of the token, for log lines.
    pub fn diagnostic_prefix(&self) -> &str {
        match self.0.char_indices().nth(TOKEN_PREFIX_LEN) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken({}...)", self.diagnostic_prefix())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenResolution {
    Granted(AccessToken),
    AuthorizationRequired { authorization_url: String },
}

#[async_trait]
pub trait TokenBroker: Send + Sync {
    async fn resolve(&self, context: &AuthorizationContext)
    -> Result<TokenResolution, AuthError>;

    /// Waits for the user to finish the flow started at `authorization_url`.
    ///
    /// Called after the URL has been delivered. Brokers that cannot observe
    /// completion return `Ok(None)`.
    async fn await_authorization(
        &self,
        _context: &AuthorizationContext,
        _authorization_url: &str,
    ) -> Result<Option<AccessToken>, AuthError> {
        Ok(None)
    }
}

#[async_trait]
pub trait AuthUrlHandler: Send + Sync {
    async fn on_auth_url(&self, url: &str);
}

/// Forwards authorization URLs to the caller as relay status lines.
pub struct RelayAuthUrlHandler<T> {
    relay: RelaySender<T>,
}

impl<T> RelayAuthUrlHandler<T> {
    pub fn new(relay: RelaySender<T>) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl<T> AuthUrlHandler for RelayAuthUrlHandler<T>
where
    T: From<String> + Send + 'static,
{
    async fn on_auth_url(&self, url: &str) {
        tracing::info!("Authorization url: {url}");
        if let Err(err) = self.relay.put(T::from(format!("Authorization url: {url}"))) {
            tracing::debug!(%err, "authorization url not relayed");
        }
    }
}

/// Resolves a token for `context` using the broker and URL handler registered
/// in `dependencies`.
///
/// Returns `Ok(None)` when the user did not complete authorization in time;
/// the URL has already been delivered at that point.
pub async fn authorize(
    context: &AuthorizationContext,
    dependencies: &DependencyMap,
) -> Result<Option<AccessToken>, AuthError> {
    let broker = dependencies
        .get::<Arc<dyn TokenBroker>>()
        .ok_or(AuthError::BrokerUnavailable)?;

    let token = match broker.resolve(context).await? {
        TokenResolution::Granted(token) => Some(token),
        TokenResolution::AuthorizationRequired { authorization_url } => {
            match dependencies.get::<Arc<dyn AuthUrlHandler>>() {
                Some(handler) => handler.on_auth_url(&authorization_url).await,
                None => tracing::info!("Authorization url: {authorization_url}"),
            }
            broker
                .await_authorization(context, &authorization_url)
                .await?
        }
    };

    match token {
        Some(token) if !token.is_empty() => {
            tracing::info!(
                provider = %context.provider_name,
                "using access token {}...",
                token.diagnostic_prefix()
            );
            Ok(Some(token))
        }
        _ => {
            tracing::info!(provider = %context.provider_name, "Missing access token");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures_util::StreamExt;

    use super::*;

    struct FixedBroker(TokenResolution);

    #[async_trait]
    impl TokenBroker for FixedBroker {
        async fn resolve(
            &self,
            _context: &AuthorizationContext,
        ) -> Result<TokenResolution, AuthError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuthUrlHandler for RecordingHandler {
        async fn on_auth_url(&self, url: &str) {
            self.urls.lock().expect("lock poisoned").push(url.to_string());
        }
    }

    fn deps_with(resolution: TokenResolution, handler: Arc<RecordingHandler>) -> DependencyMap {
        let deps = DependencyMap::new();
        deps.insert::<Arc<dyn TokenBroker>>(Arc::new(FixedBroker(resolution)));
        deps.insert::<Arc<dyn AuthUrlHandler>>(handler);
        deps
    }

    fn context() -> AuthorizationContext {
        AuthorizationContext::new("github-provider", "https://example.test/callback")
            .scopes(["repo", "read:user"])
    }

    #[test]
    fn token_debug_and_prefix_never_show_full_secret() {
        let token = AccessToken::new("gho_0123456789abcdef");
        assert_eq!(token.diagnostic_prefix(), "gho_012345");
        assert_eq!(format!("{token:?}"), "AccessToken(gho_012345...)");

        let short = AccessToken::new("abc");
        assert_eq!(short.diagnostic_prefix(), "abc");
    }

    #[test]
    fn auth_flow_serializes_like_the_broker_expects() {
        let value = serde_json::to_value(AuthFlow::UserFederation).expect("serializes");
        assert_eq!(value, serde_json::json!("USER_FEDERATION"));
    }

    #[tokio::test]
    async fn granted_token_is_returned_without_notifying() {
        let handler = Arc::new(RecordingHandler::default());
        let deps = deps_with(
            TokenResolution::Granted(AccessToken::new("token-123")),
            handler.clone(),
        );

        let token = authorize(&context(), &deps).await.expect("authorizes");
        assert_eq!(token, Some(AccessToken::new("token-123")));
        assert!(handler.urls.lock().expect("lock poisoned").is_empty());
    }

    #[tokio::test]
    async fn required_authorization_notifies_and_returns_none() {
        let handler = Arc::new(RecordingHandler::default());
        let deps = deps_with(
            TokenResolution::AuthorizationRequired {
                authorization_url: "https://idp.test/authorize?state=1".to_string(),
            },
            handler.clone(),
        );

        let token = authorize(&context(), &deps).await.expect("authorizes");
        assert!(token.is_none());
        assert_eq!(
            *handler.urls.lock().expect("lock poisoned"),
            vec!["https://idp.test/authorize?state=1".to_string()]
        );
    }

    struct CompletesAfterUrl;

    #[async_trait]
    impl TokenBroker for CompletesAfterUrl {
        async fn resolve(
            &self,
            _context: &AuthorizationContext,
        ) -> Result<TokenResolution, AuthError> {
            Ok(TokenResolution::AuthorizationRequired {
                authorization_url: "https://idp.test/authorize?state=2".to_string(),
            })
        }

        async fn await_authorization(
            &self,
            _context: &AuthorizationContext,
            authorization_url: &str,
        ) -> Result<Option<AccessToken>, AuthError> {
            assert!(authorization_url.ends_with("state=2"));
            Ok(Some(AccessToken::new("after-consent")))
        }
    }

    #[tokio::test]
    async fn token_obtained_after_notification_is_returned() {
        let handler = Arc::new(RecordingHandler::default());
        let deps = DependencyMap::new();
        deps.insert::<Arc<dyn TokenBroker>>(Arc::new(CompletesAfterUrl));
        deps.insert::<Arc<dyn AuthUrlHandler>>(handler.clone());

        let token = authorize(&context(), &deps).await.expect("authorizes");
        assert_eq!(token, Some(AccessToken::new("after-consent")));
        assert_eq!(handler.urls.lock().expect("lock poisoned").len(), 1);
    }

    #[tokio::test]
    async fn empty_granted_token_counts_as_missing() {
        let handler = Arc::new(RecordingHandler::default());
        let deps = deps_with(TokenResolution::Granted(AccessToken::new("")), handler);

        let token = authorize(&context(), &deps).await.expect("authorizes");
        assert!(token.is_none());
    }

    #[tokio::test]
    async fn missing_broker_is_an_error() {
        let err = authorize(&context(), &DependencyMap::new())
            .await
            .expect_err("no broker registered");
        assert!(matches!(err, AuthError::BrokerUnavailable));
    }

    #[tokio::test]
    async fn relay_handler_forwards_url_as_status_line() {
        let (tx, rx) = crate::relay::channel::<String>();
        let handler = RelayAuthUrlHandler::new(tx.clone());
        handler.on_auth_url("https://idp.test/x").await;
        tx.finish();

        let items = rx.stream().collect::<Vec<_>>().await;
        assert_eq!(items, vec!["Authorization url: https://idp.test/x".to_string()]);
    }
}
