use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::oneshot;

use crate::auth::{AccessToken, AuthFlow, AuthorizationContext, TokenBroker, TokenResolution};
use crate::error::AuthError;

/// OAuth client registration for one credential provider.
#[derive(Clone, Debug)]
pub struct OAuthProviderConfig {
    pub authorization_endpoint: String,
    pub client_id: String,
}

impl OAuthProviderConfig {
    pub fn new(authorization_endpoint: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            authorization_endpoint: authorization_endpoint.into(),
            client_id: client_id.into(),
        }
    }

    pub fn google(client_id: impl Into<String>) -> Self {
        Self::new("https://accounts.google.com/o/oauth2/v2/auth", client_id)
    }

    pub fn github(client_id: impl Into<String>) -> Self {
        Self::new("https://github.com/login/oauth/authorize", client_id)
    }
}

/// How long a resolve call waits for the user to finish authorizing.
pub const DEFAULT_AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Abandoned sessions older than this are dropped when a new one starts.
const PENDING_SESSION_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct TokenKey {
    provider: String,
    scopes: Vec<String>,
    flow: AuthFlow,
}

impl TokenKey {
    fn new(provider: &str, scopes: &[String], flow: AuthFlow) -> Self {
        let mut scopes = scopes.to_vec();
        scopes.sort();
        scopes.dedup();
        Self {
            provider: provider.to_string(),
            scopes,
            flow,
        }
    }

    fn for_context(context: &AuthorizationContext) -> Self {
        Self::new(&context.provider_name, &context.scopes, context.auth_flow)
    }
}

#[derive(Clone, Debug)]
struct CachedToken {
    token: AccessToken,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_valid(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

#[derive(Debug)]
struct PendingSession {
    key: TokenKey,
    started_at: Instant,
    completion: oneshot::Sender<AccessToken>,
}

/// Process-local token broker.
///
/// Keeps tokens per provider, scope set and flow. Misses on a user federation
/// flow start a new authorization session whose redirect URL is returned to
/// the caller. [`InMemoryTokenBroker::complete_authorization`] stores the token
/// once the callback delivers it and wakes the caller waiting in
/// [`TokenBroker::await_authorization`].
#[derive(Debug)]
pub struct InMemoryTokenBroker {
    providers: RwLock<HashMap<String, OAuthProviderConfig>>,
    tokens: Mutex<HashMap<TokenKey, CachedToken>>,
    pending: Mutex<HashMap<String, PendingSession>>,
    waiters: Mutex<HashMap<String, oneshot::Receiver<AccessToken>>>,
    authorization_timeout: Duration,
}

impl Default for InMemoryTokenBroker {
    fn default() -> Self {
        Self {
            providers: RwLock::default(),
            tokens: Mutex::default(),
            pending: Mutex::default(),
            waiters: Mutex::default(),
            authorization_timeout: DEFAULT_AUTHORIZATION_TIMEOUT,
        }
    }
}

impl InMemoryTokenBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a gated call waits for the user to authorize. Zero
    /// disables waiting; the session then stays open for a later call.
    pub fn with_authorization_timeout(mut self, timeout: Duration) -> Self {
        self.authorization_timeout = timeout;
        self
    }

    pub fn with_provider(self, name: impl Into<String>, config: OAuthProviderConfig) -> Self {
        self.register_provider(name, config);
        self
    }

    pub fn register_provider(&self, name: impl Into<String>, config: OAuthProviderConfig) {
        self.providers
            .write()
            .expect("provider map lock poisoned")
            .insert(name.into(), config);
    }

    /// Seeds the cache, e.g. with a token obtained out of band.
    pub fn store_token(
        &self,
        provider: &str,
        scopes: &[&str],
        flow: AuthFlow,
        token: AccessToken,
        ttl: Option<Duration>,
    ) {
        let scopes = scopes.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let key = TokenKey::new(provider, &scopes, flow);
        self.insert_token(key, token, ttl);
    }

    /// Stores the token for a pending session identified by its `state` and
    /// hands it to the call waiting on that session, if any.
    pub fn complete_authorization(
        &self,
        state: &str,
        token: AccessToken,
        ttl: Option<Duration>,
    ) -> Result<(), AuthError> {
        let session = self
            .pending
            .lock()
            .expect("pending session lock poisoned")
            .remove(state)
            .ok_or_else(|| AuthError::UnknownSession(state.to_string()))?;

        // Drop the receiver if no call has claimed it yet.
        self.take_waiter(state);

        tracing::info!(provider = %session.key.provider, "authorization completed");
        self.insert_token(session.key, token.clone(), ttl);
        if session.completion.send(token).is_err() {
            tracing::debug!("no call was waiting on the completed session");
        }
        Ok(())
    }

    pub fn pending_sessions(&self) -> usize {
        self.pending
            .lock()
            .expect("pending session lock poisoned")
            .len()
    }

    /// `state` values of the sessions still waiting for a callback.
    pub fn pending_states(&self) -> Vec<String> {
        self.pending
            .lock()
            .expect("pending session lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn insert_token(&self, key: TokenKey, token: AccessToken, ttl: Option<Duration>) {
        let cached = CachedToken {
            token,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.tokens
            .lock()
            .expect("token cache lock poisoned")
            .insert(key, cached);
    }

    fn cached_token(&self, key: &TokenKey, force: bool) -> Option<AccessToken> {
        let mut tokens = self.tokens.lock().expect("token cache lock poisoned");
        if force {
            tokens.remove(key);
            return None;
        }

        let cached = tokens.get(key)?;
        if cached.is_valid(Instant::now()) {
            Some(cached.token.clone())
        } else {
            tokens.remove(key);
            None
        }
    }

    fn begin_authorization(
        &self,
        context: &AuthorizationContext,
        key: TokenKey,
    ) -> Result<String, AuthError> {
        let provider = self
            .providers
            .read()
            .expect("provider map lock poisoned")
            .get(&context.provider_name)
            .cloned()
            .ok_or_else(|| AuthError::UnknownProvider(context.provider_name.clone()))?;

        let state = uuid::Uuid::new_v4().simple().to_string();
        let url = authorization_url(&provider, context, &state).map_err(|message| {
            AuthError::InvalidEndpoint {
                provider: context.provider_name.clone(),
                message,
            }
        })?;

        let (completion, waiter) = oneshot::channel();
        let mut pending = self.pending.lock().expect("pending session lock poisoned");
        let mut waiters = self.waiters.lock().expect("waiter lock poisoned");

        // A new session supersedes earlier ones for the same token.
        pending.retain(|state, session| {
            let keep = session.key != key && session.started_at.elapsed() < PENDING_SESSION_TTL;
            if !keep {
                waiters.remove(state);
            }
            keep
        });

        pending.insert(
            state.clone(),
            PendingSession {
                key,
                started_at: Instant::now(),
                completion,
            },
        );
        waiters.insert(state, waiter);

        Ok(url)
    }

    fn take_waiter(&self, state: &str) -> Option<oneshot::Receiver<AccessToken>> {
        self.waiters
            .lock()
            .expect("waiter lock poisoned")
            .remove(state)
    }
}

fn state_param(authorization_url: &str) -> Option<String> {
    Url::parse(authorization_url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
}

fn authorization_url(
    provider: &OAuthProviderConfig,
    context: &AuthorizationContext,
    state: &str,
) -> Result<String, String> {
    let scope = context.scopes.join(" ");
    let url = Url::parse_with_params(
        &provider.authorization_endpoint,
        &[
            ("response_type", "code"),
            ("client_id", provider.client_id.as_str()),
            ("redirect_uri", context.callback_url.as_str()),
            ("scope", scope.as_str()),
            ("state", state),
        ],
    )
    .map_err(|err| err.to_string())?;
    Ok(url.into())
}

#[async_trait]
impl TokenBroker for InMemoryTokenBroker {
    async fn resolve(
        &self,
        context: &AuthorizationContext,
    ) -> Result<TokenResolution, AuthError> {
        let key = TokenKey::for_context(context);

        if let Some(token) = self.cached_token(&key, context.force_authentication) {
            return Ok(TokenResolution::Granted(token));
        }

        match context.auth_flow {
            AuthFlow::M2M => Err(AuthError::TokenUnavailable {
                provider: context.provider_name.clone(),
            }),
            AuthFlow::UserFederation => {
                let authorization_url = self.begin_authorization(context, key)?;
                Ok(TokenResolution::AuthorizationRequired { authorization_url })
            }
        }
    }

    async fn await_authorization(
        &self,
        context: &AuthorizationContext,
        authorization_url: &str,
    ) -> Result<Option<AccessToken>, AuthError> {
        let Some(state) = state_param(authorization_url) else {
            return Ok(None);
        };
        let Some(waiter) = self.take_waiter(&state) else {
            return Ok(None);
        };
        if self.authorization_timeout.is_zero() {
            return Ok(None);
        }

        tracing::info!(
            provider = %context.provider_name,
            timeout_secs = self.authorization_timeout.as_secs(),
            "waiting for authorization"
        );
        match tokio::time::timeout(self.authorization_timeout, waiter).await {
            Ok(Ok(token)) => Ok(Some(token)),
            Ok(Err(_)) => {
                tracing::debug!(provider = %context.provider_name, "authorization session superseded");
                Ok(None)
            }
            Err(_) => {
                tracing::warn!(provider = %context.provider_name, "authorization timed out");
                self.pending
                    .lock()
                    .expect("pending session lock poisoned")
                    .remove(&state);
                Ok(None)
            }
        }
    }
}
