//! Tool-calling agents whose tools reach third-party APIs on behalf of a user.
//!
//! - `Agent` loop over a `ChatModel`, with an Anthropic adapter
//! - Tools gated behind an access token (`ToolSpec::requires_access`),
//!   resolved through a pluggable `TokenBroker`
//! - `AgentApp`, which runs a turn in the background and streams status lines,
//!   authorization URLs, and the final answer through a relay
//! - Google Calendar and GitHub tools, plus a client for hosted runtimes

pub mod agent;
pub mod app;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod relay;
pub mod tools;

pub use agent::{Agent, AgentBuilder, AgentConfig, AgentEvent};
pub use app::{AgentApp, AssistantMessage, InvocationStream, StreamItem};
pub use auth::{
    AccessToken, AuthFlow, AuthUrlHandler, AuthorizationContext, InMemoryTokenBroker,
    OAuthProviderConfig, RelayAuthUrlHandler, TokenBroker, TokenResolution,
};
pub use client::{RuntimeClient, RuntimeClientConfig};
pub use config::AppConfig;
pub use error::{
    AgentError, AuthError, ConfigError, ProviderError, RelayError, RuntimeError, SchemaError,
    ToolError,
};
pub use llm::{
    AnthropicModel, AnthropicModelConfig, ChatModel, ModelCompletion, ModelMessage, ModelToolCall,
    ModelToolChoice, ModelToolDefinition,
};
pub use logging::init_logging;
pub use relay::{RelayReceiver, RelaySender};
pub use tools::{DependencyMap, MissingTokenPolicy, ToolContext, ToolOutcome, ToolSpec};
