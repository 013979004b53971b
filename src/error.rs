use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("tool schema must be a JSON object")]
    SchemaNotObject,
    #[error("tool schema must declare type=object")]
    RootTypeMustBeObject,
    #[error("required must be an array of strings")]
    InvalidRequired,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid tool arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("dependency missing: {0}")]
    MissingDependency(&'static str),
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error("authorization failed for {tool}: {source}")]
    Authorization {
        tool: String,
        #[source]
        source: AuthError,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no token broker registered")]
    BrokerUnavailable,
    #[error("unknown credential provider: {0}")]
    UnknownProvider(String),
    #[error("no access token available for {provider}")]
    TokenUnavailable { provider: String },
    #[error("unknown authorization session: {0}")]
    UnknownSession(String),
    #[error("invalid authorization endpoint for {provider}: {message}")]
    InvalidEndpoint { provider: String, message: String },
    #[error("token broker request failed: {0}")]
    Broker(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("relay already finished")]
    Closed,
    #[error("relay receiver dropped")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider response invalid: {0}")]
    Response(String),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("max iterations reached ({max_iterations})")]
    MaxIterationsReached { max_iterations: u32 },
    #[error("agent stream ended without final response")]
    MissingFinalResponse,
    #[error("agent configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingVar(&'static str),
    #[error("{name} is invalid: {message}")]
    InvalidVar { name: &'static str, message: String },
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime session id must be at least {min} characters, got {actual}")]
    InvalidSessionId { min: usize, actual: usize },
    #[error("runtime request failed: {0}")]
    Request(String),
    #[error("runtime returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("runtime response is not valid JSON: {0}")]
    Decode(String),
}
