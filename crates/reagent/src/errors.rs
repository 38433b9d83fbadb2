use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised by a plugin while executing one tool call.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Tool unavailable: {0}")]
    Unavailable(String),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Errors surfaced by an LLM client. Every provider maps its transport and
/// HTTP failures into one of these kinds.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Authentication failed ({status}): {message}. Please re-authenticate or update your API key.")]
    Auth { status: u16, message: String },

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Provider server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("Request failed ({status}): {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Empty response from provider: {0}")]
    EmptyResponse(String),

    #[error("Malformed response from provider: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    pub fn is_context_overflow(&self) -> bool {
        matches!(self, ProviderError::ContextLengthExceeded(_))
    }

    /// Whether a higher layer could reasonably retry the same request later.
    /// The agent itself never retries these.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transport(_)
                | ProviderError::Timeout(_)
                | ProviderError::RateLimited(_)
                | ProviderError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_decode() {
            ProviderError::MalformedResponse(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::MalformedResponse(err.to_string())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that terminate one `Agent::execute` call.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Context window still exceeded after summarizing the conversation")]
    ContextOverflow,

    #[error("The model returned an empty final response")]
    EmptyFinalResponse,

    #[error("Reached the maximum of {0} iterations without a final response")]
    MaxIterations(usize),

    #[error("Execution was cancelled")]
    Cancelled,

    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: set the {env_var} environment variable")]
    MissingEnvVar { env_var: String },

    #[error(transparent)]
    Other(#[from] config::ConfigError),
}

/// Environment variable that supplies a provider field
pub fn to_env_var(field: &str) -> String {
    match field {
        "provider" | "type" => "REAGENT_PROVIDER__TYPE".to_string(),
        field => format!(
            "REAGENT_PROVIDER__{}",
            field.rsplit('.').next().unwrap_or(field).to_uppercase()
        ),
    }
}
