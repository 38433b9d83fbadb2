use std::sync::RwLock;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const GOOGLE_HOST: &str = "https://generativelanguage.googleapis.com";

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
    OpenAiResponses(OpenAiProviderConfig),
    Anthropic(AnthropicProviderConfig),
    Google(GoogleProviderConfig),
}

// Define specific config structs for each provider
#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GoogleProviderConfig {
    pub host: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// Host and key a client reads at the start of every call.
///
/// Both can be swapped while conversations are running; a call already in
/// flight keeps the values it started with.
#[derive(Debug)]
pub(crate) struct LiveCredentials {
    inner: RwLock<(String, String)>,
}

impl LiveCredentials {
    pub(crate) fn new(host: String, api_key: String) -> Self {
        Self {
            inner: RwLock::new((host, api_key)),
        }
    }

    /// (host, api_key) with any trailing slash removed from the host
    pub(crate) fn snapshot(&self) -> (String, String) {
        let guard = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        (guard.0.trim_end_matches('/').to_string(), guard.1.clone())
    }

    pub(crate) fn set_host(&self, host: &str) {
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.0 = host.to_string();
    }

    pub(crate) fn set_api_key(&self, api_key: &str) {
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.1 = api_key.to_string();
    }
}
