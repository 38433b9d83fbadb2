use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::errors::{to_env_var, ConfigError};
use crate::providers::configs::{
    AnthropicProviderConfig, GoogleProviderConfig, OpenAiProviderConfig, ProviderConfig,
    ANTHROPIC_HOST, GOOGLE_HOST, OPENAI_HOST,
};
use crate::providers::factory::ProviderType;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderSettings {
    #[serde(rename = "openai")]
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    #[serde(rename = "openai_responses")]
    OpenAiResponses {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    #[serde(rename = "anthropic")]
    Anthropic {
        #[serde(default = "default_anthropic_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_anthropic_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    #[serde(rename = "google")]
    Google {
        #[serde(default = "default_google_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_google_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
}

impl ProviderSettings {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderSettings::OpenAi { .. } => ProviderType::OpenAi,
            ProviderSettings::OpenAiResponses { .. } => ProviderType::OpenAiResponses,
            ProviderSettings::Anthropic { .. } => ProviderType::Anthropic,
            ProviderSettings::Google { .. } => ProviderType::Google,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ProviderSettings::OpenAi { model, .. }
            | ProviderSettings::OpenAiResponses { model, .. }
            | ProviderSettings::Anthropic { model, .. }
            | ProviderSettings::Google { model, .. } => model,
        }
    }

    fn sampling(&self) -> (Option<f32>, Option<i32>) {
        match self {
            ProviderSettings::OpenAi {
                temperature,
                max_tokens,
                ..
            }
            | ProviderSettings::OpenAiResponses {
                temperature,
                max_tokens,
                ..
            }
            | ProviderSettings::Anthropic {
                temperature,
                max_tokens,
                ..
            }
            | ProviderSettings::Google {
                temperature,
                max_tokens,
                ..
            } => (*temperature, *max_tokens),
        }
    }

    // Convert to the provider layer config
    pub fn into_config(self, timeout: Duration) -> ProviderConfig {
        match self {
            ProviderSettings::OpenAi { host, api_key, .. } => {
                ProviderConfig::OpenAi(OpenAiProviderConfig {
                    host,
                    api_key,
                    timeout,
                })
            }
            ProviderSettings::OpenAiResponses { host, api_key, .. } => {
                ProviderConfig::OpenAiResponses(OpenAiProviderConfig {
                    host,
                    api_key,
                    timeout,
                })
            }
            ProviderSettings::Anthropic { host, api_key, .. } => {
                ProviderConfig::Anthropic(AnthropicProviderConfig {
                    host,
                    api_key,
                    timeout,
                })
            }
            ProviderSettings::Google { host, api_key, .. } => {
                ProviderConfig::Google(GoogleProviderConfig {
                    host,
                    api_key,
                    timeout,
                })
            }
        }
    }
}

/// Knobs for the agent loop and its summarization
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Messages kept verbatim when older history is summarized
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
    /// Fraction of the context window at which history is summarized
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold: f64,
    /// Overrides the built-in per-model table
    #[serde(default)]
    pub context_window: Option<usize>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<i32>,
    #[serde(default)]
    pub enable_web_search: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            keep_recent: default_keep_recent(),
            summarize_threshold: default_summarize_threshold(),
            context_window: None,
            request_timeout_secs: default_request_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: None,
            enable_web_search: false,
        }
    }
}

impl AgentSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub provider: ProviderSettings,
    #[serde(default)]
    pub agent: AgentSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Defaults, then the optional TOML file, then `REAGENT_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Agent defaults
            .set_default("agent.max_iterations", default_max_iterations() as i64)?
            .set_default("agent.keep_recent", default_keep_recent() as i64)?
            .set_default("agent.summarize_threshold", default_summarize_threshold())?
            .set_default(
                "agent.request_timeout_secs",
                default_request_timeout_secs() as i64,
            )?
            .set_default("agent.temperature", default_temperature() as f64)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let config = builder
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("REAGENT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // Try to deserialize the configuration
        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        // Handle missing field errors specially
        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // Extract field name from error message "missing field `type`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .split('`')
                        .next()
                        .unwrap_or_default();
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }

    /// Agent settings with any provider-level sampling overrides applied
    pub fn agent_settings(&self) -> AgentSettings {
        let (temperature, max_tokens) = self.provider.sampling();
        AgentSettings {
            temperature: temperature.unwrap_or(self.agent.temperature),
            max_tokens: max_tokens.or(self.agent.max_tokens),
            ..self.agent.clone()
        }
    }

    pub fn provider_config(&self) -> ProviderConfig {
        self.provider
            .clone()
            .into_config(self.agent.request_timeout())
    }
}

fn default_openai_host() -> String {
    OPENAI_HOST.to_string()
}

fn default_anthropic_host() -> String {
    ANTHROPIC_HOST.to_string()
}

fn default_google_host() -> String {
    GOOGLE_HOST.to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}

fn default_google_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_max_iterations() -> usize {
    25
}

fn default_keep_recent() -> usize {
    10
}

fn default_summarize_threshold() -> f64 {
    0.8
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_temperature() -> f32 {
    0.7
}
