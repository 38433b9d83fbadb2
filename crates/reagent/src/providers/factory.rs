use strum_macros::{Display, EnumIter, EnumString};

use super::{
    anthropic::AnthropicProvider,
    base::Provider,
    configs::ProviderConfig,
    google::GoogleProvider,
    openai::OpenAiProvider,
    responses::OpenAiResponsesProvider,
};
use crate::errors::ProviderResult;

#[derive(EnumIter, EnumString, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum ProviderType {
    #[strum(serialize = "openai")]
    OpenAi,
    #[strum(serialize = "openai_responses")]
    OpenAiResponses,
    Anthropic,
    Google,
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderConfig::OpenAi(_) => ProviderType::OpenAi,
            ProviderConfig::OpenAiResponses(_) => ProviderType::OpenAiResponses,
            ProviderConfig::Anthropic(_) => ProviderType::Anthropic,
            ProviderConfig::Google(_) => ProviderType::Google,
        }
    }
}

pub fn get_provider(config: ProviderConfig) -> ProviderResult<Box<dyn Provider>> {
    match config {
        ProviderConfig::OpenAi(openai_config) => Ok(Box::new(OpenAiProvider::new(openai_config)?)),
        ProviderConfig::OpenAiResponses(openai_config) => {
            Ok(Box::new(OpenAiResponsesProvider::new(openai_config)?))
        }
        ProviderConfig::Anthropic(anthropic_config) => {
            Ok(Box::new(AnthropicProvider::new(anthropic_config)?))
        }
        ProviderConfig::Google(google_config) => Ok(Box::new(GoogleProvider::new(google_config)?)),
    }
}
