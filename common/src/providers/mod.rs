use std::env;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use rig::completion::Prompt;
use rig::providers::{deepseek, gemini, openai};

use crate::error::ModelError;

/// A prompt-in / text-out completion endpoint.
///
/// Every agent talks to its model through this seam: one call, one prompt, no
/// conversation state carried between calls. Implementations must be safe to
/// share across concurrently running requests.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Human readable identifier, used in logs.
    fn name(&self) -> &str;

    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String, ModelError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelProvider {
    OpenAI,
    DeepSeek,
    Gemini,
}

// Default model per provider when no explicit model is configured.
const DEFAULT_MODELS: &[(ModelProvider, &str)] = &[
    (ModelProvider::OpenAI, "gpt-4o"),
    (ModelProvider::DeepSeek, "deepseek-chat"),
    (ModelProvider::Gemini, "gemini-2.0-flash"),
];

impl ModelProvider {
    pub fn api_key_var(&self) -> &'static str {
        match self {
            ModelProvider::OpenAI => "OPENAI_API_KEY",
            ModelProvider::DeepSeek => "DEEPSEEK_API_KEY",
            ModelProvider::Gemini => "GEMINI_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        DEFAULT_MODELS
            .iter()
            .find(|(provider, _)| provider == self)
            .map(|(_, model)| *model)
            .unwrap_or("gpt-4o")
    }
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelProvider::OpenAI => "openai",
            ModelProvider::DeepSeek => "deepseek",
            ModelProvider::Gemini => "gemini",
        };
        f.write_str(name)
    }
}

impl FromStr for ModelProvider {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ModelProvider::OpenAI),
            "deepseek" => Ok(ModelProvider::DeepSeek),
            "gemini" => Ok(ModelProvider::Gemini),
            other => Err(ModelError::Configuration(format!(
                "unknown model provider '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone)]
enum ProviderClient {
    OpenAI(openai::Client),
    DeepSeek(deepseek::Client),
    Gemini(gemini::Client),
}

/// [`LanguageModel`] backed by one of the rig-core provider clients.
#[derive(Clone)]
pub struct RigModel {
    provider: ModelProvider,
    model: String,
    label: String,
    temperature: f64,
    client: ProviderClient,
}

impl RigModel {
    pub fn new(provider: ModelProvider, api_key: &str, model: impl Into<String>) -> Self {
        let model = model.into();
        let client = match provider {
            ModelProvider::OpenAI => ProviderClient::OpenAI(openai::Client::new(api_key)),
            ModelProvider::DeepSeek => ProviderClient::DeepSeek(deepseek::Client::new(api_key)),
            ModelProvider::Gemini => ProviderClient::Gemini(gemini::Client::new(api_key)),
        };

        Self {
            label: format!("{}/{}", provider, model),
            provider,
            model,
            temperature: 0.2,
            client,
        }
    }

    /// Reads the provider's API key from the environment.
    pub fn from_env(provider: ModelProvider, model: impl Into<String>) -> Result<Self, ModelError> {
        let api_key = env::var(provider.api_key_var()).map_err(|_| {
            ModelError::Configuration(format!("{} not found", provider.api_key_var()))
        })?;

        Ok(Self::new(provider, &api_key, model))
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn provider(&self) -> ModelProvider {
        self.provider
    }
}

#[async_trait]
impl LanguageModel for RigModel {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String, ModelError> {
        tracing::debug!(model = %self.label, prompt_chars = prompt.len(), "Sending completion request");

        let response = match &self.client {
            ProviderClient::OpenAI(client) => {
                let agent = client
                    .agent(&self.model)
                    .preamble(preamble)
                    .temperature(self.temperature)
                    .build();
                agent.prompt(prompt).await
            }
            ProviderClient::DeepSeek(client) => {
                let agent = client
                    .agent(&self.model)
                    .preamble(preamble)
                    .temperature(self.temperature)
                    .build();
                agent.prompt(prompt).await
            }
            ProviderClient::Gemini(client) => {
                let agent = client
                    .agent(&self.model)
                    .preamble(preamble)
                    .temperature(self.temperature)
                    .build();
                agent.prompt(prompt).await
            }
        };

        let text = response.map_err(|e| {
            tracing::warn!(model = %self.label, error = %e, "Completion request failed");
            ModelError::Request(e.to_string())
        })?;

        if text.trim().is_empty() {
            return Err(ModelError::EmptyCompletion);
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_names_case_insensitively() {
        assert_eq!("OpenAI".parse::<ModelProvider>().unwrap(), ModelProvider::OpenAI);
        assert_eq!(" deepseek ".parse::<ModelProvider>().unwrap(), ModelProvider::DeepSeek);
        assert_eq!("GEMINI".parse::<ModelProvider>().unwrap(), ModelProvider::Gemini);
        assert!(matches!(
            "cohere".parse::<ModelProvider>(),
            Err(ModelError::Configuration(_))
        ));
    }

    #[test]
    fn every_provider_has_a_default_model() {
        for provider in [ModelProvider::OpenAI, ModelProvider::DeepSeek, ModelProvider::Gemini] {
            assert!(!provider.default_model().is_empty());
            assert!(provider.api_key_var().ends_with("_API_KEY"));
        }
    }

    #[test]
    fn label_combines_provider_and_model() {
        let model = RigModel::new(ModelProvider::DeepSeek, "test-key", "deepseek-chat");
        assert_eq!(model.name(), "deepseek/deepseek-chat");
        assert_eq!(model.provider(), ModelProvider::DeepSeek);
    }
}
