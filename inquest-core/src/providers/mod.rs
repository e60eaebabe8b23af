//! LLM provider implementations.
//!
//! Use `create_provider()` to instantiate the provider named in the config.

pub mod openai_compat;

use crate::brain::{LlmProvider, MockLlmProvider};
use crate::config::LlmConfig;
use crate::error::LlmError;
use std::sync::Arc;

pub use openai_compat::OpenAiCompatibleProvider;

/// Create an LLM provider based on the configuration.
///
/// - `"mock"` → `MockLlmProvider` (offline runs and demos)
/// - Everything else → `OpenAiCompatibleProvider`
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockLlmProvider::new())),
        "openai" | "azure" | "ollama" | "vllm" | "lmstudio" => {
            Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
        }
        other => {
            tracing::warn!(provider = %other, "Unknown provider, treating as OpenAI-compatible");
            Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            api_key_env: "INQUEST_TEST_PROVIDER_KEY_UNSET".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_provider_mock() {
        let provider = create_provider(&test_config("mock")).unwrap();
        assert_eq!(provider.model_name(), "mock-model");
    }

    #[test]
    fn test_create_provider_missing_key() {
        let result = create_provider(&test_config("openai"));
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
    }

    #[test]
    fn test_create_provider_unknown_with_local_url() {
        let config = LlmConfig {
            base_url: Some("http://127.0.0.1:8000/v1".to_string()),
            ..test_config("custom")
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "gpt-4o");
    }
}
