//! Error types for the Inquest research core.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering the language model, source retrieval, configuration, rendering,
//! and pipeline domains.
//!
//! Only collaborator loss is fatal to a run. Per-source and per-section
//! failures are downgraded to [`crate::research::session::RunIssue`] records
//! by the controller and never surface through these types.

use std::path::PathBuf;

/// Top-level error type for the Inquest core library.
#[derive(Debug, thiserror::Error)]
pub enum InquestError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

impl LlmError {
    /// Whether this error means the provider as a whole is gone, as opposed
    /// to a single request having failed.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LlmError::Connection { .. } | LlmError::AuthFailed { .. })
    }
}

/// Outcomes of the search, fetch and extraction collaborators.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("Source not retrievable: {location} ({reason})")]
    NotRetrievable { location: String, reason: String },

    #[error("Content of {location} could not be parsed as {content_type}")]
    Unparseable {
        location: String,
        content_type: String,
    },

    #[error("Content of {location} is empty")]
    Empty { location: String },

    #[error("Timed out after {timeout_secs}s while reading {location}")]
    Timeout { location: String, timeout_secs: u64 },

    #[error("Search backend unavailable: {message}")]
    BackendUnavailable { message: String },
}

impl SourceError {
    /// Whether the backend itself is unreachable rather than one document.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SourceError::BackendUnavailable { .. })
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors raised by the pipeline controller.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Collaborator unavailable ({collaborator}): {message}")]
    CollaboratorUnavailable {
        collaborator: String,
        message: String,
    },

    #[error("Research query is empty")]
    EmptyQuery,

    #[error("Research run is finalized and can no longer change")]
    RunFinalized,

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// Errors from report renderers.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("No usable font found for PDF rendering (searched: {searched})")]
    FontUnavailable { searched: String },

    #[error("Failed to render {format} report: {message}")]
    Failed { format: String, message: String },
}

/// A type alias for results using the top-level `InquestError`.
pub type Result<T> = std::result::Result<T, InquestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_llm() {
        let err = InquestError::Llm(LlmError::ApiRequest {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "LLM error: API request failed: connection refused"
        );
    }

    #[test]
    fn test_error_display_source() {
        let err = InquestError::Source(SourceError::Empty {
            location: "https://example.com/a".into(),
        });
        assert_eq!(
            err.to_string(),
            "Source error: Content of https://example.com/a is empty"
        );
    }

    #[test]
    fn test_error_display_pipeline() {
        let err = InquestError::Pipeline(PipelineError::CollaboratorUnavailable {
            collaborator: "language model".into(),
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "Pipeline error: Collaborator unavailable (language model): connection refused"
        );
    }

    #[test]
    fn test_error_display_config() {
        let err = InquestError::Config(ConfigError::EnvVarMissing {
            var: "OPENAI_API_KEY".into(),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: Environment variable not set: OPENAI_API_KEY"
        );
    }

    #[test]
    fn test_llm_unavailability() {
        assert!(LlmError::Connection {
            message: "dns".into()
        }
        .is_unavailable());
        assert!(LlmError::AuthFailed {
            provider: "openai".into()
        }
        .is_unavailable());
        assert!(!LlmError::Timeout { timeout_secs: 20 }.is_unavailable());
        assert!(!LlmError::RateLimited {
            retry_after_secs: 5
        }
        .is_unavailable());
    }

    #[test]
    fn test_source_unparseable_is_distinct_from_empty() {
        let unparseable = SourceError::Unparseable {
            location: "a.pdf".into(),
            content_type: "application/pdf".into(),
        };
        let empty = SourceError::Empty {
            location: "a.pdf".into(),
        };
        assert_ne!(unparseable, empty);
        assert!(!unparseable.is_unavailable());
        assert!(
            SourceError::BackendUnavailable {
                message: "offline".into()
            }
            .is_unavailable()
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: InquestError = io_err.into();
        assert!(matches!(err, InquestError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: InquestError = serde_err.into();
        assert!(matches!(err, InquestError::Serialization(_)));
    }
}
