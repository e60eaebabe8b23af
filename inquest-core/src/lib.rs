//! # Inquest Core
//!
//! Core library for the Inquest research pipeline.
//! Provides the pipeline controller and its collaborator roles, the LLM
//! interface (brain), provider implementations, configuration, run
//! persistence, and fundamental types.

pub mod brain;
pub mod config;
pub mod error;
pub mod persistence;
pub mod providers;
pub mod research;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{LlmProvider, MockLlmProvider};
pub use config::{InquestConfig, LlmConfig, OutputConfig, ResearchConfig, WebConfig, load_config};
pub use error::{InquestError, Result};
pub use providers::create_provider;
pub use research::{Collaborators, PipelineController, ResearchReport, ResearchRun, RunPhase};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
