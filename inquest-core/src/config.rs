//! Configuration system for Inquest.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from the user config directory (`config.toml`) and/or
//! `.inquest/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::research::output::ReportFormat;

/// Upper bound on the number of sub-tasks a plan may contain.
pub const MAX_SUB_TASKS: usize = 6;

/// Top-level configuration for Inquest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InquestConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai" (any OpenAI-compatible endpoint) or "mock".
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Default temperature for generation.
    pub temperature: f32,
    /// Context window size for the model.
    pub context_window: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 4000,
            temperature: 0.3,
            context_window: 128_000,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.max_tokens >= self.context_window {
            warnings.push(format!(
                "max_tokens ({}) >= context_window ({}); responses may be truncated or fail",
                self.max_tokens, self.context_window
            ));
        }
        if self.timeout_secs == 0 {
            warnings.push("llm.timeout_secs is 0; every request will time out".to_string());
        }
        warnings
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Research pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Maximum evidence items gathered per sub-task.
    pub max_results: usize,
    /// Extracted text is truncated to this many characters.
    pub max_content_length: usize,
    /// Extracted documents shorter than this are dropped as unusable.
    pub min_content_chars: usize,
    /// Similarity at or above this flags a section for revision.
    pub originality_threshold: f64,
    /// Maximum revise + re-score cycles per section.
    pub max_iterations: usize,
    /// Maximum sub-task gathers in flight at once.
    pub max_concurrency: usize,
    /// Timeout for a single search, fetch or model call, in seconds.
    pub call_timeout_secs: u64,
    /// Optional wall-clock limit for the gathering stage, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,
    /// Characters of each source shown to the synthesizer.
    pub synthesis_excerpt_chars: usize,
    /// Temperature used when rewriting; defaults to twice the base temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_temperature: Option<f32>,
    /// Extra reference documents the originality scorer compares against.
    #[serde(default)]
    pub reference_corpus: Vec<PathBuf>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            max_content_length: 8000,
            min_content_chars: 50,
            originality_threshold: 0.8,
            max_iterations: 3,
            max_concurrency: 4,
            call_timeout_secs: 20,
            run_timeout_secs: None,
            synthesis_excerpt_chars: 3000,
            revision_temperature: None,
            reference_corpus: Vec::new(),
        }
    }
}

impl ResearchConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Effective rewrite temperature given the base model temperature.
    pub fn revision_temperature(&self, base: f32) -> f32 {
        self.revision_temperature
            .unwrap_or(base * 2.0)
            .clamp(0.0, 2.0)
    }
}

/// Web access settings shared by the search and fetch adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_redirects: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
            timeout_secs: 20,
            max_redirects: 5,
        }
    }
}

impl WebConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where reports and run archives are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub reports_dir: PathBuf,
    pub data_dir: PathBuf,
    pub formats: Vec<ReportFormat>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("reports"),
            data_dir: PathBuf::from("data"),
            formats: vec![ReportFormat::Markdown, ReportFormat::Pdf],
        }
    }
}

impl InquestConfig {
    /// Collect non-fatal warnings across all sections.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();
        if self.research.max_iterations == 0 {
            warnings.push(
                "research.max_iterations is 0; flagged sections will not be revised".to_string(),
            );
        }
        if self.research.max_results == 0 {
            warnings.push("research.max_results is 0; no evidence will be gathered".to_string());
        }
        if self.research.synthesis_excerpt_chars > self.research.max_content_length {
            warnings.push(format!(
                "synthesis_excerpt_chars ({}) exceeds max_content_length ({})",
                self.research.synthesis_excerpt_chars, self.research.max_content_length
            ));
        }
        warnings
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate_strict(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });

        if !(0.0..=1.0).contains(&self.research.originality_threshold) {
            return invalid(format!(
                "research.originality_threshold must be within [0, 1], got {}",
                self.research.originality_threshold
            ));
        }
        if self.research.max_concurrency == 0 {
            return invalid("research.max_concurrency must be at least 1".to_string());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return invalid(format!(
                "llm.temperature must be within [0, 2], got {}",
                self.llm.temperature
            ));
        }
        if self.llm.max_tokens < 100 {
            return invalid(format!(
                "llm.max_tokens must be at least 100, got {}",
                self.llm.max_tokens
            ));
        }
        Ok(())
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "inquest", "inquest")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `INQUEST_`)
/// 3. Workspace-local config (`.inquest/config.toml`)
/// 4. User config (`<config dir>/inquest/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&InquestConfig>,
) -> Result<InquestConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(InquestConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".inquest").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // INQUEST_LLM__MODEL, INQUEST_RESEARCH__MAX_ITERATIONS, etc.
    figment = figment.merge(Env::prefixed("INQUEST_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load configuration from one explicit file on top of the defaults.
pub fn load_config_file(path: &Path) -> Result<InquestConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    Figment::from(Serialized::defaults(InquestConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("INQUEST_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}
