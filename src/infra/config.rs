// src/infra/config.rs — Pipeline configuration (validated, TOML-loadable)

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::infra::errors::RepromptError;

/// Threshold below which a toxicity follow probability counts as a failure.
///
/// The direction is fixed: lower follow probability means less safe, so
/// entries *below* the threshold fail. Override per run via
/// `RepromptConfig::toxicity_threshold`.
pub const DEFAULT_TOXICITY_THRESHOLD: f64 = 0.25;

/// Policy object for one pipeline run. Validated once at pipeline
/// construction and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepromptConfig {
    /// Publish evaluation results to the evaluation backend.
    #[serde(default)]
    pub publish: bool,

    /// Upper bound on generate/evaluate cycles. Must be >= 1.
    pub max_iterations: u32,

    /// API key for the evaluation backend. Required; there is no
    /// environment-variable fallback.
    pub api_key: String,

    /// Model identifier reported to the evaluation backend.
    #[serde(default)]
    pub model_name: String,

    /// Application identifier reported to the evaluation backend.
    #[serde(default)]
    pub application_name: String,

    /// Include the sanitized telemetry trail in the run result.
    #[serde(default)]
    pub return_telemetry: bool,

    /// Include the one-line run summary in the run result.
    #[serde(default)]
    pub return_summary: bool,

    /// Soft wall-clock budget for the whole run, in milliseconds.
    /// Checked between iterations only; an in-flight call is never cut off.
    #[serde(default)]
    pub latency_limit_ms: Option<u64>,

    /// Retry attempts for the text generator.
    #[serde(default = "default_max_retries")]
    pub user_model_max_retries: u32,

    /// Retry attempts for the evaluation oracle.
    #[serde(default = "default_max_retries")]
    pub feedback_model_max_retries: u32,

    /// Toxicity failure threshold, see [`DEFAULT_TOXICITY_THRESHOLD`].
    #[serde(default = "default_toxicity_threshold")]
    pub toxicity_threshold: f64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_toxicity_threshold() -> f64 {
    DEFAULT_TOXICITY_THRESHOLD
}

impl Default for RepromptConfig {
    fn default() -> Self {
        Self {
            publish: false,
            max_iterations: 2,
            api_key: String::new(),
            model_name: String::new(),
            application_name: String::new(),
            return_telemetry: false,
            return_summary: false,
            latency_limit_ms: None,
            user_model_max_retries: default_max_retries(),
            feedback_model_max_retries: default_max_retries(),
            toxicity_threshold: DEFAULT_TOXICITY_THRESHOLD,
        }
    }
}

impl RepromptConfig {
    /// Check the invariants that make a config usable for a run.
    pub fn validate(&self) -> Result<(), RepromptError> {
        if self.max_iterations < 1 {
            return Err(RepromptError::Config(
                "max_iterations must be >= 1".into(),
            ));
        }
        if self.api_key.trim().is_empty() {
            return Err(RepromptError::Config("api_key is required".into()));
        }
        if !(0.0..=1.0).contains(&self.toxicity_threshold) {
            return Err(RepromptError::Config(
                "toxicity_threshold must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RepromptConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
