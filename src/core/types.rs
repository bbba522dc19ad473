// src/core/types.rs — Core domain types

use serde::{Deserialize, Serialize};

/// Placeholder substituted when the caller provides no system prompt.
pub const NO_SYSTEM_PROMPT: &str = "[no system prompt provided]";
/// Placeholder substituted when the caller provides no context.
pub const NO_CONTEXT: &str = "[no context provided]";

/// Normalized inputs for one run. Strings may be empty but never absent past
/// the pipeline boundary; missing system prompt/context are replaced by the
/// literal placeholder constants upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptContext {
    pub system_prompt: String,
    pub context: String,
    pub user_query: String,
    pub user_instructions: Vec<String>,
}

impl PromptContext {
    pub fn new(
        user_query: impl Into<String>,
        system_prompt: Option<String>,
        context: Option<String>,
        user_instructions: Vec<String>,
    ) -> Self {
        Self {
            system_prompt: system_prompt.unwrap_or_else(|| NO_SYSTEM_PROMPT.into()),
            context: context.unwrap_or_else(|| NO_CONTEXT.into()),
            user_query: user_query.into(),
            user_instructions,
        }
    }
}

/// One instruction the response failed, per the evaluation oracle.
///
/// Two failure criteria coexist: adherence/groundedness entries fail when
/// their label is false; toxicity entries fail when their follow probability
/// drops below the toxicity threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedInstruction {
    pub kind: String,
    pub source: String,
    pub instruction: String,
    pub score: f64,
    pub explanation: String,
}

/// What one generate/evaluate pass produced. The full set is kept for the
/// run's lifetime so the best iteration can be selected at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationOutput {
    pub response_text: String,
    pub residual_error_score: f64,
    pub failed_instructions_count: usize,
}

/// Why the correction loop ended (or chose to keep going) on a given pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    AllInstructionsAdhered,
    MaxIterationsReached,
    Continue,
    ContinueToxicity,
    LatencyLimitExceeded,
    RepromptingFailed,
    UnknownError,
}

impl StopReason {
    /// True for the variants that end the loop.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StopReason::Continue | StopReason::ContinueToxicity)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::AllInstructionsAdhered => "all_instructions_adhered",
            StopReason::MaxIterationsReached => "max_iterations_reached",
            StopReason::Continue => "continue",
            StopReason::ContinueToxicity => "continue_toxicity",
            StopReason::LatencyLimitExceeded => "latency_limit_exceeded",
            StopReason::RepromptingFailed => "reprompting_failed",
            StopReason::UnknownError => "unknown_error",
        };
        write!(f, "{}", s)
    }
}

/// Final result returned to the caller. Telemetry and summary are included
/// only when the corresponding config flags are set.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub best_response: String,
    pub telemetry: Option<Vec<serde_json::Value>>,
    pub summary: Option<String>,
}
