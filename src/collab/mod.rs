// src/collab/mod.rs — Collaborator layer: text generator and evaluation oracle

pub mod instrument;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::template::PromptTemplate;
use crate::infra::errors::RepromptError;

/// The black-box text generation collaborator.
///
/// Implementations substitute the template's placeholders and return the
/// generated text. Transient failures should be reported with
/// `retriable: true` so the pipeline's backoff policy can re-attempt them.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        template: &PromptTemplate,
        system_prompt: &str,
        context: &str,
        user_query: &str,
    ) -> Result<String, RepromptError>;
}

/// The black-box evaluation oracle.
///
/// Configured with a fixed detector set at construction time; scores a
/// generated response for instruction adherence, groundedness and toxicity.
/// Authentication errors must surface as `RepromptError::Auth` — they are
/// never retried.
#[async_trait]
pub trait ResponseEvaluator: Send + Sync {
    async fn evaluate(&self, request: &EvalRequest) -> Result<EvaluationResult, RepromptError>;
}

/// One detector activation. `explain` asks the oracle for per-instruction
/// explanations alongside the scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSpec {
    pub name: String,
    pub explain: bool,
}

/// The detector set sent with every evaluation request. Resolved once at
/// pipeline construction; there is no dynamic detector discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub detectors: Vec<DetectorSpec>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            detectors: ["instruction_adherence", "groundedness", "toxicity"]
                .into_iter()
                .map(|name| DetectorSpec {
                    name: name.into(),
                    explain: true,
                })
                .collect(),
        }
    }
}

/// Payload for one evaluation call.
#[derive(Debug, Clone, Serialize)]
pub struct EvalRequest {
    pub query: String,
    pub instructions: Vec<String>,
    pub generated_text: String,
    pub context: String,
    pub config: DetectorConfig,
    pub publish: bool,
    pub model_name: String,
    pub application_name: String,
}

/// Per-instruction rating from a detector. `label` is present for
/// adherence/groundedness (pass/fail) and absent for toxicity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionRating {
    pub instruction: String,
    pub follow_probability: f64,
    pub label: Option<bool>,
    pub explanation: String,
}

/// One detector's section of an evaluation result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorResult {
    pub score: f64,
    pub instructions_list: Vec<InstructionRating>,
}

/// The full evaluation result: one optional section per known detector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub instruction_adherence: Option<DetectorResult>,
    pub groundedness: Option<DetectorResult>,
    pub toxicity: Option<DetectorResult>,
}

impl EvaluationResult {
    /// Overall scores per detector, for telemetry.
    pub fn scores(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(ref d) = self.instruction_adherence {
            map.insert("instruction_adherence".into(), d.score.into());
        }
        if let Some(ref d) = self.groundedness {
            map.insert("groundedness".into(), d.score.into());
        }
        if let Some(ref d) = self.toxicity {
            map.insert("toxicity".into(), d.score.into());
        }
        serde_json::Value::Object(map)
    }
}
