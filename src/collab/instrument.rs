// src/collab/instrument.rs — Call-then-evaluate composition
//
// Explicit replacement for decorator-style instrumentation: wrap any text
// generator together with an evaluation oracle, so every call is scored with
// the configured detector set before the text is returned.

use std::sync::Arc;

use super::{DetectorConfig, EvalRequest, EvaluationResult, ResponseEvaluator, TextGenerator};
use crate::core::template::PromptTemplate;
use crate::infra::errors::RepromptError;

/// A generator/oracle pair. `call` runs the wrapped generator and then the
/// evaluation in sequence, returning both the text and its evaluation.
pub struct Instrumented<G> {
    generator: G,
    evaluator: Arc<dyn ResponseEvaluator>,
    detectors: DetectorConfig,
}

impl<G: TextGenerator> Instrumented<G> {
    pub fn new(generator: G, evaluator: Arc<dyn ResponseEvaluator>) -> Self {
        Self {
            generator,
            evaluator,
            detectors: DetectorConfig::default(),
        }
    }

    pub fn with_detectors(mut self, detectors: DetectorConfig) -> Self {
        self.detectors = detectors;
        self
    }

    pub async fn call(
        &self,
        template: &PromptTemplate,
        system_prompt: &str,
        context: &str,
        user_query: &str,
        instructions: &[String],
    ) -> Result<(String, EvaluationResult), RepromptError> {
        let text = self
            .generator
            .generate(template, system_prompt, context, user_query)
            .await?;

        let request = EvalRequest {
            query: user_query.to_string(),
            instructions: instructions.to_vec(),
            generated_text: text.clone(),
            context: context.to_string(),
            config: self.detectors.clone(),
            publish: false,
            model_name: String::new(),
            application_name: String::new(),
        };
        let evaluation = self.evaluator.evaluate(&request).await?;

        Ok((text, evaluation))
    }
}
