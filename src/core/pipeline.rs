// src/core/pipeline.rs — Reprompting pipeline orchestrator
//
// Drives the generate -> evaluate -> decide -> correct loop. One instance
// owns one telemetry log and the iteration outputs of its current run;
// instances share no mutable state, so callers may run several pipelines
// concurrently from a worker pool.

use std::sync::Arc;
use std::time::Instant;

use crate::collab::retry::{rate_limit_delay, should_retry, RetryPolicy};
use crate::collab::{
    DetectorConfig, EvalRequest, EvaluationResult, ResponseEvaluator, TextGenerator,
};
use crate::core::correction::{build_corrective_prompt, CorrectionPayload};
use crate::core::scoring::{
    failed_instructions, failed_instructions_count, failed_toxicity_instructions, is_toxic,
    residual_error_score,
};
use crate::core::telemetry::{TelemetryEntry, TelemetryLog};
use crate::core::template::PromptTemplate;
use crate::core::types::{IterationOutput, PromptContext, RunResult, StopReason};
use crate::infra::config::RepromptConfig;
use crate::infra::errors::RepromptError;

/// Returned when no iteration produced a usable score. The run completed
/// normally, so this is a sentinel response rather than an error.
pub const NO_VALID_RESPONSE: &str = "No valid response generated.";

/// Fraction of the latency budget after which the loop stops taking new
/// iterations. The check is advisory: it never interrupts an in-flight call.
const LATENCY_BUDGET_FRACTION: f64 = 0.75;

/// The central orchestrator for the response-correction loop.
pub struct RepromptingPipeline {
    generator: Arc<dyn TextGenerator>,
    evaluator: Arc<dyn ResponseEvaluator>,
    config: RepromptConfig,
    detectors: DetectorConfig,
    telemetry: TelemetryLog,
}

impl RepromptingPipeline {
    /// Build a pipeline around injected collaborator handles. The config is
    /// validated here and immutable afterwards.
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        evaluator: Arc<dyn ResponseEvaluator>,
        config: RepromptConfig,
    ) -> Result<Self, RepromptError> {
        config.validate()?;
        Ok(Self {
            generator,
            evaluator,
            config,
            detectors: DetectorConfig::default(),
            telemetry: TelemetryLog::new(),
        })
    }

    pub fn telemetry(&self) -> &TelemetryLog {
        &self.telemetry
    }

    /// Run the full correction loop for one query.
    pub async fn run(
        &mut self,
        user_query: &str,
        system_prompt: Option<String>,
        context: Option<String>,
        user_instructions: Vec<String>,
    ) -> Result<RunResult, RepromptError> {
        if user_query.trim().is_empty() {
            return Err(RepromptError::Config(
                "user_query must be a non-empty string".into(),
            ));
        }

        let ctx = PromptContext::new(user_query, system_prompt, context, user_instructions);
        let mut template = original_template();
        let threshold = self.config.toxicity_threshold;

        let start = Instant::now();
        let mut iterations: Vec<IterationOutput> = Vec::new();

        for iteration in 1..=self.config.max_iterations {
            // GENERATING
            let response = self.generate_with_retry(&template, &ctx).await?;

            // EVALUATING
            let request = self.eval_request(&ctx, &response);
            let eval = self.evaluate_with_retry(&request).await?;

            let residual = residual_error_score(&eval);
            let failed_count = failed_instructions_count(&eval, threshold);
            iterations.push(IterationOutput {
                response_text: response.clone(),
                residual_error_score: residual,
                failed_instructions_count: failed_count,
            });

            // DECIDING
            let elapsed_ms = start.elapsed().as_millis() as u64;
            let reason = decide(&self.config, iteration, elapsed_ms, &eval, failed_count);

            if reason.is_terminal() {
                self.record(
                    iteration, elapsed_ms, &eval, residual, failed_count, reason, &template,
                    &response,
                );
                break;
            }

            // CORRECTING — build before emitting so each pass records exactly
            // one entry, tagged RepromptingFailed if the build blows up
            let payload = CorrectionPayload {
                system_prompt: ctx.system_prompt.clone(),
                user_query: ctx.user_query.clone(),
                context: ctx.context.clone(),
                generated_text: response.clone(),
                instructions: ctx.user_instructions.clone(),
            };
            match build_corrective_prompt(&eval, &payload, threshold) {
                Ok(corrective) => {
                    self.record(
                        iteration, elapsed_ms, &eval, residual, failed_count, reason, &template,
                        &response,
                    );
                    template = corrective;
                }
                Err(e) => {
                    tracing::error!(iteration, "Corrective prompt construction failed: {}", e);
                    self.record(
                        iteration,
                        elapsed_ms,
                        &eval,
                        residual,
                        failed_count,
                        StopReason::RepromptingFailed,
                        &template,
                        &response,
                    );
                    return Err(e);
                }
            }
        }

        Ok(self.finish(&iterations))
    }

    /// Select the best iteration (stable min of residual error) and assemble
    /// the run result.
    fn finish(&self, iterations: &[IterationOutput]) -> RunResult {
        let best = iterations
            .iter()
            .filter(|o| o.residual_error_score.is_finite())
            .min_by(|a, b| {
                a.residual_error_score
                    .partial_cmp(&b.residual_error_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        let best_response = match best {
            Some(o) => o.response_text.clone(),
            None => NO_VALID_RESPONSE.into(),
        };

        let summary = self.config.return_summary.then(|| {
            let n = iterations.len();
            let k = best.map(|o| o.failed_instructions_count).unwrap_or(0);
            format!(
                "{} iteration{}, {} failed instructions remaining",
                n,
                if n == 1 { "" } else { "s" },
                k
            )
        });

        RunResult {
            best_response,
            telemetry: self
                .config
                .return_telemetry
                .then(|| self.telemetry.get_all(false)),
            summary,
        }
    }

    fn eval_request(&self, ctx: &PromptContext, generated_text: &str) -> EvalRequest {
        EvalRequest {
            query: ctx.user_query.clone(),
            instructions: ctx.user_instructions.clone(),
            generated_text: generated_text.to_string(),
            context: ctx.context.clone(),
            config: self.detectors.clone(),
            publish: self.config.publish,
            model_name: self.config.model_name.clone(),
            application_name: self.config.application_name.clone(),
        }
    }

    async fn generate_with_retry(
        &self,
        template: &PromptTemplate,
        ctx: &PromptContext,
    ) -> Result<String, RepromptError> {
        let policy = RetryPolicy::with_max_retries(self.config.user_model_max_retries);
        let mut last_error = None;

        for attempt in 0..=policy.max_retries {
            match self
                .generator
                .generate(template, &ctx.system_prompt, &ctx.context, &ctx.user_query)
                .await
            {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if !should_retry(&e) || attempt == policy.max_retries {
                        return Err(e);
                    }
                    let delay = policy.delay_for_attempt(attempt, rate_limit_delay(&e));
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying generator after error: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(RepromptError::Generator {
            message: "All retries exhausted".into(),
            retriable: false,
        }))
    }

    async fn evaluate_with_retry(
        &self,
        request: &EvalRequest,
    ) -> Result<EvaluationResult, RepromptError> {
        let policy = RetryPolicy::with_max_retries(self.config.feedback_model_max_retries);
        let mut last_error = None;

        for attempt in 0..=policy.max_retries {
            match self.evaluator.evaluate(request).await {
                Ok(eval) => return Ok(eval),
                // Auth errors propagate immediately via should_retry
                Err(e) => {
                    if !should_retry(&e) || attempt == policy.max_retries {
                        return Err(e);
                    }
                    let delay = policy.delay_for_attempt(attempt, rate_limit_delay(&e));
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying evaluator after error: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(RepromptError::Evaluator {
            message: "All retries exhausted".into(),
            retriable: false,
        }))
    }

    /// Emit one telemetry entry. Failures are logged, never fatal.
    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        iteration: u32,
        cumulative_latency_ms: u64,
        eval: &EvaluationResult,
        residual_error: f64,
        failed_instructions_count: usize,
        stop_reason: StopReason,
        template: &PromptTemplate,
        response_text: &str,
    ) {
        let mut feedback = failed_instructions(eval);
        feedback.extend(failed_toxicity_instructions(
            eval,
            self.config.toxicity_threshold,
        ));

        let entry = TelemetryEntry {
            iteration,
            cumulative_latency_ms,
            scores: eval.scores(),
            response_feedback: serde_json::to_value(&feedback)
                .unwrap_or(serde_json::Value::Null),
            residual_error,
            failed_instructions_count,
            stop_reason,
            prompt_template_text: template.text().to_string(),
            response_text: response_text.to_string(),
        };

        if let Err(e) = self.telemetry.emit(&entry) {
            tracing::warn!(iteration, "Telemetry emission failed: {}", e);
        }
    }
}

/// One-shot entry point: build a pipeline, run a single query, return the
/// result along with whatever the config flags ask for.
pub async fn run(
    generator: Arc<dyn TextGenerator>,
    evaluator: Arc<dyn ResponseEvaluator>,
    config: RepromptConfig,
    user_query: &str,
    system_prompt: Option<String>,
    context: Option<String>,
    user_instructions: Vec<String>,
) -> Result<RunResult, RepromptError> {
    let mut pipeline = RepromptingPipeline::new(generator, evaluator, config)?;
    pipeline
        .run(user_query, system_prompt, context, user_instructions)
        .await
}

/// The first-iteration template: all three bindings open.
fn original_template() -> PromptTemplate {
    PromptTemplate::new("{system_prompt}\n\nContext:\n{context}\n\nUser query:\n{user_query}")
}

/// Stop decision, evaluated in fixed priority order. The iteration cap is
/// checked before any quality signal, so `max_iterations = 1` always stops
/// after the first response regardless of its quality.
fn decide(
    config: &RepromptConfig,
    iteration: u32,
    elapsed_ms: u64,
    eval: &EvaluationResult,
    failed_count: usize,
) -> StopReason {
    if iteration >= config.max_iterations {
        return StopReason::MaxIterationsReached;
    }
    if let Some(limit) = config.latency_limit_ms {
        if elapsed_ms as f64 > limit as f64 * LATENCY_BUDGET_FRACTION {
            return StopReason::LatencyLimitExceeded;
        }
    }
    if is_toxic(eval, config.toxicity_threshold) {
        return StopReason::ContinueToxicity;
    }
    if failed_count > 0 {
        return StopReason::Continue;
    }
    StopReason::AllInstructionsAdhered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{DetectorResult, InstructionRating};

    fn config(max_iterations: u32) -> RepromptConfig {
        RepromptConfig {
            max_iterations,
            api_key: "test-key".into(),
            ..Default::default()
        }
    }

    fn toxic_eval() -> EvaluationResult {
        EvaluationResult {
            toxicity: Some(DetectorResult {
                score: 0.1,
                instructions_list: vec![InstructionRating {
                    instruction: "no insults".into(),
                    follow_probability: 0.1,
                    label: None,
                    explanation: "insulting phrasing".into(),
                }],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_decide_max_iterations_precedes_quality() {
        // A toxic result on the last allowed iteration still stops
        let reason = decide(&config(1), 1, 0, &toxic_eval(), 3);
        assert_eq!(reason, StopReason::MaxIterationsReached);
    }

    #[test]
    fn test_decide_latency_budget() {
        let cfg = RepromptConfig {
            latency_limit_ms: Some(1_000),
            ..config(5)
        };
        // 800ms elapsed > 75% of 1000ms
        let reason = decide(&cfg, 1, 800, &EvaluationResult::default(), 2);
        assert_eq!(reason, StopReason::LatencyLimitExceeded);
        // 700ms is within budget; failures keep the loop going
        let reason = decide(&cfg, 1, 700, &EvaluationResult::default(), 2);
        assert_eq!(reason, StopReason::Continue);
    }

    #[test]
    fn test_decide_toxicity_outranks_failed_count() {
        let reason = decide(&config(5), 1, 0, &toxic_eval(), 0);
        assert_eq!(reason, StopReason::ContinueToxicity);
    }

    #[test]
    fn test_decide_clean_result_stops() {
        let reason = decide(&config(5), 1, 0, &EvaluationResult::default(), 0);
        assert_eq!(reason, StopReason::AllInstructionsAdhered);
    }

    #[test]
    fn test_original_template_bindings() {
        let rendered = original_template().render(&[
            ("system_prompt", "sys"),
            ("context", "ctx"),
            ("user_query", "q"),
        ]);
        assert!(rendered.contains("sys"));
        assert!(rendered.contains("ctx"));
        assert!(rendered.ends_with("q"));
    }

    #[test]
    fn test_summary_pluralization() {
        let pipeline = |return_summary| {
            let cfg = RepromptConfig {
                return_summary,
                ..config(3)
            };
            // finish() only needs config and telemetry
            RepromptingPipeline {
                generator: Arc::new(NopGenerator),
                evaluator: Arc::new(NopEvaluator),
                config: cfg,
                detectors: DetectorConfig::default(),
                telemetry: TelemetryLog::new(),
            }
        };

        let one = vec![IterationOutput {
            response_text: "a".into(),
            residual_error_score: 0.1,
            failed_instructions_count: 2,
        }];
        let result = pipeline(true).finish(&one);
        assert_eq!(
            result.summary.as_deref(),
            Some("1 iteration, 2 failed instructions remaining")
        );

        let two = vec![
            IterationOutput {
                response_text: "a".into(),
                residual_error_score: 0.5,
                failed_instructions_count: 3,
            },
            IterationOutput {
                response_text: "b".into(),
                residual_error_score: 0.2,
                failed_instructions_count: 1,
            },
        ];
        let result = pipeline(true).finish(&two);
        assert_eq!(
            result.summary.as_deref(),
            Some("2 iterations, 1 failed instructions remaining")
        );
        assert_eq!(result.best_response, "b");

        assert!(pipeline(false).finish(&one).summary.is_none());
    }

    #[test]
    fn test_summary_counts_best_iteration_not_last() {
        let cfg = RepromptConfig {
            return_summary: true,
            ..config(3)
        };
        let p = RepromptingPipeline {
            generator: Arc::new(NopGenerator),
            evaluator: Arc::new(NopEvaluator),
            config: cfg,
            detectors: DetectorConfig::default(),
            telemetry: TelemetryLog::new(),
        };
        // Best is the first iteration; the last one is worse and discarded
        let outs = vec![
            IterationOutput {
                response_text: "good".into(),
                residual_error_score: 0.1,
                failed_instructions_count: 1,
            },
            IterationOutput {
                response_text: "worse".into(),
                residual_error_score: 0.8,
                failed_instructions_count: 4,
            },
        ];
        let result = p.finish(&outs);
        assert_eq!(result.best_response, "good");
        assert_eq!(
            result.summary.as_deref(),
            Some("2 iterations, 1 failed instructions remaining")
        );
    }

    #[test]
    fn test_finish_stable_min_tie_goes_to_earliest() {
        let cfg = config(3);
        let p = RepromptingPipeline {
            generator: Arc::new(NopGenerator),
            evaluator: Arc::new(NopEvaluator),
            config: cfg,
            detectors: DetectorConfig::default(),
            telemetry: TelemetryLog::new(),
        };
        let outs = vec![
            IterationOutput {
                response_text: "first".into(),
                residual_error_score: 0.3,
                failed_instructions_count: 1,
            },
            IterationOutput {
                response_text: "second".into(),
                residual_error_score: 0.3,
                failed_instructions_count: 1,
            },
        ];
        assert_eq!(p.finish(&outs).best_response, "first");
    }

    #[test]
    fn test_finish_empty_returns_sentinel() {
        let p = RepromptingPipeline {
            generator: Arc::new(NopGenerator),
            evaluator: Arc::new(NopEvaluator),
            config: config(1),
            detectors: DetectorConfig::default(),
            telemetry: TelemetryLog::new(),
        };
        assert_eq!(p.finish(&[]).best_response, NO_VALID_RESPONSE);
    }

    struct NopGenerator;

    #[async_trait::async_trait]
    impl TextGenerator for NopGenerator {
        async fn generate(
            &self,
            _template: &PromptTemplate,
            _system_prompt: &str,
            _context: &str,
            _user_query: &str,
        ) -> Result<String, RepromptError> {
            Ok(String::new())
        }
    }

    struct NopEvaluator;

    #[async_trait::async_trait]
    impl ResponseEvaluator for NopEvaluator {
        async fn evaluate(
            &self,
            _request: &EvalRequest,
        ) -> Result<EvaluationResult, RepromptError> {
            Ok(EvaluationResult::default())
        }
    }
}
