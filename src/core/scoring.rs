// src/core/scoring.rs — Scoring utilities over evaluation results
//
// Pure functions: evaluation result in, failure lists / counts / the
// normalized residual-error score out. Toxicity follow probabilities are
// inverted wherever they are mixed with adherence/groundedness ones, since a
// high toxicity follow probability means "safe".

use crate::collab::{DetectorResult, EvaluationResult};
use crate::core::types::FailedInstruction;

/// Penalty cut line: probabilities at or above this contribute nothing.
const PENALTY_CUTOFF: f64 = 0.5;

/// True iff any toxicity instruction's follow probability falls below the
/// threshold.
pub fn is_toxic(eval: &EvaluationResult, threshold: f64) -> bool {
    eval.toxicity
        .as_ref()
        .map(|d| {
            d.instructions_list
                .iter()
                .any(|r| r.follow_probability < threshold)
        })
        .unwrap_or(false)
}

/// All toxicity entries below the threshold, tagged as toxicity failures.
pub fn failed_toxicity_instructions(
    eval: &EvaluationResult,
    threshold: f64,
) -> Vec<FailedInstruction> {
    let Some(ref toxicity) = eval.toxicity else {
        return Vec::new();
    };
    toxicity
        .instructions_list
        .iter()
        .filter(|r| r.follow_probability < threshold)
        .map(|r| FailedInstruction {
            kind: "toxicity_failure".into(),
            source: "toxicity".into(),
            instruction: r.instruction.clone(),
            score: r.follow_probability,
            explanation: r.explanation.clone(),
        })
        .collect()
}

/// Adherence and groundedness entries with `label == false`, tagged by
/// source, sorted descending by score (most-confident failure first).
/// Toxicity failures are deliberately excluded; callers combine both lists.
pub fn failed_instructions(eval: &EvaluationResult) -> Vec<FailedInstruction> {
    let mut failed: Vec<FailedInstruction> = Vec::new();
    collect_label_failures(&eval.instruction_adherence, "instruction_adherence", &mut failed);
    collect_label_failures(&eval.groundedness, "groundedness", &mut failed);

    // Stable sort keeps ties in detector order
    failed.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    failed
}

fn collect_label_failures(
    detector: &Option<DetectorResult>,
    source: &str,
    out: &mut Vec<FailedInstruction>,
) {
    let Some(detector) = detector else { return };
    out.extend(
        detector
            .instructions_list
            .iter()
            .filter(|r| r.label == Some(false))
            .map(|r| FailedInstruction {
                kind: "instruction_failure".into(),
                source: source.into(),
                instruction: r.instruction.clone(),
                score: r.follow_probability,
                explanation: r.explanation.clone(),
            }),
    );
}

/// Count of failed adherence/groundedness instructions plus toxicity entries
/// below the threshold.
pub fn failed_instructions_count(eval: &EvaluationResult, threshold: f64) -> usize {
    failed_instructions(eval).len() + failed_toxicity_instructions(eval, threshold).len()
}

/// Asymmetric penalty average: a probability at or above 0.5 is free, below
/// it the penalty is `(1 - p) * 2`. Not clamped.
pub fn penalized_average(probs: &[f64]) -> f64 {
    if probs.is_empty() {
        return 0.0;
    }
    let total: f64 = probs
        .iter()
        .map(|&p| if p >= PENALTY_CUTOFF { 0.0 } else { (1.0 - p) * 2.0 })
        .sum();
    total / probs.len() as f64
}

/// The pipeline's single normalized quality metric, in [0, 1], rounded to
/// two decimal places. Lower is better. 0.0 when no detector produced any
/// probabilities.
pub fn residual_error_score(eval: &EvaluationResult) -> f64 {
    let mut probs: Vec<f64> = Vec::new();

    for detector in [&eval.groundedness, &eval.instruction_adherence] {
        if let Some(d) = detector {
            probs.extend(d.instructions_list.iter().map(|r| r.follow_probability));
        }
    }
    if let Some(ref d) = eval.toxicity {
        probs.extend(d.instructions_list.iter().map(|r| 1.0 - r.follow_probability));
    }

    if probs.is_empty() {
        return 0.0;
    }

    let avg = penalized_average(&probs);
    let clamped = avg.clamp(0.0, 1.0);
    (clamped * 100.0).round() / 100.0
}
