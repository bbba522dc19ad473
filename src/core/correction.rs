// src/core/correction.rs — Corrective prompt builder
//
// Turns structured evaluation feedback into the next iteration's prompt.
// Tone and feedback text are baked in as literal text at build time;
// system prompt, context and user query stay as placeholders so the
// template re-renders per generation attempt.

use std::fmt::Write;

use crate::collab::EvaluationResult;
use crate::core::scoring::{failed_instructions, failed_toxicity_instructions};
use crate::core::template::PromptTemplate;
use crate::core::types::FailedInstruction;
use crate::infra::errors::RepromptError;

/// Everything the builder needs from the failing iteration.
#[derive(Debug, Clone)]
pub struct CorrectionPayload {
    pub system_prompt: String,
    pub user_query: String,
    pub context: String,
    pub generated_text: String,
    pub instructions: Vec<String>,
}

const TONE_MAJOR: &str =
    "The previous response had major issues. Fix all of the points below before answering again.";
const TONE_MODERATE: &str =
    "Some parts of the previous response were off. Address the feedback below.";
const TONE_MINOR: &str = "The previous response was almost there. A few minor fixes are needed.";

/// Select the correction tone by failure count. Exactly 2 failures gets the
/// middle tone; 3 or more gets the top one.
fn tone_for(failed_count: usize) -> &'static str {
    if failed_count >= 3 {
        TONE_MAJOR
    } else if failed_count >= 2 {
        TONE_MODERATE
    } else {
        TONE_MINOR
    }
}

/// Build the corrective prompt template for the next iteration.
///
/// Any failure along the way is wrapped as
/// [`RepromptError::PromptConstruction`] carrying the original cause; this is
/// the one place arbitrary errors are converted into a single documented
/// error kind.
pub fn build_corrective_prompt(
    eval: &EvaluationResult,
    payload: &CorrectionPayload,
    toxicity_threshold: f64,
) -> Result<PromptTemplate, RepromptError> {
    assemble(eval, payload, toxicity_threshold).map_err(|source| {
        RepromptError::PromptConstruction {
            source: source.context("building corrective prompt"),
        }
    })
}

fn assemble(
    eval: &EvaluationResult,
    payload: &CorrectionPayload,
    toxicity_threshold: f64,
) -> anyhow::Result<PromptTemplate> {
    let failed = failed_instructions(eval);
    let toxic = failed_toxicity_instructions(eval, toxicity_threshold);
    let tone = tone_for(failed.len() + toxic.len());

    let mut body = String::new();
    writeln!(body, "{{system_prompt}}")?;
    writeln!(body)?;
    writeln!(body, "Context:\n{{context}}")?;
    writeln!(body)?;
    writeln!(body, "User query:\n{{user_query}}")?;
    writeln!(body)?;
    writeln!(body, "Your previous response:\n{}", payload.generated_text)?;
    writeln!(body)?;
    writeln!(body, "{}", tone)?;

    if !toxic.is_empty() {
        writeln!(body)?;
        writeln!(body, "The response was flagged for toxicity:")?;
        for f in &toxic {
            // Confidence that the response is toxic
            writeln!(
                body,
                "- {} (confidence: {:.0}%): {}",
                f.instruction,
                f.score * 100.0,
                f.explanation
            )?;
        }
    }

    if !failed.is_empty() {
        writeln!(body)?;
        writeln!(body, "The response failed these instructions:")?;
        for f in &failed {
            // Confidence that the instruction failed: complement of the
            // toxicity formula above, on purpose
            writeln!(
                body,
                "- [{}] {} (confidence: {:.0}%): {}",
                f.source,
                f.instruction,
                (1.0 - f.score) * 100.0,
                f.explanation
            )?;
        }
    }

    let passed = passed_instructions(&payload.instructions, &failed, &toxic);
    if !passed.is_empty() {
        writeln!(body)?;
        writeln!(
            body,
            "These instructions were followed correctly. Continue following them:"
        )?;
        for p in &passed {
            writeln!(body, "- {}", p)?;
        }
    }

    writeln!(body)?;
    write!(
        body,
        "Rewrite the response so it satisfies every instruction above."
    )?;

    Ok(PromptTemplate::new(body))
}

/// Original instruction list minus those present in either failure set, by
/// exact text match.
fn passed_instructions(
    originals: &[String],
    failed: &[FailedInstruction],
    toxic: &[FailedInstruction],
) -> Vec<String> {
    originals
        .iter()
        .filter(|i| {
            !failed.iter().any(|f| &f.instruction == *i)
                && !toxic.iter().any(|f| &f.instruction == *i)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{DetectorResult, InstructionRating};

    fn rating(instruction: &str, p: f64, label: Option<bool>) -> InstructionRating {
        InstructionRating {
            instruction: instruction.into(),
            follow_probability: p,
            label,
            explanation: format!("why {} failed", instruction),
        }
    }

    fn payload() -> CorrectionPayload {
        CorrectionPayload {
            system_prompt: "Be helpful.".into(),
            user_query: "What's the policy?".into(),
            context: "The policy doc.".into(),
            generated_text: "Previous answer text.".into(),
            instructions: vec!["be brief".into(), "cite sources".into()],
        }
    }

    fn eval_with_failures(failed: &[&str], passed: &[&str]) -> EvaluationResult {
        let mut list: Vec<InstructionRating> =
            failed.iter().map(|i| rating(i, 0.2, Some(false))).collect();
        list.extend(passed.iter().map(|i| rating(i, 0.9, Some(true))));
        EvaluationResult {
            instruction_adherence: Some(DetectorResult {
                score: 0.5,
                instructions_list: list,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_tone_boundaries() {
        assert_eq!(tone_for(0), TONE_MINOR);
        assert_eq!(tone_for(1), TONE_MINOR);
        assert_eq!(tone_for(2), TONE_MODERATE);
        assert_eq!(tone_for(3), TONE_MAJOR);
        assert_eq!(tone_for(7), TONE_MAJOR);
    }

    #[test]
    fn test_builds_template_with_placeholders_open() {
        let eval = eval_with_failures(&["be brief"], &["cite sources"]);
        let t = build_corrective_prompt(&eval, &payload(), 0.25).unwrap();
        assert!(t.text().contains("{system_prompt}"));
        assert!(t.text().contains("{context}"));
        assert!(t.text().contains("{user_query}"));
        // Previous response and feedback are literal text
        assert!(t.text().contains("Previous answer text."));
        assert!(t.text().contains("be brief"));
    }

    #[test]
    fn test_one_failure_uses_minor_tone() {
        let eval = eval_with_failures(&["be brief"], &[]);
        let t = build_corrective_prompt(&eval, &payload(), 0.25).unwrap();
        assert!(t.text().contains(TONE_MINOR));
    }

    #[test]
    fn test_two_failures_use_moderate_tone() {
        let eval = eval_with_failures(&["be brief", "cite sources"], &[]);
        let t = build_corrective_prompt(&eval, &payload(), 0.25).unwrap();
        assert!(t.text().contains(TONE_MODERATE));
        assert!(!t.text().contains(TONE_MAJOR));
    }

    #[test]
    fn test_three_failures_use_major_tone() {
        let eval = eval_with_failures(&["a", "b", "c"], &[]);
        let t = build_corrective_prompt(&eval, &payload(), 0.25).unwrap();
        assert!(t.text().contains(TONE_MAJOR));
    }

    #[test]
    fn test_failed_instruction_confidence_is_complement() {
        // follow probability 0.2 -> failure confidence 80%
        let eval = eval_with_failures(&["be brief"], &[]);
        let t = build_corrective_prompt(&eval, &payload(), 0.25).unwrap();
        assert!(t.text().contains("confidence: 80%"));
    }

    #[test]
    fn test_toxicity_confidence_uses_raw_score() {
        let eval = EvaluationResult {
            toxicity: Some(DetectorResult {
                score: 0.1,
                instructions_list: vec![rating("no insults", 0.1, None)],
            }),
            ..Default::default()
        };
        let t = build_corrective_prompt(&eval, &payload(), 0.25).unwrap();
        assert!(t.text().contains("flagged for toxicity"));
        // score 0.1 -> 10%, not the 90% complement
        assert!(t.text().contains("confidence: 10%"));
    }

    #[test]
    fn test_passed_instructions_reinforced() {
        let eval = eval_with_failures(&["be brief"], &["cite sources"]);
        let t = build_corrective_prompt(&eval, &payload(), 0.25).unwrap();
        assert!(t.text().contains("Continue following them"));
        assert!(t.text().contains("- cite sources"));
    }

    #[test]
    fn test_no_passed_block_when_all_failed() {
        let eval = eval_with_failures(&["be brief", "cite sources"], &[]);
        let t = build_corrective_prompt(&eval, &payload(), 0.25).unwrap();
        assert!(!t.text().contains("Continue following them"));
    }

    #[test]
    fn test_clean_eval_still_builds() {
        let t = build_corrective_prompt(&EvaluationResult::default(), &payload(), 0.25).unwrap();
        assert!(t.text().contains(TONE_MINOR));
        assert!(!t.text().contains("failed these instructions"));
    }

    #[test]
    fn test_rendered_corrective_prompt_substitutes() {
        let eval = eval_with_failures(&["be brief"], &[]);
        let t = build_corrective_prompt(&eval, &payload(), 0.25).unwrap();
        let rendered = t.render(&[
            ("system_prompt", "Be helpful."),
            ("context", "The policy doc."),
            ("user_query", "What's the policy?"),
        ]);
        assert!(rendered.starts_with("Be helpful."));
        assert!(!rendered.contains("{user_query}"));
    }
}
