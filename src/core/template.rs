// src/core/template.rs — Prompt template value type

use serde::{Deserialize, Serialize};

/// A prompt with `{name}` placeholders, filled per call via [`render`].
///
/// The template text is fixed at construction; only placeholder substitution
/// happens at render time. Corrective templates bake feedback in as literal
/// text and keep `{system_prompt}`, `{context}` and `{user_query}` open so
/// the same template can be re-rendered on every generation attempt.
///
/// [`render`]: PromptTemplate::render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Substitute `{name}` placeholders with the given bindings.
    ///
    /// Placeholders without a binding are left intact; bindings without a
    /// matching placeholder are ignored. Pure: the template is not mutated.
    pub fn render(&self, bindings: &[(&str, &str)]) -> String {
        let mut out = self.text.clone();
        for (name, value) in bindings {
            out = out.replace(&format!("{{{}}}", name), value);
        }
        out
    }
}
