// src/infra/errors.rs — Error types for reprompt

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepromptError {
    // Generator (user model) errors
    #[error("Generator error: {message}")]
    Generator { message: String, retriable: bool },

    // Evaluation oracle errors
    #[error("Evaluator error: {message}")]
    Evaluator { message: String, retriable: bool },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    // Authentication failures are never retried
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Corrective prompt construction failed: {source}")]
    PromptConstruction {
        #[source]
        source: anyhow::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepromptError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RepromptError::Generator {
                retriable: true,
                ..
            } | RepromptError::Evaluator {
                retriable: true,
                ..
            } | RepromptError::RateLimited { .. }
        )
    }
}
