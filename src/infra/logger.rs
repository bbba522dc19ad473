// src/infra/logger.rs — Structured logging with tracing
//
// Library crates don't install a subscriber on their own; callers embedding
// the pipeline opt in, typically once at startup. `RUST_LOG` wins when set.

use tracing_subscriber::{fmt, EnvFilter};

/// Default directive: keep this crate's retry and telemetry diagnostics at
/// the requested level while quieting everything else.
fn default_directive(level: &str) -> String {
    format!("warn,reprompt={}", level)
}

pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_scopes_crate_level() {
        assert_eq!(default_directive("debug"), "warn,reprompt=debug");
        assert_eq!(default_directive("trace"), "warn,reprompt=trace");
    }

    #[test]
    fn test_default_directive_is_a_valid_filter() {
        assert!(EnvFilter::try_new(default_directive("info")).is_ok());
    }
}
