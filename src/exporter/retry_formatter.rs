//! Retry message formatting
//!
//! Keeps retry and failure log lines consistent across the fetch loop and the
//! authorization calls.

use std::time::Duration;

/// Context for one retry decision
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Total attempts allowed
    pub max_attempts: u32,
    /// Short description of the failure
    pub description: &'static str,
    /// Backoff until the next attempt
    pub backoff: Duration,
    /// What was being requested, e.g. `get offset=500`
    pub operation: String,
    /// Original error message
    pub error_message: String,
}

impl RetryContext {
    /// Build a context
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        description: &'static str,
        backoff: Duration,
        operation: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            description,
            backoff,
            operation: operation.into(),
            error_message: error_message.into(),
        }
    }

    /// Retry line, e.g. `Retrying get offset=500 (attempt 2/6) after server error - waiting 2.0 seconds...`
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying {} (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.operation,
            self.attempt,
            self.max_attempts,
            self.description,
            self.backoff.as_secs_f64()
        )
    }

    /// Final failure summary with suggestions
    pub fn format_failure(&self) -> String {
        let mut lines = vec![
            format!(
                "[FAILED] {} failed after {} attempts",
                self.operation, self.attempt
            ),
            format!("  Last error: {}", self.error_message),
            "  Suggestions:".to_string(),
        ];
        for suggestion in self.suggestions() {
            lines.push(format!("    - {suggestion}"));
        }
        lines.join("\n")
    }

    fn suggestions(&self) -> Vec<String> {
        vec![
            "Check your network connection and try again".to_string(),
            format!(
                "Try increasing --max-retries (current: {})",
                self.max_attempts.saturating_sub(1)
            ),
            "Re-running the same command resumes from the last checkpoint".to_string(),
        ]
    }
}
