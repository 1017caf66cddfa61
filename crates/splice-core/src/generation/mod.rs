//! Code-generation service boundary.
//!
//! The coordinator only sees [`GenerationService`]: one request in, one
//! candidate function text (or a typed failure) out. Implementations never
//! retry; the caller owns the budget.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::UnitId;

/// Failures from the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Transient failure (network, 5xx, rate limit, timeout). Counts against the budget.
    #[error("generation service error: {0}")]
    Service(String),

    /// Non-retryable refusal. Surfaced immediately.
    #[error("generation rejected: {0}")]
    Rejected(String),
}

impl GenerationError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Everything the service needs to produce one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub unit_id: UnitId,
    pub ordinal: u32,
    pub function_name: String,
    pub language: String,
    /// The function's text in the original file.
    pub original_text: String,
    /// The candidate that failed, when this is a repair request.
    pub prior_attempt: Option<String>,
    pub failure_reason: Option<String>,
}

impl GenerationRequest {
    pub fn is_repair(&self) -> bool {
        self.prior_attempt.is_some()
    }
}

/// Produces candidate text for one function.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Pull the first fenced code block out of a model reply, or the trimmed reply itself.
pub fn extract_code(reply: &str) -> Option<String> {
    let trimmed = reply.trim();
    if let Some(open) = trimmed.find("```") {
        let after_open = &trimmed[open + 3..];
        let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(after_open.len());
        let body = &after_open[body_start..];
        let code = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
        let code = code.trim_matches('\n').trim_end();
        return (!code.trim().is_empty()).then(|| code.to_string());
    }
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fenced_block() {
        let reply = "Here you go:\n```c\nint f(void) {\n    return 1;\n}\n```\nThanks.";
        assert_eq!(
            extract_code(reply).as_deref(),
            Some("int f(void) {\n    return 1;\n}")
        );
    }

    #[test]
    fn test_extract_unterminated_fence() {
        let reply = "```cpp\nint g() { return 2; }\n";
        assert_eq!(extract_code(reply).as_deref(), Some("int g() { return 2; }"));
    }

    #[test]
    fn test_extract_plain_reply() {
        assert_eq!(
            extract_code("  int h(void) { return 3; }  ").as_deref(),
            Some("int h(void) { return 3; }")
        );
    }

    #[test]
    fn test_extract_empty_reply() {
        assert_eq!(extract_code("   "), None);
        assert_eq!(extract_code("```c\n```"), None);
    }

    #[test]
    fn test_rejection_flag() {
        assert!(GenerationError::Rejected("policy".into()).is_rejection());
        assert!(!GenerationError::Service("503".into()).is_rejection());
    }
}
