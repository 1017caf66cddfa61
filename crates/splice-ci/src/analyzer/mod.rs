//! Heuristic static analysis of a merged variant.
//!
//! Two passes over the text, neither of which parses it:
//! - [`syntax`]: delimiter balance, unterminated literals and comments, and a
//!   missing-`;` heuristic
//! - [`security`]: regex detectors for well-known unsafe constructs
//!
//! The quality score combines finding severity weights with finding density.

pub mod security;
pub mod syntax;

use serde::{Deserialize, Serialize};
use splice_core::{IssueLevel, SecurityFinding, SyntaxIssue};

/// Analyzer output for one text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub syntax_issues: Vec<SyntaxIssue>,
    pub security_findings: Vec<SecurityFinding>,
    pub quality_score: f32,
}

impl Analysis {
    /// No error-level syntax issue.
    pub fn syntax_valid(&self) -> bool {
        !self
            .syntax_issues
            .iter()
            .any(|i| i.level == IssueLevel::Error)
    }
}

/// Pure text analysis. Never fails.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, text: &str) -> Analysis;
}

/// The built-in syntax and security heuristics.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer;

impl Analyzer for HeuristicAnalyzer {
    fn analyze(&self, text: &str) -> Analysis {
        let syntax_issues = syntax::check(text);
        let valid = !syntax_issues.iter().any(|i| i.level == IssueLevel::Error);
        if !valid {
            return Analysis {
                syntax_issues,
                security_findings: Vec::new(),
                quality_score: 0.0,
            };
        }

        let security_findings = security::scan(text);
        let warnings = syntax_issues
            .iter()
            .filter(|i| i.level == IssueLevel::Warning)
            .count();
        let quality_score = quality_score(&security_findings, warnings, text.lines().count());
        Analysis {
            syntax_issues,
            security_findings,
            quality_score,
        }
    }
}

/// `1 - Σ severity weights - 0.02 per warning - density penalty`, clamped to `[0, 1]`.
///
/// The density penalty is `0.05` per finding per 100 lines, capped at `0.3`.
pub fn quality_score(findings: &[SecurityFinding], warnings: usize, line_count: usize) -> f32 {
    let weights: f32 = findings.iter().map(|f| f.severity.weight()).sum();
    let lines = line_count.max(1) as f32;
    let density = (findings.len() as f32 / lines * 100.0 * 0.05).min(0.3);
    (1.0 - weights - 0.02 * warnings as f32 - density).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use splice_core::Severity;

    fn finding(severity: Severity) -> SecurityFinding {
        SecurityFinding {
            rule: "test".to_string(),
            severity,
            message: String::new(),
            line: 1,
        }
    }

    #[test]
    fn test_clean_text_scores_one() {
        let analysis = HeuristicAnalyzer.analyze("int main(void) {\n    return 0;\n}\n");
        assert!(analysis.syntax_valid());
        assert!(analysis.security_findings.is_empty());
        assert!((analysis.quality_score - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_syntax_error_short_circuits_security() {
        let analysis = HeuristicAnalyzer.analyze("int main(void) {\n    gets(buf);\n");
        assert!(!analysis.syntax_valid());
        assert!(analysis.security_findings.is_empty());
        assert_eq!(analysis.quality_score, 0.0);
    }

    #[test]
    fn test_score_penalizes_severity_and_density() {
        let one = quality_score(&[finding(Severity::High)], 0, 1000);
        let dense = quality_score(&[finding(Severity::High)], 0, 10);
        assert!(one > dense);
        assert!((one - (1.0 - 0.15 - 0.005)).abs() < 1e-4);
        assert!((dense - (1.0 - 0.15 - 0.3)).abs() < 1e-4);
    }

    #[test]
    fn test_score_is_clamped() {
        let findings = vec![finding(Severity::Critical); 5];
        assert_eq!(quality_score(&findings, 10, 5), 0.0);
    }
}
