//! Validation verdicts and the categories they are built from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Outcome of the compilation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilationStatus {
    /// Syntax failed, so the compiler was never invoked.
    NotAttempted,
    Succeeded,
    /// Failed only for reasons the mutation cannot fix (missing platform headers, libraries).
    FailedEnvironment,
    /// Failed for a reason a repaired candidate could fix.
    FailedActionable,
}

impl CompilationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAttempted => "not_attempted",
            Self::Succeeded => "succeeded",
            Self::FailedEnvironment => "failed_environment",
            Self::FailedActionable => "failed_actionable",
        }
    }
}

/// Kind of one compiler error line, passed to the generator with the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    MissingHeader,
    UndefinedSymbol,
    TypeMismatch,
    Linking,
    Syntax,
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::UndefinedSymbol => "undefined_symbol",
            Self::TypeMismatch => "type_mismatch",
            Self::Linking => "linking",
            Self::Syntax => "syntax",
            Self::Other => "other",
        }
    }
}

/// Categorize one compiler error line by keyword. First match wins.
pub fn categorize_error(line: &str) -> ErrorCategory {
    let lower = line.to_ascii_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    let header_failure = any(&[
        "no such file or directory",
        "file not found",
        "cannot open source file",
        "cannot open include file",
    ]);
    if header_failure && (lower.contains(".h") || lower.contains("#include")) {
        return ErrorCategory::MissingHeader;
    }
    if any(&[
        "undefined reference",
        "undefined symbol",
        "undeclared",
        "was not declared",
        "implicit declaration",
    ]) {
        return ErrorCategory::UndefinedSymbol;
    }
    if any(&[
        "incompatible type",
        "cannot convert",
        "type mismatch",
        "invalid conversion",
        "conflicting types",
    ]) {
        return ErrorCategory::TypeMismatch;
    }
    if any(&[
        "multiple definition",
        "duplicate symbol",
        "cannot find -l",
        "ld returned",
    ]) {
        return ErrorCategory::Linking;
    }
    if any(&["expected", "missing", "parse error", "syntax error", "stray"]) {
        return ErrorCategory::Syntax;
    }
    ErrorCategory::Other
}

/// Severity of a security/quality finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Penalty subtracted from the quality score per finding.
    pub fn weight(&self) -> f32 {
        match self {
            Self::Info => 0.01,
            Self::Low => 0.03,
            Self::Medium => 0.08,
            Self::High => 0.15,
            Self::Critical => 0.3,
        }
    }
}

/// Level of a syntax issue. Only `Error` makes a variant syntactically invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxIssue {
    pub level: IssueLevel,
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl SyntaxIssue {
    pub fn error(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            level: IssueLevel::Error,
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }

    pub fn warning(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            level: IssueLevel::Warning,
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub line: u32,
}

/// Result of running a built executable once after a successful compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmokeTestResult {
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub output: String,
    pub failures: Vec<String>,
}

/// Immutable result of validating one merged variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub syntax_valid: bool,
    pub syntax_issues: Vec<SyntaxIssue>,
    pub security_findings: Vec<SecurityFinding>,
    pub quality_score: f32,
    pub compilation_status: CompilationStatus,
    pub compiler_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoke_test: Option<SmokeTestResult>,
}

impl ValidationVerdict {
    /// Verdict for a variant that failed the syntax stage.
    pub fn syntax_failure(syntax_issues: Vec<SyntaxIssue>) -> Self {
        Self {
            syntax_valid: false,
            syntax_issues,
            security_findings: Vec::new(),
            quality_score: 0.0,
            compilation_status: CompilationStatus::NotAttempted,
            compiler_output: String::new(),
            smoke_test: None,
        }
    }

    /// Verdict for a syntactically valid variant with the given compile outcome.
    pub fn compiled(
        syntax_issues: Vec<SyntaxIssue>,
        security_findings: Vec<SecurityFinding>,
        quality_score: f32,
        compilation_status: CompilationStatus,
        compiler_output: impl Into<String>,
    ) -> Self {
        Self {
            syntax_valid: true,
            syntax_issues,
            security_findings,
            quality_score: quality_score.clamp(0.0, 1.0),
            compilation_status,
            compiler_output: compiler_output.into(),
            smoke_test: None,
        }
    }

    /// Syntax valid and compilation not actionable-failed.
    pub fn is_accepted(&self) -> bool {
        self.syntax_valid && self.compilation_status != CompilationStatus::FailedActionable
    }

    pub fn needs_repair(&self) -> bool {
        !self.is_accepted()
    }

    pub fn compiler_errors(&self) -> Vec<String> {
        error_lines(&self.compiler_output)
    }

    pub fn compiler_warnings(&self) -> Vec<String> {
        warning_lines(&self.compiler_output)
    }

    /// Compiler error lines counted per category.
    pub fn error_categories(&self) -> BTreeMap<ErrorCategory, usize> {
        let mut counts = BTreeMap::new();
        for line in self.compiler_errors() {
            *counts.entry(categorize_error(&line)).or_insert(0) += 1;
        }
        counts
    }

    /// Short description of why the variant was rejected, fed back to the generator.
    pub fn failure_reason(&self) -> String {
        if !self.syntax_valid {
            let issues: Vec<String> = self
                .syntax_issues
                .iter()
                .filter(|i| i.level == IssueLevel::Error)
                .take(5)
                .map(|i| match i.line {
                    Some(line) => format!("line {}: {}", line, i.message),
                    None => i.message.clone(),
                })
                .collect();
            return format!("syntax errors:\n{}", issues.join("\n"));
        }

        let errors = self.compiler_errors();
        if errors.is_empty() {
            let tail: String = self
                .compiler_output
                .lines()
                .rev()
                .take(10)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return format!("compilation failed:\n{}", tail);
        }
        let counts: Vec<String> = self
            .error_categories()
            .iter()
            .map(|(category, n)| format!("{} x{}", category.as_str(), n))
            .collect();
        let lines: Vec<String> = errors
            .iter()
            .take(10)
            .map(|line| format!("[{}] {}", categorize_error(line).as_str(), line))
            .collect();
        format!(
            "compilation errors ({}):\n{}",
            counts.join(", "),
            lines.join("\n")
        )
    }
}

/// Compiler output lines reporting errors.
pub fn error_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| l.contains("error:"))
        .map(|l| l.trim().to_string())
        .collect()
}

/// Compiler output lines reporting warnings.
pub fn warning_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| l.contains("warning:"))
        .map(|l| l.trim().to_string())
        .collect()
}
