//! Compiler failure classification.
//!
//! A failed compile is environment-expected when every error diagnostic is
//! explained by the environment (a missing platform header or library, or an
//! operator-supplied pattern). Anything else is actionable.

use regex::Regex;
use splice_core::{error_lines, CompilationStatus, EnvironmentSettings};
use thiserror::Error;

const HEADER_PATTERNS: &[&str] = &[
    r"fatal error:\s*([^\s:]+):\s*No such file or directory",
    r"'([^']+)' file not found",
    r"cannot open (?:source|include) file:?\s*'?([^'\s:]+)'?",
];

const LIBRARY_PATTERN: &str = r"cannot find -l(\S+)";

/// The driver's trailing summary after a link failure.
const LINKER_SUMMARY: &str = r"ld returned \d+ exit status";

#[derive(Debug, Error)]
#[error("invalid environment pattern '{pattern}': {source}")]
pub struct RuleError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// Rule set deciding which compiler errors the environment explains.
#[derive(Debug, Clone)]
pub struct EnvironmentRules {
    headers: Vec<Regex>,
    library: Regex,
    linker_summary: Regex,
    expected_headers: Vec<String>,
    extra: Vec<Regex>,
}

impl EnvironmentRules {
    pub fn from_settings(settings: &EnvironmentSettings) -> Result<Self, RuleError> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|source| RuleError {
                pattern: p.to_string(),
                source,
            })
        };
        Ok(Self {
            headers: HEADER_PATTERNS
                .iter()
                .map(|p| compile(p))
                .collect::<Result<_, _>>()?,
            library: compile(LIBRARY_PATTERN)?,
            linker_summary: compile(LINKER_SUMMARY)?,
            expected_headers: settings.expected_headers.clone(),
            extra: settings
                .patterns
                .iter()
                .map(|p| compile(p))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Whether one error line is explained by the environment.
    pub fn explains(&self, line: &str) -> bool {
        if self.extra.iter().any(|re| re.is_match(line)) {
            return true;
        }
        if self.library.is_match(line) {
            return true;
        }
        self.headers.iter().any(|re| match re.captures(line) {
            Some(caps) => {
                let header = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                self.header_expected(header)
            }
            None => false,
        })
    }

    fn header_expected(&self, header: &str) -> bool {
        if self.expected_headers.is_empty() {
            return true;
        }
        self.expected_headers
            .iter()
            .any(|h| header == h || header.ends_with(&format!("/{h}")))
    }

    pub fn classify(&self, exit_code: i32, output: &str) -> CompilationStatus {
        if exit_code == 0 {
            return CompilationStatus::Succeeded;
        }
        let errors = error_lines(output);
        let library_errors: Vec<&str> = output
            .lines()
            .filter(|l| self.library.is_match(l))
            .collect();
        let mut any = false;
        for line in errors.iter().map(String::as_str).chain(library_errors.iter().copied()) {
            any = true;
            if !library_errors.is_empty() && self.linker_summary.is_match(line) {
                continue;
            }
            if !self.explains(line) {
                return CompilationStatus::FailedActionable;
            }
        }
        if any {
            CompilationStatus::FailedEnvironment
        } else {
            CompilationStatus::FailedActionable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> EnvironmentRules {
        EnvironmentRules::from_settings(&EnvironmentSettings::default()).unwrap()
    }

    #[test]
    fn test_success_is_succeeded() {
        assert_eq!(rules().classify(0, "warning: unused"), CompilationStatus::Succeeded);
    }

    #[test]
    fn test_missing_header_is_environment() {
        let out = "unit.c:1:10: fatal error: windows.h: No such file or directory\n    1 | #include <windows.h>\ncompilation terminated.\n";
        assert_eq!(rules().classify(1, out), CompilationStatus::FailedEnvironment);

        let clang = "unit.c:1:10: fatal error: 'sys/epoll.h' file not found\n";
        assert_eq!(rules().classify(1, clang), CompilationStatus::FailedEnvironment);
    }

    #[test]
    fn test_missing_library_is_environment() {
        let out = "/usr/bin/ld: cannot find -lssl: No such file or directory\ncollect2: error: ld returned 1 exit status\n";
        assert_eq!(rules().classify(1, out), CompilationStatus::FailedEnvironment);

        let undefined = "/usr/bin/ld: u.o: undefined reference to `frob'\ncollect2: error: ld returned 1 exit status\n";
        assert_eq!(rules().classify(1, undefined), CompilationStatus::FailedActionable);
    }

    #[test]
    fn test_mixed_errors_are_actionable() {
        let out = "unit.c:1:10: fatal error: windows.h: No such file or directory\nunit.c:9:5: error: expected ';' before 'return'\n";
        assert_eq!(rules().classify(1, out), CompilationStatus::FailedActionable);
    }

    #[test]
    fn test_failure_without_diagnostics_is_actionable() {
        assert_eq!(rules().classify(139, ""), CompilationStatus::FailedActionable);
    }

    #[test]
    fn test_expected_headers_restrict_environment() {
        let rules = EnvironmentRules::from_settings(&EnvironmentSettings {
            patterns: vec![],
            expected_headers: vec!["windows.h".into()],
        })
        .unwrap();
        let win = "u.c:1:10: fatal error: windows.h: No such file or directory\n";
        let own = "u.c:2:10: fatal error: config.h: No such file or directory\n";
        assert_eq!(rules.classify(1, win), CompilationStatus::FailedEnvironment);
        assert_eq!(rules.classify(1, own), CompilationStatus::FailedActionable);
    }

    #[test]
    fn test_extra_patterns_extend_the_rules() {
        let rules = EnvironmentRules::from_settings(&EnvironmentSettings {
            patterns: vec![r"unknown type name '__m512'".into()],
            expected_headers: vec![],
        })
        .unwrap();
        let out = "u.c:4:1: error: unknown type name '__m512'\n";
        assert_eq!(rules.classify(1, out), CompilationStatus::FailedEnvironment);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = EnvironmentRules::from_settings(&EnvironmentSettings {
            patterns: vec!["(".into()],
            expected_headers: vec![],
        })
        .unwrap_err();
        assert_eq!(err.pattern, "(");
    }
}
