//! Regex detectors for unsafe C constructs.

use std::sync::OnceLock;

use regex::Regex;
use splice_core::{SecurityFinding, Severity};

struct Rule {
    id: &'static str,
    pattern: &'static str,
    severity: Severity,
    message: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        id: "unsafe-strcpy",
        pattern: r"\bstrcpy\s*\(",
        severity: Severity::High,
        message: "strcpy does not bound the copy; use strncpy or snprintf",
    },
    Rule {
        id: "unsafe-strcat",
        pattern: r"\bstrcat\s*\(",
        severity: Severity::High,
        message: "strcat does not bound the copy; use strncat",
    },
    Rule {
        id: "unsafe-gets",
        pattern: r"\bgets\s*\(",
        severity: Severity::Critical,
        message: "gets cannot be used safely; use fgets",
    },
    Rule {
        id: "unbounded-sprintf",
        pattern: r"\bv?sprintf\s*\(",
        severity: Severity::Medium,
        message: "sprintf does not bound its output; use snprintf",
    },
    Rule {
        id: "unbounded-scanf",
        pattern: r#"\bscanf\s*\(\s*"[^"]*%s"#,
        severity: Severity::Medium,
        message: "scanf %s without a field width can overflow",
    },
    Rule {
        id: "shell-command",
        pattern: r"\b(system|popen)\s*\(",
        severity: Severity::High,
        message: "spawning a shell command",
    },
    Rule {
        id: "goto",
        pattern: r"\bgoto\s+\w+\s*;",
        severity: Severity::Low,
        message: "goto statement",
    },
    Rule {
        id: "unbounded-loop",
        pattern: r"\b(while\s*\(\s*(1|true)\s*\)|for\s*\(\s*;\s*;\s*\))",
        severity: Severity::Info,
        message: "loop without a termination condition",
    },
    Rule {
        id: "non-local-jump",
        pattern: r"\b(setjmp|longjmp)\s*\(",
        severity: Severity::Medium,
        message: "setjmp/longjmp bypasses normal control flow",
    },
];

fn compiled() -> &'static [(Regex, &'static Rule)] {
    static COMPILED: OnceLock<Vec<(Regex, &'static Rule)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|rule| {
                let re = Regex::new(rule.pattern).expect("valid security rule pattern");
                (re, rule)
            })
            .collect()
    })
}

/// One finding per rule per line, in line order.
pub fn scan(text: &str) -> Vec<SecurityFinding> {
    let mut findings = Vec::new();
    let mut in_block_comment = false;

    for (n, raw) in text.lines().enumerate() {
        let line = strip_comments(raw, &mut in_block_comment);
        if line.trim_start().starts_with('#') {
            continue;
        }
        for (re, rule) in compiled() {
            if re.is_match(&line) {
                findings.push(SecurityFinding {
                    rule: rule.id.to_string(),
                    severity: rule.severity,
                    message: rule.message.to_string(),
                    line: n as u32 + 1,
                });
            }
        }
    }
    findings
}

/// Drop `//` and `/* */` comment text from one line, tracking open block comments.
fn strip_comments(line: &str, in_block: &mut bool) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    loop {
        if *in_block {
            match rest.find("*/") {
                Some(end) => {
                    *in_block = false;
                    rest = &rest[end + 2..];
                }
                None => return out,
            }
        }
        let block = rest.find("/*");
        let line_comment = rest.find("//");
        match (block, line_comment) {
            (Some(b), Some(l)) if l < b => {
                out.push_str(&rest[..l]);
                return out;
            }
            (Some(b), _) => {
                out.push_str(&rest[..b]);
                out.push(' ');
                *in_block = true;
                rest = &rest[b + 2..];
            }
            (None, Some(l)) => {
                out.push_str(&rest[..l]);
                return out;
            }
            (None, None) => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(text: &str) -> Vec<String> {
        scan(text).into_iter().map(|f| f.rule).collect()
    }

    #[test]
    fn test_detects_unsafe_string_apis() {
        let text = "void f(char *d, const char *s) {\n    strcpy(d, s);\n    strcat(d, s);\n    sprintf(d, \"%s\", s);\n}\n";
        assert_eq!(
            rules(text),
            vec!["unsafe-strcpy", "unsafe-strcat", "unbounded-sprintf"]
        );
    }

    #[test]
    fn test_gets_is_critical() {
        let findings = scan("char b[8];\ngets(b);\n");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].line, 2);
    }

    #[test]
    fn test_safe_variants_are_not_flagged() {
        let text = "snprintf(d, n, \"%s\", s);\nstrncpy(d, s, n);\nfgets(b, 8, stdin);\nscanf(\"%7s\", b);\n";
        assert!(scan(text).is_empty());
    }

    #[test]
    fn test_control_flow_smells() {
        let text = "while (1) {\n  if (x) goto out;\n}\nfor (;;) {}\nlongjmp(env, 1);\nsystem(\"ls\");\n";
        assert_eq!(
            rules(text),
            vec!["unbounded-loop", "goto", "unbounded-loop", "non-local-jump", "shell-command"]
        );
    }

    #[test]
    fn test_comments_and_directives_are_ignored() {
        let text = "// strcpy(a, b);\n/* gets(b);\n system(x); */ int y;\n#define COPY strcpy(a, b)\n";
        assert!(scan(text).is_empty());
    }
}
