//! Structural syntax heuristics for C-family text.
//!
//! The text is first sanitized: comment bodies, string and character literal
//! contents and preprocessor lines become spaces, so every later pass sees
//! only code at the original byte offsets. On the sanitized bytes:
//!
//! - delimiters `()[]{}` must balance and nest
//! - inside statement blocks, a line that ends like a finished expression
//!   and is not continued on the next line must end with `;`, unless it
//!   closes the condition of an `if`/`for`/`while`/`switch` header
//!
//! Neither check understands the grammar; both stay quiet when unsure.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use splice_core::{IssueLevel, SyntaxIssue};

const LONG_LINE: usize = 200;

/// Keywords whose lines legitimately end without `;`.
const CONTROL_WORDS: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "case", "default", "try", "catch",
];

/// Keywords whose parenthesized header may span several lines.
const HEADER_WORDS: &[&str] = &["if", "for", "while", "switch", "catch"];

/// First bytes of a line that continue the previous line's expression.
const CONTINUATION: &[u8] = b"{.-+*/%&|^?:=<>)],(;\"[";

/// All issues found in `text`, ordered by position.
pub fn check(text: &str) -> Vec<SyntaxIssue> {
    let index = LineIndex::new(text.as_bytes());
    let (clean, mut issues) = sanitize(text.as_bytes(), &index);
    issues.extend(check_delimiters(&clean, &index));

    let structurally_sound = !issues.iter().any(|i| i.level == IssueLevel::Error);
    if structurally_sound {
        issues.extend(check_terminators(&clean, &index));
    }
    issues.extend(check_style(&clean));

    issues.sort_by_key(|i| (i.line, i.column));
    issues
}

/// Byte offset → 1-based (line, column).
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(bytes: &[u8]) -> Self {
        let mut starts = vec![0];
        starts.extend(
            bytes
                .iter()
                .enumerate()
                .filter(|(_, &b)| b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { starts }
    }

    fn position(&self, offset: usize) -> (u32, u32) {
        let line = match self.starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        (line as u32 + 1, (offset - self.starts[line]) as u32 + 1)
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> SyntaxIssue {
        let (line, column) = self.position(offset);
        SyntaxIssue::error(message, line, column)
    }
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Blank every byte in `from..to` except newlines.
fn blank(out: &mut [u8], from: usize, to: usize) {
    let end = to.min(out.len());
    for b in &mut out[from..end] {
        if *b != b'\n' {
            *b = b' ';
        }
    }
}

fn sanitize(src: &[u8], index: &LineIndex) -> (Vec<u8>, Vec<SyntaxIssue>) {
    let mut out = src.to_vec();
    let mut issues = Vec::new();
    let mut at_line_start = true;
    let mut i = 0;

    while i < src.len() {
        let b = src[i];
        let next = src.get(i + 1).copied();
        match b {
            b'\n' => {
                at_line_start = true;
                i += 1;
            }
            b'#' if at_line_start => {
                let end = directive_end(src, i);
                blank(&mut out, i, end);
                i = end;
            }
            b'/' if next == Some(b'/') => {
                let end = src[i..]
                    .iter()
                    .position(|&c| c == b'\n')
                    .map_or(src.len(), |p| i + p);
                blank(&mut out, i, end);
                i = end;
            }
            b'/' if next == Some(b'*') => {
                let end = match find(src, i + 2, b"*/") {
                    Some(p) => p + 2,
                    None => {
                        issues.push(index.error(i, "unterminated comment"));
                        src.len()
                    }
                };
                blank(&mut out, i, end);
                i = end;
            }
            b'"' if is_raw_prefix(src, i) => {
                at_line_start = false;
                i = raw_string(src, &mut out, i, index, &mut issues);
            }
            b'"' | b'\'' if !(b == b'\'' && is_digit_separator(src, i)) => {
                at_line_start = false;
                i = quoted(src, &mut out, i, index, &mut issues);
            }
            _ => {
                if !b.is_ascii_whitespace() {
                    at_line_start = false;
                }
                i += 1;
            }
        }
    }
    (out, issues)
}

fn find(src: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    src.get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

/// End of a preprocessor line, following backslash continuations.
fn directive_end(src: &[u8], mut i: usize) -> usize {
    while i < src.len() {
        if src[i] == b'\n' {
            let continued = src[..i].ends_with(b"\\") || src[..i].ends_with(b"\\\r");
            if !continued {
                return i;
            }
        }
        i += 1;
    }
    src.len()
}

/// `R"` possibly preceded by an encoding prefix (`u8R"`, `LR"`).
fn is_raw_prefix(src: &[u8], quote: usize) -> bool {
    if quote == 0 || src[quote - 1] != b'R' {
        return false;
    }
    let mut start = quote - 1;
    while start > 0 && is_ident(src[start - 1]) {
        start -= 1;
    }
    matches!(&src[start..quote], b"R" | b"u8R" | b"uR" | b"UR" | b"LR")
}

/// `'` inside a numeric literal (`1'000'000`).
fn is_digit_separator(src: &[u8], quote: usize) -> bool {
    if quote == 0 || !src[quote - 1].is_ascii_alphanumeric() {
        return false;
    }
    if !src.get(quote + 1).is_some_and(|b| b.is_ascii_hexdigit()) {
        return false;
    }
    let mut start = quote;
    while start > 0 && (is_ident(src[start - 1]) || src[start - 1] == b'\'') {
        start -= 1;
    }
    src[start].is_ascii_digit()
}

/// Blank a `"..."` or `'...'` literal body. Returns the offset after it.
fn quoted(
    src: &[u8],
    out: &mut [u8],
    open: usize,
    index: &LineIndex,
    issues: &mut Vec<SyntaxIssue>,
) -> usize {
    let quote = src[open];
    let mut j = open + 1;
    while j < src.len() {
        match src[j] {
            b'\\' => j += 2,
            b'\n' => break,
            c if c == quote => {
                blank(out, open + 1, j);
                return j + 1;
            }
            _ => j += 1,
        }
    }
    let what = if quote == b'"' { "\"" } else { "'" };
    issues.push(index.error(open, format!("missing terminating {} character", what)));
    let end = j.min(src.len());
    blank(out, open + 1, end);
    end
}

fn raw_string(
    src: &[u8],
    out: &mut [u8],
    open: usize,
    index: &LineIndex,
    issues: &mut Vec<SyntaxIssue>,
) -> usize {
    let delim_end = src[open + 1..]
        .iter()
        .take(17)
        .position(|&c| c == b'(')
        .map(|p| open + 1 + p);
    let Some(paren) = delim_end else {
        issues.push(index.error(open, "invalid raw string delimiter"));
        return open + 1;
    };
    let mut closing = Vec::with_capacity(paren - open + 1);
    closing.push(b')');
    closing.extend_from_slice(&src[open + 1..paren]);
    closing.push(b'"');

    match find(src, paren + 1, &closing) {
        Some(p) => {
            let close_quote = p + closing.len() - 1;
            blank(out, open + 1, close_quote);
            close_quote + 1
        }
        None => {
            issues.push(index.error(open, "unterminated raw string"));
            blank(out, open + 1, src.len());
            src.len()
        }
    }
}

fn closer_for(open: u8) -> u8 {
    match open {
        b'(' => b')',
        b'[' => b']',
        _ => b'}',
    }
}

fn check_delimiters(clean: &[u8], index: &LineIndex) -> Vec<SyntaxIssue> {
    let mut issues = Vec::new();
    let mut stack: Vec<(u8, usize)> = Vec::new();

    for (i, &b) in clean.iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' => stack.push((b, i)),
            b')' | b']' | b'}' => match stack.pop() {
                None => issues.push(index.error(i, format!("unmatched '{}'", b as char))),
                Some((open, at)) if closer_for(open) != b => {
                    let (line, _) = index.position(at);
                    issues.push(index.error(
                        i,
                        format!(
                            "mismatched '{}', expected '{}' to close '{}' from line {}",
                            b as char,
                            closer_for(open) as char,
                            open as char,
                            line
                        ),
                    ));
                }
                Some(_) => {}
            },
            _ => {}
        }
    }
    for (open, at) in stack {
        issues.push(index.error(at, format!("unclosed '{}'", open as char)));
    }
    issues
}

/// What a `{` opens, as far as statement termination is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Function body or compound statement: statements end with `;`.
    Block,
    /// Braced initializer or lambda assigned to something.
    Initializer,
    /// `struct`/`union`/`class`/`enum` body.
    Aggregate,
    /// `namespace`, `extern "C"` or anything unrecognized.
    Other,
}

fn has_word(head: &[u8], word: &str) -> bool {
    let word = word.as_bytes();
    head.windows(word.len()).enumerate().any(|(i, w)| {
        w == word
            && (i == 0 || !is_ident(head[i - 1]))
            && head.get(i + word.len()).map_or(true, |&b| !is_ident(b))
    })
}

/// A plain `=` outside parentheses.
fn has_assignment(head: &[u8]) -> bool {
    let mut depth = 0i32;
    for (i, &b) in head.iter().enumerate() {
        match b {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            b'=' if depth <= 0 => {
                let prev = if i > 0 { head[i - 1] } else { b' ' };
                let next = head.get(i + 1).copied().unwrap_or(b' ');
                if !b"=!<>+-*/%&|^".contains(&prev) && next != b'=' {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

fn last_word(head: &[u8]) -> &[u8] {
    let end = head.len();
    let mut start = end;
    while start > 0 && is_ident(head[start - 1]) {
        start -= 1;
    }
    &head[start..end]
}

fn classify_brace(head: &[u8], parent: Option<Scope>) -> Scope {
    let trimmed = head.trim_ascii_end();
    let Some(&prev) = trimmed.last() else {
        return match parent {
            Some(Scope::Block) => Scope::Block,
            Some(Scope::Initializer) => Scope::Initializer,
            _ => Scope::Other,
        };
    };

    let aggregate = ["enum", "struct", "union", "class"]
        .iter()
        .any(|w| has_word(trimmed, w));
    if aggregate && !trimmed.contains(&b'(') {
        return Scope::Aggregate;
    }

    match prev {
        b'=' | b',' | b'{' => Scope::Initializer,
        b')' if has_assignment(trimmed) => Scope::Initializer,
        b')' | b']' => Scope::Block,
        b':' if parent == Some(Scope::Block) => Scope::Block,
        b'"' => Scope::Other,
        b if is_ident(b) => match last_word(trimmed) {
            b"else" | b"do" | b"try" => Scope::Block,
            b"return" => Scope::Initializer,
            _ if has_word(trimmed, "namespace") || has_word(trimmed, "extern") => Scope::Other,
            _ if trimmed.contains(&b'(') && !has_assignment(trimmed) => Scope::Block,
            _ => Scope::Other,
        },
        _ => Scope::Other,
    }
}

/// Scope and bracket depth at the end of each line.
fn line_states(clean: &[u8]) -> Vec<(Option<Scope>, i32)> {
    let mut states = Vec::new();
    let mut scopes: Vec<(Scope, i32)> = Vec::new();
    let mut depth = 0i32;
    let mut head_start = 0;

    for (i, &b) in clean.iter().enumerate() {
        match b {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            b'{' => {
                let kind = classify_brace(&clean[head_start..i], scopes.last().map(|s| s.0));
                scopes.push((kind, depth));
                depth = 0;
                head_start = i + 1;
            }
            b'}' => {
                if let Some((_, saved)) = scopes.pop() {
                    depth = saved;
                }
                head_start = i + 1;
            }
            b';' if depth == 0 => head_start = i + 1,
            b'\n' => states.push((scopes.last().map(|s| s.0), depth)),
            _ => {}
        }
    }
    states.push((scopes.last().map(|s| s.0), depth));
    states
}

/// Offsets of every `)` that closes a control-statement header.
fn header_closers(clean: &[u8]) -> HashSet<usize> {
    let mut open: Vec<bool> = Vec::new();
    let mut closers = HashSet::new();
    for (i, &b) in clean.iter().enumerate() {
        match b {
            b'(' => {
                let word = last_word(clean[..i].trim_ascii_end());
                open.push(HEADER_WORDS.iter().any(|w| w.as_bytes() == word));
            }
            b')' => {
                if open.pop() == Some(true) {
                    closers.insert(i);
                }
            }
            _ => {}
        }
    }
    closers
}

fn is_macro_call(line: &[u8]) -> bool {
    let name_len = line.iter().take_while(|&&b| is_ident(b)).count();
    name_len > 1
        && line.get(name_len) == Some(&b'(')
        && line[..name_len]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || *b == b'_')
}

fn check_terminators(clean: &[u8], index: &LineIndex) -> Vec<SyntaxIssue> {
    let lines: Vec<&[u8]> = clean.split(|&b| b == b'\n').collect();
    let states = line_states(clean);
    let closers = header_closers(clean);
    let mut issues = Vec::new();

    for (n, line) in lines.iter().enumerate() {
        let Some(&(Some(Scope::Block), 0)) = states.get(n) else {
            continue;
        };
        let trimmed = line.trim_ascii();
        let Some(&last) = trimmed.last() else {
            continue;
        };
        if !(is_ident(last) || matches!(last, b')' | b']' | b'"' | b'\'')) {
            continue;
        }
        let line_start = index.starts[n];
        let end = line_start + line.trim_ascii_end().len();
        if last == b')' && closers.contains(&(end - 1)) {
            continue;
        }

        let statement = trimmed
            .iter()
            .position(|&b| b != b'}' && !b.is_ascii_whitespace())
            .map_or(&[][..], |p| &trimmed[p..]);
        let first_word = &statement[..statement.iter().take_while(|&&b| is_ident(b)).count()];
        if CONTROL_WORDS.iter().any(|w| w.as_bytes() == first_word) || is_macro_call(statement) {
            continue;
        }

        let continued = lines[n + 1..]
            .iter()
            .map(|l| l.trim_ascii())
            .find(|l| !l.is_empty())
            .and_then(|l| l.first())
            .is_some_and(|b| CONTINUATION.contains(b));
        if continued {
            continue;
        }

        issues.push(index.error(end, "expected ';' after statement"));
    }
    issues
}

fn check_style(clean: &[u8]) -> Vec<SyntaxIssue> {
    static EMPTY_BODY: OnceLock<Regex> = OnceLock::new();
    let empty_body = EMPTY_BODY.get_or_init(|| {
        Regex::new(r"^\s*(if|for)\s*\(.*\)\s*;\s*$").expect("valid empty-body pattern")
    });

    let mut issues = Vec::new();
    for (n, line) in clean.split(|&b| b == b'\n').enumerate() {
        let line_no = n as u32 + 1;
        if line.len() > LONG_LINE {
            issues.push(SyntaxIssue::warning(
                format!("line longer than {} characters", LONG_LINE),
                line_no,
                LONG_LINE as u32 + 1,
            ));
        }
        let text = String::from_utf8_lossy(line);
        if let Some(caps) = empty_body.captures(&text) {
            issues.push(SyntaxIssue::warning(
                format!("empty body after '{}'", &caps[1]),
                line_no,
                1,
            ));
        }
    }
    issues
}
