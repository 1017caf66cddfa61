//! Function boundary location in C-family source text.
//!
//! This is deliberately not a parser. A small lexer skips comments, string
//! and character literals and preprocessor lines; a scanner then walks the
//! top level (including `namespace` and `extern "C"` blocks) looking for
//! `name ( ... ) [qualifiers] {` and pairs the body braces.
//!
//! Spans always come from the original text. A span starts at the first
//! token after the previous top-level boundary, so return types and leading
//! specifiers are included while preceding comments and directives are not.
//!
//! Overloads and repeated names: a bare name that matches more than one
//! definition is `Ambiguous`; `name@k` selects the k-th match in file order.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::FunctionSpan;

/// Errors from function location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    #[error("function not found: {identifier}")]
    NotFound { identifier: String },

    #[error("function {identifier} has {count} definitions; select one with {identifier}@<n>")]
    Ambiguous { identifier: String, count: usize },

    #[error("function {identifier} is selected more than once")]
    Duplicate { identifier: String },

    #[error("function {identifier} is defined before the function listed ahead of it")]
    OutOfOrder { identifier: String },

    #[error("unbalanced '{delimiter}' at byte {offset}")]
    Unbalanced { delimiter: char, offset: usize },

    #[error("invalid function identifier: {0:?}")]
    InvalidIdentifier(String),
}

pub type Result<T> = std::result::Result<T, LocatorError>;

/// One function definition found in the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDef {
    /// Name as written, including any `Class::` qualification.
    pub name: String,
    pub start: usize,
    pub end: usize,
    /// 1-based line of `start`.
    pub line: u32,
}

impl FunctionDef {
    /// Exact match, or `name` matches the last `::` segment.
    pub fn matches(&self, name: &str) -> bool {
        self.name == name
            || (self.name.len() > name.len() + 2
                && self.name.ends_with(name)
                && self.name[..self.name.len() - name.len()].ends_with("::"))
    }
}

/// Resolve `identifiers` to spans, ordinal `n` for `identifiers[n - 1]`.
pub fn locate(text: &str, identifiers: &[String]) -> Result<Vec<FunctionSpan>> {
    let defs = discover(text)?;
    let mut spans: Vec<FunctionSpan> = Vec::with_capacity(identifiers.len());
    let mut seen = HashSet::new();

    for (idx, raw) in identifiers.iter().enumerate() {
        let (name, occurrence) = parse_identifier(raw)?;
        let matches: Vec<&FunctionDef> = defs.iter().filter(|d| d.matches(name)).collect();
        let def = match (occurrence, matches.len()) {
            (_, 0) => {
                return Err(LocatorError::NotFound {
                    identifier: raw.clone(),
                })
            }
            (Some(k), _) => *matches
                .get(k - 1)
                .ok_or_else(|| LocatorError::NotFound {
                    identifier: raw.clone(),
                })?,
            (None, 1) => matches[0],
            (None, count) => {
                return Err(LocatorError::Ambiguous {
                    identifier: raw.clone(),
                    count,
                })
            }
        };

        if !seen.insert(def.start) {
            return Err(LocatorError::Duplicate {
                identifier: raw.clone(),
            });
        }
        if let Some(prev) = spans.last() {
            if def.start < prev.end {
                return Err(LocatorError::OutOfOrder {
                    identifier: raw.clone(),
                });
            }
        }
        spans.push(FunctionSpan {
            ordinal: idx as u32 + 1,
            start: def.start,
            end: def.end,
        });
    }

    Ok(spans)
}

/// Identifiers for the first `limit` definitions, using `name@k` where a name repeats.
pub fn discover_identifiers(text: &str, limit: usize) -> Result<Vec<String>> {
    let defs = discover(text)?;
    let ids = defs
        .iter()
        .enumerate()
        .take(limit)
        .map(|(idx, def)| {
            let total = defs.iter().filter(|d| d.matches(&def.name)).count();
            if total == 1 {
                def.name.clone()
            } else {
                let k = defs[..=idx].iter().filter(|d| d.matches(&def.name)).count();
                format!("{}@{}", def.name, k)
            }
        })
        .collect();
    Ok(ids)
}

fn parse_identifier(raw: &str) -> Result<(&str, Option<usize>)> {
    let raw_trim = raw.trim();
    let (name, occurrence) = match raw_trim.rsplit_once('@') {
        Some((name, k)) => {
            let k: usize = k
                .parse()
                .map_err(|_| LocatorError::InvalidIdentifier(raw.to_string()))?;
            if k == 0 {
                return Err(LocatorError::InvalidIdentifier(raw.to_string()));
            }
            (name, Some(k))
        }
        None => (raw_trim, None),
    };
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(LocatorError::InvalidIdentifier(raw.to_string()));
    }
    Ok((name, occurrence))
}

// ---------------------------------------------------------------------------
// Definition scan
// ---------------------------------------------------------------------------

/// List every top-level function definition in file order.
pub fn discover(text: &str) -> Result<Vec<FunctionDef>> {
    let tokens = lex(text);
    let mut defs = Vec::new();
    let mut namespaces: Vec<usize> = Vec::new();
    let mut stmt: Option<usize> = None;
    let mut i = 0;

    while i < tokens.len() {
        let tok = tokens[i];
        match tok.kind {
            TokenKind::Punct(b';') => {
                stmt = None;
                i += 1;
            }
            TokenKind::Punct(b'}') => {
                if namespaces.pop().is_none() {
                    return Err(LocatorError::Unbalanced {
                        delimiter: '}',
                        offset: tok.start,
                    });
                }
                stmt = None;
                i += 1;
            }
            TokenKind::Punct(b'{') => {
                let head = stmt.unwrap_or(i);
                if opens_namespace(text, &tokens[head..i]) {
                    namespaces.push(tok.start);
                    stmt = None;
                    i += 1;
                } else {
                    // Aggregate or initializer; the statement runs on to its ';'.
                    stmt.get_or_insert(i);
                    i = matching(&tokens, i, b'{', b'}')? + 1;
                }
            }
            TokenKind::Punct(b'(') => {
                let head = *stmt.get_or_insert(i);
                let close = matching(&tokens, i, b'(', b')')?;
                let named = i > head
                    && tokens[i - 1].kind == TokenKind::Ident
                    && !is_reserved(tokens[i - 1].text(text));
                if named {
                    if let Some(open) = find_body(text, &tokens, close + 1)? {
                        let body_close = matching(&tokens, open, b'{', b'}')?;
                        let start = tokens[head].start;
                        defs.push(FunctionDef {
                            name: qualified_name(text, &tokens, head, i - 1),
                            start,
                            end: tokens[body_close].end,
                            line: line_of(text, start),
                        });
                        stmt = None;
                        i = body_close + 1;
                        continue;
                    }
                }
                i = close + 1;
            }
            _ => {
                stmt.get_or_insert(i);
                i += 1;
            }
        }
    }

    if let Some(offset) = namespaces.pop() {
        return Err(LocatorError::Unbalanced {
            delimiter: '{',
            offset,
        });
    }
    Ok(defs)
}

/// Scan what follows a parameter list; `Some(index)` of the body `{` for a definition.
fn find_body(text: &str, tokens: &[Token], from: usize) -> Result<Option<usize>> {
    let mut k = from;
    let mut init_list = false;

    while k < tokens.len() {
        let tok = tokens[k];
        match tok.kind {
            TokenKind::Ident | TokenKind::Literal => k += 1,
            TokenKind::Number if init_list => k += 1,
            TokenKind::Punct(b'{') => {
                let member_init = init_list
                    && k > from
                    && matches!(
                        tokens[k - 1].kind,
                        TokenKind::Ident | TokenKind::Punct(b'>')
                    );
                if !member_init {
                    return Ok(Some(k));
                }
                k = matching(tokens, k, b'{', b'}')? + 1;
            }
            TokenKind::Punct(b'(') => {
                let allowed = init_list
                    || (k > from
                        && tokens[k - 1].kind == TokenKind::Ident
                        && SUFFIX_CALLS.contains(&tokens[k - 1].text(text)));
                if !allowed {
                    return Ok(None);
                }
                k = matching(tokens, k, b'(', b')')? + 1;
            }
            TokenKind::Punct(b'[') => k = matching(tokens, k, b'[', b']')? + 1,
            TokenKind::Punct(b':') => {
                let double = tokens
                    .get(k + 1)
                    .map(|t| t.kind == TokenKind::Punct(b':') && t.start == tok.end)
                    .unwrap_or(false);
                if double {
                    k += 2;
                } else {
                    init_list = true;
                    k += 1;
                }
            }
            TokenKind::Punct(b'&' | b'*' | b'-' | b'>' | b'<' | b'.' | b'~') => k += 1,
            TokenKind::Punct(b',') if init_list => k += 1,
            _ => return Ok(None),
        }
    }
    Ok(None)
}

/// Calls that may legally follow a parameter list before the body.
const SUFFIX_CALLS: &[&str] = &[
    "noexcept",
    "throw",
    "__attribute__",
    "__declspec",
    "alignas",
    "decltype",
    "requires",
];

fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "if" | "while"
            | "for"
            | "switch"
            | "return"
            | "sizeof"
            | "alignof"
            | "alignas"
            | "decltype"
            | "typeof"
            | "__typeof__"
            | "catch"
            | "static_assert"
            | "_Static_assert"
            | "__attribute__"
            | "__declspec"
            | "defined"
            | "noexcept"
            | "throw"
    )
}

fn opens_namespace(text: &str, head: &[Token]) -> bool {
    match head.first().map(|t| t.text(text)) {
        Some("namespace") => true,
        Some("inline") => head.get(1).map(|t| t.text(text)) == Some("namespace"),
        Some("extern") => head.len() == 2 && head[1].kind == TokenKind::Literal,
        _ => false,
    }
}

fn qualified_name(text: &str, tokens: &[Token], head: usize, name_idx: usize) -> String {
    let mut first = name_idx;
    if first > head && tokens[first - 1].kind == TokenKind::Punct(b'~') {
        first -= 1;
    }
    while first >= head + 3
        && tokens[first - 1].kind == TokenKind::Punct(b':')
        && tokens[first - 2].kind == TokenKind::Punct(b':')
        && tokens[first - 3].kind == TokenKind::Ident
    {
        first -= 3;
    }
    tokens[first..=name_idx]
        .iter()
        .map(|t| t.text(text))
        .collect()
}

fn matching(tokens: &[Token], open: usize, open_b: u8, close_b: u8) -> Result<usize> {
    let mut depth = 0usize;
    for (idx, tok) in tokens.iter().enumerate().skip(open) {
        match tok.kind {
            TokenKind::Punct(b) if b == open_b => depth += 1,
            TokenKind::Punct(b) if b == close_b => {
                depth -= 1;
                if depth == 0 {
                    return Ok(idx);
                }
            }
            _ => {}
        }
    }
    Err(LocatorError::Unbalanced {
        delimiter: open_b as char,
        offset: tokens[open].start,
    })
}

fn line_of(text: &str, offset: usize) -> u32 {
    text.as_bytes()[..offset]
        .iter()
        .filter(|&&b| b == b'\n')
        .count() as u32
        + 1
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Ident,
    Number,
    Literal,
    Punct(u8),
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

impl Token {
    fn text<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_ident_continue(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

fn lex(text: &str) -> Vec<Token> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line_start = true;

    while i < len {
        let b = bytes[i];
        match b {
            b'\n' => {
                line_start = true;
                i += 1;
                continue;
            }
            b' ' | b'\t' | b'\r' | 0x0b | 0x0c => {
                i += 1;
                continue;
            }
            b'#' if line_start => {
                i = skip_directive(bytes, i);
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = skip_line_comment(bytes, i);
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i);
                continue;
            }
            _ => {}
        }

        line_start = false;
        let start = i;
        let kind = if b == b'"' || b == b'\'' {
            i = skip_quoted(bytes, i);
            TokenKind::Literal
        } else if is_ident_start(b) {
            while i < len && is_ident_continue(bytes[i]) {
                i += 1;
            }
            let word = &text[start..i];
            match bytes.get(i) {
                Some(b'"') if matches!(word, "R" | "u8R" | "uR" | "UR" | "LR") => {
                    i = skip_raw_string(bytes, i);
                    TokenKind::Literal
                }
                Some(b'"' | b'\'') if matches!(word, "u8" | "u" | "U" | "L") => {
                    i = skip_quoted(bytes, i);
                    TokenKind::Literal
                }
                _ => TokenKind::Ident,
            }
        } else if b.is_ascii_digit() {
            while i < len
                && (bytes[i].is_ascii_alphanumeric()
                    || bytes[i] == b'.'
                    || bytes[i] == b'_'
                    || (bytes[i] == b'\''
                        && bytes.get(i + 1).map_or(false, u8::is_ascii_alphanumeric)))
            {
                i += 1;
            }
            TokenKind::Number
        } else {
            i += 1;
            TokenKind::Punct(b)
        };
        tokens.push(Token {
            kind,
            start,
            end: i,
        });
    }

    tokens
}

/// Skip a preprocessor directive, honouring backslash continuations. Stops at the newline.
fn skip_directive(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if bytes.get(i + 1) == Some(&b'\n') => i += 2,
            b'\\' if bytes.get(i + 1) == Some(&b'\r') && bytes.get(i + 2) == Some(&b'\n') => {
                i += 3
            }
            b'\n' => return i,
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            _ => i += 1,
        }
    }
    i
}

fn skip_line_comment(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

fn skip_block_comment(bytes: &[u8], i: usize) -> usize {
    let mut k = i + 2;
    while k + 1 < bytes.len() {
        if bytes[k] == b'*' && bytes[k + 1] == b'/' {
            return k + 2;
        }
        k += 1;
    }
    bytes.len()
}

/// Skip a quoted literal starting at the quote. Unterminated literals stop at end of line.
fn skip_quoted(bytes: &[u8], i: usize) -> usize {
    let quote = bytes[i];
    let mut k = i + 1;
    while k < bytes.len() {
        match bytes[k] {
            b'\\' => k += 2,
            b'\n' => return k,
            b if b == quote => return k + 1,
            _ => k += 1,
        }
    }
    bytes.len()
}

/// Skip `"delim( ... )delim"` starting at the opening quote.
fn skip_raw_string(bytes: &[u8], i: usize) -> usize {
    let Some(open) = bytes[i + 1..].iter().position(|&b| b == b'(') else {
        return bytes.len();
    };
    let delim = &bytes[i + 1..i + 1 + open];
    let mut k = i + 1 + open + 1;
    while k < bytes.len() {
        if bytes[k] == b')'
            && bytes[k + 1..].starts_with(delim)
            && bytes.get(k + 1 + delim.len()) == Some(&b'"')
        {
            return k + delim.len() + 2;
        }
        k += 1;
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"#include <stdio.h>
#define MAX(a, b) ((a) > (b) ? (a) : (b))

/* helper: add two numbers */
static int add(int a, int b) {
    return a + b;
}

int scale(int x);

// prints "}" on purpose
void report(const char *msg) {
    printf("%s }\n", msg);
    char c = '}';
    (void)c;
}

int main(void) {
    report("ok");
    return add(1, scale(2));
}
"#;

    fn names(text: &str) -> Vec<String> {
        discover(text).unwrap().into_iter().map(|d| d.name).collect()
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_discover_skips_declarations_comments_and_literals() {
        assert_eq!(names(SAMPLE), vec!["add", "report", "main"]);
    }

    #[test]
    fn test_span_covers_signature_and_body_only() {
        let spans = locate(SAMPLE, &ids(&["add", "main"])).unwrap();
        assert_eq!(spans.len(), 2);
        let add = spans[0].slice(SAMPLE);
        assert!(add.starts_with("static int add(int a, int b) {"));
        assert!(add.ends_with("return a + b;\n}"));
        let main = spans[1].slice(SAMPLE);
        assert!(main.starts_with("int main(void)"));
        assert!(main.ends_with('}'));
        assert_eq!(spans[0].ordinal, 1);
        assert_eq!(spans[1].ordinal, 2);
    }

    #[test]
    fn test_braces_in_strings_do_not_confuse_matching() {
        let spans = locate(SAMPLE, &ids(&["report"])).unwrap();
        let body = spans[0].slice(SAMPLE);
        assert!(body.contains("(void)c;"));
        assert!(body.ends_with("}"));
    }

    #[test]
    fn test_not_found() {
        let err = locate(SAMPLE, &ids(&["scale"])).unwrap_err();
        assert_eq!(
            err,
            LocatorError::NotFound {
                identifier: "scale".to_string()
            }
        );
    }

    #[test]
    fn test_out_of_order_rejected() {
        let err = locate(SAMPLE, &ids(&["main", "add"])).unwrap_err();
        assert!(matches!(err, LocatorError::OutOfOrder { .. }));
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = locate(SAMPLE, &ids(&["add", "add"])).unwrap_err();
        assert!(matches!(err, LocatorError::Duplicate { .. }));
    }

    #[test]
    fn test_overloads_are_ambiguous_until_disambiguated() {
        let text = "int f(int x) { return x; }\nint f(double x) { return (int)x; }\n";
        let err = locate(text, &ids(&["f"])).unwrap_err();
        assert_eq!(
            err,
            LocatorError::Ambiguous {
                identifier: "f".to_string(),
                count: 2
            }
        );

        let spans = locate(text, &ids(&["f@1", "f@2"])).unwrap();
        assert!(spans[0].slice(text).contains("int x"));
        assert!(spans[1].slice(text).contains("double x"));
        assert!(matches!(
            locate(text, &ids(&["f@3"])),
            Err(LocatorError::NotFound { .. })
        ));
    }

    #[test]
    fn test_discover_identifiers_disambiguates_repeats() {
        let text = "int f(int x) { return x; }\nint g(void) { return 0; }\nint f(double x) { return 1; }\n";
        assert_eq!(
            discover_identifiers(text, 10).unwrap(),
            vec!["f@1", "g", "f@2"]
        );
        assert_eq!(discover_identifiers(text, 1).unwrap(), vec!["f@1"]);
    }

    #[test]
    fn test_cpp_qualified_names_and_namespaces() {
        let text = r#"namespace net {
class Conn {
public:
    void open();
};

void Conn::open() {
    connected_ = true;
}

Conn::~Conn() noexcept {
}
}

extern "C" {
int c_entry(void) { return 0; }
}
"#;
        assert_eq!(names(text), vec!["Conn::open", "Conn::~Conn", "c_entry"]);
        let spans = locate(text, &ids(&["open", "Conn::~Conn", "c_entry"])).unwrap();
        assert!(spans[0].slice(text).starts_with("void Conn::open()"));
    }

    #[test]
    fn test_constructor_initializer_list() {
        let text = "Point::Point(int x, int y) : x_(x), y_{y} {\n    init();\n}\n";
        let spans = locate(text, &ids(&["Point::Point"])).unwrap();
        assert_eq!(spans[0].slice(text), text.trim_end());
    }

    #[test]
    fn test_struct_and_initializers_are_not_functions() {
        let text = "struct S { int (*cb)(int); };\nstatic int table[] = { 1, 2, 3 };\nint run(void) { return table[0]; }\n";
        assert_eq!(names(text), vec!["run"]);
    }

    #[test]
    fn test_trailing_return_and_attributes() {
        let text = "[[nodiscard]] auto twice(int x) -> int { return 2 * x; }\nint quiet(void) __attribute__((cold)) { return 0; }\n";
        assert_eq!(names(text), vec!["twice", "quiet"]);
        let spans = locate(text, &ids(&["twice"])).unwrap();
        assert!(spans[0].slice(text).starts_with("[[nodiscard]]"));
    }

    #[test]
    fn test_raw_string_with_braces() {
        let text = "const char *doc(void) { return R\"x(}{)x\"; }\nint after(void) { return 1; }\n";
        assert_eq!(names(text), vec!["doc", "after"]);
    }

    #[test]
    fn test_multiline_macro_is_skipped() {
        let text = "#define BODY { \\\n  return 0; \\\n}\nint ok(void) { return 1; }\n";
        assert_eq!(names(text), vec!["ok"]);
    }

    #[test]
    fn test_unbalanced_body() {
        let text = "int broken(void) {\n    if (x) {\n        return 1;\n}\n";
        assert!(matches!(
            discover(text),
            Err(LocatorError::Unbalanced { delimiter: '{', .. })
        ));
    }

    #[test]
    fn test_invalid_identifier() {
        assert!(matches!(
            locate(SAMPLE, &ids(&["add@0"])),
            Err(LocatorError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            locate(SAMPLE, &ids(&[""])),
            Err(LocatorError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_def_line_numbers() {
        let defs = discover(SAMPLE).unwrap();
        assert_eq!(defs[0].line, 5);
    }

    #[test]
    fn test_non_ascii_identifiers_keep_char_boundaries() {
        let text = "/* é */ int größe(void) { return 0; }\n";
        let spans = locate(text, &ids(&["größe"])).unwrap();
        assert!(spans[0].slice(text).starts_with("int größe"));
    }
}
