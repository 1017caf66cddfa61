//! Source units and the function spans located inside them.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::error::Result;
use crate::store::Digest;

/// Stable identity of one source unit: file stem, digest prefix and trial.
///
/// The digest covers the text and the ordered function identifiers. Two runs
/// over the same bytes, function list and trial map to the same identity,
/// which is what lets candidates and checkpoints be reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive `<stem>-<digest12>-t<trial>` from the path, text, function list and trial.
    pub fn derive(path: &Path, text: &str, functions: &[String], trial: u32) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unit".to_string());
        let stem: String = stem
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let mut keyed = text.as_bytes().to_vec();
        for name in functions {
            keyed.push(0);
            keyed.extend_from_slice(name.as_bytes());
        }
        let digest = Digest::compute(&keyed).to_hex();
        Self(format!("{}-{}-t{}", stem, &digest[..12], trial))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An original source file plus the ordered function identifiers to mutate.
///
/// Ordinal `n` refers to `functions[n - 1]`. Immutable for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub id: UnitId,
    pub path: PathBuf,
    pub trial: u32,
    pub functions: Vec<String>,
    text: String,
}

impl SourceUnit {
    pub fn new(
        path: impl Into<PathBuf>,
        text: impl Into<String>,
        functions: Vec<String>,
        trial: u32,
    ) -> Self {
        let path = path.into();
        let text = text.into();
        let id = UnitId::derive(&path, &text, &functions, trial);
        Self {
            id,
            path,
            trial,
            functions,
            text,
        }
    }

    /// Read the unit's text from disk.
    pub fn load(path: impl Into<PathBuf>, functions: Vec<String>, trial: u32) -> Result<Self> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)?;
        Ok(Self::new(path, text, functions, trial))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of functions selected for mutation (N).
    pub fn function_count(&self) -> u32 {
        self.functions.len() as u32
    }

    /// Identifier for a 1-based ordinal.
    pub fn identifier(&self, ordinal: u32) -> Option<&str> {
        let idx = (ordinal as usize).checked_sub(1)?;
        self.functions.get(idx).map(String::as_str)
    }

    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unit".to_string())
    }

    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "c".to_string())
    }

    /// Language tag used in generation prompts.
    pub fn language(&self) -> &'static str {
        match self.extension().as_str() {
            "cpp" | "cc" | "cxx" | "hpp" | "hh" | "C" => "C++",
            _ => "C",
        }
    }
}

/// Byte range `[start, end)` of one located function in the original text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpan {
    pub ordinal: u32,
    pub start: usize,
    pub end: usize,
}

impl FunctionSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The span's slice of `text`.
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}
