//! Merge engine: positional substitution of candidate text into the original.
//!
//! Given the original text, its spans and an [`AttemptSelection`] covering
//! ordinals `1..=K`, the replaced spans receive candidate text and every
//! other byte is copied verbatim. Spans are always those of the original
//! text, so the same inputs always produce the same bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{FunctionSpan, SourceUnit, UnitId};
use crate::store::{CandidateStore, Digest, StoreError};

/// Errors from the merge engine.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("selection for window {window} is missing ordinals {missing:?}")]
    IncompleteSelection { window: u32, missing: Vec<u32> },

    #[error("ordinal {ordinal} is out of range; unit has {available} functions")]
    OrdinalOutOfRange { ordinal: u32, available: u32 },

    #[error("spans do not match the unit: {0}")]
    SpanMismatch(String),

    #[error("candidate store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, MergeError>;

/// Which stored attempt to use for each ordinal. The window K is the highest key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptSelection(BTreeMap<u32, u32>);

impl AttemptSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, ordinal: u32, attempt: u32) -> Self {
        self.insert(ordinal, attempt);
        self
    }

    pub fn insert(&mut self, ordinal: u32, attempt: u32) {
        self.0.insert(ordinal, attempt);
    }

    pub fn get(&self, ordinal: u32) -> Option<u32> {
        self.0.get(&ordinal).copied()
    }

    /// Merge-back window K: the highest selected ordinal, 0 when empty.
    pub fn window(&self) -> u32 {
        self.0.keys().next_back().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.0.iter().map(|(o, a)| (*o, *a))
    }

    pub fn as_map(&self) -> &BTreeMap<u32, u32> {
        &self.0
    }

    /// Ordinals in `1..=window` with no attempt.
    pub fn missing(&self) -> Vec<u32> {
        (1..=self.window())
            .filter(|o| !self.0.contains_key(o))
            .collect()
    }
}

impl FromIterator<(u32, u32)> for AttemptSelection {
    fn from_iter<T: IntoIterator<Item = (u32, u32)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A synthesized variant of a unit. Derived, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedVariant {
    pub unit_id: UnitId,
    pub window: u32,
    pub provenance: AttemptSelection,
    pub text: String,
}

impl MergedVariant {
    /// The unmodified original text of `unit` (window 0).
    pub fn original(unit: &SourceUnit) -> Self {
        Self {
            unit_id: unit.id.clone(),
            window: 0,
            provenance: AttemptSelection::new(),
            text: unit.text().to_string(),
        }
    }

    pub fn digest(&self) -> Digest {
        Digest::compute(self.text.as_bytes())
    }

    /// `<stem>_<n>_trial_<t>_merge_<K>_a<attempts>.<ext>`
    pub fn file_name(&self, unit: &SourceUnit) -> String {
        let mut name = format!(
            "{}_{}_trial_{}_merge_{}",
            unit.stem(),
            unit.function_count(),
            unit.trial,
            self.window
        );
        if !self.provenance.is_empty() {
            let attempts: Vec<String> = self
                .provenance
                .iter()
                .map(|(_, a)| a.to_string())
                .collect();
            name.push_str("_a");
            name.push_str(&attempts.join("-"));
        }
        name.push('.');
        name.push_str(&unit.extension());
        name
    }
}

/// Build the variant for `selection`, fetching candidate texts from `store`.
pub fn merge(
    unit: &SourceUnit,
    spans: &[FunctionSpan],
    selection: &AttemptSelection,
    store: &dyn CandidateStore,
) -> Result<MergedVariant> {
    check_spans(unit, spans)?;

    let window = selection.window();
    if window > unit.function_count() {
        return Err(MergeError::OrdinalOutOfRange {
            ordinal: window,
            available: unit.function_count(),
        });
    }
    let missing = selection.missing();
    if !missing.is_empty() {
        return Err(MergeError::IncompleteSelection { window, missing });
    }
    if selection.as_map().contains_key(&0) {
        return Err(MergeError::OrdinalOutOfRange {
            ordinal: 0,
            available: unit.function_count(),
        });
    }

    let mut replacements = BTreeMap::new();
    for (ordinal, attempt) in selection.iter() {
        replacements.insert(ordinal, store.get(&unit.id, ordinal, attempt)?);
    }

    Ok(MergedVariant {
        unit_id: unit.id.clone(),
        window,
        provenance: selection.clone(),
        text: splice_text(unit.text(), spans, &replacements),
    })
}

/// Replace the spans named in `replacements`, copying every other byte.
pub fn splice_text(
    original: &str,
    spans: &[FunctionSpan],
    replacements: &BTreeMap<u32, String>,
) -> String {
    let extra: usize = replacements.values().map(String::len).sum();
    let mut out = String::with_capacity(original.len() + extra);
    let mut cursor = 0;
    for span in spans {
        if let Some(text) = replacements.get(&span.ordinal) {
            out.push_str(&original[cursor..span.start]);
            out.push_str(text);
            cursor = span.end;
        }
    }
    out.push_str(&original[cursor..]);
    out
}

fn check_spans(unit: &SourceUnit, spans: &[FunctionSpan]) -> Result<()> {
    if spans.len() != unit.functions.len() {
        return Err(MergeError::SpanMismatch(format!(
            "{} spans for {} functions",
            spans.len(),
            unit.functions.len()
        )));
    }
    let text = unit.text();
    let mut prev_end = 0;
    for (idx, span) in spans.iter().enumerate() {
        if span.ordinal != idx as u32 + 1 {
            return Err(MergeError::SpanMismatch(format!(
                "span {} carries ordinal {}",
                idx + 1,
                span.ordinal
            )));
        }
        if span.start < prev_end
            || span.end < span.start
            || span.end > text.len()
            || !text.is_char_boundary(span.start)
            || !text.is_char_boundary(span.end)
        {
            return Err(MergeError::SpanMismatch(format!(
                "ordinal {} has invalid range {}..{}",
                span.ordinal, span.start, span.end
            )));
        }
        prev_end = span.end;
    }
    Ok(())
}
