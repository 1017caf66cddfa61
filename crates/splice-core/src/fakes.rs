//! In-memory fakes for the core traits, for tests and dry runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{UnitId, ValidationVerdict};
use crate::generation::{GenerationError, GenerationRequest, GenerationService};
use crate::merge::MergedVariant;
use crate::store::{CandidateStore, Result, StoreError};
use crate::validation::Validator;

// ---------------------------------------------------------------------------
// MemoryCandidateStore
// ---------------------------------------------------------------------------

/// In-memory [`CandidateStore`] backed by a `HashMap<(unit, ordinal), attempts>`.
#[derive(Default)]
pub struct MemoryCandidateStore {
    candidates: Mutex<HashMap<(UnitId, u32), Vec<String>>>,
}

impl MemoryCandidateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CandidateStore for MemoryCandidateStore {
    fn put(&self, unit: &UnitId, ordinal: u32, text: &str) -> Result<u32> {
        if ordinal == 0 {
            return Err(StoreError::InvalidOrdinal);
        }
        let mut map = self.candidates.lock().unwrap();
        let entry = map.entry((unit.clone(), ordinal)).or_default();
        entry.push(text.to_string());
        Ok(entry.len() as u32)
    }

    fn get(&self, unit: &UnitId, ordinal: u32, attempt: u32) -> Result<String> {
        let map = self.candidates.lock().unwrap();
        map.get(&(unit.clone(), ordinal))
            .and_then(|v| v.get((attempt as usize).checked_sub(1)?))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                unit: unit.clone(),
                ordinal,
                attempt,
            })
    }

    fn attempts(&self, unit: &UnitId, ordinal: u32) -> Result<Vec<u32>> {
        let map = self.candidates.lock().unwrap();
        let count = map.get(&(unit.clone(), ordinal)).map_or(0, Vec::len) as u32;
        Ok((1..=count).collect())
    }
}

// ---------------------------------------------------------------------------
// ScriptedGenerationService
// ---------------------------------------------------------------------------

/// [`GenerationService`] that replays a scripted list of replies and records requests.
///
/// When the script runs out, `fallback` (if set) answers every further call.
#[derive(Default)]
pub struct ScriptedGenerationService {
    script: Mutex<VecDeque<std::result::Result<String, GenerationError>>>,
    fallback: Option<std::result::Result<String, GenerationError>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerationService {
    pub fn new(script: Vec<std::result::Result<String, GenerationError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with `reply`.
    pub fn always(reply: std::result::Result<String, GenerationError>) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::default()
        }
    }

    pub fn with_fallback(mut self, reply: std::result::Result<String, GenerationError>) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerationService {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(reply) => reply,
            None => Err(GenerationError::Service("script exhausted".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// FixedValidator
// ---------------------------------------------------------------------------

type VerdictFn = dyn Fn(&MergedVariant) -> ValidationVerdict + Send + Sync;

/// [`Validator`] backed by a closure over the merged variant.
pub struct FixedValidator {
    judge: Box<VerdictFn>,
    calls: AtomicUsize,
}

impl FixedValidator {
    pub fn new(judge: impl Fn(&MergedVariant) -> ValidationVerdict + Send + Sync + 'static) -> Self {
        Self {
            judge: Box::new(judge),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every variant gets the same verdict.
    pub fn always(verdict: ValidationVerdict) -> Self {
        Self::new(move |_| verdict.clone())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Validator for FixedValidator {
    async fn validate(&self, variant: &MergedVariant, _file_name: &str) -> ValidationVerdict {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.judge)(variant)
    }
}
