//! Repair Coordinator: the merge → validate → repair cycle for one unit.
//!
//! Windows are processed left to right. Window `k` replaces ordinals `1..=k`;
//! when its verdict is actionable the coordinator repairs ordinal `k` only,
//! within a bounded budget, before growing the window. An ordinal that ends
//! `exhausted` halts the unit.
//!
//! With caching enabled the coordinator restores the previous run's
//! checkpoint, reuses accepted attempts and gives an exhausted ordinal a
//! fresh budget when the store holds a newer attempt than the one it last
//! tried (an operator edit). Restored states take the current budget, so a
//! larger `max_fix_attempts` reopens an ordinal that ran out of calls.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::checkpoint::{read_checkpoint, write_checkpoint, UnitCheckpoint};
use crate::config::RunConfig;
use crate::domain::{
    FunctionSpan, RepairState, RepairStatus, Result, SourceUnit, StepResult, UnitId,
    ValidationVerdict,
};
use crate::generation::{GenerationError, GenerationRequest, GenerationService};
use crate::locator::locate;
use crate::merge::{merge, AttemptSelection, MergedVariant};
use crate::obs::{
    emit_candidate_stored, emit_generation_failed, emit_repair_requested,
    emit_repair_transition, emit_unit_finished, emit_unit_started, emit_window_validated,
    UnitSpan,
};
use crate::store::CandidateStore;
use crate::validation::Validator;

/// Budget and switches for the repair loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairPolicy {
    /// Generation calls allowed per ordinal while it is `pending`.
    pub max_fix_attempts: u32,
    /// When false an actionable failure goes straight to `exhausted`.
    pub auto_fix: bool,
    /// Upper bound on one generation call.
    pub generation_timeout: Duration,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_fix_attempts: 3,
            auto_fix: true,
            generation_timeout: Duration::from_secs(60),
        }
    }
}

impl RepairPolicy {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            max_fix_attempts: config.max_fix_attempts,
            auto_fix: config.auto_fix,
            generation_timeout: Duration::from_secs(config.generation.timeout_secs),
        }
    }
}

/// Final variant and verdict for one merge-back window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowOutcome {
    pub window: u32,
    pub variant: MergedVariant,
    pub verdict: ValidationVerdict,
}

/// Everything one unit's run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit_id: UnitId,
    pub window_requested: u32,
    /// One entry per validated window, in window order.
    pub windows: Vec<WindowOutcome>,
    pub repair_states: BTreeMap<u32, RepairState>,
    /// Ordinal that ended `exhausted` and stopped window growth.
    pub halted_at: Option<u32>,
    pub duration_ms: u64,
}

impl UnitOutcome {
    /// Highest window that was validated.
    pub fn window_reached(&self) -> u32 {
        self.windows.last().map_or(0, |w| w.window)
    }

    pub fn variant(&self) -> Option<&MergedVariant> {
        self.windows.last().map(|w| &w.variant)
    }

    pub fn verdict(&self) -> Option<&ValidationVerdict> {
        self.windows.last().map(|w| &w.verdict)
    }

    /// Verdicts keyed by window.
    pub fn verdicts_by_window(&self) -> BTreeMap<u32, &ValidationVerdict> {
        self.windows.iter().map(|w| (w.window, &w.verdict)).collect()
    }

    /// Every requested window was reached and the last one is accepted.
    pub fn is_accepted(&self) -> bool {
        self.halted_at.is_none()
            && self.window_reached() == self.window_requested
            && self.verdict().is_some_and(ValidationVerdict::is_accepted)
    }

    pub fn count_with_status(&self, status: RepairStatus) -> usize {
        self.repair_states
            .values()
            .filter(|s| s.status == status)
            .count()
    }
}

/// Drives one unit through its merge-back windows.
pub struct RepairCoordinator {
    store: Arc<dyn CandidateStore>,
    generator: Arc<dyn GenerationService>,
    validator: Arc<dyn Validator>,
    policy: RepairPolicy,
    checkpoint_dir: Option<PathBuf>,
    use_cache: bool,
}

impl RepairCoordinator {
    pub fn new(
        store: Arc<dyn CandidateStore>,
        generator: Arc<dyn GenerationService>,
        validator: Arc<dyn Validator>,
        policy: RepairPolicy,
    ) -> Self {
        Self {
            store,
            generator,
            validator,
            policy,
            checkpoint_dir: None,
            use_cache: false,
        }
    }

    /// Persist a checkpoint per unit under `dir` after every run.
    pub fn with_checkpoints(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    /// Reuse stored candidates and the previous checkpoint instead of regenerating.
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn policy(&self) -> &RepairPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn CandidateStore> {
        &self.store
    }

    /// Run windows `1..=min(merge_back, N)` for `unit`.
    pub async fn run_unit(&self, unit: &SourceUnit, merge_back: u32) -> Result<UnitOutcome> {
        UnitSpan::new(&unit.id)
            .instrument(self.run_windows(unit, merge_back))
            .await
    }

    async fn run_windows(&self, unit: &SourceUnit, merge_back: u32) -> Result<UnitOutcome> {
        let started = Instant::now();
        let spans = locate(unit.text(), &unit.functions)?;
        let window_requested = merge_back.min(unit.function_count());
        emit_unit_started(&unit.id, unit.function_count(), window_requested);

        let previous = match (&self.checkpoint_dir, self.use_cache) {
            (Some(dir), true) => read_checkpoint(&unit.id, dir)?,
            _ => None,
        };

        let mut selection = AttemptSelection::new();
        let mut repair_states = BTreeMap::new();
        let mut windows = Vec::new();
        let mut halted_at = None;

        if window_requested == 0 {
            let variant = MergedVariant::original(unit);
            let verdict = self.validate(unit, &variant).await;
            windows.push(WindowOutcome {
                window: 0,
                variant,
                verdict,
            });
        }

        for k in 1..=window_requested {
            let Some(attempt) = self
                .initial_attempt(unit, &spans, k, previous.as_ref(), &mut repair_states)
                .await?
            else {
                halted_at = Some(k);
                break;
            };
            selection.insert(k, attempt);

            let variant = merge(unit, &spans, &selection, self.store.as_ref())?;
            let verdict = self.validate(unit, &variant).await;

            let (variant, verdict) = if verdict.is_accepted() {
                if let Some(state) = repair_states.get_mut(&k) {
                    if state.status != RepairStatus::Repaired {
                        state.mark_repaired(attempt);
                        emit_repair_transition(
                            &unit.id,
                            k,
                            state.status,
                            state.attempts_consumed,
                            None,
                        );
                    }
                }
                (variant, verdict)
            } else {
                let state = repair_states
                    .entry(k)
                    .or_insert_with(|| RepairState::new(k, self.policy.max_fix_attempts, attempt));
                if state.status == RepairStatus::Repaired {
                    // The accepted attempt no longer validates; start over from it.
                    *state = RepairState::new(k, self.policy.max_fix_attempts, attempt);
                }
                self.repair(unit, &spans, &mut selection, state, variant, verdict)
                    .await?
            };

            let accepted = verdict.is_accepted();
            windows.push(WindowOutcome {
                window: k,
                variant,
                verdict,
            });
            if !accepted {
                halted_at = Some(k);
                break;
            }
        }

        if let Some(dir) = &self.checkpoint_dir {
            let mut checkpoint = UnitCheckpoint::new(unit.id.clone());
            checkpoint.selection = selection;
            checkpoint.repair = repair_states.clone();
            write_checkpoint(&checkpoint, dir)?;
        }

        let outcome = UnitOutcome {
            unit_id: unit.id.clone(),
            window_requested,
            windows,
            repair_states,
            halted_at,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        emit_unit_finished(
            &unit.id,
            outcome.window_reached(),
            outcome.duration_ms,
            outcome.is_accepted(),
        );
        Ok(outcome)
    }

    /// Attempt to merge first for ordinal `k`, or `None` if none could be produced.
    async fn initial_attempt(
        &self,
        unit: &SourceUnit,
        spans: &[FunctionSpan],
        k: u32,
        previous: Option<&UnitCheckpoint>,
        repair_states: &mut BTreeMap<u32, RepairState>,
    ) -> Result<Option<u32>> {
        if self.use_cache {
            let stored = self.store.attempts(&unit.id, k)?;
            let latest = stored.last().copied();

            if let Some(state) = previous.and_then(|cp| cp.repair.get(&k)) {
                let mut state = state.clone();
                state.refresh_budget(self.policy.max_fix_attempts);
                let chosen = match (state.status, latest) {
                    (RepairStatus::Repaired, _) if stored.contains(&state.last_tried) => {
                        state.last_tried
                    }
                    (_, Some(latest)) if latest > state.last_tried => {
                        state.resume(latest);
                        emit_repair_transition(&unit.id, k, state.status, 0, None);
                        latest
                    }
                    (RepairStatus::Exhausted, _) | (RepairStatus::Pending, _)
                        if stored.contains(&state.last_tried) =>
                    {
                        state.last_tried
                    }
                    _ => match latest {
                        Some(latest) => latest,
                        None => return self.generate_initial(unit, spans, k, repair_states).await,
                    },
                };
                repair_states.insert(k, state);
                return Ok(Some(chosen));
            }

            if let Some(attempt) = previous.and_then(|cp| cp.selection.get(k)) {
                if stored.contains(&attempt) {
                    return Ok(Some(attempt));
                }
            }
            if let Some(latest) = latest {
                return Ok(Some(latest));
            }
        }

        self.generate_initial(unit, spans, k, repair_states).await
    }

    /// First generation for ordinal `k`. Transient failures are retried within the budget.
    async fn generate_initial(
        &self,
        unit: &SourceUnit,
        spans: &[FunctionSpan],
        k: u32,
        repair_states: &mut BTreeMap<u32, RepairState>,
    ) -> Result<Option<u32>> {
        let request = self.request_for(unit, spans, k, None, None);
        let budget = self.policy.max_fix_attempts.max(1);
        let mut state = RepairState::new(k, budget, 0);

        while state.has_budget() {
            let call = state.begin_call();
            match self.call_generator(&request).await {
                Ok(text) => {
                    let attempt = self.store.put_verified(&unit.id, k, &text)?;
                    emit_candidate_stored(&unit.id, k, attempt);
                    return Ok(Some(attempt));
                }
                Err(GenerationError::Rejected(message)) => {
                    state.record(
                        call,
                        StepResult::Rejected {
                            message: message.clone(),
                        },
                    );
                    state.mark_rejected(message);
                    emit_repair_transition(
                        &unit.id,
                        k,
                        state.status,
                        state.attempts_consumed,
                        state.rejection.as_deref(),
                    );
                    repair_states.insert(k, state);
                    return Ok(None);
                }
                Err(err) => {
                    emit_generation_failed(&unit.id, k, &err);
                    state.record(
                        call,
                        StepResult::ServiceError {
                            message: err.to_string(),
                        },
                    );
                }
            }
        }

        state.mark_exhausted();
        emit_repair_transition(
            &unit.id,
            k,
            state.status,
            state.attempts_consumed,
            Some("no candidate generated"),
        );
        repair_states.insert(k, state);
        Ok(None)
    }

    /// Bounded repair of the newest ordinal of a failing window.
    async fn repair(
        &self,
        unit: &SourceUnit,
        spans: &[FunctionSpan],
        selection: &mut AttemptSelection,
        state: &mut RepairState,
        mut variant: MergedVariant,
        mut verdict: ValidationVerdict,
    ) -> Result<(MergedVariant, ValidationVerdict)> {
        let k = state.ordinal;

        if !self.policy.auto_fix {
            state.mark_exhausted();
            emit_repair_transition(
                &unit.id,
                k,
                state.status,
                state.attempts_consumed,
                Some("auto_fix disabled"),
            );
            return Ok((variant, verdict));
        }

        while state.has_budget() {
            let call = state.begin_call();
            emit_repair_requested(&unit.id, k, call, state.max_attempts);

            let prior = self.store.get(&unit.id, k, state.last_tried)?;
            let request =
                self.request_for(unit, spans, k, Some(prior), Some(verdict.failure_reason()));

            let text = match self.call_generator(&request).await {
                Ok(text) => text,
                Err(GenerationError::Rejected(message)) => {
                    state.record(
                        call,
                        StepResult::Rejected {
                            message: message.clone(),
                        },
                    );
                    state.mark_rejected(message);
                    emit_repair_transition(
                        &unit.id,
                        k,
                        state.status,
                        state.attempts_consumed,
                        state.rejection.as_deref(),
                    );
                    return Ok((variant, verdict));
                }
                Err(err) => {
                    emit_generation_failed(&unit.id, k, &err);
                    state.record(
                        call,
                        StepResult::ServiceError {
                            message: err.to_string(),
                        },
                    );
                    continue;
                }
            };

            let attempt = self.store.put_verified(&unit.id, k, &text)?;
            emit_candidate_stored(&unit.id, k, attempt);
            selection.insert(k, attempt);
            state.last_tried = attempt;

            variant = merge(unit, spans, selection, self.store.as_ref())?;
            verdict = self.validate(unit, &variant).await;

            if verdict.is_accepted() {
                state.record(call, StepResult::Accepted { attempt });
                state.mark_repaired(attempt);
                emit_repair_transition(&unit.id, k, state.status, state.attempts_consumed, None);
                return Ok((variant, verdict));
            }
            state.record(
                call,
                StepResult::StillFailing {
                    attempt,
                    reason: verdict.failure_reason(),
                },
            );
        }

        state.mark_exhausted();
        emit_repair_transition(&unit.id, k, state.status, state.attempts_consumed, None);
        Ok((variant, verdict))
    }

    async fn validate(&self, unit: &SourceUnit, variant: &MergedVariant) -> ValidationVerdict {
        let verdict = self
            .validator
            .validate(variant, &variant.file_name(unit))
            .await;
        emit_window_validated(
            &unit.id,
            variant.window,
            verdict.syntax_valid,
            verdict.compilation_status,
            verdict.quality_score,
        );
        verdict
    }

    async fn call_generator(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<String, GenerationError> {
        match tokio::time::timeout(
            self.policy.generation_timeout,
            self.generator.generate(request),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => Err(GenerationError::Service(format!(
                "timed out after {}s",
                self.policy.generation_timeout.as_secs()
            ))),
        }
    }

    fn request_for(
        &self,
        unit: &SourceUnit,
        spans: &[FunctionSpan],
        k: u32,
        prior_attempt: Option<String>,
        failure_reason: Option<String>,
    ) -> GenerationRequest {
        let original_text = spans
            .get(k as usize - 1)
            .map(|span| span.slice(unit.text()).to_string())
            .unwrap_or_default();
        GenerationRequest {
            unit_id: unit.id.clone(),
            ordinal: k,
            function_name: unit.identifier(k).unwrap_or_default().to_string(),
            language: unit.language().to_string(),
            original_text,
            prior_attempt,
            failure_reason,
        }
    }
}
