//! Structured observability hooks for the unit lifecycle.
//!
//! This module provides:
//! - Unit-scoped tracing spans via `UnitSpan`
//! - Emission functions for key lifecycle events: unit start/finish, window
//!   validation, repair requests and transitions, cleanup failures
//!
//! Events are emitted at `info!` unless they report a problem.

use std::future::Future;

use tracing::instrument::Instrumented;
use tracing::{error, info, warn, Instrument};

use crate::domain::{CompilationStatus, RepairStatus, UnitId};

/// Unit-scoped tracing span.
///
/// Entered guards are `!Send`, so async work runs through [`UnitSpan::instrument`].
///
/// # Example
///
/// ```ignore
/// let span = UnitSpan::new(&unit.id);
/// span.instrument(async { /* every event carries unit_id */ }).await;
/// ```
#[derive(Debug, Clone)]
pub struct UnitSpan {
    span: tracing::Span,
}

impl UnitSpan {
    pub fn new(unit_id: &UnitId) -> Self {
        Self {
            span: tracing::info_span!("splice.unit", unit_id = %unit_id),
        }
    }

    pub fn instrument<F: Future>(&self, fut: F) -> Instrumented<F> {
        fut.instrument(self.span.clone())
    }

    /// Enter the span for synchronous work.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

pub fn emit_unit_started(unit_id: &UnitId, function_count: u32, merge_back: u32) {
    info!(
        event = "unit.started",
        unit_id = %unit_id,
        function_count = function_count,
        merge_back = merge_back,
    );
}

pub fn emit_window_validated(
    unit_id: &UnitId,
    window: u32,
    syntax_valid: bool,
    status: CompilationStatus,
    quality_score: f32,
) {
    info!(
        event = "window.validated",
        unit_id = %unit_id,
        window = window,
        syntax_valid = syntax_valid,
        compilation = status.as_str(),
        quality_score = quality_score,
    );
}

pub fn emit_candidate_stored(unit_id: &UnitId, ordinal: u32, attempt: u32) {
    info!(event = "candidate.stored", unit_id = %unit_id, ordinal = ordinal, attempt = attempt);
}

pub fn emit_repair_requested(unit_id: &UnitId, ordinal: u32, call: u32, max_attempts: u32) {
    info!(
        event = "repair.requested",
        unit_id = %unit_id,
        ordinal = ordinal,
        call = call,
        max_attempts = max_attempts,
    );
}

/// Emit a repair state transition. Exhaustion is logged at error level.
pub fn emit_repair_transition(
    unit_id: &UnitId,
    ordinal: u32,
    status: RepairStatus,
    attempts_consumed: u32,
    reason: Option<&str>,
) {
    match status {
        RepairStatus::Exhausted => error!(
            event = "repair.transition",
            unit_id = %unit_id,
            ordinal = ordinal,
            status = "exhausted",
            attempts_consumed = attempts_consumed,
            reason = reason.unwrap_or("budget spent"),
        ),
        RepairStatus::Repaired => info!(
            event = "repair.transition",
            unit_id = %unit_id,
            ordinal = ordinal,
            status = "repaired",
            attempts_consumed = attempts_consumed,
        ),
        RepairStatus::Pending => info!(
            event = "repair.transition",
            unit_id = %unit_id,
            ordinal = ordinal,
            status = "pending",
            attempts_consumed = attempts_consumed,
        ),
    }
}

/// Emit a transient generation failure (warning level).
pub fn emit_generation_failed(unit_id: &UnitId, ordinal: u32, error: &dyn std::fmt::Display) {
    warn!(event = "generation.failed", unit_id = %unit_id, ordinal = ordinal, error = %error);
}

pub fn emit_unit_finished(unit_id: &UnitId, window_reached: u32, duration_ms: u64, accepted: bool) {
    info!(
        event = "unit.finished",
        unit_id = %unit_id,
        window_reached = window_reached,
        duration_ms = duration_ms,
        accepted = accepted,
    );
}

/// Emit event: a scratch directory could not be removed (warning level).
pub fn emit_cleanup_failed(path: &std::path::Path, error: &dyn std::fmt::Display) {
    warn!(event = "cleanup.failed", path = %path.display(), error = %error);
}
