//! Per-ordinal repair state.

use serde::{Deserialize, Serialize};

/// Repair lifecycle: `pending -> {repaired, exhausted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Pending,
    Repaired,
    Exhausted,
}

/// What happened on one generation call made while repairing an ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepResult {
    /// A new candidate was stored and the re-validated variant was accepted.
    Accepted { attempt: u32 },

    /// A new candidate was stored but the variant still fails.
    StillFailing { attempt: u32, reason: String },

    /// Transient service failure or timeout; budget consumed, no candidate.
    ServiceError { message: String },

    /// Non-retryable refusal from the service.
    Rejected { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairStep {
    /// 1-based index of the generation call within the current budget.
    pub call: u32,
    pub result: StepResult,
}

/// Repair bookkeeping for one ordinal of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairState {
    pub ordinal: u32,
    pub status: RepairStatus,
    pub attempts_consumed: u32,
    pub max_attempts: u32,
    /// Last candidate attempt that was merged and validated for this ordinal.
    pub last_tried: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
    #[serde(default)]
    pub steps: Vec<RepairStep>,
}

impl RepairState {
    /// State on first actionable failure of `ordinal` with candidate `failed_attempt`.
    pub fn new(ordinal: u32, max_attempts: u32, failed_attempt: u32) -> Self {
        Self {
            ordinal,
            status: RepairStatus::Pending,
            attempts_consumed: 0,
            max_attempts,
            last_tried: failed_attempt,
            rejection: None,
            steps: Vec::new(),
        }
    }

    pub fn has_budget(&self) -> bool {
        self.status == RepairStatus::Pending && self.attempts_consumed < self.max_attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RepairStatus::Pending
    }

    /// Consume one unit of budget for a generation call, returning its 1-based index.
    pub fn begin_call(&mut self) -> u32 {
        self.attempts_consumed += 1;
        self.attempts_consumed
    }

    pub fn record(&mut self, call: u32, result: StepResult) {
        self.steps.push(RepairStep { call, result });
    }

    pub fn mark_repaired(&mut self, attempt: u32) {
        self.last_tried = attempt;
        self.status = RepairStatus::Repaired;
    }

    pub fn mark_exhausted(&mut self) {
        self.status = RepairStatus::Exhausted;
    }

    pub fn mark_rejected(&mut self, message: impl Into<String>) {
        self.rejection = Some(message.into());
        self.status = RepairStatus::Exhausted;
    }

    /// Adopt the budget of the current run. An ordinal that ran out of budget
    /// (not one the service rejected) is pending again if calls remain.
    pub fn refresh_budget(&mut self, max_attempts: u32) {
        self.max_attempts = max_attempts;
        if self.status == RepairStatus::Exhausted
            && self.rejection.is_none()
            && self.attempts_consumed < max_attempts
        {
            self.status = RepairStatus::Pending;
        }
    }

    /// Re-enter `pending` with a fresh budget after an external edit stored `newer_attempt`.
    pub fn resume(&mut self, newer_attempt: u32) {
        self.status = RepairStatus::Pending;
        self.attempts_consumed = 0;
        self.rejection = None;
        self.last_tried = newer_attempt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_accounting() {
        let mut state = RepairState::new(2, 2, 1);
        assert!(state.has_budget());
        assert_eq!(state.begin_call(), 1);
        assert!(state.has_budget());
        assert_eq!(state.begin_call(), 2);
        assert!(!state.has_budget());
        assert!(!state.is_terminal());
        state.mark_exhausted();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_rejection_is_terminal_with_reason() {
        let mut state = RepairState::new(1, 3, 1);
        state.begin_call();
        state.mark_rejected("content policy");
        assert_eq!(state.status, RepairStatus::Exhausted);
        assert_eq!(state.rejection.as_deref(), Some("content policy"));
        assert!(!state.has_budget());
    }

    #[test]
    fn test_resume_resets_budget() {
        let mut state = RepairState::new(1, 3, 1);
        for _ in 0..3 {
            state.begin_call();
        }
        state.mark_exhausted();
        state.resume(5);
        assert_eq!(state.status, RepairStatus::Pending);
        assert_eq!(state.attempts_consumed, 0);
        assert_eq!(state.last_tried, 5);
        assert!(state.has_budget());
    }

    #[test]
    fn test_refresh_budget_reopens_only_budget_exhaustion() {
        let mut state = RepairState::new(1, 2, 1);
        state.begin_call();
        state.begin_call();
        state.mark_exhausted();

        state.refresh_budget(2);
        assert_eq!(state.status, RepairStatus::Exhausted);

        state.refresh_budget(4);
        assert_eq!(state.status, RepairStatus::Pending);
        assert_eq!(state.max_attempts, 4);
        assert_eq!(state.attempts_consumed, 2);
        assert!(state.has_budget());

        let mut rejected = RepairState::new(1, 2, 1);
        rejected.begin_call();
        rejected.mark_rejected("content policy");
        rejected.refresh_budget(5);
        assert_eq!(rejected.status, RepairStatus::Exhausted);
    }

    #[test]
    fn test_repair_state_serde_roundtrip() {
        let mut state = RepairState::new(3, 3, 1);
        let call = state.begin_call();
        state.record(
            call,
            StepResult::StillFailing {
                attempt: 2,
                reason: "expected ';'".to_string(),
            },
        );
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"type\":\"still_failing\""));
        let back: RepairState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}
