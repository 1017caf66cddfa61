//! Domain models for splice.
//!
//! - `SourceUnit` / `FunctionSpan`: the original file and its located functions
//! - `ValidationVerdict`: immutable result of validating one merged variant
//! - `RepairState`: per-ordinal repair bookkeeping

pub mod error;
pub mod repair;
pub mod unit;
pub mod verdict;

pub use error::{Result, SpliceError};
pub use repair::{RepairState, RepairStatus, RepairStep, StepResult};
pub use unit::{FunctionSpan, SourceUnit, UnitId};
pub use verdict::{
    categorize_error, error_lines, warning_lines, CompilationStatus, ErrorCategory, IssueLevel,
    SecurityFinding, Severity, SmokeTestResult, SyntaxIssue, ValidationVerdict,
};
