//! Splice Core Library
//!
//! Function-level variant synthesis: locate functions, store generated
//! candidates, merge them back into the original file, validate the result
//! and repair the failing function within a bounded budget.

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod fakes;
pub mod generation;
pub mod locator;
pub mod merge;
pub mod obs;
pub mod reporting;
pub mod store;
pub mod telemetry;
pub mod validation;

pub use domain::{
    categorize_error, error_lines, warning_lines, CompilationStatus, ErrorCategory, FunctionSpan,
    IssueLevel, RepairState, RepairStatus, RepairStep, Result, SecurityFinding, Severity,
    SmokeTestResult, SourceUnit, SpliceError, StepResult, SyntaxIssue, UnitId, ValidationVerdict,
};

pub use batch::{select_functions, BatchOutcome, BatchRunner};
pub use checkpoint::{read_checkpoint, write_checkpoint, UnitCheckpoint};
pub use config::{EnvironmentSettings, GenerationSettings, RunConfig, ToolchainSettings};
pub use coordinator::{RepairCoordinator, RepairPolicy, UnitOutcome, WindowOutcome};
pub use generation::http::HttpGenerationService;
pub use generation::{extract_code, GenerationError, GenerationRequest, GenerationService};
pub use locator::{discover, discover_identifiers, locate, FunctionDef, LocatorError};
pub use merge::{merge, splice_text, AttemptSelection, MergeError, MergedVariant};
pub use reporting::{
    parse_diagnostics, read_batch_report_json, render_batch_summary_md, write_batch_report_json,
    write_batch_summary_md, write_unit_report_json, BatchReport, BatchStats, CompilerDiagnostic,
    UnitCategory, UnitReport,
};
pub use store::fs::FsCandidateStore;
pub use store::{CandidateStore, Digest, StoreError};
pub use validation::Validator;

pub use obs::{
    emit_candidate_stored, emit_cleanup_failed, emit_generation_failed, emit_repair_requested,
    emit_repair_transition, emit_unit_finished, emit_unit_started, emit_window_validated,
    UnitSpan,
};
pub use telemetry::init_tracing;

/// Splice version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
