//! Splice CI - validation of merged variants
//!
//! Provides the validation pipeline behind the core `Validator` trait:
//! - Heuristic syntax, security and quality analysis
//! - Compilation through a configurable toolchain in scratch directories
//! - Classification of compiler failures as environment or actionable
//! - A persistent compile-result cache for cached reruns
//! - An optional smoke test of the built executable

pub mod analyzer;
pub mod cache;
pub mod classify;
pub mod fakes;
pub mod pipeline;
pub mod runner;
pub mod scratch;
pub mod toolchain;

// Re-export key types
pub use analyzer::{Analysis, Analyzer, HeuristicAnalyzer};
pub use cache::{CachedCompile, CompileCache};
pub use classify::{EnvironmentRules, RuleError};
pub use pipeline::{PipelineOptions, ValidationPipeline};
pub use runner::{ProcessOutput, ProcessRunner};
pub use scratch::ScratchDir;
pub use toolchain::{
    BuildContext, CommandToolchain, CompileOutput, CompilerPreset, Toolchain, ToolchainError,
};
