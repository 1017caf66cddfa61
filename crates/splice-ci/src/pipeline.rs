//! Ordered validation of one merged variant.
//!
//! Stages:
//! 1. syntax (short-circuits on error)
//! 2. quality and security findings
//! 3. compilation in a private scratch directory, classified against the
//!    environment rules
//! 4. optional smoke test of the built executable
//!
//! Nothing here retries. Resource problems become actionable failures.
//! With a compile cache configured, a variant already compiled by an earlier
//! run reuses the stored compiler result instead of invoking the toolchain.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use splice_core::{
    CompilationStatus, MergedVariant, RunConfig, SmokeTestResult, ValidationVerdict, Validator,
};
use tracing::{error, info, warn};

use crate::analyzer::{Analysis, Analyzer, HeuristicAnalyzer};
use crate::cache::{CachedCompile, CompileCache};
use crate::classify::{EnvironmentRules, RuleError};
use crate::runner::ProcessRunner;
use crate::scratch::ScratchDir;
use crate::toolchain::{BuildContext, CommandToolchain, Toolchain};

/// Knobs for the compile and smoke test stages.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub include_dirs: Vec<PathBuf>,
    pub build_context: Option<PathBuf>,
    pub scratch_parent: Option<PathBuf>,
    /// Run the built executable once. `None` disables the smoke test.
    pub smoke_test_timeout: Option<Duration>,
    pub compile_cache: Option<CompileCache>,
}

impl PipelineOptions {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            include_dirs: config.toolchain.include_dirs.clone(),
            build_context: config.toolchain.build_context.clone(),
            scratch_parent: config.toolchain.scratch_dir.clone(),
            smoke_test_timeout: config
                .run_tests
                .then(|| Duration::from_secs(config.toolchain.test_timeout_secs)),
            compile_cache: config.use_cache.then(|| {
                let fingerprint = serde_json::to_string(&config.toolchain).unwrap_or_default();
                CompileCache::new(config.output_dir.join(".compile-cache"), fingerprint)
            }),
        }
    }
}

pub struct ValidationPipeline {
    analyzer: Arc<dyn Analyzer>,
    toolchain: Arc<dyn Toolchain>,
    rules: EnvironmentRules,
    options: PipelineOptions,
}

impl ValidationPipeline {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        toolchain: Arc<dyn Toolchain>,
        rules: EnvironmentRules,
        options: PipelineOptions,
    ) -> Self {
        Self {
            analyzer,
            toolchain,
            rules,
            options,
        }
    }

    /// Heuristic analyzer, command toolchain and environment rules from `config`.
    pub fn from_config(config: &RunConfig) -> Result<Self, RuleError> {
        Ok(Self::new(
            Arc::new(HeuristicAnalyzer),
            Arc::new(CommandToolchain::from_settings(&config.toolchain)),
            EnvironmentRules::from_settings(&config.environment)?,
            PipelineOptions::from_config(config),
        ))
    }

    /// Validate raw text outside of a merge, e.g. a file handed to the CLI.
    pub async fn validate_text(&self, label: &str, file_name: &str, text: &str) -> ValidationVerdict {
        let analysis = self.analyzer.analyze(text);
        if !analysis.syntax_valid() {
            return ValidationVerdict::syntax_failure(analysis.syntax_issues);
        }
        self.compile_stage(label, file_name, text, analysis).await
    }

    async fn compile_stage(
        &self,
        label: &str,
        file_name: &str,
        text: &str,
        analysis: Analysis,
    ) -> ValidationVerdict {
        let actionable = |analysis: Analysis, output: String| {
            ValidationVerdict::compiled(
                analysis.syntax_issues,
                analysis.security_findings,
                analysis.quality_score,
                CompilationStatus::FailedActionable,
                output,
            )
        };

        let cache_key = self
            .options
            .compile_cache
            .as_ref()
            .map(|cache| (cache, cache.key(file_name, text)));
        if let Some((cache, key)) = &cache_key {
            if let Some(hit) = cache.get(key) {
                // A cached success has no executable to smoke test.
                if hit.exit_code != 0 || self.options.smoke_test_timeout.is_none() {
                    return self.classified(label, analysis, hit.exit_code, hit.output, true);
                }
            }
        }

        let scratch = match ScratchDir::create(self.options.scratch_parent.as_deref(), label) {
            Ok(s) => s,
            Err(e) => {
                error!(label = %label, error = %e, "failed to create scratch directory");
                return actionable(analysis, format!("scratch directory unavailable: {e}"));
            }
        };
        let input = match scratch.materialize(file_name, text) {
            Ok(p) => p,
            Err(e) => {
                error!(
                    label = %label,
                    dir = %scratch.path().display(),
                    error = %e,
                    "failed to materialize variant"
                );
                return actionable(analysis, format!("variant could not be written: {e}"));
            }
        };

        let ctx = BuildContext {
            working_dir: self.options.build_context.clone(),
            include_dirs: self.options.include_dirs.clone(),
            output: executable_path(scratch.path(), file_name),
        };
        let compiled = match self.toolchain.compile(&input, &ctx).await {
            Ok(c) => c,
            Err(e) => {
                warn!(label = %label, error = %e, "compiler did not complete");
                return actionable(analysis, e.to_string());
            }
        };

        let output = compiled.combined();
        if let Some((cache, key)) = &cache_key {
            let entry = CachedCompile {
                exit_code: compiled.exit_code,
                output: output.clone(),
            };
            if let Err(e) = cache.put(key, &entry) {
                warn!(
                    label = %label,
                    dir = %cache.dir().display(),
                    error = %e,
                    "failed to cache compile result"
                );
            }
        }
        info!(label = %label, duration_ms = compiled.duration_ms, "compiler finished");

        let mut verdict = self.classified(label, analysis, compiled.exit_code, output, false);
        if let (Some(timeout), Some(exe), CompilationStatus::Succeeded) = (
            self.options.smoke_test_timeout,
            &compiled.executable,
            verdict.compilation_status,
        ) {
            verdict.smoke_test = Some(smoke_test(exe, scratch.path(), timeout).await);
        }
        verdict
    }

    fn classified(
        &self,
        label: &str,
        analysis: Analysis,
        exit_code: i32,
        output: String,
        cached: bool,
    ) -> ValidationVerdict {
        let status = self.rules.classify(exit_code, &output);
        info!(
            label = %label,
            exit_code,
            status = status.as_str(),
            cached,
            "compiled variant"
        );
        ValidationVerdict::compiled(
            analysis.syntax_issues,
            analysis.security_findings,
            analysis.quality_score,
            status,
            output,
        )
    }
}

#[async_trait]
impl Validator for ValidationPipeline {
    async fn validate(&self, variant: &MergedVariant, file_name: &str) -> ValidationVerdict {
        let label = format!("{}-k{}", variant.unit_id, variant.window);
        self.validate_text(&label, file_name, &variant.text).await
    }
}

fn executable_path(dir: &Path, file_name: &str) -> PathBuf {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "variant".to_string());
    dir.join(format!("{stem}.out"))
}

/// Run the executable once; a non-zero exit or a timeout fails the test.
async fn smoke_test(exe: &Path, dir: &Path, timeout: Duration) -> SmokeTestResult {
    let argv = vec![exe.to_string_lossy().into_owned()];
    match ProcessRunner::run(&argv, Some(dir), timeout).await {
        Ok(out) => {
            let output = out.combined();
            let mut failures: Vec<String> = output
                .lines()
                .filter(|l| l.contains("FAIL") || l.contains("Assertion"))
                .map(|l| l.trim().to_string())
                .collect();
            if !out.success() && failures.is_empty() {
                failures.push(format!("exited with status {}", out.exit_code));
            }
            SmokeTestResult {
                passed: out.success(),
                exit_code: Some(out.exit_code),
                output,
                failures,
            }
        }
        Err(e) => SmokeTestResult {
            passed: false,
            exit_code: None,
            output: String::new(),
            failures: vec![e.to_string()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executable_path_uses_stem() {
        assert_eq!(
            executable_path(Path::new("/s"), "calc_3_trial_1_merge_2_a1-1.c"),
            PathBuf::from("/s/calc_3_trial_1_merge_2_a1-1.out")
        );
    }

    #[test]
    fn test_options_from_config() {
        let mut config = RunConfig::default();
        assert!(PipelineOptions::from_config(&config).smoke_test_timeout.is_none());
        assert!(PipelineOptions::from_config(&config).compile_cache.is_none());
        config.use_cache = true;
        let cache = PipelineOptions::from_config(&config).compile_cache.unwrap();
        assert_eq!(cache.dir(), config.output_dir.join(".compile-cache"));
        config.run_tests = true;
        assert_eq!(
            PipelineOptions::from_config(&config).smoke_test_timeout,
            Some(Duration::from_secs(10))
        );
    }

    #[tokio::test]
    async fn test_smoke_test_reports_failure_lines() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("t.sh");
        std::fs::write(&script, "#!/bin/sh\necho 'FAIL: add(2,2)'\nexit 3\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let result = smoke_test(&script, dir.path(), Duration::from_secs(10)).await;
        assert!(!result.passed);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.failures, vec!["FAIL: add(2,2)"]);
    }
}
