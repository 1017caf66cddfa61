//! Integration tests for the validation pipeline, alone and under the repair loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use splice_ci::fakes::ScriptedToolchain;
use splice_ci::{
    CommandToolchain, CompileCache, EnvironmentRules, HeuristicAnalyzer, PipelineOptions,
    ValidationPipeline,
};
use splice_core::fakes::{MemoryCandidateStore, ScriptedGenerationService};
use splice_core::{
    AttemptSelection, CompilationStatus, EnvironmentSettings, MergedVariant, RepairCoordinator,
    RepairPolicy, RepairStatus, SourceUnit, UnitId, Validator,
};

const PAIR: &str = "int add(int a, int b)\n{\n    return a + b;\n}\n\nint sub(int a, int b)\n{\n    return a - b;\n}\n";

fn variant(text: &str) -> MergedVariant {
    MergedVariant {
        unit_id: UnitId::new("pair-0000-t1"),
        window: 1,
        provenance: AttemptSelection::new().with(1, 1),
        text: text.to_string(),
    }
}

fn pipeline(toolchain: Arc<ScriptedToolchain>) -> ValidationPipeline {
    ValidationPipeline::new(
        Arc::new(HeuristicAnalyzer),
        toolchain,
        EnvironmentRules::from_settings(&EnvironmentSettings::default()).unwrap(),
        PipelineOptions::default(),
    )
}

/// Test: clean variant compiles and the compiler sees exactly the merged text
#[tokio::test]
async fn test_clean_variant_is_accepted() {
    let toolchain = Arc::new(ScriptedToolchain::succeeding());
    let verdict = pipeline(toolchain.clone())
        .validate(&variant(PAIR), "pair_2_trial_1_merge_1_a1-1.c")
        .await;

    assert!(verdict.is_accepted());
    assert!(verdict.syntax_valid);
    assert_eq!(verdict.compilation_status, CompilationStatus::Succeeded);
    assert!(verdict.quality_score > 0.9);
    assert_eq!(toolchain.inputs(), vec![PAIR.to_string()]);
}

/// Test: a syntax error short-circuits before the compiler runs
#[tokio::test]
async fn test_syntax_error_skips_compilation() {
    let toolchain = Arc::new(ScriptedToolchain::succeeding());
    let broken = PAIR.replace("a + b;", "a + b");
    let verdict = pipeline(toolchain.clone())
        .validate(&variant(&broken), "pair.c")
        .await;

    assert!(!verdict.syntax_valid);
    assert_eq!(verdict.compilation_status, CompilationStatus::NotAttempted);
    assert_eq!(verdict.quality_score, 0.0);
    assert_eq!(toolchain.calls(), 0);
    assert!(verdict.failure_reason().contains("line 3: expected ';'"));
}

/// Test: conditions spread over several lines reach the compiler
#[tokio::test]
async fn test_multiline_conditions_pass_syntax() {
    let text = "int clamp(int v, int lo, int hi)\n{\n    if (v < lo &&\n        lo <= hi)\n        return lo;\n    for (int i = 0;\n         i < 1;\n         i++)\n        v += 0;\n    return v > hi ? hi : v;\n}\n";
    let toolchain = Arc::new(ScriptedToolchain::succeeding());
    let verdict = pipeline(toolchain.clone())
        .validate(&variant(text), "clamp.c")
        .await;

    assert!(verdict.syntax_valid, "{:?}", verdict.syntax_issues);
    assert!(verdict.is_accepted());
    assert_eq!(toolchain.calls(), 1);
}

/// Test: a missing platform header is an environment failure and is accepted
#[tokio::test]
async fn test_missing_header_is_environment_failure() {
    let toolchain = Arc::new(ScriptedToolchain::new(vec![Ok((
        1,
        "pair.c:1:10: fatal error: windows.h: No such file or directory\ncompilation terminated.\n"
            .to_string(),
    ))]));
    let verdict = pipeline(toolchain)
        .validate(&variant(PAIR), "pair.c")
        .await;

    assert_eq!(verdict.compilation_status, CompilationStatus::FailedEnvironment);
    assert!(verdict.is_accepted());
}

/// Test: a real compile error is actionable and carries the diagnostic
#[tokio::test]
async fn test_compile_error_is_actionable() {
    let toolchain = Arc::new(ScriptedToolchain::new(vec![Ok((
        1,
        "pair.c:3:16: error: 'c' undeclared (first use in this function)\n".to_string(),
    ))]));
    let verdict = pipeline(toolchain)
        .validate(&variant(PAIR), "pair.c")
        .await;

    assert_eq!(verdict.compilation_status, CompilationStatus::FailedActionable);
    assert!(!verdict.is_accepted());
    assert_eq!(verdict.compiler_errors().len(), 1);
    assert!(verdict.failure_reason().contains("'c' undeclared"));
}

/// Test: a toolchain that cannot start folds into an actionable verdict
#[tokio::test]
async fn test_toolchain_failure_is_actionable() {
    let toolchain = Arc::new(ScriptedToolchain::new(vec![Err("gcc not installed".into())]));
    let verdict = pipeline(toolchain)
        .validate(&variant(PAIR), "pair.c")
        .await;

    assert_eq!(verdict.compilation_status, CompilationStatus::FailedActionable);
    assert!(verdict.compiler_output.contains("gcc not installed"));
}

/// Test: a compile result stored by one pipeline is reused by the next
#[tokio::test]
async fn test_compile_cache_skips_recompilation() {
    let cache_dir = tempfile::tempdir().unwrap();
    let cached_pipeline = |toolchain: Arc<ScriptedToolchain>| {
        ValidationPipeline::new(
            Arc::new(HeuristicAnalyzer),
            toolchain,
            EnvironmentRules::from_settings(&EnvironmentSettings::default()).unwrap(),
            PipelineOptions {
                compile_cache: Some(CompileCache::new(cache_dir.path(), "gcc -std=c11")),
                ..PipelineOptions::default()
            },
        )
    };

    let failing = "pair.c:3:16: error: 'c' undeclared (first use in this function)\n";
    let first_toolchain = Arc::new(ScriptedToolchain::new(vec![Ok((1, failing.to_string()))]));
    let first = cached_pipeline(first_toolchain.clone())
        .validate(&variant(PAIR), "pair.c")
        .await;
    assert_eq!(first.compilation_status, CompilationStatus::FailedActionable);
    assert_eq!(first_toolchain.calls(), 1);

    let toolchain = Arc::new(ScriptedToolchain::succeeding());
    let pipeline = cached_pipeline(toolchain.clone());
    let again = pipeline.validate(&variant(PAIR), "pair.c").await;
    assert_eq!(toolchain.calls(), 0);
    assert_eq!(again.compilation_status, CompilationStatus::FailedActionable);
    assert!(again
        .failure_reason()
        .contains("[undefined_symbol] pair.c:3:16: error: 'c' undeclared"));

    let changed = pipeline
        .validate(&variant(&PAIR.replace("a - b", "b - a")), "pair.c")
        .await;
    assert_eq!(toolchain.calls(), 1);
    assert!(changed.is_accepted());
}

/// Test: a hung compiler is killed at the timeout
#[tokio::test]
async fn test_compiler_timeout_is_actionable() {
    let pipeline = ValidationPipeline::new(
        Arc::new(HeuristicAnalyzer),
        Arc::new(CommandToolchain::new(
            Some(vec!["sleep".into(), "5".into()]),
            Duration::from_millis(200),
        )),
        EnvironmentRules::from_settings(&EnvironmentSettings::default()).unwrap(),
        PipelineOptions::default(),
    );
    let verdict = pipeline.validate(&variant(PAIR), "pair.c").await;

    assert_eq!(verdict.compilation_status, CompilationStatus::FailedActionable);
    assert!(verdict.compiler_output.contains("timed out"));
}

/// Test: a real process toolchain builds an executable and the smoke test runs it
#[tokio::test]
async fn test_command_toolchain_with_smoke_test() {
    let scratch_parent = tempfile::tempdir().unwrap();
    let build = "printf '#!/bin/sh\\necho ok\\n' > \"$1\" && chmod +x \"$1\"";
    let pipeline = ValidationPipeline::new(
        Arc::new(HeuristicAnalyzer),
        Arc::new(CommandToolchain::new(
            Some(vec![
                "sh".into(),
                "-c".into(),
                build.into(),
                "{input}".into(),
                "{output}".into(),
            ]),
            Duration::from_secs(10),
        )),
        EnvironmentRules::from_settings(&EnvironmentSettings::default()).unwrap(),
        PipelineOptions {
            scratch_parent: Some(PathBuf::from(scratch_parent.path())),
            smoke_test_timeout: Some(Duration::from_secs(10)),
            ..PipelineOptions::default()
        },
    );
    let verdict = pipeline.validate(&variant(PAIR), "pair.c").await;

    assert_eq!(verdict.compilation_status, CompilationStatus::Succeeded);
    let smoke = verdict.smoke_test.expect("smoke test ran");
    assert!(smoke.passed, "{smoke:?}");
    assert!(smoke.output.contains("ok"));
    // scratch directories are gone once the verdict is returned
    assert_eq!(std::fs::read_dir(scratch_parent.path()).unwrap().count(), 0);
}

/// Test: the repair loop fixes a generated candidate the analyzer rejects
#[tokio::test]
async fn test_repair_loop_with_heuristic_pipeline() {
    let unit = SourceUnit::new("pair.c", PAIR, vec!["add".into(), "sub".into()], 1);
    let generator = Arc::new(ScriptedGenerationService::new(vec![
        Ok("int add(int a, int b)\n{\n    return b + a\n}".into()),
        Ok("int add(int a, int b)\n{\n    return b + a;\n}".into()),
        Ok("int sub(int a, int b)\n{\n    return -(b - a);\n}".into()),
    ]));
    let toolchain = Arc::new(ScriptedToolchain::succeeding());
    let coordinator = RepairCoordinator::new(
        Arc::new(MemoryCandidateStore::new()),
        generator.clone(),
        Arc::new(pipeline(toolchain.clone())),
        RepairPolicy::default(),
    );

    let outcome = coordinator.run_unit(&unit, 2).await.unwrap();

    assert!(outcome.is_accepted());
    assert_eq!(outcome.window_reached(), 2);
    assert_eq!(generator.calls(), 3);
    assert_eq!(toolchain.calls(), 2);
    assert_eq!(outcome.repair_states[&1].status, RepairStatus::Repaired);
    assert_eq!(outcome.repair_states[&1].attempts_consumed, 1);
    let text = &outcome.variant().unwrap().text;
    assert!(text.contains("return b + a;"));
    assert!(text.contains("return -(b - a);"));
}
