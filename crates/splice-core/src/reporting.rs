use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinator::UnitOutcome;
use crate::domain::{
    CompilationStatus, RepairState, RepairStatus, SecurityFinding, SmokeTestResult, SourceUnit,
    SyntaxIssue, ValidationVerdict,
};
use crate::merge::AttemptSelection;

pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// One `file:line:col: severity: message` record from compiler output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompilerDiagnostic {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
    pub severity: String,
    pub message: String,
}

/// Parse gcc/clang style diagnostics. Lines that do not match are skipped.
pub fn parse_diagnostics(output: &str) -> Vec<CompilerDiagnostic> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^(.+?):(\d+):(?:(\d+):)?\s*(fatal error|error|warning|note):\s*(.*)$")
            .expect("valid diagnostic pattern")
    });
    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line.trim_end())?;
            Some(CompilerDiagnostic {
                file: caps[1].to_string(),
                line: caps[2].parse().ok()?,
                column: caps.get(3).and_then(|m| m.as_str().parse().ok()),
                severity: caps[4].to_string(),
                message: caps[5].to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualitySection {
    pub syntax_valid: bool,
    pub syntax_issues: Vec<SyntaxIssue>,
    pub security_issues: Vec<SecurityFinding>,
    pub quality_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompilationSection {
    pub status: CompilationStatus,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub diagnostics: Vec<CompilerDiagnostic>,
}

impl QualitySection {
    fn from_verdict(verdict: &ValidationVerdict) -> Self {
        Self {
            syntax_valid: verdict.syntax_valid,
            syntax_issues: verdict.syntax_issues.clone(),
            security_issues: verdict.security_findings.clone(),
            quality_score: verdict.quality_score,
        }
    }
}

impl CompilationSection {
    fn from_verdict(verdict: &ValidationVerdict) -> Self {
        Self {
            status: verdict.compilation_status,
            errors: verdict.compiler_errors(),
            warnings: verdict.compiler_warnings(),
            diagnostics: parse_diagnostics(&verdict.compiler_output),
        }
    }
}

/// Per-window line in the unit report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowSummary {
    pub window: u32,
    pub attempts: AttemptSelection,
    pub syntax_valid: bool,
    pub compilation: CompilationStatus,
    pub quality_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
}

/// How a unit ended, for batch statistics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UnitCategory {
    Succeeded,
    FailedEnvironment,
    FailedActionable,
    NotAttempted,
    /// The last validated window passed, but window growth stopped before
    /// the requested window (no candidate could be generated).
    Halted,
    Errored,
}

impl UnitCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::FailedEnvironment => "failed_environment",
            Self::FailedActionable => "failed_actionable",
            Self::NotAttempted => "not_attempted",
            Self::Halted => "halted",
            Self::Errored => "errored",
        }
    }

    /// Categories that make `splice run` exit non-zero.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::FailedActionable | Self::NotAttempted | Self::Halted | Self::Errored
        )
    }
}

/// Per-unit report written as `<output_dir>/<unit_id>/report.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitReport {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub unit_id: String,
    pub source_file: String,
    pub trial: u32,
    pub functions: Vec<String>,
    pub merge_back_requested: u32,
    pub window_reached: u32,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualitySection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compilation: Option<CompilationSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<SmokeTestResult>,
    pub repair: BTreeMap<u32, RepairState>,
    pub windows: Vec<WindowSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<u32>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnitReport {
    /// `output_files` maps window to the written variant path.
    pub fn from_outcome(
        unit: &SourceUnit,
        outcome: &UnitOutcome,
        output_files: &BTreeMap<u32, String>,
    ) -> Self {
        let verdict = outcome.verdict();
        let windows = outcome
            .windows
            .iter()
            .map(|w| WindowSummary {
                window: w.window,
                attempts: w.variant.provenance.clone(),
                syntax_valid: w.verdict.syntax_valid,
                compilation: w.verdict.compilation_status,
                quality_score: w.verdict.quality_score,
                output_file: output_files.get(&w.window).cloned(),
            })
            .collect();

        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            unit_id: unit.id.to_string(),
            source_file: unit.path.display().to_string(),
            trial: unit.trial,
            functions: unit.functions.clone(),
            merge_back_requested: outcome.window_requested,
            window_reached: outcome.window_reached(),
            accepted: outcome.is_accepted(),
            output_file: output_files.get(&outcome.window_reached()).cloned(),
            quality: verdict.map(QualitySection::from_verdict),
            compilation: verdict.map(CompilationSection::from_verdict),
            tests: verdict.and_then(|v| v.smoke_test.clone()),
            repair: outcome.repair_states.clone(),
            windows,
            halted_at: outcome.halted_at,
            duration_ms: outcome.duration_ms,
            error: None,
        }
    }

    /// Report for a unit whose run failed with an input or I/O error.
    pub fn from_error(unit: &SourceUnit, merge_back: u32, error: &dyn std::fmt::Display) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            unit_id: unit.id.to_string(),
            source_file: unit.path.display().to_string(),
            trial: unit.trial,
            functions: unit.functions.clone(),
            merge_back_requested: merge_back,
            window_reached: 0,
            accepted: false,
            output_file: None,
            quality: None,
            compilation: None,
            tests: None,
            repair: BTreeMap::new(),
            windows: Vec::new(),
            halted_at: None,
            duration_ms: 0,
            error: Some(error.to_string()),
        }
    }

    /// Only an accepted unit can land in a passing category.
    pub fn category(&self) -> UnitCategory {
        if self.error.is_some() {
            return UnitCategory::Errored;
        }
        let status = self.compilation.as_ref().map(|c| c.status);
        match (status, self.accepted) {
            (Some(CompilationStatus::FailedActionable), _) => UnitCategory::FailedActionable,
            (Some(CompilationStatus::NotAttempted), _) => UnitCategory::NotAttempted,
            (None, _) if self.halted_at.is_none() => UnitCategory::NotAttempted,
            (Some(CompilationStatus::Succeeded), true) => UnitCategory::Succeeded,
            (Some(CompilationStatus::FailedEnvironment), true) => UnitCategory::FailedEnvironment,
            _ => UnitCategory::Halted,
        }
    }

    pub fn quality_score(&self) -> Option<f32> {
        self.quality.as_ref().map(|q| q.quality_score)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchStats {
    pub units: usize,
    pub accepted: usize,
    pub succeeded: usize,
    pub failed_environment: usize,
    pub failed_actionable: usize,
    pub not_attempted: usize,
    #[serde(default)]
    pub halted: usize,
    pub errored: usize,
    pub repaired_ordinals: usize,
    pub exhausted_ordinals: usize,
    pub mean_quality_score: f32,
}

impl BatchStats {
    pub fn from_reports(reports: &[UnitReport]) -> Self {
        let mut stats = Self {
            units: reports.len(),
            ..Self::default()
        };
        let mut scores = Vec::new();
        for report in reports {
            if report.accepted {
                stats.accepted += 1;
            }
            match report.category() {
                UnitCategory::Succeeded => stats.succeeded += 1,
                UnitCategory::FailedEnvironment => stats.failed_environment += 1,
                UnitCategory::FailedActionable => stats.failed_actionable += 1,
                UnitCategory::NotAttempted => stats.not_attempted += 1,
                UnitCategory::Halted => stats.halted += 1,
                UnitCategory::Errored => stats.errored += 1,
            }
            for state in report.repair.values() {
                match state.status {
                    RepairStatus::Repaired => stats.repaired_ordinals += 1,
                    RepairStatus::Exhausted => stats.exhausted_ordinals += 1,
                    RepairStatus::Pending => {}
                }
            }
            scores.extend(report.quality_score());
        }
        if !scores.is_empty() {
            stats.mean_quality_score = scores.iter().sum::<f32>() / scores.len() as f32;
        }
        stats
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitSummary {
    pub unit_id: String,
    pub trial: u32,
    pub category: UnitCategory,
    pub accepted: bool,
    pub window_reached: u32,
    pub merge_back_requested: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&UnitReport> for UnitSummary {
    fn from(report: &UnitReport) -> Self {
        Self {
            unit_id: report.unit_id.clone(),
            trial: report.trial,
            category: report.category(),
            accepted: report.accepted,
            window_reached: report.window_reached,
            merge_back_requested: report.merge_back_requested,
            quality_score: report.quality_score(),
            halted_at: report.halted_at,
            error: report.error.clone(),
        }
    }
}

/// Batch summary written as `<output_dir>/batch.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchReport {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub batch_id: Uuid,
    pub source_file: String,
    pub llm_model: String,
    pub stats: BatchStats,
    pub units: Vec<UnitSummary>,
}

impl BatchReport {
    pub fn new(source_file: &Path, llm_model: &str, reports: &[UnitReport]) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            batch_id: Uuid::new_v4(),
            source_file: source_file.display().to_string(),
            llm_model: llm_model.to_string(),
            stats: BatchStats::from_reports(reports),
            units: reports.iter().map(UnitSummary::from).collect(),
        }
    }

    pub fn has_failures(&self) -> bool {
        self.units.iter().any(|u| u.category.is_failure())
    }
}

/// Write a unit report in pretty JSON format.
pub fn write_unit_report_json(path: &Path, report: &UnitReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize unit report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Write batch.json in pretty JSON format.
pub fn write_batch_report_json(path: &Path, report: &BatchReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize batch report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

pub fn read_batch_report_json(path: &Path) -> Result<BatchReport> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {:?}", path))
}

/// Render the batch summary as Markdown.
pub fn render_batch_summary_md(report: &BatchReport) -> String {
    let stats = &report.stats;
    let mut out = String::new();
    out.push_str("# Splice Batch Summary\n\n");
    out.push_str(&format!(
        "- source: `{}`\n- model: `{}`\n- batch: `{}`\n\n",
        report.source_file, report.llm_model, report.batch_id
    ));

    out.push_str("## Verdicts\n");
    out.push_str(&format!(
        "- units: {}\n- accepted: {}\n- succeeded: {}\n- failed (environment): {}\n- failed (actionable): {}\n- not attempted: {}\n- halted: {}\n- errored: {}\n\n",
        stats.units,
        stats.accepted,
        stats.succeeded,
        stats.failed_environment,
        stats.failed_actionable,
        stats.not_attempted,
        stats.halted,
        stats.errored
    ));

    out.push_str("## Repair\n");
    out.push_str(&format!(
        "- repaired ordinals: {}\n- exhausted ordinals: {}\n- mean quality score: {:.2}\n",
        stats.repaired_ordinals, stats.exhausted_ordinals, stats.mean_quality_score
    ));

    if !report.units.is_empty() {
        out.push_str("\n## Units\n");
        out.push_str("| unit | trial | window | status | quality |\n");
        out.push_str("|---|---|---|---|---|\n");
        for unit in &report.units {
            let quality = unit
                .quality_score
                .map(|q| format!("{:.2}", q))
                .unwrap_or_else(|| "-".to_string());
            let mut status = unit.category.as_str().to_string();
            if let Some(k) = unit.halted_at {
                status.push_str(&format!(" (halted at {})", k));
            }
            out.push_str(&format!(
                "| `{}` | {} | {}/{} | {} | {} |\n",
                unit.unit_id,
                unit.trial,
                unit.window_reached,
                unit.merge_back_requested,
                status,
                quality
            ));
        }
    }
    out
}

/// Write batch.md.
pub fn write_batch_summary_md(path: &Path, report: &BatchReport) -> Result<()> {
    let md = render_batch_summary_md(report);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
