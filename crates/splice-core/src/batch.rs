//! Batch Runner
//!
//! Fans units (source file × trial) out over a tokio worker pool:
//! - at most `parallel` units run at once (semaphore permits)
//! - each unit runs sequentially through the [`RepairCoordinator`]
//! - every window's variant, the unit report and the batch summary are written
//!   under `output_dir`
//!
//! A unit that fails with an input error is recorded in its report; it never
//! aborts the other units.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::RunConfig;
use crate::coordinator::{RepairCoordinator, RepairPolicy, UnitOutcome};
use crate::domain::SourceUnit;
use crate::generation::GenerationService;
use crate::locator::discover_identifiers;
use crate::reporting::{
    write_batch_report_json, write_batch_summary_md, write_unit_report_json, BatchReport,
    UnitReport,
};
use crate::store::CandidateStore;
use crate::validation::Validator;

/// Result of a batch run.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub report: BatchReport,
    /// Unit reports sorted by trial.
    pub units: Vec<UnitReport>,
    pub batch_json: PathBuf,
    pub batch_md: PathBuf,
}

pub struct BatchRunner {
    config: RunConfig,
    coordinator: Arc<RepairCoordinator>,
}

impl BatchRunner {
    pub fn new(config: RunConfig, coordinator: RepairCoordinator) -> Self {
        Self {
            config,
            coordinator: Arc::new(coordinator),
        }
    }

    /// Wire a coordinator from `config`: repair policy, cache switch and
    /// checkpoints under `output_dir`.
    pub fn from_config(
        config: RunConfig,
        store: Arc<dyn CandidateStore>,
        generator: Arc<dyn GenerationService>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        let coordinator =
            RepairCoordinator::new(store, generator, validator, RepairPolicy::from_config(&config))
                .with_checkpoints(config.output_dir.clone())
                .with_cache(config.use_cache);
        Self::new(config, coordinator)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// One unit per trial, all sharing the same function set.
    pub fn plan_units(&self) -> crate::domain::Result<Vec<SourceUnit>> {
        let text = std::fs::read_to_string(&self.config.source_file)?;
        let functions = select_functions(&self.config, &text)?;
        Ok((1..=self.config.trials)
            .map(|trial| {
                SourceUnit::new(
                    self.config.source_file.clone(),
                    text.clone(),
                    functions.clone(),
                    trial,
                )
            })
            .collect())
    }

    pub async fn run(&self) -> Result<BatchOutcome> {
        self.config.validate().context("invalid run configuration")?;
        let units = self
            .plan_units()
            .with_context(|| format!("plan units for {:?}", self.config.source_file))?;
        let output_dir = self.config.output_dir.clone();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("create {:?}", output_dir))?;

        info!(
            units = units.len(),
            parallel = self.config.parallel,
            "starting batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.parallel));
        let mut tasks = JoinSet::new();
        for unit in units {
            let semaphore = Arc::clone(&semaphore);
            let coordinator = Arc::clone(&self.coordinator);
            let output_dir = output_dir.clone();
            let merge_back = self.config.merge_back_for(unit.function_count());

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .context("worker pool closed")?;
                run_unit_to_disk(&coordinator, &unit, merge_back, &output_dir).await
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            reports.push(joined.context("unit task panicked")??);
        }
        reports.sort_by(|a, b| a.trial.cmp(&b.trial).then(a.unit_id.cmp(&b.unit_id)));

        let report = BatchReport::new(&self.config.source_file, &self.config.llm_model, &reports);
        let batch_json = output_dir.join("batch.json");
        let batch_md = output_dir.join("batch.md");
        write_batch_report_json(&batch_json, &report)?;
        write_batch_summary_md(&batch_md, &report)?;

        info!(
            units = report.stats.units,
            accepted = report.stats.accepted,
            repaired = report.stats.repaired_ordinals,
            exhausted = report.stats.exhausted_ordinals,
            "batch finished"
        );

        Ok(BatchOutcome {
            report,
            units: reports,
            batch_json,
            batch_md,
        })
    }
}

/// Explicit names (first `num_funcs` of them when set), else the first
/// `num_funcs` definitions in the file.
pub fn select_functions(config: &RunConfig, text: &str) -> crate::domain::Result<Vec<String>> {
    if !config.functions.is_empty() {
        let take = match config.num_funcs {
            0 => config.functions.len(),
            n => n as usize,
        };
        return Ok(config.functions.iter().take(take).cloned().collect());
    }
    Ok(discover_identifiers(text, config.num_funcs as usize)?)
}

async fn run_unit_to_disk(
    coordinator: &RepairCoordinator,
    unit: &SourceUnit,
    merge_back: u32,
    output_dir: &Path,
) -> Result<UnitReport> {
    let unit_dir = output_dir.join(unit.id.as_str());
    std::fs::create_dir_all(&unit_dir).with_context(|| format!("create {:?}", unit_dir))?;

    let report = match coordinator.run_unit(unit, merge_back).await {
        Ok(outcome) => {
            let files = write_variants(unit, &outcome, &unit_dir)?;
            UnitReport::from_outcome(unit, &outcome, &files)
        }
        Err(err) => {
            error!(unit_id = %unit.id, error = %err, "unit run failed");
            UnitReport::from_error(unit, merge_back, &err)
        }
    };

    write_unit_report_json(&unit_dir.join("report.json"), &report)?;
    Ok(report)
}

/// Write each window's final variant to `<unit_dir>/<K>/<file_name>`.
fn write_variants(
    unit: &SourceUnit,
    outcome: &UnitOutcome,
    unit_dir: &Path,
) -> Result<BTreeMap<u32, String>> {
    let mut files = BTreeMap::new();
    for window in &outcome.windows {
        let dir = unit_dir.join(window.window.to_string());
        std::fs::create_dir_all(&dir).with_context(|| format!("create {:?}", dir))?;
        let path = dir.join(window.variant.file_name(unit));
        std::fs::write(&path, &window.variant.text)
            .with_context(|| format!("write {:?}", path))?;
        files.insert(window.window, path.display().to_string());
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_functions_prefers_explicit_names() {
        let config = RunConfig {
            functions: vec!["a".into(), "b".into(), "c".into()],
            num_funcs: 2,
            ..RunConfig::default()
        };
        let picked = select_functions(&config, "").unwrap();
        assert_eq!(picked, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_select_functions_discovers_in_file_order() {
        let config = RunConfig {
            num_funcs: 2,
            ..RunConfig::default()
        };
        let text = "static int z(void) { return 0; }\nint y(int v) { return v; }\nint x(void) { return 1; }\n";
        let picked = select_functions(&config, text).unwrap();
        assert_eq!(picked, vec!["z".to_string(), "y".to_string()]);
    }
}
