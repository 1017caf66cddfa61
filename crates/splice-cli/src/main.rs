//! splice - function-level variant synthesis CLI
//!
//! ## Commands
//!
//! - `run`: merge, validate and repair every trial of a configured source file
//! - `locate`: print function spans, or every definition in a file
//! - `merge`: write one merged variant from stored candidates
//! - `validate`: run the validation pipeline on a file
//! - `candidate`: store, show and list candidates (operator hand edits)
//! - `report`: render a batch summary as Markdown

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use splice_ci::ValidationPipeline;
use splice_core::{
    discover, locate, merge, read_batch_report_json, render_batch_summary_md, select_functions,
    AttemptSelection, BatchRunner, CandidateStore, FsCandidateStore, HttpGenerationService,
    RunConfig, SourceUnit, ValidationVerdict,
};

#[derive(Parser)]
#[command(name = "splice")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Function-level variant merging with validation and bounded repair", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the merge / validate / repair loop for every trial
    Run {
        /// Run configuration (TOML)
        #[arg(short, long, default_value = "splice.toml")]
        config: PathBuf,

        #[command(flatten)]
        overrides: RunOverrides,
    },

    /// Print the spans of the named functions, or every definition when none are named
    Locate {
        /// Source file
        file: PathBuf,

        /// Function identifiers in file order (`name@k` selects the k-th overload)
        names: Vec<String>,
    },

    /// Merge stored candidates into one variant file
    Merge {
        /// Run configuration (TOML)
        #[arg(short, long, default_value = "splice.toml")]
        config: PathBuf,

        /// Trial whose candidates are merged
        #[arg(short, long, default_value = "1")]
        trial: u32,

        /// Merge-back window K (default: highest ordinal given, else the configured window)
        #[arg(short, long)]
        window: Option<u32>,

        /// Explicit attempt for an ordinal, as `ordinal=attempt`; others use the latest
        #[arg(short, long, value_parser = parse_attempt)]
        attempt: Vec<(u32, u32)>,

        /// Output path (default: the variant's file name in the current directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Validate one source file: syntax, security, compilation
    Validate {
        /// Source file
        file: PathBuf,

        /// Run configuration supplying toolchain and environment settings
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Inspect or hand-edit stored candidates
    Candidate {
        #[command(subcommand)]
        action: CandidateAction,
    },

    /// Render a batch summary as Markdown
    Report {
        /// Path to batch.json
        batch: PathBuf,

        /// Write the summary here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

/// Flags layered over the configuration file.
#[derive(Args, Default, Debug, Clone)]
struct RunOverrides {
    /// Source file to mutate
    #[arg(long)]
    source: Option<PathBuf>,

    /// Number of functions to mutate
    #[arg(long)]
    num_funcs: Option<u32>,

    /// Generation model
    #[arg(long, env = "SPLICE_MODEL")]
    model: Option<String>,

    /// Output directory for variants and reports
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Number of trials
    #[arg(long)]
    trials: Option<u32>,

    /// Merge-back window K
    #[arg(long)]
    merge_back: Option<u32>,

    /// Repair budget per ordinal
    #[arg(long)]
    max_fix_attempts: Option<u32>,

    /// Units processed concurrently
    #[arg(short, long)]
    parallel: Option<usize>,

    /// Reuse stored candidates and checkpoints
    #[arg(long)]
    use_cache: bool,

    /// Never request repairs
    #[arg(long)]
    no_auto_fix: bool,

    /// Run each successfully built variant once
    #[arg(long)]
    run_tests: bool,

    /// Also write logs to <dir>/splice.log
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl RunOverrides {
    fn apply(&self, config: &mut RunConfig) {
        if let Some(v) = &self.source {
            config.source_file = v.clone();
        }
        if let Some(v) = self.num_funcs {
            config.num_funcs = v;
        }
        if let Some(v) = &self.model {
            config.llm_model = v.clone();
        }
        if let Some(v) = &self.output_dir {
            config.output_dir = v.clone();
        }
        if let Some(v) = self.trials {
            config.trials = v;
        }
        if let Some(v) = self.merge_back {
            config.merge_back = Some(v);
        }
        if let Some(v) = self.max_fix_attempts {
            config.max_fix_attempts = v;
        }
        if let Some(v) = self.parallel {
            config.parallel = v;
        }
        if let Some(v) = &self.log_dir {
            config.log_dir = Some(v.clone());
        }
        config.use_cache |= self.use_cache;
        config.run_tests |= self.run_tests;
        if self.no_auto_fix {
            config.auto_fix = false;
        }
    }
}

#[derive(Subcommand)]
enum CandidateAction {
    /// Store a file as the next attempt for an ordinal
    Put {
        #[arg(short, long, default_value = "splice.toml")]
        config: PathBuf,
        #[arg(short, long, default_value = "1")]
        trial: u32,
        #[arg(short, long)]
        ordinal: u32,
        /// File holding the replacement function text
        file: PathBuf,
    },
    /// Print one stored attempt (default: the latest)
    Show {
        #[arg(short, long, default_value = "splice.toml")]
        config: PathBuf,
        #[arg(short, long, default_value = "1")]
        trial: u32,
        #[arg(short, long)]
        ordinal: u32,
        #[arg(short, long)]
        attempt: Option<u32>,
    },
    /// List stored attempts per ordinal
    List {
        #[arg(short, long, default_value = "splice.toml")]
        config: PathBuf,
        #[arg(short, long, default_value = "1")]
        trial: u32,
    },
}

fn parse_attempt(raw: &str) -> std::result::Result<(u32, u32), String> {
    let (ordinal, attempt) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ordinal=attempt, got {raw:?}"))?;
    let ordinal: u32 = ordinal
        .trim()
        .parse()
        .map_err(|_| format!("invalid ordinal in {raw:?}"))?;
    let attempt: u32 = attempt
        .trim()
        .parse()
        .map_err(|_| format!("invalid attempt in {raw:?}"))?;
    if ordinal == 0 || attempt == 0 {
        return Err(format!("ordinal and attempt start at 1, got {raw:?}"));
    }
    Ok((ordinal, attempt))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // `run` initialises logging itself once the config's log_dir is known
    if !matches!(cli.command, Commands::Run { .. }) {
        splice_core::init_tracing(cli.json, level, None)
            .context("Failed to initialise logging")?;
    }

    match cli.command {
        Commands::Run { config, overrides } => cmd_run(&config, &overrides, cli.json, level).await,
        Commands::Locate { file, names } => cmd_locate(&file, &names, cli.json),
        Commands::Merge {
            config,
            trial,
            window,
            attempt,
            out,
        } => cmd_merge(&config, trial, window, &attempt, out.as_deref()).map(|_| ()),
        Commands::Validate { file, config } => {
            cmd_validate(&file, config.as_deref(), cli.json).await
        }
        Commands::Candidate { action } => match action {
            CandidateAction::Put {
                config,
                trial,
                ordinal,
                file,
            } => cmd_candidate_put(&config, trial, ordinal, &file).map(|_| ()),
            CandidateAction::Show {
                config,
                trial,
                ordinal,
                attempt,
            } => cmd_candidate_show(&config, trial, ordinal, attempt),
            CandidateAction::List { config, trial } => cmd_candidate_list(&config, trial),
        },
        Commands::Report { batch, out } => cmd_report(&batch, out.as_deref()),
    }
}

fn load_config(path: &Path) -> Result<RunConfig> {
    RunConfig::from_toml_file(path).with_context(|| format!("Failed to load config {:?}", path))
}

/// The unit a trial of `config` resolves to, with its function set.
fn load_unit(config: &RunConfig, trial: u32) -> Result<SourceUnit> {
    let text = std::fs::read_to_string(&config.source_file)
        .with_context(|| format!("Failed to read {:?}", config.source_file))?;
    let functions =
        select_functions(config, &text).context("Failed to select functions to mutate")?;
    Ok(SourceUnit::new(
        config.source_file.clone(),
        text,
        functions,
        trial,
    ))
}

fn open_store(config: &RunConfig) -> Result<FsCandidateStore> {
    let root = config.store_root();
    FsCandidateStore::new(&root).with_context(|| format!("Failed to open store at {:?}", root))
}

/// Run the batch for a configuration file
async fn cmd_run(
    config_path: &Path,
    overrides: &RunOverrides,
    json: bool,
    level: Level,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    overrides.apply(&mut config);
    splice_core::init_tracing(json, level, config.log_dir.as_deref())
        .context("Failed to initialise logging")?;
    config.validate().context("Invalid run configuration")?;

    let store = Arc::new(open_store(&config)?);
    let generator = Arc::new(
        HttpGenerationService::from_settings(&config.generation, &config.llm_model)
            .context("Failed to create generation client")?,
    );
    let validator = Arc::new(
        ValidationPipeline::from_config(&config).context("Invalid environment rules")?,
    );

    println!("Source: {}", config.source_file.display());
    println!("Model: {}", config.llm_model);
    println!("Trials: {} (parallel {})", config.trials, config.parallel);
    println!();

    info!(config = %config_path.display(), "starting run");
    let runner = BatchRunner::from_config(config, store, generator, validator);
    let outcome = runner.run().await.context("Batch run failed")?;

    for unit in &outcome.units {
        let mark = if unit.category().is_failure() { "✗" } else { "✓" };
        match &unit.error {
            Some(err) => println!("  {} {} error: {}", mark, unit.unit_id, err),
            None => println!(
                "  {} {} window {}/{} ({})",
                mark,
                unit.unit_id,
                unit.window_reached,
                unit.merge_back_requested,
                unit.category().as_str()
            ),
        }
    }

    let stats = &outcome.report.stats;
    println!();
    println!(
        "Summary: {}/{} units accepted, {} ordinals repaired, {} exhausted",
        stats.accepted, stats.units, stats.repaired_ordinals, stats.exhausted_ordinals
    );
    println!("Report: {}", outcome.batch_json.display());

    if outcome.report.has_failures() {
        anyhow::bail!("Some units were not accepted")
    }
    println!("\n✓ All units accepted");
    Ok(())
}

#[derive(Serialize)]
struct LocatedFunction {
    ordinal: Option<u32>,
    name: String,
    line: u32,
    start: usize,
    end: usize,
}

fn line_of(text: &str, offset: usize) -> u32 {
    text[..offset].matches('\n').count() as u32 + 1
}

fn locate_functions(text: &str, names: &[String]) -> Result<Vec<LocatedFunction>> {
    if names.is_empty() {
        let defs = discover(text).context("Failed to scan definitions")?;
        return Ok(defs
            .into_iter()
            .map(|d| LocatedFunction {
                ordinal: None,
                name: d.name,
                line: d.line,
                start: d.start,
                end: d.end,
            })
            .collect());
    }
    let spans = locate(text, names).context("Failed to locate functions")?;
    Ok(spans
        .iter()
        .zip(names)
        .map(|(span, name)| LocatedFunction {
            ordinal: Some(span.ordinal),
            name: name.clone(),
            line: line_of(text, span.start),
            start: span.start,
            end: span.end,
        })
        .collect())
}

/// Print function spans
fn cmd_locate(file: &Path, names: &[String], json: bool) -> Result<()> {
    let text =
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {:?}", file))?;
    let found = locate_functions(&text, names)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
        return Ok(());
    }
    if found.is_empty() {
        println!("No function definitions found");
    }
    for f in &found {
        let ordinal = f.ordinal.map(|o| format!("{o}. ")).unwrap_or_default();
        println!(
            "{}{} (line {}, bytes {}..{})",
            ordinal, f.name, f.line, f.start, f.end
        );
    }
    Ok(())
}

/// Merge stored candidates and write the variant; returns the written path
fn cmd_merge(
    config_path: &Path,
    trial: u32,
    window: Option<u32>,
    attempts: &[(u32, u32)],
    out: Option<&Path>,
) -> Result<PathBuf> {
    let config = load_config(config_path)?;
    let unit = load_unit(&config, trial)?;
    let store = open_store(&config)?;
    let spans = locate(unit.text(), &unit.functions).context("Failed to locate functions")?;

    let window = window
        .or_else(|| attempts.iter().map(|(o, _)| *o).max())
        .unwrap_or_else(|| config.merge_back_for(unit.function_count()));
    if window > unit.function_count() {
        anyhow::bail!(
            "Window {} exceeds the {} selected functions",
            window,
            unit.function_count()
        );
    }

    let mut selection = AttemptSelection::new();
    for ordinal in 1..=window {
        let attempt = match attempts.iter().find(|(o, _)| *o == ordinal) {
            Some((_, a)) => *a,
            None => store
                .latest(&unit.id, ordinal)
                .with_context(|| format!("No candidate for ordinal {}", ordinal))?,
        };
        selection.insert(ordinal, attempt);
    }

    let variant =
        merge(&unit, &spans, &selection, &store).context("Failed to merge candidates")?;
    let path = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(variant.file_name(&unit)));
    std::fs::write(&path, &variant.text).with_context(|| format!("Failed to write {:?}", path))?;

    println!("✓ Merged window {} of {}", window, unit.id);
    println!("  Output: {}", path.display());
    println!("  Digest: {}", variant.digest().to_hex());
    Ok(path)
}

fn print_verdict(verdict: &ValidationVerdict) {
    let mark = |ok: bool| if ok { "✓" } else { "✗" };
    println!("  {} syntax", mark(verdict.syntax_valid));
    for issue in &verdict.syntax_issues {
        let at = issue.line.map(|l| format!("line {l}: ")).unwrap_or_default();
        println!("      {}{}", at, issue.message);
    }
    println!("  quality score: {:.2}", verdict.quality_score);
    for finding in &verdict.security_findings {
        println!(
            "      line {}: [{:?}] {}",
            finding.line, finding.severity, finding.message
        );
    }
    println!(
        "  {} compilation: {}",
        mark(verdict.is_accepted()),
        verdict.compilation_status.as_str()
    );
    for line in verdict.compiler_errors() {
        println!("      {}", line);
    }
    if let Some(smoke) = &verdict.smoke_test {
        println!("  {} smoke test", mark(smoke.passed));
        for failure in &smoke.failures {
            println!("      {}", failure);
        }
    }
}

/// Validate one file against the configured toolchain
async fn cmd_validate(file: &Path, config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = match config_path {
        Some(p) => load_config(p)?,
        None => RunConfig::default(),
    };
    let text =
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {:?}", file))?;
    let pipeline = ValidationPipeline::from_config(&config).context("Invalid environment rules")?;

    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input.c".to_string());
    let label = file
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let verdict = pipeline.validate_text(&label, &file_name, &text).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        println!("Validating {}", file.display());
        print_verdict(&verdict);
    }

    if verdict.is_accepted() {
        Ok(())
    } else {
        anyhow::bail!("Validation failed: {}", verdict.failure_reason())
    }
}

/// Store a hand-edited candidate; returns the new attempt number
fn cmd_candidate_put(config_path: &Path, trial: u32, ordinal: u32, file: &Path) -> Result<u32> {
    let config = load_config(config_path)?;
    let unit = load_unit(&config, trial)?;
    if ordinal == 0 || ordinal > unit.function_count() {
        anyhow::bail!(
            "Ordinal {} is outside 1..={}",
            ordinal,
            unit.function_count()
        );
    }
    let text =
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {:?}", file))?;
    let store = open_store(&config)?;
    let attempt = store
        .put_verified(&unit.id, ordinal, &text)
        .context("Failed to store candidate")?;

    println!(
        "✓ Stored attempt {} for {} ordinal {} ({})",
        attempt,
        unit.id,
        ordinal,
        unit.identifier(ordinal).unwrap_or("?")
    );
    Ok(attempt)
}

fn cmd_candidate_show(
    config_path: &Path,
    trial: u32,
    ordinal: u32,
    attempt: Option<u32>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let unit = load_unit(&config, trial)?;
    let store = open_store(&config)?;
    let attempt = match attempt {
        Some(a) => a,
        None => store.latest(&unit.id, ordinal)?,
    };
    let text = store.get(&unit.id, ordinal, attempt)?;
    println!("{}", text);
    Ok(())
}

fn cmd_candidate_list(config_path: &Path, trial: u32) -> Result<()> {
    let config = load_config(config_path)?;
    let unit = load_unit(&config, trial)?;
    let store = open_store(&config)?;

    println!("Candidates for {}:", unit.id);
    for ordinal in 1..=unit.function_count() {
        let attempts = store.attempts(&unit.id, ordinal)?;
        let listed = if attempts.is_empty() {
            "(none)".to_string()
        } else {
            attempts
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!(
            "  {}. {}: {}",
            ordinal,
            unit.identifier(ordinal).unwrap_or("?"),
            listed
        );
    }
    Ok(())
}

/// Render batch.json as Markdown
fn cmd_report(batch: &Path, out: Option<&Path>) -> Result<()> {
    let report = read_batch_report_json(batch)?;
    let md = render_batch_summary_md(&report);
    match out {
        Some(path) => {
            std::fs::write(path, &md).with_context(|| format!("Failed to write {:?}", path))?;
            println!("✓ Wrote {}", path.display());
        }
        None => print!("{}", md),
    }
    Ok(())
}
