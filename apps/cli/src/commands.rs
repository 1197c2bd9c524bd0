//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use tracing::info;

use docforest_core::{PhaseReport, Pipeline, PipelineReport, Stage};
use docforest_fetch::blob_store_from_config;
use docforest_relations::ExportStatus;
use docforest_shared::{
    AppConfig, BlobKind, NodeIdStrategy, PipelineConfig, init_config, load_config,
};
use docforest_storage::ArtifactStore;

use crate::progress::CliProgress;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docforest: turn a manifest of markup documents into relational CSV.
#[derive(Parser)]
#[command(
    name = "docforest",
    version,
    about = "Fetch, normalize and decompose a markup corpus into relational CSV files.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ./docforest.toml, then ~/.docforest/docforest.toml).
    #[arg(long, global = true, env = "DOCFOREST_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Which stages `run` executes.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum StageArg {
    All,
    Fetch,
    Normalize,
    Decompose,
}

impl StageArg {
    fn stages(self) -> Vec<Stage> {
        match self {
            StageArg::All => Stage::ALL.to_vec(),
            StageArg::Fetch => vec![Stage::Fetch],
            StageArg::Normalize => vec![Stage::Normalize],
            StageArg::Decompose => vec![Stage::Decompose],
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the pipeline (all stages by default).
    Run {
        /// Stage(s) to run.
        #[arg(long, value_enum, default_value = "all")]
        stage: StageArg,

        /// Manifest CSV to read.
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Artifacts directory (raw documents, trees, relations).
        #[arg(long)]
        artifacts: Option<PathBuf>,

        /// Worker count for both the fetch and normalize stages.
        #[arg(long)]
        workers: Option<usize>,

        /// Read blobs from a local mirror laid out as <DIR>/<bucket>/<key>.
        #[arg(long)]
        blob_root: Option<PathBuf>,

        /// Derive node ids from asset id and positional path.
        #[arg(long)]
        deterministic_ids: bool,

        /// Retry documents the tolerant parser rejects with an HTML5 parser.
        #[arg(long)]
        html5_fallback: bool,
    },

    /// Show what the artifacts directory currently holds.
    Status {
        /// Artifacts directory.
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Flag overrides for `run`, applied on top of the loaded config.
struct RunOverrides {
    manifest: Option<PathBuf>,
    artifacts: Option<PathBuf>,
    workers: Option<usize>,
    blob_root: Option<PathBuf>,
    deterministic_ids: bool,
    html5_fallback: bool,
}

impl RunOverrides {
    fn apply(self, config: &mut AppConfig) {
        if let Some(manifest) = self.manifest {
            config.paths.manifest = manifest;
        }
        if let Some(artifacts) = self.artifacts {
            config.paths.artifacts_dir = artifacts;
        }
        if let Some(workers) = self.workers {
            config.workers.fetch = workers;
            config.workers.normalize = workers;
        }
        if let Some(root) = self.blob_root {
            config.blob.kind = BlobKind::Local;
            config.blob.local_root = Some(root);
        }
        if self.deterministic_ids {
            config.markup.node_ids = NodeIdStrategy::Deterministic;
        }
        if self.html5_fallback {
            config.markup.html5_fallback = true;
        }
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docforest=info",
        1 => "docforest=debug",
        _ => "docforest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Run {
            stage,
            manifest,
            artifacts,
            workers,
            blob_root,
            deterministic_ids,
            html5_fallback,
        } => {
            let overrides = RunOverrides {
                manifest,
                artifacts,
                workers,
                blob_root,
                deterministic_ids,
                html5_fallback,
            };
            cmd_run(config_path.as_deref(), stage, overrides).await
        }
        Command::Status { artifacts } => cmd_status(config_path.as_deref(), artifacts).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, stage: StageArg, overrides: RunOverrides) -> Result<()> {
    let mut config = load_config(config_path)?;
    overrides.apply(&mut config);

    let pipeline_config = PipelineConfig::from(&config);
    let stages = stage.stages();

    let blobs = blob_store_from_config(&config.blob).await?;
    let store = ArtifactStore::open(&pipeline_config.artifacts_dir).wrap_err_with(|| {
        format!(
            "cannot open artifacts directory {}",
            pipeline_config.artifacts_dir.display()
        )
    })?;

    info!(
        stages = ?stages,
        manifest = %pipeline_config.manifest.display(),
        artifacts = %pipeline_config.artifacts_dir.display(),
        blob = blobs.name(),
        "starting run"
    );

    let pipeline = Pipeline::new(pipeline_config, store, blobs);
    let progress = CliProgress::new();
    let report = pipeline.run(&stages, &progress).await?;
    progress.clear();

    print_report(&report);
    Ok(())
}

async fn cmd_status(config_path: Option<&Path>, artifacts: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let root = artifacts.unwrap_or(config.paths.artifacts_dir);
    let status = ArtifactStore::open(&root)?.status()?;

    println!();
    println!("  Artifacts:       {}", root.display());
    println!("  Raw documents:   {}", status.raw_documents);
    println!("  Normalized:      {}", status.trees);
    for (relation, present) in &status.relations {
        let state = if *present { "present" } else { "missing" };
        println!("  {:<17}{state}", relation.file_name());
    }
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config: AppConfig = load_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_report(report: &PipelineReport) {
    println!();
    for phase in [&report.fetch, &report.normalize].into_iter().flatten() {
        print_phase(phase);
    }
    for outcome in &report.relations {
        match outcome.status {
            ExportStatus::Written { rows } => {
                println!("  {:<20} written ({rows} rows)", outcome.relation.file_name());
            }
            ExportStatus::Skipped => {
                println!("  {:<20} exists, skipped", outcome.relation.file_name());
            }
        }
    }
    println!("  Time: {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

fn print_phase(phase: &PhaseReport) {
    println!(
        "  {:<10} {} written, {} skipped, {} failed ({:.1}s)",
        phase.phase,
        phase.completed(),
        phase.skipped(),
        phase.failed(),
        phase.elapsed.as_secs_f64()
    );
    for (item, reason) in phase.failures() {
        println!("    failed {item}: {reason}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "docforest",
            "run",
            "--stage",
            "normalize",
            "--workers",
            "3",
            "--blob-root",
            "/mirror",
            "--deterministic-ids",
        ])
        .unwrap();

        let Command::Run {
            stage,
            workers,
            blob_root,
            deterministic_ids,
            ..
        } = cli.command
        else {
            panic!("expected run command");
        };
        assert_eq!(stage.stages(), vec![Stage::Normalize]);
        assert_eq!(workers, Some(3));
        assert_eq!(blob_root, Some(PathBuf::from("/mirror")));
        assert!(deterministic_ids);
    }

    #[test]
    fn default_stage_is_all() {
        let cli = Cli::try_parse_from(["docforest", "run"]).unwrap();
        let Command::Run { stage, .. } = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(stage.stages(), Stage::ALL.to_vec());
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut config = AppConfig::default();
        RunOverrides {
            manifest: Some("m.csv".into()),
            artifacts: None,
            workers: Some(2),
            blob_root: Some("/mirror".into()),
            deterministic_ids: true,
            html5_fallback: false,
        }
        .apply(&mut config);

        assert_eq!(config.paths.manifest, PathBuf::from("m.csv"));
        assert_eq!(config.paths.artifacts_dir, PathBuf::from("Artifacts"));
        assert_eq!((config.workers.fetch, config.workers.normalize), (2, 2));
        assert_eq!(config.blob.kind, BlobKind::Local);
        assert_eq!(config.markup.node_ids, NodeIdStrategy::Deterministic);
        assert!(!config.markup.html5_fallback);
    }
}
