//! Sluice command line
//!
//! - `watch`: run the watcher until interrupted
//! - `ingest`: push one file through the pipeline now
//! - `profiles` / `resolve`: inspect schema routing
//! - `init-config` / `check-config`: manage the TOML configuration

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sluice::config::SluiceConfig;
use sluice::pipeline::{JobStatus, MonitoredRoot, Pipeline, SqlStoreFactory};
use sluice::registry::SchemaRegistry;
use sluice::transfer::{CleanupRegistry, Transfer};
use sluice::watcher::Watcher;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sluice", version, about = "Load CSV drop folders into a relational store")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Configuration file (default: $SLUICE_HOME/config.toml)
    #[arg(long, global = true, env = "SLUICE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch every configured root until Ctrl-C
    Watch,

    /// Load one file immediately
    Ingest {
        /// CSV file to load
        file: PathBuf,

        /// Print the job as JSON
        #[arg(long)]
        json: bool,
    },

    /// List schema profiles
    Profiles {
        #[arg(long)]
        json: bool,
    },

    /// Show which profile a file name routes to
    Resolve {
        file: PathBuf,
    },

    /// Write a starter configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Load and validate the configuration
    CheckConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = sluice_logging::init_logging(sluice_logging::LogConfig {
        app_name: "sluice",
        log_dir: None,
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: logging disabled: {:#}", err);
    }

    match run_command(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            ExitCode::from(1)
        }
    }
}

fn run_command(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.clone().unwrap_or_else(SluiceConfig::default_path);
    match cli.command {
        Commands::Watch => {
            let config = load_config(&config_path)?;
            runtime()?.block_on(watch(config))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Ingest { file, json } => {
            let config = load_config_or_default(&config_path)?;
            runtime()?.block_on(ingest(config, &file, json))
        }
        Commands::Profiles { json } => {
            let config = load_config_or_default(&config_path)?;
            list_profiles(&config.registry()?, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Resolve { file } => {
            let config = load_config_or_default(&config_path)?;
            let registry = config.registry()?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let profile = registry.resolve(&name)?;
            println!(
                "{} -> {} (table {}, category {}, policy {:?})",
                name, profile.code, profile.table, profile.category, profile.policy
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::InitConfig { force } => {
            if config_path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            SluiceConfig::starter()
                .save(&config_path)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
            println!("Wrote {}", config_path.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckConfig => {
            let config = load_config(&config_path)?;
            let registry = config.registry()?;
            println!(
                "{}: {} root(s), {} profile(s), {} recipient(s)",
                config_path.display(),
                config.roots.len(),
                registry.len(),
                config.mail.recipients.len()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

fn load_config(path: &Path) -> Result<SluiceConfig> {
    let config = SluiceConfig::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

/// `ingest`, `profiles` and `resolve` work without a config file.
fn load_config_or_default(path: &Path) -> Result<SluiceConfig> {
    if path.exists() {
        SluiceConfig::load(path).with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        Ok(SluiceConfig::default())
    }
}

fn build_pipeline(config: &SluiceConfig, cleanup: CleanupRegistry) -> Result<Pipeline> {
    let registry = Arc::new(config.registry()?);
    let stores = Arc::new(SqlStoreFactory::new(config.db_config()?));
    Ok(Pipeline::new(
        registry,
        stores,
        config.dispatcher(),
        Transfer::standard(config.verify_content, cleanup),
        config.pipeline_options(),
    ))
}

async fn watch(config: SluiceConfig) -> Result<()> {
    let cleanup = CleanupRegistry::new();
    let pipeline = build_pipeline(&config, cleanup.clone())?;
    let watcher = Watcher::new(
        config.monitored_roots(),
        Arc::new(pipeline),
        config.watcher_options(),
        cleanup.clone(),
    );
    watcher
        .prepare_directories()
        .context("Failed to create watched directories")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; stopping");
        }
        on_signal.cancel();
    });

    info!(roots = watcher.roots().len(), "Watcher starting");
    watcher.run(cancel).await.context("Watcher failed")?;

    let leftovers = cleanup.paths();
    if !leftovers.is_empty() {
        warn!(count = leftovers.len(), "Files still need manual cleanup");
        for path in leftovers {
            warn!(path = %path.display(), "Needs manual cleanup");
        }
    }
    Ok(())
}

async fn ingest(config: SluiceConfig, file: &Path, json: bool) -> Result<ExitCode> {
    let file = file
        .canonicalize()
        .with_context(|| format!("Cannot open {}", file.display()))?;
    let root = root_for(&config, &file)?;
    let pipeline = build_pipeline(&config, CleanupRegistry::new())?;
    let job = pipeline.run(&file, &root).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        println!("{}: {:?} ({:?})", file.display(), job.status, job.disposition);
        if let Some(summary) = &job.summary {
            println!(
                "  table {}: {} new, {} duplicate, {} resend, {} updated, {} skipped",
                summary.table,
                summary.new,
                summary.duplicate,
                summary.resend,
                summary.updated,
                summary.skipped
            );
        }
        if let Some(transfer) = &job.transfer {
            println!("  moved to {:?} ({:?})", transfer.destination, transfer.fate);
        }
        if let Some(error) = &job.error {
            println!("  error: {}", error);
        }
    }
    Ok(if job.status == JobStatus::Failed {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

/// The configured root holding `file`, else `archive/` and `error/` next to it.
fn root_for(config: &SluiceConfig, file: &Path) -> Result<MonitoredRoot> {
    for root in config.monitored_roots() {
        let source = root.source.canonicalize().unwrap_or_else(|_| root.source.clone());
        if file.starts_with(&source) {
            return Ok(root);
        }
    }
    let Some(parent) = file.parent() else {
        bail!("{} has no parent directory", file.display());
    };
    let root = MonitoredRoot {
        source: parent.to_path_buf(),
        archive: parent.join("archive"),
        error: parent.join("error"),
        category: None,
    };
    for dir in [&root.archive, &root.error] {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    Ok(root)
}

fn list_profiles(registry: &SchemaRegistry, json: bool) -> Result<()> {
    if json {
        let profiles: Vec<_> = registry.profiles().map(|p| p.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&profiles)?);
        return Ok(());
    }
    println!(
        "{:<18} {:<18} {:<10} {:<28} {:<22} POLICY",
        "CODE", "TABLE", "CATEGORY", "KEY", "SEMANTICS"
    );
    for profile in registry.profiles() {
        let key = profile.key.columns().collect::<Vec<_>>().join(" + ");
        println!(
            "{:<18} {:<18} {:<10} {:<28} {:<22} {:?}",
            profile.code,
            profile.table,
            profile.category.label(),
            key,
            format!("{:?}", profile.key_semantics),
            profile.policy
        );
    }
    Ok(())
}
