//! stackctl CLI
//!
//! Brings the stack up and down in dependency order, sizes its memory
//! budgets, and takes and restores backups of its stateful components.

use backup::{
    list_backups, BackupEngine, BackupOptions, BackupType, Confirm, Preset, RestoreEngine,
    RestoreOptions, TarGz, TerminalConfirm,
};
use clap::{Args, Parser, Subcommand};
use config::{ConfigLoader, MemoryProfile, StackConfig, BUDGETED_SERVICES};
use console::style;
use start::{Orchestrator, StartOptions, StopMode, StopOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "stackctl",
    about = "Lifecycle, memory sizing and backup/restore for the application stack",
    version,
    author
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "STACKCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start all services in dependency order
    Start {
        /// Issue start actions without waiting for health
        #[arg(long)]
        no_wait: bool,
    },

    /// Stop all services in reverse dependency order
    Stop {
        /// Kill services that do not stop within their timeout
        #[arg(short, long)]
        force: bool,

        /// Issue stop actions without waiting for exit
        #[arg(long)]
        no_wait: bool,
    },

    /// Stop, then start all services
    Restart,

    /// Show the state of every service
    Status,

    /// Show per-service memory budgets for this host
    Memory {
        /// Size for this much memory instead of the detected amount
        #[arg(long)]
        total_mb: Option<u64>,
    },

    /// Back up the stack's data
    Backup(BackupArgs),

    /// Restore a backup
    Restore(RestoreArgs),

    /// List backups in the output directory
    Backups {
        /// Backup directory (defaults to the configured one)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct BackupArgs {
    /// What to back up: full, db, content, config, search-index
    #[arg(short, long = "type", default_value = "full")]
    backup_type: BackupType,

    /// Directory receiving the backup
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Backup name prefix
    #[arg(long)]
    name: Option<String>,

    /// Leave the search index out of a full backup
    #[arg(long)]
    no_search_index: bool,

    /// Copy data without stopping services
    #[arg(long)]
    hot: bool,

    /// Keep the backup as a directory
    #[arg(long)]
    no_compress: bool,

    /// Delete backups older than this many days (0 keeps everything)
    #[arg(long)]
    keep: Option<u32>,

    /// Stop services without asking
    #[arg(short, long)]
    force: bool,
}

#[derive(Args)]
struct RestoreArgs {
    /// Backup directory or archive
    #[arg(short, long)]
    backup: PathBuf,

    /// What to restore: full, db, content, config, search-index
    #[arg(short, long = "type", default_value = "full")]
    restore_type: BackupType,

    /// Leave the search index out of a full restore
    #[arg(long)]
    no_search_index: bool,

    /// Skip confirmations and stop services without asking
    #[arg(short, long)]
    force: bool,

    /// Validate the backup and show the plan without changing anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::new(path),
        None => ConfigLoader::system(),
    };
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config {}: {}", loader.path().display(), e);
            print_error(&e.into());
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Start { no_wait } => cmd_start(&config, no_wait).await,
        Commands::Stop { force, no_wait } => cmd_stop(&config, force, no_wait).await,
        Commands::Restart => cmd_restart(&config).await,
        Commands::Status => cmd_status(&config).await,
        Commands::Memory { total_mb } => cmd_memory(&config, total_mb),
        Commands::Backup(args) => cmd_backup(&config, args).await,
        Commands::Restore(args) => cmd_restore(&config, args).await,
        Commands::Backups { output } => cmd_backups(&config, output),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

/// Print a fatal error with its category and the tool log, if any.
fn print_error(err: &anyhow::Error) {
    let (kind, log) = if let Some(e) = err.downcast_ref::<backup::Error>() {
        (Some(e.kind()), e.log_path().map(|p| p.to_path_buf()))
    } else if let Some(e) = err.downcast_ref::<start::Error>() {
        (Some(e.kind()), None)
    } else if let Some(e) = err.downcast_ref::<config::ConfigError>() {
        (Some(e.kind()), None)
    } else {
        (None, None)
    };

    match kind {
        Some(kind) => eprintln!("{} {} ({})", style("error:").red().bold(), err, kind),
        None => eprintln!("{} {:#}", style("error:").red().bold(), err),
    }
    if let Some(log) = log {
        eprintln!("       see {}", log.display());
    }
}

/// Prompt on the terminal, or decline when nobody is there to answer.
fn confirmer() -> Arc<dyn Confirm> {
    if console::user_attended() {
        Arc::new(TerminalConfirm)
    } else {
        Arc::new(Preset(false))
    }
}

fn orchestrator(config: &StackConfig) -> anyhow::Result<Arc<Orchestrator>> {
    Ok(Arc::new(Orchestrator::from_config(config)?))
}

async fn cmd_start(config: &StackConfig, no_wait: bool) -> anyhow::Result<bool> {
    let orchestrator = orchestrator(config)?;
    println!("{} Starting services...", style(">>>").blue().bold());
    let report = orchestrator.start(StartOptions { wait: !no_wait }).await?;
    print!("{}", report);
    println!("{} Stack started", style(">>>").green().bold());
    Ok(true)
}

async fn cmd_stop(config: &StackConfig, force: bool, no_wait: bool) -> anyhow::Result<bool> {
    let orchestrator = orchestrator(config)?;
    let mode = if force {
        StopMode::Forced
    } else {
        StopMode::Graceful
    };
    println!("{} Stopping services...", style(">>>").blue().bold());
    let report = orchestrator
        .stop(StopOptions {
            mode,
            wait: !no_wait,
        })
        .await;
    print!("{}", report);

    if report.success() {
        println!("{} Stack stopped", style(">>>").green().bold());
    } else {
        println!(
            "{} Still running: {}",
            style(">>>").red().bold(),
            report.failed().join(", ")
        );
    }
    Ok(report.success())
}

async fn cmd_restart(config: &StackConfig) -> anyhow::Result<bool> {
    let orchestrator = orchestrator(config)?;
    println!("{} Restarting services...", style(">>>").blue().bold());
    let report = orchestrator.restart().await?;
    print!("{}", report.stop);
    print!("{}", report.start);
    println!("{} Stack restarted", style(">>>").green().bold());
    Ok(true)
}

async fn cmd_status(config: &StackConfig) -> anyhow::Result<bool> {
    let orchestrator = orchestrator(config)?;
    let statuses = orchestrator.status().await;

    println!(
        "{:<10} {:<18} {:<10} {}",
        style("SERVICE").bold(),
        style("UNIT").bold(),
        style("STATE").bold(),
        style("PROBE").bold()
    );
    for status in &statuses {
        let state = status.state.to_string();
        let state = match status.state {
            start::ServiceState::Running => style(state).green(),
            start::ServiceState::Failed => style(state).red(),
            _ => style(state).yellow(),
        };
        println!(
            "{:<10} {:<18} {:<10} {}",
            status.name, status.unit, state, status.probe
        );
    }
    Ok(true)
}

fn cmd_memory(config: &StackConfig, total_mb: Option<u64>) -> anyhow::Result<bool> {
    let mut memory = config.memory.clone();
    if total_mb.is_some() {
        memory.total_mb = total_mb;
    }
    let profile = MemoryProfile::from_config(&memory)?;

    let total = match profile.total_mb {
        Some(mb) if profile.detected => format!("{} MB (detected)", mb),
        Some(mb) => format!("{} MB", mb),
        None => "unknown".to_string(),
    };
    let range = match profile.tier_max_mb {
        Some(max) => format!("{}-{} MB", profile.tier_min_mb, max),
        None => format!("{}+ MB", profile.tier_min_mb),
    };
    println!("Host memory: {}", total);
    println!("Tier:        {} ({})", style(&profile.tier).bold(), range);
    println!();

    // Services first, then the derived values.
    let mut keys: Vec<&str> = BUDGETED_SERVICES.to_vec();
    keys.extend(
        profile
            .budgets
            .keys()
            .map(String::as_str)
            .filter(|k| !BUDGETED_SERVICES.contains(k)),
    );
    for key in keys {
        if let Some(mb) = profile.get(key) {
            let marker = if profile.is_overridden(key) {
                style(" (override)").yellow().to_string()
            } else {
                String::new()
            };
            println!("  {:<28} {:>6} MB{}", key, mb, marker);
        }
    }
    Ok(true)
}

async fn cmd_backup(config: &StackConfig, args: BackupArgs) -> anyhow::Result<bool> {
    let mut opts = BackupOptions::from_config(&config.backup, args.backup_type);
    if let Some(output) = args.output {
        opts.output_dir = output;
    }
    if let Some(name) = args.name {
        opts.prefix = name;
    }
    if args.no_search_index {
        opts.include_search_index = false;
    }
    if args.no_compress {
        opts.compress = false;
    }
    if let Some(days) = args.keep {
        opts.retention_days = days;
    }
    opts.hot = args.hot;
    opts.force = args.force;

    let engine = BackupEngine::new(config, orchestrator(config)?).with_confirm(confirmer());
    println!(
        "{} Backing up ({})...",
        style(">>>").blue().bold(),
        opts.backup_type
    );
    let report = engine.run(&opts).await?;
    print!("{}", report);
    println!(
        "{} Backup written to {}",
        style(">>>").green().bold(),
        report.location.display()
    );
    Ok(true)
}

async fn cmd_restore(config: &StackConfig, args: RestoreArgs) -> anyhow::Result<bool> {
    let opts = RestoreOptions {
        backup: args.backup,
        restore_type: args.restore_type,
        include_search_index: !args.no_search_index,
        force: args.force,
        dry_run: args.dry_run,
    };

    let engine = RestoreEngine::new(config, orchestrator(config)?).with_confirm(confirmer());
    println!(
        "{} Restoring {} ({})...",
        style(">>>").blue().bold(),
        opts.backup.display(),
        opts.restore_type
    );
    let report = engine.run(&opts).await?;
    print!("{}", report);

    if report.success() {
        println!("{} Restore complete", style(">>>").green().bold());
    } else {
        println!(
            "{} Restore finished with failures",
            style(">>>").red().bold()
        );
    }
    Ok(report.success())
}

fn cmd_backups(config: &StackConfig, output: Option<PathBuf>) -> anyhow::Result<bool> {
    let output = output.unwrap_or_else(|| config.backup.output_dir.clone());
    let entries = list_backups(&output, &config.backup.prefix, &TarGz::new())?;

    if entries.is_empty() {
        println!("No backups in {}", output.display());
        return Ok(true);
    }

    for entry in &entries {
        let (kind, status) = match &entry.manifest {
            Some(m) if m.is_complete() => (m.backup_type.to_string(), style("complete").green()),
            Some(m) => (m.backup_type.to_string(), style("incomplete").red()),
            None => ("?".to_string(), style("no manifest").red()),
        };
        println!(
            "{:<40} {}  {:<12} {:>10}  {}",
            entry.name,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            kind,
            backup::format_size(entry.size_bytes),
            status
        );
    }
    Ok(true)
}
