//! tenantry - shared datastore configuration tool
//!
//! Validates per-application ownership of rules paths, index collection
//! groups and storage paths, composes the per-application fragments into the
//! deployable artifacts, and syncs composite indexes with the live database.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// tenantry - shared datastore configuration tool
#[derive(Parser, Debug)]
#[command(name = "tenantry")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Infrastructure root holding the units and generated directories
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Path to configuration file (default: <root>/tenantry.toml, optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate ownership declarations and fragments
    Validate,

    /// Compose generated artifacts
    Compose(commands::infra::ComposeArgs),

    /// Validate, then compose artifacts
    All(commands::infra::ComposeArgs),

    /// Sync remote composite indexes with the index artifact
    SyncIndexes(commands::sync::SyncIndexesArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only result lines.
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let context = commands::Context::load(&cli.root, cli.config.as_deref())?;

    let exit_code = match cli.command {
        Commands::Validate => commands::infra::run_validate(&context),
        Commands::Compose(args) => commands::infra::run_compose(&context, &args),
        Commands::All(args) => commands::infra::run_all(&context, &args),
        Commands::SyncIndexes(args) => commands::sync::run_sync_indexes(&context, &args),
    };
    std::process::exit(i32::from(exit_code));
}
