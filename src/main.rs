use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use upkeep::commands::{self, Options};

/// upkeep - keep installed Windows software up to date
///
/// Finds installed programs through winget, Chocolatey and the uninstall
/// registry, works out which have newer versions, and applies the updates
/// with a backup and rollback for each one.
///
/// Examples:
///   upkeep check                # List available updates
///   upkeep upgrade              # Apply every available update
///   upkeep upgrade firefox -y   # Update one program without asking
#[derive(Parser, Debug)]
#[command(author, version = env!("UPKEEP_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (also via UPKEEP_CONFIG)
    #[arg(
        long = "config",
        short = 'c',
        env = "UPKEEP_CONFIG",
        value_name = "FILE",
        global = true
    )]
    pub config: Option<PathBuf>,

    /// Directory for pre-update backup records (overrides the configuration)
    #[arg(long = "backup-dir", value_name = "PATH", global = true)]
    pub backup_dir: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// List installed programs
    Scan,

    /// List available updates without applying them
    Check,

    /// Apply available updates
    Upgrade(UpgradeArgs),

    /// Write the full scan report as JSON
    Export(ExportArgs),

    /// List the backups recorded for a program
    Backups(BackupsArgs),

    /// Show the configuration file location and contents
    Config,
}

#[derive(clap::Args, Debug)]
pub struct UpgradeArgs {
    /// Programs to update (canonical id, name or package id); all when omitted
    #[arg(value_name = "ID")]
    pub ids: Vec<String>,

    /// Do not ask for confirmation
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(clap::Args, Debug)]
pub struct ExportArgs {
    /// Output file; stdout when omitted
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct BackupsArgs {
    /// Canonical id of the program, as shown in reports
    #[arg(value_name = "ID")]
    pub id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = upkeep::runtime::RealRuntime;
    let options = Options {
        config: cli.config,
        backup_dir: cli.backup_dir,
    };

    match cli.command {
        Commands::Scan => commands::scan(runtime, options).await?,
        Commands::Check => commands::check(runtime, options).await?,
        Commands::Upgrade(args) => commands::upgrade(runtime, options, args.ids, args.yes).await?,
        Commands::Export(args) => commands::export(runtime, options, args.file).await?,
        Commands::Backups(args) => commands::backups(runtime, options, &args.id).await?,
        Commands::Config => commands::show_config(runtime, options)?,
    }
    Ok(())
}
