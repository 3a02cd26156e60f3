//! phpobf CLI
//!
//! Command-line interface for obfuscating PHP source trees.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use phpobf_core::config::KEY_ROUNDS;
use phpobf_core::{watch, Config, Obfuscator, Orchestrator};

#[derive(Parser)]
#[command(name = "phpobf")]
#[command(about = "PHP source obfuscator and incremental build tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BuildArgs {
    /// Base directory holding config/config.yaml (default: current directory)
    #[arg(short, long)]
    base: Option<PathBuf>,

    /// Configuration file (default: <base>/config/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not print a line per written file
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the target tree up to date with the source tree
    Build(BuildArgs),

    /// Build, then rebuild whenever the source tree changes
    Watch(BuildArgs),

    /// Obfuscate a single file
    File {
        /// Script to obfuscate
        src: PathBuf,

        /// Output path
        dst: PathBuf,

        /// Encode rounds (default: cntEncode from config, else 0)
        #[arg(short, long)]
        rounds: Option<u32>,
    },

    /// Obfuscate a directory, copying allowed non-script files
    Dir {
        /// Directory to obfuscate
        src: PathBuf,

        /// Output directory
        dst: PathBuf,

        /// Only process the top level
        #[arg(long)]
        no_recursive: bool,

        /// Encode rounds (default: cntEncode from config, else 0)
        #[arg(short, long)]
        rounds: Option<u32>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("phpobf=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build(args) => {
            cmd_build(args)?;
        }
        Commands::Watch(args) => {
            cmd_watch(args)?;
        }
        Commands::File { src, dst, rounds } => {
            cmd_file(&src, &dst, rounds)?;
        }
        Commands::Dir {
            src,
            dst,
            no_recursive,
            rounds,
        } => {
            cmd_dir(&src, &dst, !no_recursive, rounds)?;
        }
    }

    Ok(())
}

fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().context("Failed to get current directory")
}

/// Load the build configuration and set up an orchestrator
fn orchestrator(args: &BuildArgs) -> Result<Orchestrator> {
    let base = match &args.base {
        Some(base) => base.clone(),
        None => current_dir()?,
    };
    let config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::locate(&base),
    }
    .context("Failed to load configuration")?;

    let orchestrator = Orchestrator::from_config(&config, &base)
        .context("Failed to prepare build directories")?
        .with_console(!args.quiet);
    Ok(orchestrator)
}

/// Run one incremental build
fn cmd_build(args: BuildArgs) -> Result<()> {
    let mut orchestrator = orchestrator(&args)?;
    let report = orchestrator.run().context("Build failed")?;

    if report.writes() == 0 {
        tracing::info!("Everything up to date");
    }
    Ok(())
}

/// Build and keep rebuilding on change
fn cmd_watch(args: BuildArgs) -> Result<()> {
    let mut orchestrator = orchestrator(&args)?;
    println!(
        "Watching {} (Ctrl+C to stop)",
        orchestrator.layout().source_dir.display()
    );
    watch(&mut orchestrator).context("Watch failed")
}

/// Configuration for file/dir mode: the optional config under the current
/// directory, with the round count overridden from the command line
fn standalone_config(rounds: Option<u32>) -> Result<Config> {
    let path = Config::default_path(&current_dir()?);
    let mut config = if path.is_file() {
        Config::from_file(&path).context("Failed to load configuration")?
    } else {
        Config::default()
    };
    if let Some(rounds) = rounds {
        config.set(KEY_ROUNDS, rounds.to_string());
    }
    Ok(config)
}

fn cmd_file(src: &Path, dst: &Path, rounds: Option<u32>) -> Result<()> {
    let obfuscator = Obfuscator::from_config(&standalone_config(rounds)?);
    obfuscator
        .obfuscate_file(src, dst)
        .with_context(|| format!("Failed to obfuscate {}", src.display()))?;

    println!("{} -> {}", src.display(), dst.display());
    Ok(())
}

fn cmd_dir(src: &Path, dst: &Path, recursive: bool, rounds: Option<u32>) -> Result<()> {
    let mut obfuscator = Obfuscator::from_config(&standalone_config(rounds)?);
    obfuscator.set_recursive(recursive);
    let report = obfuscator
        .obfuscate_directory(src, dst)
        .with_context(|| format!("Failed to obfuscate {}", src.display()))?;

    println!(
        "{} -> {}: {} encoded, {} copied",
        src.display(),
        dst.display(),
        report.encoded,
        report.copied
    );
    Ok(())
}
