//! Backup Runner - Main entry point
//!
//! Runs backup profiles once and exits; schedule it with cron or a timer.

use anyhow::{Context, Result};
use backup_runner::archive::list_entries;
use backup_runner::profile::{self, Profile, ProfileSet};
use backup_runner::{utils, Config, Runner};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a profile file, or every *.backup.yaml below a directory
    Backup { path: PathBuf },
    /// Load profiles and report problems without running them
    Validate { path: PathBuf },
    /// List the entries of an archive
    List { archive: PathBuf },
    /// Print an annotated profile template
    Generate,
    /// Print version information
    Version,
}

fn load(path: &Path) -> Result<ProfileSet> {
    if path.is_dir() {
        return Ok(profile::load_profiles(path)?);
    }

    let mut set = ProfileSet::default();
    match profile::load_profile(path) {
        Ok(p) => set.profiles.push(p),
        Err(e) => {
            tracing::error!(file = %path.display(), error = %e, "Unable to load profile");
            set.failures.push((path.to_path_buf(), e));
        }
    }
    Ok(set)
}

fn describe(p: &Profile) -> String {
    format!(
        "{} ({}): {} target(s), {} database(s) -> {}",
        p.name,
        p.kind,
        p.targets.len(),
        p.databases.len(),
        p.destination.path.display()
    )
}

fn run(args: Args, config: &Config) -> Result<bool> {
    match args.command {
        Command::Backup { path } => {
            let set = load(&path)?;
            let mut ok = true;
            if let Some(e) = set.error() {
                tracing::error!(error = %e, "Some profiles were not loaded");
                ok = false;
            }

            let runner = Runner::new(config);
            if let Err(e) = runner.run_batch(&set.profiles) {
                tracing::error!(error = %e, "Backup run failed");
                ok = false;
            }
            Ok(ok)
        }
        Command::Validate { path } => {
            let set = load(&path)?;
            for p in &set.profiles {
                println!("ok      {}", describe(p));
            }
            for (file, e) in &set.failures {
                println!("invalid {}: {}", file.display(), e);
            }
            Ok(set.failures.is_empty())
        }
        Command::List { archive } => {
            let entries = list_entries(&archive)
                .with_context(|| format!("unable to read {}", archive.display()))?;
            for entry in entries {
                println!("{entry}");
            }
            Ok(true)
        }
        Command::Generate => {
            print!("{}", profile::BOILERPLATE);
            Ok(true)
        }
        Command::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            Ok(true)
        }
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!("Starting backup-runner v{}", env!("CARGO_PKG_VERSION"));

    if run(args, &config)? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
