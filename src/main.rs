use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use claude_history_backup::archives::{self, Archive};
use claude_history_backup::backup::StatusReport;
use claude_history_backup::scheduler::{self, InstallOutcome, RemoveOutcome};
use claude_history_backup::utils::days_ago;
use claude_history_backup::{Backup, SyncDecision, SyncOutcome, THRESHOLD_DAYS};
use eyre::{Context, Result, eyre};
use indicatif::HumanBytes;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Back up Claude Code conversation history to timestamped zip archives.
#[derive(Parser)]
#[command(name = "claude-history", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show sessions, archives and the last sync.
    Status,
    /// Archive ~/.claude/projects now.
    Sync,
    /// Sync only if old sessions are rolling off. This is what the scheduler runs.
    Check {
        /// Suppress informational output.
        #[arg(short, long)]
        quiet: bool,
    },
    /// List archives, newest first.
    List,
    /// Show the configuration, or change the backup location.
    Config {
        /// Directory to write archives to.
        #[arg(long, value_name = "PATH")]
        backup_root: Option<PathBuf>,
    },
    /// Install the launchd agent that runs `check --quiet` every hour.
    SchedulerInstall,
    /// Unload and delete the launchd agent.
    SchedulerRemove,
    /// Show whether the launchd agent is loaded.
    SchedulerStatus,
    /// Show the tail of the scheduler log.
    Logs {
        /// Number of lines to show.
        #[arg(short = 'n', long = "lines", value_name = "COUNT", default_value_t = 20)]
        lines: usize,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(scheduler::LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let backup = Backup::detect()?;

    match cli.command {
        Command::Status => print_status(&backup.status()?),
        Command::Sync => {
            let outcome = backup.sync(false).wrap_err("Sync failed")?;
            print_synced(&outcome);
        }
        Command::Check { quiet } => run_check(&backup, quiet)?,
        Command::List => print_archives(&backup.list()?, &backup.store().backup_root()?),
        Command::Config { backup_root } => {
            if let Some(root) = backup_root {
                backup.set_backup_root(root.clone())?;
                println!("Backup root set to {}", root.display());
            }
            let report = backup.config()?;
            println!(
                "Backup location: {}{}",
                report.backup_root.display(),
                if report.customized { "" } else { " (default)" }
            );
            println!("Config file:     {}", tilde(&report.config_file));
        }
        Command::SchedulerInstall => {
            ensure_macos()?;
            let exe = std::env::current_exe().wrap_err("Could not locate this executable")?;
            match scheduler::install(backup.paths(), backup.runner(), &exe)
                .wrap_err("Scheduler install failed")?
            {
                InstallOutcome::Installed => {
                    println!(
                        "Scheduler installed: `check --quiet` runs every {} minutes.",
                        scheduler::START_INTERVAL_SECS / 60
                    );
                    println!("Logs: {}", tilde(&backup.paths().log_file));
                }
                InstallOutcome::AlreadyInstalled => {
                    println!("Scheduler is already installed.");
                }
            }
        }
        Command::SchedulerRemove => {
            ensure_macos()?;
            match scheduler::remove(backup.paths(), backup.runner())? {
                RemoveOutcome::Removed => println!("Scheduler removed."),
                RemoveOutcome::NotInstalled => println!("Scheduler is not installed."),
            }
        }
        Command::SchedulerStatus => {
            if scheduler::is_active(backup.runner()) {
                println!("Scheduler is active ({}).", tilde(&backup.paths().launchd_plist));
            } else {
                println!("Scheduler is not active.");
            }
        }
        Command::Logs { lines } => print_logs(&backup.paths().log_file, lines)?,
    }

    Ok(())
}

fn ensure_macos() -> Result<()> {
    if cfg!(target_os = "macos") {
        Ok(())
    } else {
        Err(eyre!("launchd scheduling is only supported on macOS"))
    }
}

fn run_check(backup: &Backup, quiet: bool) -> Result<()> {
    let outcome = backup.check(quiet).wrap_err("Check failed")?;
    if quiet {
        return Ok(());
    }

    match outcome.decision {
        SyncDecision::NeverSynced => println!("First run, triggering sync."),
        SyncDecision::NoSessions => {
            println!("No sessions in {}, nothing to back up.", tilde(&backup.paths().source_dir))
        }
        SyncDecision::GapWithinThreshold { gap_days } => println!(
            "Oldest session moved {gap_days} day(s) since last sync (threshold {THRESHOLD_DAYS}), triggering sync."
        ),
        SyncDecision::GapExceedsThreshold { gap_days } => {
            println!("No sync needed (gap {gap_days} day(s), threshold {THRESHOLD_DAYS}).")
        }
    }
    if let Some(synced) = &outcome.synced {
        print_synced(synced);
    }
    Ok(())
}

fn print_synced(outcome: &SyncOutcome) {
    println!("Created {}", outcome.archive.display());
    println!("Sessions archived: {}", outcome.sessions);
}

fn print_status(status: &StatusReport) {
    let now = Local::now();
    println!(
        "Sessions in {}: {}",
        tilde(&status.source_dir),
        status.sessions.count
    );
    if let Some(oldest) = &status.sessions.oldest {
        println!("  Oldest: {}", describe(oldest, &now));
    }
    if let Some(newest) = &status.sessions.newest {
        println!("  Newest: {}", describe(newest, &now));
    }
    println!("  Size:   {}", status.source_size);
    println!();

    println!("Backup location: {}", status.backup_root.display());
    println!(
        "  Archives: {} ({})",
        status.archive_count,
        HumanBytes(status.archive_bytes)
    );
    if let Some(latest) = &status.latest_archive {
        println!("  Latest:   {}", latest.name);
    }
    println!();

    match &status.meta.last_sync {
        Some(ts) => println!("Last sync: {}", describe(ts, &now)),
        None => println!("Last sync: never"),
    }
    if let Some(oldest) = &status.meta.last_sync_oldest {
        println!("  Oldest session then: {}", describe(oldest, &now));
    }
    let next = match status.decision {
        SyncDecision::NeverSynced => "sync (first run)".to_string(),
        SyncDecision::NoSessions => "nothing to back up".to_string(),
        SyncDecision::GapWithinThreshold { gap_days } => format!("sync (gap {gap_days} day(s))"),
        SyncDecision::GapExceedsThreshold { gap_days } => {
            format!("no sync needed (gap {gap_days} day(s))")
        }
    };
    println!("Next check: {next}");
}

fn print_archives(archives: &[Archive], backup_root: &Path) {
    if archives.is_empty() {
        println!("No archives found in {}", backup_root.display());
        return;
    }
    for archive in archives {
        println!(
            "{}  {:>10}  {}",
            archive.name,
            HumanBytes(archive.size).to_string(),
            archive.modified.format("%Y-%m-%d %H:%M")
        );
    }
    println!();
    println!("{}", archive_summary(archives));
}

fn archive_summary(archives: &[Archive]) -> String {
    format!(
        "{} archive{}, {} total",
        archives.len(),
        if archives.len() == 1 { "" } else { "s" },
        HumanBytes(archives::total_archive_bytes(archives))
    )
}

fn print_logs(log_file: &Path, lines: usize) -> Result<()> {
    if !log_file.exists() {
        println!("No log file found at {}", tilde(log_file));
        return Ok(());
    }
    let bytes =
        fs::read(log_file).wrap_err_with(|| format!("Failed to read {}", log_file.display()))?;
    let content = String::from_utf8_lossy(&bytes);
    let tail = tail_lines(&content, lines);
    if tail.is_empty() {
        println!("Log is empty.");
        return Ok(());
    }
    println!("Backup Log ({}, last {} lines)", tilde(log_file), tail.len());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}

fn tail_lines(content: &str, n: usize) -> Vec<&str> {
    let all: Vec<&str> = content.lines().collect();
    all[all.len().saturating_sub(n)..].to_vec()
}

fn describe(ts: &DateTime<Local>, now: &DateTime<Local>) -> String {
    let days = days_ago(ts, now);
    let ago = match days {
        0 => "today".to_string(),
        1 => "1 day ago".to_string(),
        d if d < 0 => "in the future".to_string(),
        d => format!("{d} days ago"),
    };
    format!("{} ({ago})", ts.format("%Y-%m-%d %H:%M"))
}

/// Show paths under the home directory as `~/...`.
fn tilde(path: &Path) -> String {
    dirs::home_dir()
        .and_then(|home| path.strip_prefix(home).ok().map(Path::to_path_buf))
        .map(|rel| format!("~/{}", rel.display()))
        .unwrap_or_else(|| path.display().to_string())
}
