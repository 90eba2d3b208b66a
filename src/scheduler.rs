//! launchd agent that runs `check --quiet` periodically.

use crate::error::{BackupError, Result};
use crate::paths::{LAUNCHD_LABEL, Paths};
use crate::runner::CommandRunner;
use std::ffi::OsStr;
use std::fs;
use std::path::Path;

/// How often launchd starts the check, in seconds.
pub const START_INTERVAL_SECS: u64 = 3600;

/// Log filter handed to the scheduled job so its decisions land in the log file.
pub const LOG_ENV: &str = "CLAUDE_HISTORY_BACKUP_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    AlreadyInstalled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotInstalled,
}

/// Whether launchd currently knows about our job.
pub fn is_active(runner: &dyn CommandRunner) -> bool {
    match runner.run("launchctl", &[OsStr::new("list"), OsStr::new(LAUNCHD_LABEL)]) {
        Ok(out) => out.success,
        Err(e) => {
            tracing::debug!(error = %e, "launchctl unavailable");
            false
        }
    }
}

pub fn install(paths: &Paths, runner: &dyn CommandRunner, exe: &Path) -> Result<InstallOutcome> {
    if is_active(runner) {
        return Ok(InstallOutcome::AlreadyInstalled);
    }

    let plist = &paths.launchd_plist;
    for dir in [plist.parent(), paths.log_file.parent()].into_iter().flatten() {
        fs::create_dir_all(dir)
            .map_err(|e| BackupError::io(format!("creating {}", dir.display()), e))?;
    }
    fs::write(plist, build_plist(exe, &paths.log_file))
        .map_err(|e| BackupError::io(format!("writing {}", plist.display()), e))?;

    let load = runner.run(
        "launchctl",
        &[OsStr::new("load"), OsStr::new("-w"), plist.as_os_str()],
    );
    let details = match load {
        Ok(out) if out.success => {
            tracing::info!(plist = %plist.display(), "launchd agent installed");
            return Ok(InstallOutcome::Installed);
        }
        Ok(out) if !out.stderr.trim().is_empty() => out.stderr.trim().to_string(),
        Ok(_) => "exited with a non-zero status".to_string(),
        Err(e) => e.to_string(),
    };

    // Don't leave a plist behind that launchd never accepted.
    if let Err(e) = fs::remove_file(plist) {
        tracing::warn!(plist = %plist.display(), error = %e, "could not clean up plist");
    }
    Err(BackupError::CommandFailed {
        command: "launchctl load".to_string(),
        details,
    })
}

pub fn remove(paths: &Paths, runner: &dyn CommandRunner) -> Result<RemoveOutcome> {
    let plist = &paths.launchd_plist;
    if !plist.exists() {
        return Ok(RemoveOutcome::NotInstalled);
    }

    match runner.run(
        "launchctl",
        &[OsStr::new("unload"), OsStr::new("-w"), plist.as_os_str()],
    ) {
        Ok(out) if out.success => {}
        // Already unloaded (e.g. after a reboot with the agent disabled).
        Ok(out) => tracing::warn!(stderr = %out.stderr.trim(), "launchctl unload failed"),
        Err(e) => tracing::warn!(error = %e, "launchctl unavailable"),
    }

    fs::remove_file(plist)
        .map_err(|e| BackupError::io(format!("removing {}", plist.display()), e))?;
    tracing::info!(plist = %plist.display(), "launchd agent removed");
    Ok(RemoveOutcome::Removed)
}

pub fn build_plist(exe: &Path, log_file: &Path) -> String {
    let exe = xml_escape(&exe.to_string_lossy());
    let log = xml_escape(&log_file.to_string_lossy());
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(
        "<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \
\"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n",
    );
    out.push_str("<plist version=\"1.0\">\n");
    out.push_str("<dict>\n");
    out.push_str("  <key>Label</key>\n");
    out.push_str(&format!("  <string>{LAUNCHD_LABEL}</string>\n"));
    out.push_str("  <key>ProgramArguments</key>\n");
    out.push_str("  <array>\n");
    for arg in [exe.as_str(), "check", "--quiet"] {
        out.push_str(&format!("    <string>{arg}</string>\n"));
    }
    out.push_str("  </array>\n");
    out.push_str("  <key>StartInterval</key>\n");
    out.push_str(&format!("  <integer>{START_INTERVAL_SECS}</integer>\n"));
    out.push_str("  <key>RunAtLoad</key>\n");
    out.push_str("  <true/>\n");
    out.push_str("  <key>EnvironmentVariables</key>\n");
    out.push_str("  <dict>\n");
    out.push_str(&format!("    <key>{LOG_ENV}</key>\n"));
    out.push_str("    <string>info</string>\n");
    out.push_str("  </dict>\n");
    out.push_str("  <key>StandardOutPath</key>\n");
    out.push_str(&format!("  <string>{log}</string>\n"));
    out.push_str("  <key>StandardErrorPath</key>\n");
    out.push_str(&format!("  <string>{log}</string>\n"));
    out.push_str("</dict>\n");
    out.push_str("</plist>\n");
    out
}

fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}
