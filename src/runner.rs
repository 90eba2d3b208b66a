//! External process execution.
//!
//! Disk usage and launchctl calls go through [`CommandRunner`] so the code that
//! interprets their results can be exercised without spawning anything.

use std::ffi::OsStr;
use std::io;
use std::process::Command;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

pub trait CommandRunner {
    /// Run `program` to completion and capture its output.
    ///
    /// `Err` means the program could not be started at all.
    fn run(&self, program: &str, args: &[&OsStr]) -> io::Result<CommandOutput>;
}

/// Runs real processes with [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&OsStr]) -> io::Result<CommandOutput> {
        tracing::debug!(program, ?args, "running command");
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
