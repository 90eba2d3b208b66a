//! Filesystem locations used by the tool.
//!
//! Every component receives its paths from a [`Paths`] value instead of reading
//! globals, so tests can point the whole tool at a temporary home directory.

use crate::error::{BackupError, Result};
use std::path::{Path, PathBuf};

pub const META_FILE_NAME: &str = ".sync_meta.json";
pub const LAUNCHD_LABEL: &str = "com.claude-history-backup.check";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Claude Code's per-project session directories.
    pub source_dir: PathBuf,
    pub config_file: PathBuf,
    /// Used when the config has no `backup_root`.
    pub default_backup_root: PathBuf,
    /// Where the scheduled job's stdout/stderr end up.
    pub log_file: PathBuf,
    pub launchd_plist: PathBuf,
}

impl Paths {
    /// Locations under the current user's home directory.
    pub fn detect() -> Result<Self> {
        let home = dirs::home_dir().ok_or(BackupError::HomeNotFound)?;
        Ok(Self::from_home(&home))
    }

    pub fn from_home(home: &Path) -> Self {
        Self {
            source_dir: home.join(".claude").join("projects"),
            config_file: home
                .join(".config")
                .join("claude-history")
                .join("config.json"),
            default_backup_root: home.join("claude_code_history"),
            log_file: home.join(".claude").join("history-backup.log"),
            launchd_plist: home
                .join("Library")
                .join("LaunchAgents")
                .join(format!("{LAUNCHD_LABEL}.plist")),
        }
    }
}
