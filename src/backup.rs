//! Sync decision and the operations behind each command.
//!
//! `check` is what the scheduler runs. It compares the oldest session on disk with
//! the oldest session recorded at the last sync. When that boundary has moved
//! forward by at most [`THRESHOLD_DAYS`], old sessions are being pruned upstream and
//! a fresh archive is taken before more history disappears.

use crate::archives::{self, Archive};
use crate::error::{BackupError, Result};
use crate::paths::Paths;
use crate::runner::{CommandRunner, SystemRunner};
use crate::sessions::SessionSummary;
use crate::state::{StateStore, SyncMeta, UserConfig};
use chrono::{DateTime, Local};
use std::path::PathBuf;

/// Largest gap, in whole days, that still triggers a sync.
pub const THRESHOLD_DAYS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// No usable metadata from a previous sync.
    NeverSynced,
    /// The projects directory has no sessions to compare.
    NoSessions,
    GapWithinThreshold { gap_days: i64 },
    /// Gap above the threshold, or negative.
    GapExceedsThreshold { gap_days: i64 },
}

impl SyncDecision {
    pub fn should_sync(&self) -> bool {
        matches!(
            self,
            SyncDecision::NeverSynced | SyncDecision::GapWithinThreshold { .. }
        )
    }
}

/// Decide whether a sync is due. Pure: same inputs, same answer.
pub fn decide(current_oldest: Option<DateTime<Local>>, meta: &SyncMeta) -> SyncDecision {
    if meta.is_empty() {
        return SyncDecision::NeverSynced;
    }
    let Some(current) = current_oldest else {
        return SyncDecision::NoSessions;
    };
    // The last sync saw no sessions, so there is no baseline yet.
    let Some(recorded) = meta.last_sync_oldest else {
        return SyncDecision::NeverSynced;
    };

    let gap_days = (current - recorded).num_seconds().div_euclid(86_400);
    if (0..=THRESHOLD_DAYS).contains(&gap_days) {
        SyncDecision::GapWithinThreshold { gap_days }
    } else {
        SyncDecision::GapExceedsThreshold { gap_days }
    }
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub source_dir: PathBuf,
    pub sessions: SessionSummary,
    pub source_size: String,
    pub backup_root: PathBuf,
    pub archive_count: usize,
    pub archive_bytes: u64,
    pub latest_archive: Option<Archive>,
    pub meta: SyncMeta,
    /// What `check` would do right now.
    pub decision: SyncDecision,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub archive: PathBuf,
    pub meta: SyncMeta,
    pub sessions: usize,
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub decision: SyncDecision,
    pub synced: Option<SyncOutcome>,
}

#[derive(Debug, Clone)]
pub struct ConfigReport {
    pub config_file: PathBuf,
    pub backup_root: PathBuf,
    /// False when `backup_root` is the built-in default.
    pub customized: bool,
}

/// Ties the session scan, archive set and state files together.
pub struct Backup<R = SystemRunner> {
    paths: Paths,
    store: StateStore,
    runner: R,
}

impl Backup<SystemRunner> {
    pub fn detect() -> Result<Self> {
        Ok(Self::new(Paths::detect()?, SystemRunner))
    }
}

impl<R: CommandRunner> Backup<R> {
    pub fn new(paths: Paths, runner: R) -> Self {
        let store = StateStore::new(&paths);
        Self {
            paths,
            store,
            runner,
        }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn status(&self) -> Result<StatusReport> {
        let backup_root = self.store.backup_root()?;
        let meta = self.store.load_meta()?;
        let sessions = SessionSummary::scan(&self.paths.source_dir);
        let source_size = if self.paths.source_dir.is_dir() {
            archives::directory_size(&self.paths.source_dir, &self.runner)
        } else {
            archives::UNKNOWN_SIZE.to_string()
        };
        let listed = archives::list_archives(&backup_root);
        let decision = decide(sessions.oldest, &meta);

        Ok(StatusReport {
            source_dir: self.paths.source_dir.clone(),
            source_size,
            backup_root,
            archive_count: listed.len(),
            archive_bytes: archives::total_archive_bytes(&listed),
            latest_archive: listed.into_iter().next(),
            meta,
            decision,
            sessions,
        })
    }

    /// Archive the projects directory now, regardless of the gap.
    pub fn sync(&self, quiet: bool) -> Result<SyncOutcome> {
        let summary = SessionSummary::scan(&self.paths.source_dir);
        self.sync_with(&summary, quiet)
    }

    /// Run the gap check and sync if it says so.
    pub fn check(&self, quiet: bool) -> Result<CheckOutcome> {
        let meta = self.store.load_meta()?;
        let summary = SessionSummary::scan(&self.paths.source_dir);
        let decision = decide(summary.oldest, &meta);
        tracing::info!(?decision, sessions = summary.count, "sync check");

        let synced = if decision.should_sync() {
            Some(self.sync_with(&summary, quiet)?)
        } else {
            None
        };
        Ok(CheckOutcome { decision, synced })
    }

    fn sync_with(&self, summary: &SessionSummary, quiet: bool) -> Result<SyncOutcome> {
        if !self.paths.source_dir.is_dir() {
            return Err(BackupError::SourceMissing(self.paths.source_dir.clone()));
        }
        let backup_root = self.store.backup_root()?;
        let archive = archives::create_archive(&self.paths.source_dir, &backup_root, quiet)?;

        // Only recorded once the archive is safely on disk.
        let meta = SyncMeta {
            last_sync: Some(Local::now()),
            last_sync_oldest: summary.oldest,
            ..Default::default()
        };
        self.store.save_meta(&meta)?;
        tracing::info!(archive = %archive.display(), sessions = summary.count, "sync complete");

        Ok(SyncOutcome {
            archive,
            meta,
            sessions: summary.count,
        })
    }

    pub fn list(&self) -> Result<Vec<Archive>> {
        Ok(archives::list_archives(&self.store.backup_root()?))
    }

    pub fn config(&self) -> Result<ConfigReport> {
        let config = self.store.load_config()?;
        let customized = config
            .backup_root
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty());
        Ok(ConfigReport {
            config_file: self.store.config_file().to_path_buf(),
            backup_root: self.store.backup_root()?,
            customized,
        })
    }

    /// Persist a new backup root. Existing archives are not moved.
    pub fn set_backup_root(&self, root: PathBuf) -> Result<()> {
        let mut config: UserConfig = self.store.load_config()?;
        config.backup_root = Some(root);
        self.store.save_config(&config)
    }
}
