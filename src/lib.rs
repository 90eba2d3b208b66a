//! # claude-history-backup
//!
//! A CLI tool that snapshots [Claude Code](https://claude.com/claude-code) conversation
//! history into timestamped zip archives before it gets cleaned up.
//!
//! ## What it does
//!
//! Claude Code keeps one directory per session under `~/.claude/projects` and prunes
//! old ones after a retention period. This tool zips the whole directory into
//! `backup_YYYYMMDD_HHMMSS.zip` files in a backup folder (`~/claude_code_history` by
//! default). Archives are only ever added, never modified or removed.
//!
//! The source directory is only read. Your sessions are never modified.
//!
//! ## When it syncs
//!
//! `claude-history check` compares the oldest session on disk with the oldest session
//! seen at the previous sync (recorded in `.sync_meta.json` next to the archives). If
//! the oldest session has moved forward by at most three days, history is starting to
//! roll off and a new archive is taken. The first run always syncs.
//!
//! ## Usage
//!
//! ```sh
//! # What's there, and when did we last sync?
//! claude-history status
//!
//! # Archive right now
//! claude-history sync
//!
//! # Run the check every hour via launchd (macOS)
//! claude-history scheduler-install
//! ```
//!
//! The backup location can be changed with `claude-history config --backup-root PATH`,
//! which is stored in `~/.config/claude-history/config.json`.

pub mod archives;
pub mod backup;
pub mod error;
pub mod paths;
pub mod runner;
pub mod scheduler;
pub mod sessions;
pub mod state;
pub mod utils;

pub use backup::{Backup, CheckOutcome, SyncDecision, SyncOutcome, THRESHOLD_DAYS, decide};
pub use error::{BackupError, Result};
pub use paths::Paths;
