//! Inspection of Claude Code's session directories.
//!
//! A session is any immediate subdirectory of the projects directory. Entries that
//! can't be statted are skipped rather than failing the scan.

use chrono::{DateTime, Local};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub name: String,
    pub modified: DateTime<Local>,
}

/// Count and age range of the sessions in one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub count: usize,
    pub oldest: Option<DateTime<Local>>,
    pub newest: Option<DateTime<Local>>,
}

impl SessionSummary {
    pub fn scan(dir: &Path) -> Self {
        scan_sessions(dir)
            .into_iter()
            .fold(Self::default(), |mut summary, session| {
                summary.count += 1;
                summary.oldest = Some(match summary.oldest {
                    Some(o) => o.min(session.modified),
                    None => session.modified,
                });
                summary.newest = Some(match summary.newest {
                    Some(n) => n.max(session.modified),
                    None => session.modified,
                });
                summary
            })
    }
}

/// All readable sessions under `dir`, in directory order. Missing `dir` yields none.
pub fn scan_sessions(dir: &Path) -> Vec<Session> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(dir = %dir.display(), error = %e, "cannot read session directory");
            }
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let path = entry.path();
            // Follows symlinks, so a linked session directory still counts.
            let meta = match fs::metadata(&path) {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                    return None;
                }
            };
            if !meta.is_dir() {
                return None;
            }
            let modified = meta.modified().ok()?;
            Some(Session {
                name: entry.file_name().to_string_lossy().into_owned(),
                modified: DateTime::<Local>::from(modified),
            })
        })
        .collect()
}

pub fn count_sessions(dir: &Path) -> usize {
    scan_sessions(dir).len()
}

pub fn oldest_session(dir: &Path) -> Option<DateTime<Local>> {
    SessionSummary::scan(dir).oldest
}

pub fn newest_session(dir: &Path) -> Option<DateTime<Local>> {
    SessionSummary::scan(dir).newest
}


#[cfg(test)]
mod tests {
    use super::testing::create_sessions;
    use super::*;
    use tempfile::TempDir;

    fn approx_days_ago(ts: DateTime<Local>, days: i64) -> bool {
        let expected = Local::now() - chrono::Duration::days(days);
        (ts - expected).num_seconds().abs() < 60
    }

    #[test]
    fn empty_directory_has_no_sessions() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(count_sessions(tmp.path()), 0);
        assert_eq!(oldest_session(tmp.path()), None);
        assert_eq!(newest_session(tmp.path()), None);
    }

    #[test]
    fn missing_directory_has_no_sessions() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nonexistent");
        assert_eq!(count_sessions(&missing), 0);
        assert_eq!(oldest_session(&missing), None);
        assert_eq!(newest_session(&missing), None);
    }

    #[test]
    fn counts_directories_and_ignores_files() {
        let tmp = TempDir::new().unwrap();
        create_sessions(tmp.path(), &[0, 1, 2, 3, 4]);
        std::fs::write(tmp.path().join("file.txt"), "test").unwrap();
        std::fs::write(tmp.path().join("another.json"), "{}").unwrap();

        assert_eq!(count_sessions(tmp.path()), 5);
    }

    #[test]
    fn oldest_and_newest_bracket_every_session() {
        let tmp = TempDir::new().unwrap();
        create_sessions(tmp.path(), &[5, 10, 0]);

        let oldest = oldest_session(tmp.path()).unwrap();
        let newest = newest_session(tmp.path()).unwrap();
        assert!(approx_days_ago(oldest, 10));
        assert!(approx_days_ago(newest, 0));
        for session in scan_sessions(tmp.path()) {
            assert!(oldest <= session.modified && session.modified <= newest);
        }
    }

    #[test]
    fn summary_matches_individual_queries() {
        let tmp = TempDir::new().unwrap();
        create_sessions(tmp.path(), &[3, 1, 7]);

        let summary = SessionSummary::scan(tmp.path());
        assert_eq!(summary.count, count_sessions(tmp.path()));
        assert_eq!(summary.oldest, oldest_session(tmp.path()));
        assert_eq!(summary.newest, newest_session(tmp.path()));
    }

    #[test]
    fn freshly_created_session_has_a_timestamp() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("test_session")).unwrap();
        assert!(oldest_session(tmp.path()).is_some());
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_skipped() {
        let tmp = TempDir::new().unwrap();
        create_sessions(tmp.path(), &[1]);
        std::os::unix::fs::symlink(tmp.path().join("gone"), tmp.path().join("broken")).unwrap();

        assert_eq!(count_sessions(tmp.path()), 1);
        assert!(oldest_session(tmp.path()).is_some());
    }
}
