//! The archive set in the backup directory.
//!
//! Archives are named `backup_YYYYMMDD_HHMMSS.zip` and are never modified or deleted
//! once written. Anything else in the directory is ignored.

use crate::error::{BackupError, Result};
use crate::runner::CommandRunner;
use crate::utils;
use chrono::{DateTime, Datelike, Local, Timelike};
use indicatif::ProgressBar;
use regex::Regex;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

static ARCHIVE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^backup_\d{8}_\d{6}\.zip$").expect("archive name pattern is valid")
});

/// Returned by [`directory_size`] when `du` can't tell us.
pub const UNKNOWN_SIZE: &str = "?";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub path: PathBuf,
    pub name: String,
    pub modified: DateTime<Local>,
    pub size: u64,
}

pub fn is_archive_name(name: &str) -> bool {
    ARCHIVE_NAME.is_match(name)
}

pub fn archive_name(at: &DateTime<Local>) -> String {
    at.format("backup_%Y%m%d_%H%M%S.zip").to_string()
}

/// Archives in `dir`, newest first. A missing directory has no archives.
pub fn list_archives(dir: &Path) -> Vec<Archive> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut archives: Vec<Archive> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_archive_name(&name) {
                return None;
            }
            // Follows symlinks, so a linked archive is listed like any other.
            let meta = fs::metadata(entry.path()).ok()?;
            if !meta.is_file() {
                return None;
            }
            Some(Archive {
                path: entry.path(),
                name,
                modified: DateTime::<Local>::from(meta.modified().ok()?),
                size: meta.len(),
            })
        })
        .collect();

    archives.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| b.name.cmp(&a.name))
    });
    archives
}

pub fn total_archive_bytes(archives: &[Archive]) -> u64 {
    archives.iter().map(|a| a.size).sum()
}

/// Pack the whole of `source` into a new timestamped archive in `dest`.
///
/// The zip is staged in `dest` and renamed into place, so a failure never leaves a
/// partial `backup_*.zip` behind. An archive with the same name (same second) is
/// replaced.
pub fn create_archive(source: &Path, dest: &Path, quiet: bool) -> Result<PathBuf> {
    if !source.is_dir() {
        return Err(BackupError::SourceMissing(source.to_path_buf()));
    }
    fs::create_dir_all(dest)
        .map_err(|e| BackupError::io(format!("creating {}", dest.display()), e))?;

    let path = dest.join(archive_name(&Local::now()));
    let spinner = utils::spinner(&format!("Archiving {}...", source.display()), quiet);

    let mut staging = tempfile::Builder::new()
        .prefix(".backup-")
        .suffix(".zip.partial")
        .tempfile_in(dest)
        .map_err(|e| BackupError::io(format!("creating staging file in {}", dest.display()), e))?;

    let written = write_zip(source, staging.as_file_mut(), &spinner);
    spinner.finish_and_clear();
    let entries = written.map_err(|e| match e {
        ZipFailure::Zip(source) => BackupError::Archive {
            path: path.clone(),
            source,
        },
        ZipFailure::Io(context, source) => BackupError::io(context, source),
    })?;

    staging
        .persist(&path)
        .map_err(|e| BackupError::io(format!("moving archive to {}", path.display()), e.error))?;

    tracing::info!(archive = %path.display(), entries, "archive created");
    Ok(path)
}

enum ZipFailure {
    Zip(zip::result::ZipError),
    Io(String, io::Error),
}

impl From<zip::result::ZipError> for ZipFailure {
    fn from(e: zip::result::ZipError) -> Self {
        ZipFailure::Zip(e)
    }
}

fn write_zip<W: Write + Seek>(
    source: &Path,
    writer: W,
    spinner: &ProgressBar,
) -> std::result::Result<usize, ZipFailure> {
    let mut zip = ZipWriter::new(writer);
    let base_options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = 0usize;

    for entry in WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let context = match e.path() {
                Some(p) => format!("walking {}", p.display()),
                None => format!("walking {}", source.display()),
            };
            ZipFailure::Io(context, io::Error::other(e))
        })?;
        let full_path = entry.path();
        let Ok(rel) = full_path.strip_prefix(source) else {
            continue;
        };
        let name = rel.to_string_lossy().replace('\\', "/");
        let meta = if entry.path_is_symlink() {
            // Linked files are archived by content; linked directories and dangling
            // links are left out so the walk stays inside the source tree.
            match fs::metadata(full_path) {
                Ok(m) if m.is_file() => m,
                Ok(_) => {
                    tracing::debug!(path = %full_path.display(), "skipping symlinked directory");
                    continue;
                }
                Err(e) => {
                    tracing::debug!(path = %full_path.display(), error = %e, "skipping unreadable symlink");
                    continue;
                }
            }
        } else {
            entry.metadata().map_err(|e| {
                ZipFailure::Io(format!("reading {}", full_path.display()), io::Error::other(e))
            })?
        };

        let mut options = base_options;
        if let Some(ts) = meta.modified().ok().and_then(zip_timestamp) {
            options = options.last_modified_time(ts);
        }

        if meta.is_dir() {
            zip.add_directory(name, options)?;
        } else {
            options = options
                .unix_permissions(file_mode(&meta))
                .large_file(meta.len() >= u64::from(u32::MAX));
            zip.start_file(name, options)?;
            let mut file = File::open(full_path)
                .map_err(|e| ZipFailure::Io(format!("opening {}", full_path.display()), e))?;
            io::copy(&mut file, &mut zip)
                .map_err(|e| ZipFailure::Io(format!("archiving {}", full_path.display()), e))?;
        }

        entries += 1;
        if entries % 64 == 0 {
            spinner.set_message(format!("Archiving... {entries} entries"));
        }
    }

    zip.finish()?;
    Ok(entries)
}

fn zip_timestamp(modified: std::time::SystemTime) -> Option<zip::DateTime> {
    let dt = DateTime::<Local>::from(modified);
    zip::DateTime::from_date_and_time(
        u16::try_from(dt.year()).ok()?,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
    )
    .ok()
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata) -> u32 {
    0o644
}

/// Size of `dir` as reported by `du -sh`, or [`UNKNOWN_SIZE`].
pub fn directory_size(dir: &Path, runner: &dyn CommandRunner) -> String {
    match runner.run("du", &[OsStr::new("-sh"), dir.as_os_str()]) {
        Ok(out) if out.success => out
            .stdout
            .split_whitespace()
            .next()
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_SIZE.to_string()),
        Ok(out) => {
            tracing::debug!(dir = %dir.display(), stderr = %out.stderr.trim(), "du failed");
            UNKNOWN_SIZE.to_string()
        }
        Err(e) => {
            tracing::debug!(error = %e, "du unavailable");
            UNKNOWN_SIZE.to_string()
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::create_archives;
    use super::*;
    use crate::runner::CommandOutput;
    use crate::runner::fake::FakeRunner;
    use crate::sessions::testing::create_sessions;
    use tempfile::TempDir;

    #[test]
    fn name_pattern_is_strict() {
        assert!(is_archive_name("backup_20240101_120000.zip"));
        assert!(!is_archive_name("other_file.zip"));
        assert!(!is_archive_name("backup_test.txt"));
        assert!(!is_archive_name("backup_test.zip"));
        assert!(!is_archive_name("backup_2024010_120000.zip"));
        assert!(!is_archive_name("backup_20240101_120000.zip.partial"));
        assert!(!is_archive_name("xbackup_20240101_120000.zip"));
    }

    #[test]
    fn archive_name_encodes_local_time() {
        let ts = crate::utils::parse_timestamp("2024-03-05T07:08:09").unwrap();
        assert_eq!(archive_name(&ts), "backup_20240305_070809.zip");
    }

    #[test]
    fn list_is_empty_without_archives() {
        let tmp = TempDir::new().unwrap();
        assert!(list_archives(tmp.path()).is_empty());
        assert!(list_archives(&tmp.path().join("missing")).is_empty());
    }

    #[test]
    fn list_is_sorted_newest_first() {
        let tmp = TempDir::new().unwrap();
        create_archives(tmp.path(), &[5, 0, 10]);

        let archives = list_archives(tmp.path());
        assert_eq!(archives.len(), 3);
        assert!(archives[0].modified > archives[1].modified);
        assert!(archives[1].modified > archives[2].modified);
    }

    #[test]
    fn list_ignores_unrelated_files() {
        let tmp = TempDir::new().unwrap();
        create_archives(tmp.path(), &[0, 1]);
        fs::write(tmp.path().join("other_file.zip"), b"test").unwrap();
        fs::write(tmp.path().join("backup_test.txt"), "test").unwrap();
        fs::write(tmp.path().join(".sync_meta.json"), "{}").unwrap();

        let archives = list_archives(tmp.path());
        assert_eq!(archives.len(), 2);
        assert!(archives.iter().all(|a| is_archive_name(&a.name)));
        assert_eq!(total_archive_bytes(&archives), 2 * 104);
    }

    #[test]
    fn create_fails_when_source_is_missing() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("backups");

        let err = create_archive(&tmp.path().join("projects"), &dest, true).unwrap_err();
        assert!(matches!(err, BackupError::SourceMissing(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn create_packs_the_whole_tree() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("projects");
        create_sessions(&source, &[0, 1]);
        fs::create_dir_all(source.join("session_001").join("nested")).unwrap();
        fs::write(source.join("session_001").join("nested").join("tool.txt"), "x").unwrap();
        fs::create_dir(source.join("empty_session")).unwrap();
        let dest = tmp.path().join("backups");

        let path = create_archive(&source, &dest, true).unwrap();
        assert!(path.starts_with(&dest));
        assert!(is_archive_name(&path.file_name().unwrap().to_string_lossy()));

        let zip = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let names: Vec<&str> = zip.file_names().collect();
        for expected in [
            "session_000/conversation.jsonl",
            "session_001/conversation.jsonl",
            "session_001/nested/tool.txt",
            "empty_session/",
        ] {
            assert!(names.contains(&expected), "missing {expected} in {names:?}");
        }
    }

    #[test]
    fn create_leaves_only_the_archive_behind() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("projects");
        create_sessions(&source, &[0]);
        let dest = tmp.path().join("backups");

        let path = create_archive(&source, &dest, true).unwrap();
        let names: Vec<_> = fs::read_dir(&dest)
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .collect();
        assert_eq!(names, vec![path]);
    }

    #[test]
    fn create_keeps_existing_archives() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("projects");
        create_sessions(&source, &[0, 1, 2]);
        let dest = tmp.path().join("backups");
        let existing = create_archives(&dest, &[5, 10]);
        let before: Vec<Vec<u8>> = existing.iter().map(|p| fs::read(p).unwrap()).collect();

        create_archive(&source, &dest, true).unwrap();

        assert_eq!(list_archives(&dest).len(), 3);
        for (path, bytes) in existing.iter().zip(before) {
            assert_eq!(fs::read(path).unwrap(), bytes);
        }
    }

    #[cfg(unix)]
    #[test]
    fn create_skips_dangling_symlinks() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("projects");
        create_sessions(&source, &[0]);
        std::os::unix::fs::symlink(tmp.path().join("gone"), source.join("session_000").join("link"))
            .unwrap();
        let dest = tmp.path().join("backups");

        let path = create_archive(&source, &dest, true).unwrap();

        let zip = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let names: Vec<&str> = zip.file_names().collect();
        assert!(names.contains(&"session_000/conversation.jsonl"));
        assert!(!names.iter().any(|n| n.ends_with("link")));
    }

    #[cfg(unix)]
    #[test]
    fn create_stays_inside_the_source_tree() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("projects");
        create_sessions(&source, &[0]);
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("secret.txt"), "x").unwrap();
        fs::write(tmp.path().join("notes.txt"), "linked").unwrap();
        std::os::unix::fs::symlink(&outside, source.join("linked_dir")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("notes.txt"), source.join("notes.txt"))
            .unwrap();
        let dest = tmp.path().join("backups");

        let path = create_archive(&source, &dest, true).unwrap();

        let mut zip = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert!(zip.file_names().all(|n| !n.starts_with("linked_dir")));
        let mut linked = String::new();
        io::Read::read_to_string(&mut zip.by_name("notes.txt").unwrap(), &mut linked).unwrap();
        assert_eq!(linked, "linked");
    }

    #[cfg(unix)]
    #[test]
    fn list_includes_symlinked_archives() {
        let tmp = TempDir::new().unwrap();
        let elsewhere = tmp.path().join("elsewhere");
        let real = create_archives(&elsewhere, &[2]).remove(0);
        let dest = tmp.path().join("backups");
        fs::create_dir_all(&dest).unwrap();
        let link = dest.join(real.file_name().unwrap());
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let archives = list_archives(&dest);
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].path, link);
        assert_eq!(archives[0].size, 104);
    }

    #[test]
    fn directory_size_reads_first_column() {
        let runner = FakeRunner::always(CommandOutput::ok("4.0K\t/tmp/projects\n"));
        assert_eq!(directory_size(Path::new("/tmp/projects"), &runner), "4.0K");
        assert_eq!(runner.programs(), vec!["du -sh /tmp/projects"]);
    }

    #[test]
    fn directory_size_falls_back_on_failure() {
        let failing = FakeRunner::always(CommandOutput::failed("du: nope"));
        assert_eq!(directory_size(Path::new("/x"), &failing), UNKNOWN_SIZE);

        let empty = FakeRunner::always(CommandOutput::ok(""));
        assert_eq!(directory_size(Path::new("/x"), &empty), UNKNOWN_SIZE);

        let missing = FakeRunner::always(CommandOutput::ok("unused"))
            .then(Err(io::Error::new(io::ErrorKind::NotFound, "no du")));
        assert_eq!(directory_size(Path::new("/x"), &missing), UNKNOWN_SIZE);
    }

    #[cfg(unix)]
    #[test]
    fn directory_size_with_real_du() {
        let tmp = TempDir::new().unwrap();
        create_sessions(tmp.path(), &[0, 1]);

        let size = directory_size(tmp.path(), &crate::runner::SystemRunner);
        assert_ne!(size, UNKNOWN_SIZE);
        assert!(size.chars().any(|c| c.is_ascii_digit()));
    }
}
