//! The two JSON documents that persist between runs: the user configuration and
//! the sync metadata kept next to the archives.
//!
//! Both are read in full and overwritten in full. A file that exists but doesn't
//! parse is reported as [`BackupError::MalformedState`] and left untouched.

use crate::error::{BackupError, Result};
use crate::paths::{META_FILE_NAME, Paths};
use crate::utils;
use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_root: Option<PathBuf>,
    /// Keys we don't know about, kept so a save doesn't drop them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What the last successful sync saw.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMeta {
    #[serde(default, with = "utils::optional_timestamp")]
    pub last_sync: Option<DateTime<Local>>,
    /// Oldest session at the time of the last sync; null if there were none.
    #[serde(default, with = "utils::optional_timestamp")]
    pub last_sync_oldest: Option<DateTime<Local>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SyncMeta {
    /// True when no sync has ever been recorded.
    pub fn is_empty(&self) -> bool {
        self.last_sync.is_none() && self.last_sync_oldest.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    config_file: PathBuf,
    default_backup_root: PathBuf,
}

impl StateStore {
    pub fn new(paths: &Paths) -> Self {
        Self {
            config_file: paths.config_file.clone(),
            default_backup_root: paths.default_backup_root.clone(),
        }
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn load_config(&self) -> Result<UserConfig> {
        load_json(&self.config_file)
    }

    pub fn save_config(&self, config: &UserConfig) -> Result<()> {
        save_json(&self.config_file, config)
    }

    /// The configured backup root, or the default when unset or empty.
    pub fn backup_root(&self) -> Result<PathBuf> {
        let config = self.load_config()?;
        Ok(match config.backup_root {
            Some(root) if !root.as_os_str().is_empty() => root,
            _ => self.default_backup_root.clone(),
        })
    }

    pub fn meta_file(&self) -> Result<PathBuf> {
        Ok(self.backup_root()?.join(META_FILE_NAME))
    }

    pub fn load_meta(&self) -> Result<SyncMeta> {
        load_json(&self.meta_file()?)
    }

    pub fn save_meta(&self, meta: &SyncMeta) -> Result<()> {
        save_json(&self.meta_file()?, meta)
    }
}

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(BackupError::io(format!("reading {}", path.display()), e)),
    };
    serde_json::from_str(&content).map_err(|source| BackupError::MalformedState {
        path: path.to_path_buf(),
        source,
    })
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BackupError::io(format!("creating {}", parent.display()), e))?;
    }
    let mut json = serde_json::to_string_pretty(value)
        .map_err(|e| BackupError::io(format!("serializing {}", path.display()), e.into()))?;
    json.push('\n');
    fs::write(path, json).map_err(|e| BackupError::io(format!("writing {}", path.display()), e))
}
