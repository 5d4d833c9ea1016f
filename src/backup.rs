// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup records.
//!
//! Anything that dotlink is about to overwrite in the live environment is
//! first copied into a __backup record__. A backup record is a directory named
//! after the date and time of the run that created it, placed under the
//! backup directory. Inside the record, every preserved entry keeps its path
//! relative to the home directory, so `~/.config/nvim` ends up at
//! `<backup_dir>/<timestamp>/.config/nvim`.
//!
//! Records are created lazily: a run that never overwrites anything leaves
//! no record behind. Records are never modified by later runs, and never
//! pruned. Restoring from a record is left to the user.

use crate::fsops::{copy_entry, entry_exists};

use chrono::Local;
use std::{
    fs,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, info};

/// Format of backup record directory names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Backup record of a single run.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    backup_dir: PathBuf,
    home: PathBuf,
    record: Option<PathBuf>,
}

impl BackupRecord {
    /// Construct new backup record.
    ///
    /// Nothing is created on disk until the first call to
    /// [`BackupRecord::preserve`].
    pub fn new(backup_dir: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            home: home.into(),
            record: None,
        }
    }

    /// Path to record directory if it was created.
    pub fn path(&self) -> Option<&Path> {
        self.record.as_deref()
    }

    /// Copy target into backup record.
    ///
    /// Returns the location of the copy inside the record. Symlinks are
    /// preserved as symlinks, and directories are preserved recursively.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::CreateRecord`] if the record directory cannot
    ///   be created.
    /// - Return [`BackupError::AlreadyPreserved`] if target was already
    ///   preserved by this record.
    /// - Return [`BackupError::Copy`] if target cannot be copied.
    pub fn preserve(&mut self, target: impl AsRef<Path>) -> Result<PathBuf> {
        let target = target.as_ref();
        let record = self.ensure_record()?;
        let location = record.join(self.relative_location(target));

        // INVARIANT: Never overwrite anything inside an existing record.
        if entry_exists(&location).map_err(|source| BackupError::Copy {
            source,
            path: target.to_path_buf(),
        })? {
            return Err(BackupError::AlreadyPreserved {
                path: target.to_path_buf(),
            });
        }

        if let Some(parent) = location.parent() {
            mkdirp::mkdirp(parent).map_err(|source| BackupError::Copy {
                source,
                path: target.to_path_buf(),
            })?;
        }

        copy_entry(target, &location).map_err(|source| BackupError::Copy {
            source,
            path: target.to_path_buf(),
        })?;
        info!("backed up {:?} to {:?}", target.display(), location.display());

        Ok(location)
    }

    fn ensure_record(&mut self) -> Result<PathBuf> {
        match &self.record {
            Some(record) => Ok(record.clone()),
            None => {
                let record = self.create_record()?;
                self.record = Some(record.clone());
                Ok(record)
            }
        }
    }

    fn create_record(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.backup_dir).map_err(|source| BackupError::CreateRecord {
            source,
            path: self.backup_dir.clone(),
        })?;

        let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut attempt = 0;
        loop {
            let name = match attempt {
                0 => stamp.clone(),
                n => format!("{stamp}-{n}"),
            };
            let path = self.backup_dir.join(name);

            // INVARIANT: Two runs within the same second never share a record.
            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!("created backup record {:?}", path.display());
                    return Ok(path);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(source) => return Err(BackupError::CreateRecord { source, path }),
            }
        }
    }

    fn relative_location(&self, target: &Path) -> PathBuf {
        let relative = target.strip_prefix(&self.home).unwrap_or(target);
        relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect()
    }
}

/// List every backup record in backup directory, oldest first.
///
/// A missing backup directory simply has no records.
///
/// # Errors
///
/// - Return [`BackupError::ListRecords`] if backup directory cannot be read.
pub fn list_records(backup_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let backup_dir = backup_dir.as_ref();
    let entries = match fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(BackupError::ListRecords {
                source,
                path: backup_dir.to_path_buf(),
            })
        }
    };

    let mut records = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| BackupError::ListRecords {
            source,
            path: backup_dir.to_path_buf(),
        })?;
        if entry.path().is_dir() {
            records.push(entry.path());
        }
    }
    records.sort();

    Ok(records)
}

/// Backup error types.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Backup record directory cannot be created.
    #[error("failed to create backup record at {:?}", path.display())]
    CreateRecord {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Target cannot be copied into backup record.
    #[error("failed to back up {:?}", path.display())]
    Copy {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Target was already preserved in this record.
    #[error("{:?} is already preserved in current backup record", path.display())]
    AlreadyPreserved { path: PathBuf },

    /// Backup directory cannot be listed.
    #[error("failed to list backup records in {:?}", path.display())]
    ListRecords {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = BackupError> = std::result::Result<T, E>;
