// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dotfile store management.
//!
//! The __store__ ties a loaded manifest to the live environment it manages.
//! It resolves packages once, owns the location of backup records, and
//! exposes every operation the command line offers. Each operation creates
//! its own [`BackupRecord`], so everything replaced during one invocation
//! lands in a single timestamped record.
//!
//! # Store Layout
//!
//! ```text
//! $XDG_CONFIG_HOME/dotlink/dotlink.toml   manifest
//! <settings.repository>/                  dotfile repository (Git)
//! <settings.backup_dir>/<timestamp>/      backup records
//! ```

use crate::{
    backup::{list_records, BackupRecord},
    config::Manifest,
    install::{ensure_tools, Runner, ToolStatus},
    link::{inspect, unlink, LinkOptions, LinkReport, Linker, TargetState},
    package::{resolve, select, LinkPair, PackageMapping},
    path::{default_backup_dir, LiveRoots},
    sync::{sync, SyncDirection, SyncOptions, SyncReport},
    vcs::GitRepo,
};

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Status line of a single pair.
#[derive(Debug)]
pub struct PairStatus {
    /// Package the pair belongs to.
    pub package: String,

    /// The pair itself.
    pub pair: LinkPair,

    /// Observed state, or why it could not be observed.
    pub state: Result<TargetState, crate::link::LinkError>,
}

/// Manifest bound to its live environment.
#[derive(Debug)]
pub struct Store {
    manifest: Manifest,
    mappings: Vec<PackageMapping>,
    roots: LiveRoots,
    backup_dir: PathBuf,
}

impl Store {
    /// Open store from manifest file.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ReadManifest`] if manifest cannot be read.
    /// - Return [`StoreError::Config`] if manifest cannot be parsed.
    /// - Return [`StoreError::Package`] if packages are invalid.
    /// - Return [`StoreError::Path`] if home directory cannot be determined.
    #[instrument(skip(path), level = "debug")]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        debug!("open manifest: {:?}", path.as_ref().display());
        let manifest = read_to_string(path.as_ref())
            .map_err(|source| StoreError::ReadManifest {
                source,
                path: path.as_ref().to_path_buf(),
            })?
            .parse::<Manifest>()?;

        let backup_dir = match &manifest.settings.backup_dir {
            Some(dir) => dir.clone(),
            None => default_backup_dir()?,
        };

        Self::new(manifest, LiveRoots::detect()?, backup_dir)
    }

    /// Construct new store from already loaded manifest.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Package`] if packages are invalid.
    pub fn new(
        manifest: Manifest,
        roots: LiveRoots,
        backup_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let mappings = resolve(&manifest, &roots)?;

        Ok(Self {
            manifest,
            mappings,
            roots,
            backup_dir: backup_dir.into(),
        })
    }

    /// Loaded manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Resolved package mappings in manifest order.
    pub fn mappings(&self) -> &[PackageMapping] {
        self.mappings.as_slice()
    }

    /// Directory holding backup records.
    pub fn backup_dir(&self) -> &Path {
        self.backup_dir.as_path()
    }

    fn new_backup(&self) -> BackupRecord {
        BackupRecord::new(&self.backup_dir, self.roots.home())
    }

    /// Link selected packages into the live environment.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Package`] if package patterns are invalid.
    #[instrument(skip(self), level = "debug")]
    pub fn link(&self, patterns: &[String], options: LinkOptions) -> Result<LinkReport> {
        let mut backup = self.new_backup();
        let mut linker = Linker::new(&mut backup, options);
        let mut report = LinkReport::new();
        for mapping in select(&self.mappings, patterns)? {
            report.merge(linker.link(mapping));
        }

        if let Some(record) = backup.path() {
            info!("replaced files were backed up to {:?}", record.display());
        }

        Ok(report)
    }

    /// Remove links of selected packages from the live environment.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Package`] if package patterns are invalid.
    #[instrument(skip(self), level = "debug")]
    pub fn unlink(&self, patterns: &[String]) -> Result<LinkReport> {
        let mut report = LinkReport::new();
        for mapping in select(&self.mappings, patterns)? {
            report.merge(unlink(mapping));
        }

        Ok(report)
    }

    /// Inspect every pair of selected packages.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Package`] if package patterns are invalid.
    pub fn status(&self, patterns: &[String]) -> Result<Vec<PairStatus>> {
        Ok(select(&self.mappings, patterns)?
            .into_iter()
            .flat_map(|mapping| {
                mapping.pairs().iter().map(move |pair| PairStatus {
                    package: mapping.name().to_string(),
                    pair: pair.clone(),
                    state: inspect(pair),
                })
            })
            .collect())
    }

    /// Sync selected packages with the repository's remote.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Package`] if package patterns are invalid.
    /// - Return [`StoreError::Vcs`] if repository cannot be opened, or any
    ///   remote operation fails.
    #[instrument(skip(self, message), level = "debug")]
    pub fn sync(
        &self,
        direction: SyncDirection,
        patterns: &[String],
        message: Option<String>,
        link: LinkOptions,
    ) -> Result<SyncReport> {
        let mappings = select(&self.mappings, patterns)?;
        let repo = GitRepo::open(&self.manifest.settings.repository)?;
        let settings = &self.manifest.settings;
        let options = SyncOptions {
            remote: settings.remote.clone(),
            branch: settings.branch.clone(),
            message: message.unwrap_or_else(|| settings.commit_message().to_string()),
            link,
        };

        let mut backup = self.new_backup();
        Ok(sync(direction, &repo, &mappings, &mut backup, &options)?)
    }

    /// Install every tool of the manifest that is missing.
    pub fn install(&self, runner: &impl Runner) -> Vec<(String, ToolStatus)> {
        ensure_tools(&self.manifest.tools, runner)
    }

    /// Clone dotfile repository into place.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Vcs`] if clone fails.
    pub fn clone_repository(&self, url: &str, branch: Option<&str>) -> Result<GitRepo> {
        let branch = branch.or(self.manifest.settings.branch.as_deref());
        Ok(GitRepo::clone_remote(
            url,
            &self.manifest.settings.repository,
            branch,
        )?)
    }

    /// List backup records, oldest first.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Backup`] if backup directory cannot be read.
    pub fn backups(&self) -> Result<Vec<PathBuf>> {
        Ok(list_records(&self.backup_dir)?)
    }
}

/// Store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Manifest file cannot be read.
    #[error("failed to read manifest at {:?}", path.display())]
    ReadManifest {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Manifest parsing fails.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Package resolution fails.
    #[error(transparent)]
    Package(#[from] crate::package::PackageError),

    /// Home directory cannot be determined.
    #[error(transparent)]
    Path(#[from] crate::path::NoWayHome),

    /// Backup records cannot be listed.
    #[error(transparent)]
    Backup(#[from] crate::backup::BackupError),

    /// Version control operation fails.
    #[error(transparent)]
    Vcs(#[from] crate::vcs::VcsError),
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
