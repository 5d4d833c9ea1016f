// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Machine to machine synchronization.
//!
//! Syncing mirrors content between the live environment and the dotfile
//! repository, then exchanges commits with the remote:
//!
//! - __Push__ captures live content into the repository, commits it, and
//!   pushes. Symlinked targets share storage with the repository, so only
//!   plain copies ever need capturing.
//! - __Pull__ fast-forwards the repository from the remote, then links every
//!   mapping again so copies are refreshed and new links are created.
//!
//! Package filters only limit which pairs are captured or relinked. A push
//! stages and commits the whole working tree of the repository, including
//! edits that belong to packages outside the filter.
//!
//! Nothing is committed when the repository has no changes, but the branch is
//! still pushed, so a commit stranded by an earlier failed push goes out on
//! the next one. File system failures stay scoped to their pair, but a
//! failing remote operation aborts the sync where it happened. Commits and
//! copies that were already made stay in place.

use crate::{
    backup::BackupRecord,
    fsops::{copy_entry, metadata, remove_entry, same_content},
    link::{symlink_resolves_to, Action, LinkError, LinkOptions, LinkReport, Linker},
    package::{LinkPair, PackageMapping},
    vcs::{GitRepo, PullOutcome, VcsError},
};

use git2::Oid;
use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::{info, instrument, warn};

/// Direction of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Live environment into repository, then to remote.
    Push,

    /// Remote into repository, then into live environment.
    Pull,
}

impl Display for SyncDirection {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Push => fmt.write_str("push"),
            Self::Pull => fmt.write_str("pull"),
        }
    }
}

/// Knobs for syncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Remote to exchange commits with.
    pub remote: String,

    /// Branch to sync. Uses the currently checked out branch if unset.
    pub branch: Option<String>,

    /// Commit message for pushes.
    pub message: String,

    /// Options for relinking after pulls.
    pub link: LinkOptions,
}

/// Report of a sync.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Outcome of every pair that was captured or relinked.
    pub files: LinkReport,

    /// Commit created by a push, if there was anything to commit.
    pub commit: Option<Oid>,

    /// Result of fetching from remote on a pull.
    pub pulled: Option<PullOutcome>,
}

impl SyncReport {
    /// Check that no pair failed.
    pub fn is_success(&self) -> bool {
        self.files.is_success()
    }
}

/// Synchronize mappings with the repository in given direction.
///
/// # Errors
///
/// - Return [`VcsError`] if any version control operation fails. Pair level
///   failures end up in the returned report instead.
#[instrument(skip(repo, mappings, backup, options), level = "debug")]
pub fn sync(
    direction: SyncDirection,
    repo: &GitRepo,
    mappings: &[&PackageMapping],
    backup: &mut BackupRecord,
    options: &SyncOptions,
) -> Result<SyncReport, VcsError> {
    let branch = match &options.branch {
        Some(branch) => branch.clone(),
        None => repo.current_branch()?,
    };

    match direction {
        SyncDirection::Push => push(repo, mappings, &branch, options),
        SyncDirection::Pull => pull(repo, mappings, backup, &branch, options),
    }
}

fn push(
    repo: &GitRepo,
    mappings: &[&PackageMapping],
    branch: &str,
    options: &SyncOptions,
) -> Result<SyncReport, VcsError> {
    let mut report = SyncReport::default();
    for mapping in mappings {
        for pair in mapping.pairs() {
            let result = capture_pair(pair);
            match &result {
                Ok(action) => info!("{}: {} {action}", mapping.name(), pair.target.display()),
                Err(error) => warn!("{}: {error}", mapping.name()),
            }
            report.files.record(mapping.name(), &pair.target, result);
        }
    }

    repo.stage_all()?;
    if repo.has_staged_changes()? {
        report.commit = Some(repo.commit(&options.message)?);
    } else {
        info!("nothing new to commit");
    }

    // INVARIANT: Always push, so commits left behind by a failed push still
    // reach the remote on the next run.
    repo.push(&options.remote, branch)?;

    Ok(report)
}

fn pull(
    repo: &GitRepo,
    mappings: &[&PackageMapping],
    backup: &mut BackupRecord,
    branch: &str,
    options: &SyncOptions,
) -> Result<SyncReport, VcsError> {
    let mut report = SyncReport {
        pulled: Some(repo.pull(&options.remote, branch)?),
        ..Default::default()
    };

    let mut linker = Linker::new(backup, options.link);
    for mapping in mappings {
        report.files.merge(linker.link(mapping));
    }

    Ok(report)
}

/// Copy live content of target back over its source.
///
/// Targets that are symlinks to their source already share storage with the
/// repository, so there is nothing to copy.
fn capture_pair(pair: &LinkPair) -> Result<Action, LinkError> {
    let LinkPair { source, target, .. } = pair;
    match symlink_resolves_to(target, source).map_err(|err| LinkError::io(err, target))? {
        Some(true) => return Ok(Action::Unchanged),
        Some(false) => {
            return Err(LinkError::Conflict {
                target: target.clone(),
                points_to: std::fs::read_link(target).map_err(|err| LinkError::io(err, target))?,
            })
        }
        None => {}
    }

    if metadata(target).map_err(|err| LinkError::io(err, target))?.is_none() {
        return Ok(Action::Skipped {
            reason: "not deployed".into(),
        });
    }

    if same_content(target, source).map_err(|err| LinkError::io(err, target))? {
        return Ok(Action::Unchanged);
    }

    if metadata(source).map_err(|err| LinkError::io(err, source))?.is_some() {
        remove_entry(source).map_err(|err| LinkError::io(err, source))?;
    }
    if let Some(parent) = source.parent() {
        mkdirp::mkdirp(parent).map_err(|err| LinkError::io(err, parent))?;
    }
    copy_entry(target, source).map_err(|err| LinkError::io(err, source))?;

    Ok(Action::Captured)
}
