// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Link deployment logic.
//!
//! Deploy package mappings into the live environment, and take them back out
//! again. Every target goes through the same small state machine:
//!
//! ```text
//! Untracked --link--> Linked --unlink--> Untracked
//! ```
//!
//! Linking is idempotent. Anything that stands in the way of a new link is
//! copied into the current [`BackupRecord`] before it is removed, so user data
//! is never destroyed silently. Failures are scoped to the single pair being
//! processed; the rest of the batch still runs, and every pair ends up in a
//! [`LinkReport`].

use crate::{
    backup::BackupRecord,
    fsops::{copy_entry, metadata, remove_entry, same_content, symlink},
    package::{LinkMode, LinkPair, PackageMapping},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Knobs for linking.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// Refuse to replace anything that already exists at a target.
    pub no_clobber: bool,
}

/// What happened to a single pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Target was deployed, replacing whatever was backed up (if anything).
    Linked { backup: Option<PathBuf> },

    /// Target was already deployed.
    AlreadyLinked,

    /// Target was removed from the live environment.
    Unlinked,

    /// Live content was copied back into the repository.
    Captured,

    /// Live and repository content are already the same.
    Unchanged,

    /// Pair was left alone.
    Skipped { reason: String },
}

impl Display for Action {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Linked { backup: Some(backup) } => {
                write!(fmt, "linked (backup at {})", backup.display())
            }
            Self::Linked { backup: None } => fmt.write_str("linked"),
            Self::AlreadyLinked => fmt.write_str("already linked"),
            Self::Unlinked => fmt.write_str("unlinked"),
            Self::Captured => fmt.write_str("captured into repository"),
            Self::Unchanged => fmt.write_str("unchanged"),
            Self::Skipped { reason } => write!(fmt, "skipped: {reason}"),
        }
    }
}

/// Outcome of a single pair in a batch.
#[derive(Debug)]
pub struct Outcome {
    /// Package the pair belongs to.
    pub package: String,

    /// Target of the pair.
    pub target: PathBuf,

    /// Action taken, or reason for failure.
    pub result: Result<Action>,
}

/// Report of a batch of pairs.
#[derive(Debug, Default)]
pub struct LinkReport {
    outcomes: Vec<Outcome>,
}

impl LinkReport {
    /// Construct new empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record outcome of a pair.
    pub fn record(
        &mut self,
        package: impl Into<String>,
        target: impl Into<PathBuf>,
        result: Result<Action>,
    ) {
        self.outcomes.push(Outcome {
            package: package.into(),
            target: target.into(),
            result,
        });
    }

    /// Append all outcomes of another report.
    pub fn merge(&mut self, other: LinkReport) {
        self.outcomes.extend(other.outcomes);
    }

    /// All outcomes in processing order.
    pub fn outcomes(&self) -> &[Outcome] {
        self.outcomes.as_slice()
    }

    /// Outcomes that failed.
    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err())
    }

    /// Check that no pair failed.
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Observed state of a target in the live environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetState {
    /// Target is deployed.
    Linked,

    /// Nothing exists at target.
    Untracked,

    /// Target is a symlink that points somewhere else.
    Conflict { points_to: PathBuf },

    /// Something other than a symlink occupies target.
    Blocked,

    /// Target is a copy that no longer matches its source.
    Stale,

    /// Source does not exist in the repository.
    MissingSource,
}

impl Display for TargetState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Linked => fmt.write_str("linked"),
            Self::Untracked => fmt.write_str("untracked"),
            Self::Conflict { points_to } => write!(fmt, "conflict -> {}", points_to.display()),
            Self::Blocked => fmt.write_str("blocked"),
            Self::Stale => fmt.write_str("stale"),
            Self::MissingSource => fmt.write_str("missing source"),
        }
    }
}

/// Deploy package mappings into the live environment.
///
/// Holds the backup record of the current run, so every replaced target of a
/// run lands in the same record.
#[derive(Debug)]
pub struct Linker<'a> {
    backup: &'a mut BackupRecord,
    options: LinkOptions,
}

impl<'a> Linker<'a> {
    /// Construct new linker.
    pub fn new(backup: &'a mut BackupRecord, options: LinkOptions) -> Self {
        Self { backup, options }
    }

    /// Link every pair of package mapping.
    ///
    /// Never aborts early. Each pair gets its own outcome in the report.
    #[instrument(skip(self, mapping), fields(package = mapping.name()), level = "debug")]
    pub fn link(&mut self, mapping: &PackageMapping) -> LinkReport {
        let mut report = LinkReport::new();
        for pair in mapping.pairs() {
            let result = self.link_pair(pair);
            match &result {
                Ok(action) => info!("{}: {} {action}", mapping.name(), pair.target.display()),
                Err(error) => warn!("{}: {error}", mapping.name()),
            }
            report.record(mapping.name(), &pair.target, result);
        }

        report
    }

    /// Link a single pair.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::MissingSource`] if source does not exist.
    /// - Return [`LinkError::Conflict`] or [`LinkError::Blocked`] if target is
    ///   occupied and clobbering is disabled.
    /// - Return [`LinkError::Backup`] if target cannot be backed up.
    /// - Return [`LinkError::Io`] if target cannot be replaced.
    pub fn link_pair(&mut self, pair: &LinkPair) -> Result<Action> {
        let LinkPair { source, target, mode } = pair;
        if metadata(source).map_err(|err| LinkError::io(err, source))?.is_none() {
            return Err(LinkError::MissingSource {
                source_path: source.clone(),
            });
        }

        match inspect(pair)? {
            TargetState::Linked => return Ok(Action::AlreadyLinked),
            TargetState::Untracked => {}
            TargetState::Conflict { points_to } => {
                warn!(
                    "{:?} points to {:?} instead of {:?}",
                    target.display(),
                    points_to.display(),
                    source.display()
                );
                if self.options.no_clobber {
                    return Err(LinkError::Conflict {
                        target: target.clone(),
                        points_to,
                    });
                }
            }
            TargetState::Blocked | TargetState::Stale if self.options.no_clobber => {
                return Err(LinkError::Blocked {
                    target: target.clone(),
                });
            }
            TargetState::Blocked | TargetState::Stale | TargetState::MissingSource => {}
        }

        let mut backup = None;
        if metadata(target).map_err(|err| LinkError::io(err, target))?.is_some() {
            backup = Some(self.backup.preserve(target)?);
            remove_entry(target).map_err(|err| LinkError::io(err, target))?;
        }

        if let Some(parent) = target.parent() {
            mkdirp::mkdirp(parent).map_err(|err| LinkError::io(err, parent))?;
        }

        let deployed = match mode {
            LinkMode::Symlink => symlink(source, target),
            LinkMode::Copy => copy_entry(source, target),
        };
        deployed.map_err(|err| LinkError::io(err, target))?;
        debug!("{mode} {:?} -> {:?}", target.display(), source.display());

        Ok(Action::Linked { backup })
    }
}

/// Remove deployed targets of package mapping.
///
/// Only removes targets that are still exactly what linking created: symlinks
/// resolving to their source, or copies identical to their source. Anything
/// else is reported as skipped and left alone. Backups are not restored.
#[instrument(skip(mapping), fields(package = mapping.name()), level = "debug")]
pub fn unlink(mapping: &PackageMapping) -> LinkReport {
    let mut report = LinkReport::new();
    for pair in mapping.pairs() {
        let result = unlink_pair(pair);
        match &result {
            Ok(action) => info!("{}: {} {action}", mapping.name(), pair.target.display()),
            Err(error) => warn!("{}: {error}", mapping.name()),
        }
        report.record(mapping.name(), &pair.target, result);
    }

    report
}

fn unlink_pair(pair: &LinkPair) -> Result<Action> {
    let reason = match inspect(pair)? {
        TargetState::Linked => {
            remove_entry(&pair.target).map_err(|err| LinkError::io(err, &pair.target))?;
            return Ok(Action::Unlinked);
        }
        TargetState::Untracked => "not deployed".to_string(),
        TargetState::Conflict { points_to } => format!("points to {}", points_to.display()),
        TargetState::Blocked => "not created by dotlink".to_string(),
        TargetState::Stale => "copy differs from source".to_string(),
        TargetState::MissingSource => "source is missing".to_string(),
    };

    Ok(Action::Skipped { reason })
}

/// Check if target is a symlink that does not resolve to expected source.
///
/// Dangling symlinks are compared by link text. Returns false when target
/// does not exist, or is not a symlink at all.
pub fn detect_conflict(target: impl AsRef<Path>, source: impl AsRef<Path>) -> bool {
    matches!(
        symlink_resolves_to(target.as_ref(), source.as_ref()),
        Ok(Some(false))
    )
}

/// Determine current state of pair in the live environment.
///
/// # Errors
///
/// - Return [`LinkError::Io`] if target or source cannot be inspected.
pub fn inspect(pair: &LinkPair) -> Result<TargetState> {
    let LinkPair { source, target, mode } = pair;
    let Some(meta) = metadata(target).map_err(|err| LinkError::io(err, target))? else {
        return Ok(TargetState::Untracked);
    };

    if meta.file_type().is_symlink() {
        let resolves =
            symlink_resolves_to(target, source).map_err(|err| LinkError::io(err, target))?;
        return match resolves {
            Some(true) if *mode == LinkMode::Symlink => Ok(TargetState::Linked),
            Some(true) => Ok(TargetState::Blocked),
            _ => Ok(TargetState::Conflict {
                points_to: fs::read_link(target).map_err(|err| LinkError::io(err, target))?,
            }),
        };
    }

    if metadata(source).map_err(|err| LinkError::io(err, source))?.is_none() {
        return Ok(TargetState::MissingSource);
    }

    if *mode == LinkMode::Symlink {
        return Ok(TargetState::Blocked);
    }

    if same_content(source, target).map_err(|err| LinkError::io(err, target))? {
        Ok(TargetState::Linked)
    } else {
        Ok(TargetState::Stale)
    }
}

/// Check where symlink at target resolves to.
///
/// Returns `None` if target is missing or not a symlink.
pub(crate) fn symlink_resolves_to(target: &Path, source: &Path) -> std::io::Result<Option<bool>> {
    match metadata(target)? {
        Some(meta) if meta.file_type().is_symlink() => {}
        _ => return Ok(None),
    }

    let link_text = fs::read_link(target)?;
    let resolved = match target.parent() {
        Some(parent) if link_text.is_relative() => parent.join(&link_text),
        _ => link_text,
    };

    if resolved == source {
        return Ok(Some(true));
    }

    // INVARIANT: Lexical mismatch can still be the same file through symlinked
    // parent directories, so compare canonical forms when both exist.
    match (fs::canonicalize(&resolved), fs::canonicalize(source)) {
        (Ok(left), Ok(right)) => Ok(Some(left == right)),
        _ => Ok(Some(false)),
    }
}

/// Link error types.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Source is missing from repository.
    #[error("source {:?} does not exist", source_path.display())]
    MissingSource { source_path: PathBuf },

    /// Target is a symlink to somewhere else.
    #[error("{:?} is linked to {:?}", target.display(), points_to.display())]
    Conflict { target: PathBuf, points_to: PathBuf },

    /// Target is occupied by something that was not deployed by us.
    #[error("{:?} is in the way", target.display())]
    Blocked { target: PathBuf },

    /// Target could not be backed up.
    #[error(transparent)]
    Backup(#[from] crate::backup::BackupError),

    /// File system operation fails.
    #[error("file system operation failed at {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl LinkError {
    pub(crate) fn io(source: std::io::Error, path: impl AsRef<Path>) -> Self {
        Self::Io {
            source,
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Check if error is a link conflict rather than an I/O failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Blocked { .. })
    }
}

/// Friendly result alias :3
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Sandbox {
        _tmp: TempDir,
        repo: PathBuf,
        home: PathBuf,
        backup: BackupRecord,
    }

    impl Sandbox {
        fn new() -> anyhow::Result<Self> {
            let tmp = TempDir::new()?;
            let repo = tmp.path().join("repo");
            let home = tmp.path().join("home");
            fs::create_dir_all(&repo)?;
            fs::create_dir_all(&home)?;
            let backup = BackupRecord::new(tmp.path().join("backup"), &home);

            Ok(Self {
                _tmp: tmp,
                repo,
                home,
                backup,
            })
        }

        fn source(&self, relative: &str, contents: &str) -> anyhow::Result<PathBuf> {
            let path = self.repo.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents)?;
            Ok(path)
        }
    }

    #[test]
    fn link_backs_up_existing_file() -> anyhow::Result<()> {
        let mut sandbox = Sandbox::new()?;
        let source = sandbox.source("zsh/.zshrc", "export EDITOR=nvim")?;
        let target = sandbox.home.join(".zshrc");
        fs::write(&target, "alias ll='ls -la'")?;

        let mapping = PackageMapping::new("zsh", [LinkPair::new(&source, &target)]);
        let report = Linker::new(&mut sandbox.backup, LinkOptions::default()).link(&mapping);
        assert!(report.is_success());

        assert_eq!(fs::read_link(&target)?, source);
        let record = sandbox.backup.path().map(Path::to_path_buf);
        let record = record.ok_or_else(|| anyhow::anyhow!("no backup record"))?;
        assert_eq!(fs::read_to_string(record.join(".zshrc"))?, "alias ll='ls -la'");

        Ok(())
    }

    #[test]
    fn link_twice_is_idempotent() -> anyhow::Result<()> {
        let mut sandbox = Sandbox::new()?;
        let source = sandbox.source("tmux/.tmux.conf", "set -g mouse on")?;
        let target = sandbox.home.join(".config/tmux/tmux.conf");
        let pair = LinkPair::new(&source, &target);

        let mut linker = Linker::new(&mut sandbox.backup, LinkOptions::default());
        assert_eq!(linker.link_pair(&pair)?, Action::Linked { backup: None });
        assert_eq!(linker.link_pair(&pair)?, Action::AlreadyLinked);
        assert_eq!(fs::read_link(&target)?, source);
        assert_eq!(sandbox.backup.path(), None);

        Ok(())
    }

    #[test]
    fn link_missing_source_does_not_abort_batch() -> anyhow::Result<()> {
        let mut sandbox = Sandbox::new()?;
        let present = sandbox.source("ranger/rc.conf", "set preview_images true")?;
        let mapping = PackageMapping::new(
            "ranger",
            [
                LinkPair::new(sandbox.repo.join("ranger/missing"), sandbox.home.join(".missing")),
                LinkPair::new(&present, sandbox.home.join(".config/ranger/rc.conf")),
            ],
        );

        let report = Linker::new(&mut sandbox.backup, LinkOptions::default()).link(&mapping);
        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 1);
        assert!(matches!(
            report.outcomes()[0].result,
            Err(LinkError::MissingSource { .. })
        ));
        assert_eq!(
            fs::read_link(sandbox.home.join(".config/ranger/rc.conf"))?,
            present
        );

        Ok(())
    }

    #[test]
    fn link_relinks_conflicting_symlink_unless_no_clobber() -> anyhow::Result<()> {
        let mut sandbox = Sandbox::new()?;
        let source = sandbox.source("starship/starship.toml", "add_newline = false")?;
        let elsewhere = sandbox.source("old/starship.toml", "add_newline = true")?;
        let target = sandbox.home.join(".config/starship.toml");
        fs::create_dir_all(sandbox.home.join(".config"))?;
        symlink(&elsewhere, &target)?;
        assert!(detect_conflict(&target, &source));

        let pair = LinkPair::new(&source, &target);
        let strict = LinkOptions { no_clobber: true };
        let result = Linker::new(&mut sandbox.backup, strict).link_pair(&pair);
        assert!(matches!(result, Err(LinkError::Conflict { .. })));
        assert_eq!(fs::read_link(&target)?, elsewhere);

        let action = Linker::new(&mut sandbox.backup, LinkOptions::default()).link_pair(&pair)?;
        assert!(matches!(action, Action::Linked { backup: Some(_) }));
        assert_eq!(fs::read_link(&target)?, source);
        assert!(!detect_conflict(&target, &source));

        Ok(())
    }

    #[test]
    fn detect_conflict_only_for_foreign_symlinks() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let source = sandbox.source("zsh/.zshrc", "")?;

        let missing = sandbox.home.join(".missing");
        assert!(!detect_conflict(&missing, &source));

        let regular = sandbox.home.join(".regular");
        fs::write(&regular, "")?;
        assert!(!detect_conflict(&regular, &source));

        let relative = sandbox.home.join(".relative");
        symlink(Path::new("../repo/zsh/.zshrc"), &relative)?;
        assert!(!detect_conflict(&relative, &source));

        let dangling = sandbox.home.join(".dangling");
        symlink(Path::new("/nowhere/at/all"), &dangling)?;
        assert!(detect_conflict(&dangling, &source));

        Ok(())
    }

    #[test]
    fn copy_mode_refreshes_stale_copies() -> anyhow::Result<()> {
        let mut sandbox = Sandbox::new()?;
        let source = sandbox.source("pwsh/profile.ps1", "Set-PSReadLineOption -EditMode Vi")?;
        let target = sandbox.home.join(".config/powershell/profile.ps1");
        let pair = LinkPair::new(&source, &target).with_mode(LinkMode::Copy);

        let mut linker = Linker::new(&mut sandbox.backup, LinkOptions::default());
        assert_eq!(linker.link_pair(&pair)?, Action::Linked { backup: None });
        assert_eq!(linker.link_pair(&pair)?, Action::AlreadyLinked);

        fs::write(&source, "Set-PSReadLineOption -EditMode Emacs")?;
        assert_eq!(inspect(&pair)?, TargetState::Stale);
        assert!(matches!(linker.link_pair(&pair)?, Action::Linked { backup: Some(_) }));
        assert_eq!(
            fs::read_to_string(&target)?,
            "Set-PSReadLineOption -EditMode Emacs"
        );
        assert!(!fs::symlink_metadata(&target)?.file_type().is_symlink());

        Ok(())
    }

    #[test]
    fn unlink_removes_only_own_links() -> anyhow::Result<()> {
        let mut sandbox = Sandbox::new()?;
        let zshrc = sandbox.source("zsh/.zshrc", "")?;
        let zshenv = sandbox.source("zsh/.zshenv", "")?;
        let other = sandbox.source("other/.zshenv", "")?;
        let mapping = PackageMapping::new(
            "zsh",
            [
                LinkPair::new(&zshrc, sandbox.home.join(".zshrc")),
                LinkPair::new(&zshenv, sandbox.home.join(".zshenv")),
            ],
        );

        let report = Linker::new(&mut sandbox.backup, LinkOptions::default()).link(&mapping);
        assert!(report.is_success());

        // Replace one link with something we did not create.
        fs::remove_file(sandbox.home.join(".zshenv"))?;
        symlink(&other, &sandbox.home.join(".zshenv"))?;
        let unrelated = sandbox.home.join(".bashrc");
        symlink(&zshrc, &unrelated)?;

        let report = unlink(&mapping);
        assert!(report.is_success());
        assert_eq!(report.outcomes()[0].result.as_ref().ok(), Some(&Action::Unlinked));
        assert!(matches!(
            report.outcomes()[1].result,
            Ok(Action::Skipped { .. })
        ));
        assert!(!sandbox.home.join(".zshrc").exists());
        assert_eq!(fs::read_link(sandbox.home.join(".zshenv"))?, other);
        assert_eq!(fs::read_link(&unrelated)?, zshrc);
        assert!(zshrc.exists());

        Ok(())
    }
}
