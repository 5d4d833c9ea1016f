// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version control collaborator.
//!
//! The dotfile repository is a plain Git repository with a working tree. This
//! module wraps the handful of operations dotlink needs from it through
//! libgit2: clone, pull, add, commit, and push. Pulls are fast-forward only,
//! and use a safe checkout, so local edits that have not been pushed yet are
//! never thrown away. Anything that would need a real merge is surfaced as an
//! error for the user to resolve by hand.

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    Config, ErrorCode, FetchOptions, IndexAddOption, Oid, PushOptions, RemoteCallbacks,
    Repository,
};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument};

/// Result of a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Local branch already contains everything from remote.
    UpToDate,

    /// Local branch was fast-forwarded to new commit.
    FastForward(Oid),
}

/// Dotfile repository with a working tree.
pub struct GitRepo {
    repository: Repository,
}

impl std::fmt::Debug for GitRepo {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("GitRepo")
            .field("path", &self.repository.path())
            .finish()
    }
}

impl GitRepo {
    /// Open existing repository.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Open`] if path is not a Git repository.
    /// - Return [`VcsError::Bare`] if repository has no working tree.
    #[instrument(skip(path), level = "debug")]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        debug!("open repository: {:?}", path.as_ref().display());
        let repository = Repository::open(path.as_ref()).map_err(|source| VcsError::Open {
            source,
            path: path.as_ref().to_path_buf(),
        })?;

        if repository.is_bare() {
            return Err(VcsError::Bare {
                path: path.as_ref().to_path_buf(),
            });
        }

        Ok(Self { repository })
    }

    /// Clone remote repository into path.
    ///
    /// Progress of the clone is displayed through a progress bar. If any
    /// credentials are required, then the user will be prompted for them,
    /// suspending the progress bar while doing so.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::NotEmpty`] if path exists and is not empty.
    /// - Return [`VcsError::Git2`] if libgit2 operations fail.
    #[instrument(skip(url, path), level = "debug")]
    pub fn clone_remote(
        url: impl AsRef<str>,
        path: impl AsRef<Path>,
        branch: Option<&str>,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path
            .read_dir()
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
        {
            return Err(VcsError::NotEmpty {
                path: path.to_path_buf(),
            });
        }

        info!("clone {} into {:?}", url.as_ref(), path.display());
        let transfer = Transfer::start(url.as_ref())?;
        let config = Config::open_default()?;

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(transfer.callbacks(&config));
        let mut builder = RepoBuilder::new();
        builder.fetch_options(fo);
        if let Some(branch) = branch {
            builder.branch(branch);
        }
        let repository = builder.clone(url.as_ref(), path);
        transfer.finish();

        Ok(Self {
            repository: repository?,
        })
    }

    /// Path to working tree.
    pub fn workdir(&self) -> &Path {
        // INVARIANT: Construction rejects bare repositories.
        self.repository.workdir().unwrap_or(self.repository.path())
    }

    /// Name of currently checked out branch.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::DetachedHead`] if HEAD is not a branch.
    pub fn current_branch(&self) -> Result<String> {
        let head = self.repository.head()?;
        if !head.is_branch() {
            return Err(VcsError::DetachedHead);
        }

        head.shorthand()
            .map(ToString::to_string)
            .ok_or(VcsError::DetachedHead)
    }

    /// Stage every change in working tree, including deletions.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Git2`] if libgit2 operations fail.
    pub fn stage_all(&self) -> Result<()> {
        let mut index = self.repository.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"], None)?;
        index.write()?;

        Ok(())
    }

    /// Check if staged index differs from HEAD.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Git2`] if libgit2 operations fail.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let mut index = self.repository.index()?;
        let staged = index.write_tree()?;
        match self.repository.head() {
            Ok(head) => Ok(head.peel_to_tree()?.id() != staged),
            Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                Ok(!index.is_empty())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Commit staged index onto HEAD.
    ///
    /// Author and committer come from the user's Git configuration.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self), level = "debug")]
    pub fn commit(&self, message: &str) -> Result<Oid> {
        let mut index = self.repository.index()?;
        let tree = self.repository.find_tree(index.write_tree()?)?;
        let signature = self.repository.signature()?;
        let parent = match self.repository.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        let parents = parent.iter().collect::<Vec<_>>();

        let oid = self.repository.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;
        info!("created commit {oid}");

        Ok(oid)
    }

    /// Push local branch to remote.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Rejected`] if remote refuses the update.
    /// - Return [`VcsError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self), level = "debug")]
    pub fn push(&self, remote: &str, branch: &str) -> Result<()> {
        // INVARIANT: Rejection slot must outlive the callbacks borrowing it.
        let rejection = RefCell::new(None::<String>);
        let transfer = Transfer::start(&format!("push {remote}/{branch}"))?;
        let config = self.repository.config()?;

        let mut rc = transfer.callbacks(&config);
        rc.push_update_reference(|refname, status| {
            if let Some(message) = status {
                *rejection.borrow_mut() = Some(format!("{refname}: {message}"));
            }
            Ok(())
        });

        let mut po = PushOptions::new();
        po.remote_callbacks(rc);
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let result = self
            .repository
            .find_remote(remote)
            .and_then(|mut handle| handle.push(&[refspec.as_str()], Some(&mut po)));
        transfer.finish();
        result?;

        if let Some(message) = rejection.take() {
            return Err(VcsError::Rejected { message });
        }
        info!("pushed {branch} to {remote}");

        Ok(())
    }

    /// Fetch branch from remote and fast-forward local branch onto it.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Diverged`] if a fast-forward is impossible.
    /// - Return [`VcsError::Git2`] if libgit2 operations fail, including
    ///   checkout conflicts with uncommitted local edits.
    #[instrument(skip(self), level = "debug")]
    pub fn pull(&self, remote: &str, branch: &str) -> Result<PullOutcome> {
        let transfer = Transfer::start(&format!("fetch {remote}/{branch}"))?;
        let config = self.repository.config()?;

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(transfer.callbacks(&config));
        let result = self
            .repository
            .find_remote(remote)
            .and_then(|mut handle| handle.fetch(&[branch], Some(&mut fo), None));
        transfer.finish();
        result?;

        let fetch_head = self.repository.find_reference("FETCH_HEAD")?;
        let incoming = self.repository.reference_to_annotated_commit(&fetch_head)?;
        let (analysis, _) = self.repository.merge_analysis(&[&incoming])?;

        if analysis.is_up_to_date() {
            info!("{branch} is up to date with {remote}");
            return Ok(PullOutcome::UpToDate);
        }

        if !analysis.is_fast_forward() && !analysis.is_unborn() {
            return Err(VcsError::Diverged {
                branch: branch.to_string(),
            });
        }

        // INVARIANT: Check out before moving the branch, so a checkout
        // conflict leaves the branch where it was.
        let target = self.repository.find_object(incoming.id(), None)?;
        self.repository
            .checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;

        let refname = format!("refs/heads/{branch}");
        let reflog = format!("dotlink: fast-forward {branch}");
        match self.repository.find_reference(&refname) {
            Ok(mut reference) => {
                reference.set_target(incoming.id(), &reflog)?;
            }
            Err(_) => {
                self.repository
                    .reference(&refname, incoming.id(), true, &reflog)?;
            }
        }
        self.repository.set_head(&refname)?;
        info!("fast-forwarded {branch} to {}", incoming.id());

        Ok(PullOutcome::FastForward(incoming.id()))
    }
}

/// Progress display and credentials for a single remote operation.
///
/// Credential prompts suspend the progress bar while they wait for input.
struct Transfer {
    bar: ProgressBar,
    authenticator: GitAuthenticator,
}

impl Transfer {
    fn start(message: &str) -> Result<Self> {
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        let bar = ProgressBar::new(0)
            .with_style(style)
            .with_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        let authenticator = GitAuthenticator::default().set_prompter(BarPrompter {
            bar: bar.clone(),
        });

        Ok(Self { bar, authenticator })
    }

    /// Callbacks that authenticate and report fetch or push progress.
    fn callbacks<'a>(&'a self, config: &'a Config) -> RemoteCallbacks<'a> {
        let bar = &self.bar;
        let mut redrawn = Instant::now();
        let mut rc = RemoteCallbacks::new();
        rc.credentials(self.authenticator.credentials(config));
        rc.transfer_progress(move |stats| {
            // INVARIANT: Redraw at most once every 10ms.
            if redrawn.elapsed() >= Duration::from_millis(10) {
                redrawn = Instant::now();
                bar.set_length(stats.total_objects() as u64);
                bar.set_position(stats.received_objects() as u64);
            }
            true
        });
        rc.push_transfer_progress(move |current, total, _| {
            bar.set_length(total as u64);
            bar.set_position(current as u64);
        });

        rc
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Ask for credentials on the terminal, hiding progress while doing so.
#[derive(Debug, Clone)]
struct BarPrompter {
    bar: ProgressBar,
}

impl BarPrompter {
    fn secret(&self, label: &str) -> Option<String> {
        self.bar.suspend(|| {
            Password::new(label)
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

impl Prompter for BarPrompter {
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        debug!("credentials requested by {url}");
        let username = self
            .bar
            .suspend(|| Text::new("username:").with_help_message(url).prompt().ok())?;
        let password = self.secret("password:")?;

        Some((username, password))
    }

    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        debug!("password requested by {url}");
        self.secret(&format!("password for {username}:"))
    }

    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        self.secret(&format!("passphrase for {}:", ssh_key_path.display()))
    }
}

/// Version control error types.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Path is not a Git repository.
    #[error("failed to open repository at {:?}", path.display())]
    Open {
        #[source]
        source: git2::Error,
        path: PathBuf,
    },

    /// Repository has no working tree to link from.
    #[error("repository at {:?} is bare", path.display())]
    Bare { path: PathBuf },

    /// Clone destination already has content.
    #[error("cannot clone into non-empty directory {:?}", path.display())]
    NotEmpty { path: PathBuf },

    /// HEAD does not point at a branch.
    #[error("repository HEAD is detached; check out a branch or set one in the manifest")]
    DetachedHead,

    /// Local and remote branches have both moved.
    #[error("branch {branch:?} has diverged from remote; merge or rebase by hand")]
    Diverged { branch: String },

    /// Remote refused pushed update.
    #[error("remote rejected push: {message}")]
    Rejected { message: String },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = VcsError> = std::result::Result<T, E>;
