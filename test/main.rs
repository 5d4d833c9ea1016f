// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use dotlink::{config::Manifest, path::LiveRoots, store::Store, vcs::GitRepo};

use anyhow::Result;
use git2::{IndexAddOption, Repository, RepositoryInitOptions, Signature};
use indoc::indoc;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

/// Bare remote seeded with a dotfile repository, shared by every machine.
pub(crate) struct RemoteFixture {
    root: TempDir,
    remote: PathBuf,
}

impl RemoteFixture {
    pub(crate) fn new(files: &[(&str, &str)]) -> Result<Self> {
        let root = TempDir::new()?;
        let remote = root.path().join("remote.git");
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        opts.bare(true);
        Repository::init_opts(&remote, &opts)?;

        let seed = root.path().join("seed");
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(&seed, &opts)?;
        for (path, contents) in files {
            let path = seed.join(path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, contents)?;
        }

        // INVARIANT: Always commit everything in the seed working tree.
        let mut index = repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree = repo.find_tree(index.write_tree()?)?;
        let signature = Signature::now("John Doe", "john@doe.com")?;
        repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            "chore: seed dotfiles",
            &tree,
            &[],
        )?;

        repo.remote("origin", &remote.to_string_lossy())?
            .push(&["refs/heads/main:refs/heads/main"], None)?;

        Ok(Self { root, remote })
    }

    pub(crate) fn url(&self) -> String {
        self.remote.to_string_lossy().into_owned()
    }

    /// Latest commit on the remote's main branch.
    pub(crate) fn head(&self) -> Result<git2::Oid> {
        let repo = Repository::open_bare(&self.remote)?;
        let head = repo.find_reference("refs/heads/main")?.peel_to_commit()?;
        Ok(head.id())
    }

    /// Clone remote into fresh machine, and load manifest for it.
    ///
    /// Every `{home}` in the package listing is replaced with the machine's
    /// home directory.
    pub(crate) fn machine(&self, name: &str, packages: &str) -> Result<MachineFixture> {
        let home = self.root.path().join(name).join("home");
        let backup_dir = self.root.path().join(name).join("backup");
        let repository = home.join(".dotfiles");
        fs::create_dir_all(&home)?;

        GitRepo::clone_remote(self.url(), &repository, Some("main"))?;

        // INVARIANT: Always provide valid name and email.
        //   - Git will complain if this is not set in CI/CD environments.
        let mut config = Repository::open(&repository)?.config()?;
        config.set_str("user.name", "John Doe")?;
        config.set_str("user.email", "john@doe.com")?;

        let manifest = format!(
            "[settings]\nrepository = {:?}\nbranch = \"main\"\n\n{}",
            repository.display().to_string(),
            packages.replace("{home}", &home.display().to_string()),
        )
        .parse::<Manifest>()?;
        let store = Store::new(manifest, LiveRoots::new(&home), &backup_dir)?;

        Ok(MachineFixture {
            home,
            repository,
            store,
        })
    }
}

pub(crate) struct MachineFixture {
    pub(crate) home: PathBuf,
    pub(crate) repository: PathBuf,
    pub(crate) store: Store,
}

impl MachineFixture {
    pub(crate) fn home_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.home.join(path)
    }

    pub(crate) fn repo_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.repository.join(path)
    }

    pub(crate) fn write_home(&self, path: impl AsRef<Path>, contents: &str) -> Result<()> {
        let path = self.home_path(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Commit at tip of the local main branch.
    pub(crate) fn head(&self) -> Result<git2::Oid> {
        let repo = Repository::open(&self.repository)?;
        let head = repo.head()?.peel_to_commit()?;
        Ok(head.id())
    }
}

pub(crate) const ZSHRC: &str = "setopt autocd\n";
pub(crate) const GITCONFIG: &str = "[user]\n\tname = John Doe\n";
pub(crate) const PROFILE: &str = "Set-PSReadLineOption -EditMode Emacs\n";

pub(crate) fn dotfiles() -> Vec<(&'static str, &'static str)> {
    vec![
        ("zsh/.zshrc", ZSHRC),
        ("git/.gitconfig", GITCONFIG),
        ("pwsh/profile.ps1", PROFILE),
    ]
}

pub(crate) const PACKAGES: &str = indoc! {r#"
[[package]]
name = "zsh"

[[package.link]]
source = "zsh/.zshrc"
target = "{home}/.zshrc"

[[package]]
name = "git"

[[package.link]]
source = "git/.gitconfig"
target = "{home}/.gitconfig"

[[package]]
name = "pwsh"

[[package.link]]
source = "pwsh/profile.ps1"
target = "{home}/.config/powershell/profile.ps1"
mode = "copy"
"#};
