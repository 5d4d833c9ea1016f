// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the manifest file that dotlink reads to know what
//! packages exist, where their files live in the repository, and where they
//! should be linked to in the live environment. File I/O is left to the
//! caller to figure out.

use crate::{install::Tool, package::LinkMode};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
};

/// Default commit message used for pushing live changes.
pub const DEFAULT_COMMIT_MESSAGE: &str = "chore: sync dotfiles";

/// Manifest layout.
///
/// The manifest is a simple configuration file that is edited by hand. It is
/// composed of three parts: settings, packages, and tools. The settings
/// section points at the dotfile repository and determines how it is synced.
/// Each package is a named group of links from the repository into the live
/// environment. Each tool is a program that should be installed if it is
/// missing.
///
/// # General Layout
///
/// ```toml
/// [settings]
/// repository = "~/.dotfiles"
///
/// [[package]]
/// name = "zsh"
///
/// [[package.link]]
/// source = "zsh/.zshrc"
/// target = "~/.zshrc"
///
/// [[tool]]
/// name = "ripgrep"
/// check = ["rg", "--version"]
/// install = ["brew", "install", "ripgrep"]
/// ```
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Manifest {
    /// Settings for the dotfile repository.
    pub settings: Settings,

    /// Packages of links to manage.
    #[serde(rename = "package", default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<PackageEntry>,

    /// Tools to install when missing.
    #[serde(rename = "tool", default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

impl FromStr for Manifest {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut manifest: Manifest = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path that refers to the
        // live environment.
        manifest.settings.repository = expand(&manifest.settings.repository)?;
        manifest.settings.backup_dir = manifest
            .settings
            .backup_dir
            .as_deref()
            .map(expand)
            .transpose()?;
        for package in &mut manifest.packages {
            for link in &mut package.links {
                link.target = expand(&link.target)?;
            }
        }

        Ok(manifest)
    }
}

impl Display for Manifest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand(path: &std::path::Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Repository settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Working tree of the dotfile repository.
    pub repository: PathBuf,

    /// Name of remote to sync with.
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Branch to sync. Uses the currently checked out branch if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Directory to place backup records in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,

    /// Commit message used when pushing live changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
}

impl Settings {
    /// Commit message to use when the caller does not supply one.
    pub fn commit_message(&self) -> &str {
        self.commit_message
            .as_deref()
            .unwrap_or(DEFAULT_COMMIT_MESSAGE)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repository: PathBuf::new(),
            remote: default_remote(),
            branch: None,
            backup_dir: None,
            commit_message: None,
        }
    }
}

fn default_remote() -> String {
    "origin".into()
}

/// Package entry.
///
/// Named group of links that are managed together as a unit.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PackageEntry {
    /// Unique name of package.
    pub name: String,

    /// Links that belong to the package.
    #[serde(rename = "link", default)]
    pub links: Vec<LinkEntry>,
}

/// Single link of a package.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct LinkEntry {
    /// Path relative to the repository root.
    pub source: PathBuf,

    /// Path in the live environment.
    pub target: PathBuf,

    /// How the target gets deployed.
    #[serde(default)]
    pub mode: LinkMode,
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("BLAH", "/home/blah")])]
    fn deserialize_manifest() -> anyhow::Result<()> {
        let result: Manifest = indoc! {r#"
            [settings]
            repository = "$BLAH/.dotfiles"
            branch = "main"

            [[package]]
            name = "zsh"

            [[package.link]]
            source = "zsh/.zshrc"
            target = "$BLAH/.zshrc"

            [[package.link]]
            source = "zsh/.zshenv"
            target = "$BLAH/.zshenv"
            mode = "copy"

            [[tool]]
            name = "ripgrep"
            check = ["rg", "--version"]
            install = ["brew", "install", "ripgrep"]
        "#}
        .parse()?;

        let expect = Manifest {
            settings: Settings {
                repository: "/home/blah/.dotfiles".into(),
                remote: "origin".into(),
                branch: Some("main".into()),
                backup_dir: None,
                commit_message: None,
            },
            packages: vec![PackageEntry {
                name: "zsh".into(),
                links: vec![
                    LinkEntry {
                        source: "zsh/.zshrc".into(),
                        target: "/home/blah/.zshrc".into(),
                        mode: LinkMode::Symlink,
                    },
                    LinkEntry {
                        source: "zsh/.zshenv".into(),
                        target: "/home/blah/.zshenv".into(),
                        mode: LinkMode::Copy,
                    },
                ],
            }],
            tools: vec![Tool {
                name: "ripgrep".into(),
                check: vec!["rg".into(), "--version".into()],
                install: vec!["brew".into(), "install".into(), "ripgrep".into()],
            }],
        };

        assert_eq!(result, expect);
        assert_eq!(result.settings.commit_message(), DEFAULT_COMMIT_MESSAGE);

        Ok(())
    }

    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn deserialize_manifest_expands_tilde() -> anyhow::Result<()> {
        let result: Manifest = indoc! {r#"
            [settings]
            repository = "~/.dotfiles"
            backup_dir = "~/.dotfiles-backup"
        "#}
        .parse()?;

        assert_eq!(result.settings.repository, PathBuf::from("/home/blah/.dotfiles"));
        assert_eq!(
            result.settings.backup_dir,
            Some(PathBuf::from("/home/blah/.dotfiles-backup"))
        );
        assert!(result.packages.is_empty());

        Ok(())
    }

    #[test]
    fn deserialize_manifest_rejects_unset_variable() {
        let result = indoc! {r#"
            [settings]
            repository = "$DOTLINK_SURELY_UNSET_VARIABLE/.dotfiles"
        "#}
        .parse::<Manifest>();

        assert!(matches!(result, Err(ConfigError::ShellExpansion(_))));
    }

    #[test]
    fn serialize_manifest() -> anyhow::Result<()> {
        let manifest = Manifest {
            settings: Settings {
                repository: "/home/blah/.dotfiles".into(),
                commit_message: Some("sync".into()),
                ..Default::default()
            },
            packages: vec![PackageEntry {
                name: "tmux".into(),
                links: vec![LinkEntry {
                    source: "tmux/.tmux.conf".into(),
                    target: "/home/blah/.tmux.conf".into(),
                    mode: LinkMode::Symlink,
                }],
            }],
            tools: Vec::new(),
        };
        let result = manifest.to_string();

        assert!(result.starts_with("[settings]\n"));
        assert!(result.contains("[[package.link]]"));
        assert!(result.contains(r#"mode = "symlink""#));
        assert!(!result.contains("[[tool]]"));
        assert!(!result.contains("backup_dir"));
        assert_eq!(result.parse::<Manifest>()?, manifest);

        Ok(())
    }
}
