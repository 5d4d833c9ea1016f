// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::{Component, Path, PathBuf};

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to the manifest file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/dotlink/dotlink.toml` as the
/// default. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_manifest_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("dotlink").join("dotlink.toml"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the backup directory.
///
/// Uses `$XDG_DATA_HOME/dotlink/backup`. Every run that overwrites something
/// places a timestamped backup record under this directory.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_backup_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("dotlink").join("backup"))
        .ok_or(NoWayHome)
}

/// Directories that link targets are allowed to live under.
///
/// Targets must sit inside the user's home directory, or inside one of the
/// well-known configuration directories of the platform. Both are resolved
/// once and passed around explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveRoots {
    home: PathBuf,
    extra: Vec<PathBuf>,
}

impl LiveRoots {
    /// Construct live roots with only a home directory.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            extra: Vec::new(),
        }
    }

    /// Detect live roots of current user.
    ///
    /// # Errors
    ///
    /// - Return [`NoWayHome`] if home directory path cannot be determined.
    pub fn detect() -> Result<Self> {
        let mut roots = Self::new(home_dir()?);
        for dir in [dirs::config_dir(), dirs::data_dir()].into_iter().flatten() {
            roots = roots.with_root(dir);
        }

        Ok(roots)
    }

    /// Add another well-known directory to accept targets from.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if !root.starts_with(&self.home) && !self.extra.contains(&root) {
            self.extra.push(root);
        }
        self
    }

    /// Home directory of the user.
    pub fn home(&self) -> &Path {
        self.home.as_path()
    }

    /// Check that path is strictly inside one of the live roots.
    ///
    /// Relative paths, and paths with `..` components are never accepted.
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        if !path.is_absolute() || has_parent_component(path) {
            return false;
        }

        std::iter::once(&self.home)
            .chain(self.extra.iter())
            .any(|root| path != root && path.starts_with(root))
    }
}

pub(crate) fn has_parent_component(path: &Path) -> bool {
    path.components()
        .any(|component| matches!(component, Component::ParentDir))
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("/home/blah/.zshrc", true; "file in home")]
    #[test_case("/home/blah/.config/nvim/init.lua", true; "nested file in home")]
    #[test_case("/etc/xdg/conf", true; "well known root")]
    #[test_case("/home/blah", false; "home itself")]
    #[test_case("/home/blah/../other/.zshrc", false; "escapes home")]
    #[test_case(".zshrc", false; "relative path")]
    #[test_case("/opt/blah", false; "foreign directory")]
    #[test]
    fn live_roots_contains(path: &str, expect: bool) {
        let roots = LiveRoots::new("/home/blah").with_root("/etc/xdg");
        assert_eq!(roots.contains(path), expect);
    }

    #[test]
    fn live_roots_skip_roots_inside_home() {
        let roots = LiveRoots::new("/home/blah")
            .with_root("/home/blah/.config")
            .with_root("/etc/xdg")
            .with_root("/etc/xdg");
        assert_eq!(roots.extra, vec![PathBuf::from("/etc/xdg")]);
    }
}
