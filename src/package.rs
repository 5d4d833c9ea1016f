// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Package mappings.
//!
//! A __package__ is a named group of configuration files that are managed as
//! a unit, similar to a GNU Stow package. Each package maps source paths in
//! the dotfile repository to target paths in the live environment. The
//! manifest describes packages loosely, so this module resolves them into
//! absolute, validated [`PackageMapping`]s before anything touches the file
//! system.
//!
//! # Invariants
//!
//! - Every source path is inside the repository root.
//! - Every target path is inside one of the [`LiveRoots`].
//! - Package names are unique.

use crate::{
    config::Manifest,
    path::{has_parent_component, LiveRoots},
};

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Component, Path, PathBuf},
};

/// How a target gets deployed into the live environment.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// Target is a symbolic link to the source.
    #[default]
    Symlink,

    /// Target is a plain copy of the source.
    ///
    /// Fallback for programs that refuse to follow symlinks.
    Copy,
}

impl Display for LinkMode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Symlink => fmt.write_str("symlink"),
            Self::Copy => fmt.write_str("copy"),
        }
    }
}

/// Resolved source and target pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPair {
    /// Absolute path inside the repository.
    pub source: PathBuf,

    /// Absolute path inside the live environment.
    pub target: PathBuf,

    /// Deployment mode of target.
    pub mode: LinkMode,
}

impl LinkPair {
    /// Construct new symlink pair.
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            mode: LinkMode::Symlink,
        }
    }

    /// Use different deployment mode.
    pub fn with_mode(mut self, mode: LinkMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Named package and its ordered link pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMapping {
    name: String,
    pairs: Vec<LinkPair>,
}

impl PackageMapping {
    /// Construct new package mapping.
    pub fn new(name: impl Into<String>, pairs: impl IntoIterator<Item = LinkPair>) -> Self {
        Self {
            name: name.into(),
            pairs: pairs.into_iter().collect(),
        }
    }

    /// Name of package.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Link pairs in manifest order.
    pub fn pairs(&self) -> &[LinkPair] {
        self.pairs.as_slice()
    }
}

/// Resolve manifest packages into validated mappings.
///
/// Source paths are joined onto the repository root from the manifest
/// settings. Targets must already be absolute, which is the case after shell
/// expansion of `~`.
///
/// # Errors
///
/// - Return [`PackageError::DuplicateName`] if two packages share a name.
/// - Return [`PackageError::SourceOutsideRepository`] if a source is absolute
///   or climbs out of the repository.
/// - Return [`PackageError::TargetOutsideLiveRoots`] if a target is not
///   inside the home directory or a well-known configuration directory.
pub fn resolve(manifest: &Manifest, roots: &LiveRoots) -> Result<Vec<PackageMapping>> {
    let repository = manifest.settings.repository.as_path();
    let mut seen = HashSet::new();
    let mut mappings = Vec::with_capacity(manifest.packages.len());

    for package in &manifest.packages {
        if !seen.insert(package.name.as_str()) {
            return Err(PackageError::DuplicateName {
                name: package.name.clone(),
            });
        }

        let mut pairs = Vec::with_capacity(package.links.len());
        for link in &package.links {
            if !is_plain_relative(&link.source) {
                return Err(PackageError::SourceOutsideRepository {
                    name: package.name.clone(),
                    source_path: link.source.clone(),
                });
            }

            if !roots.contains(&link.target) {
                return Err(PackageError::TargetOutsideLiveRoots {
                    name: package.name.clone(),
                    target: link.target.clone(),
                });
            }

            pairs.push(
                LinkPair::new(repository.join(&link.source), &link.target).with_mode(link.mode),
            );
        }

        mappings.push(PackageMapping::new(&package.name, pairs));
    }

    Ok(mappings)
}

fn is_plain_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && !has_parent_component(path)
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

/// Select mappings whose names match any of the given glob patterns.
///
/// An empty pattern list selects every mapping. Selection keeps manifest
/// order.
///
/// # Errors
///
/// - Return [`PackageError::InvalidPattern`] if a pattern is not a valid glob.
/// - Return [`PackageError::NoMatch`] if a pattern matches no package.
pub fn select<'a>(
    mappings: &'a [PackageMapping],
    patterns: &[impl AsRef<str>],
) -> Result<Vec<&'a PackageMapping>> {
    if patterns.is_empty() {
        return Ok(mappings.iter().collect());
    }

    let patterns = patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern.as_ref())
                .map(|glob| (pattern.as_ref(), glob))
                .map_err(|source| PackageError::InvalidPattern {
                    pattern: pattern.as_ref().to_string(),
                    source,
                })
        })
        .collect::<Result<Vec<_>>>()?;

    for (raw, glob) in &patterns {
        if !mappings.iter().any(|mapping| glob.matches(mapping.name())) {
            return Err(PackageError::NoMatch {
                pattern: raw.to_string(),
            });
        }
    }

    Ok(mappings
        .iter()
        .filter(|mapping| patterns.iter().any(|(_, glob)| glob.matches(mapping.name())))
        .collect())
}

/// Package resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// Two packages share the same name.
    #[error("package {name:?} is defined more than once")]
    DuplicateName { name: String },

    /// Source path does not stay inside the repository.
    #[error("package {name:?} has source {:?} outside of the repository", source_path.display())]
    SourceOutsideRepository { name: String, source_path: PathBuf },

    /// Target path is not inside home or a well-known configuration directory.
    #[error("package {name:?} has target {:?} outside of the live environment", target.display())]
    TargetOutsideLiveRoots { name: String, target: PathBuf },

    /// Package filter is not a valid glob.
    #[error("invalid package pattern {pattern:?}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// Package filter matched nothing.
    #[error("no package matches {pattern:?}")]
    NoMatch { pattern: String },
}

/// Friendly result alias :3
type Result<T, E = PackageError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LinkEntry, PackageEntry, Settings};
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn manifest(packages: Vec<PackageEntry>) -> Manifest {
        Manifest {
            settings: Settings {
                repository: "/home/blah/.dotfiles".into(),
                ..Default::default()
            },
            packages,
            tools: Vec::new(),
        }
    }

    fn entry(name: &str, source: &str, target: &str) -> PackageEntry {
        PackageEntry {
            name: name.into(),
            links: vec![LinkEntry {
                source: source.into(),
                target: target.into(),
                mode: LinkMode::Symlink,
            }],
        }
    }

    fn names(mappings: &[&PackageMapping]) -> Vec<String> {
        mappings.iter().map(|m| m.name().to_string()).collect()
    }

    #[test]
    fn resolve_joins_source_onto_repository() -> anyhow::Result<()> {
        let roots = LiveRoots::new("/home/blah");
        let result = resolve(
            &manifest(vec![entry("zsh", "zsh/.zshrc", "/home/blah/.zshrc")]),
            &roots,
        )?;

        let expect = vec![PackageMapping::new(
            "zsh",
            [LinkPair::new("/home/blah/.dotfiles/zsh/.zshrc", "/home/blah/.zshrc")],
        )];
        assert_eq!(result, expect);

        Ok(())
    }

    #[test_case("../outside"; "parent component")]
    #[test_case("/etc/passwd"; "absolute")]
    #[test_case(""; "empty")]
    #[test]
    fn resolve_rejects_sources_outside_repository(source: &str) {
        let roots = LiveRoots::new("/home/blah");
        let result = resolve(
            &manifest(vec![entry("bad", source, "/home/blah/.bad")]),
            &roots,
        );
        assert!(matches!(
            result,
            Err(PackageError::SourceOutsideRepository { .. })
        ));
    }

    #[test]
    fn resolve_rejects_targets_outside_live_roots() {
        let roots = LiveRoots::new("/home/blah");
        let result = resolve(
            &manifest(vec![entry("bad", "bad/conf", "/etc/conf")]),
            &roots,
        );
        assert!(matches!(
            result,
            Err(PackageError::TargetOutsideLiveRoots { .. })
        ));
    }

    #[test]
    fn resolve_rejects_duplicate_names() {
        let roots = LiveRoots::new("/home/blah");
        let result = resolve(
            &manifest(vec![
                entry("zsh", "zsh/.zshrc", "/home/blah/.zshrc"),
                entry("zsh", "zsh/.zshenv", "/home/blah/.zshenv"),
            ]),
            &roots,
        );
        assert!(matches!(result, Err(PackageError::DuplicateName { .. })));
    }

    #[test]
    fn select_by_glob_patterns() -> anyhow::Result<()> {
        let mappings = vec![
            PackageMapping::new("zsh", []),
            PackageMapping::new("tmux", []),
            PackageMapping::new("zellij", []),
            PackageMapping::new("ranger", []),
        ];

        let all = select(&mappings, &[] as &[&str])?;
        assert_eq!(names(&all), vec!["zsh", "tmux", "zellij", "ranger"]);

        let some = select(&mappings, &["z*", "ranger"])?;
        assert_eq!(names(&some), vec!["zsh", "zellij", "ranger"]);

        let result = select(&mappings, &["nvim"]);
        assert!(matches!(result, Err(PackageError::NoMatch { .. })));

        let result = select(&mappings, &["[z"]);
        assert!(matches!(result, Err(PackageError::InvalidPattern { .. })));

        Ok(())
    }
}
