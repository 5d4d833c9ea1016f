// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Personal dotfile management through symlinks and Git.
//!
//! A __dotfile repository__ holds the canonical, version controlled copy of
//! every configuration file. The __live environment__ (home directory and the
//! well-known config directories) consumes them. Files are grouped into named
//! __packages__, each mapping sources in the repository to targets in the
//! live environment.
//!
//! dotlink keeps both sides consistent:
//!
//! - [`link`] symlinks (or copies) sources into place, backing up anything
//!   it would overwrite into a [`backup::BackupRecord`].
//! - [`link::unlink`] removes exactly the links it created.
//! - [`sync`] mirrors content between both sides and exchanges commits with
//!   the repository's remote.
//! - [`install`] brings in missing tools listed in the manifest.
//!
//! [`store::Store`] binds a loaded manifest to all of these.

pub mod backup;
pub mod config;
pub mod install;
pub mod link;
pub mod package;
pub mod path;
pub mod store;
pub mod sync;
pub mod vcs;

pub(crate) mod fsops;
