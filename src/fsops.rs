// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Low-level file system primitives.
//!
//! Linking, backing up, and syncing all need to copy, compare, and remove
//! entries that may be regular files, directories, or symlinks. Symlinks are
//! never followed by anything in here; they are treated as entries of their
//! own.

use ignore::WalkBuilder;
use std::{
    fs::{self, Metadata},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

/// Check if anything occupies path, including dangling symlinks.
pub(crate) fn entry_exists(path: &Path) -> io::Result<bool> {
    Ok(metadata(path)?.is_some())
}

/// Query metadata of path without following symlinks.
///
/// Return `None` if nothing exists at path.
pub(crate) fn metadata(path: &Path) -> io::Result<Option<Metadata>> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Copy file, directory, or symlink from `src` to `dst`.
///
/// Parent directories of `dst` must already exist. Directories are copied
/// recursively, and symlinks are recreated with the same link text.
pub(crate) fn copy_entry(src: &Path, dst: &Path) -> io::Result<()> {
    let file_type = fs::symlink_metadata(src)?.file_type();
    if file_type.is_symlink() {
        copy_symlink(src, dst)
    } else if file_type.is_dir() {
        copy_tree(src, dst)
    } else {
        fs::copy(src, dst).map(|_| ())
    }
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    let walker = WalkBuilder::new(src)
        .standard_filters(false)
        .follow_links(false)
        .build();

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let to = dst.join(relative);

        match entry.file_type() {
            Some(kind) if kind.is_dir() => fs::create_dir_all(&to)?,
            Some(kind) if kind.is_symlink() => copy_symlink(entry.path(), &to)?,
            Some(_) => {
                fs::copy(entry.path(), &to)?;
            }
            None => continue,
        }
    }

    Ok(())
}

fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let link_text = fs::read_link(src)?;
    symlink(&link_text, dst)
}

/// Remove file, directory, or symlink at path.
///
/// Symlinks to directories are removed without touching what they point to.
pub(crate) fn remove_entry(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        remove_file_or_link(path)
    }
}

/// Compare two entries byte for byte.
///
/// Directories match if they contain the same relative set of entries with
/// the same content. Symlinks are never considered equal to anything, so a
/// caller always treats them as something to replace.
pub(crate) fn same_content(left: &Path, right: &Path) -> io::Result<bool> {
    let (Some(left_meta), Some(right_meta)) = (metadata(left)?, metadata(right)?) else {
        return Ok(false);
    };

    if left_meta.file_type().is_symlink() || right_meta.file_type().is_symlink() {
        return Ok(false);
    }

    match (left_meta.is_dir(), right_meta.is_dir()) {
        (false, false) => {
            if left_meta.len() != right_meta.len() {
                return Ok(false);
            }
            Ok(fs::read(left)? == fs::read(right)?)
        }
        (true, true) => same_tree(left, right),
        _ => Ok(false),
    }
}

fn same_tree(left: &Path, right: &Path) -> io::Result<bool> {
    let mut left_entries = tree_entries(left)?;
    let mut right_entries = tree_entries(right)?;
    left_entries.sort();
    right_entries.sort();
    if left_entries != right_entries {
        return Ok(false);
    }

    for relative in left_entries {
        let (l, r) = (left.join(&relative), right.join(&relative));
        let kind = fs::symlink_metadata(&l)?.file_type();
        if kind.is_dir() {
            continue;
        }

        // INVARIANT: Nested symlinks compare by link text.
        if kind.is_symlink() {
            if fs::read_link(&l).ok() != fs::read_link(&r).ok() {
                return Ok(false);
            }
            continue;
        }

        if !same_content(&l, &r)? {
            return Ok(false);
        }
    }

    Ok(true)
}

fn tree_entries(root: &Path) -> io::Result<Vec<PathBuf>> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .build();

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        if entry.depth() == 0 {
            continue;
        }
        let relative = entry.path().strip_prefix(root).map_err(io::Error::other)?;
        entries.push(relative.to_path_buf());
    }

    Ok(entries)
}

#[cfg(unix)]
pub(crate) fn symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
pub(crate) fn symlink(original: &Path, link: &Path) -> io::Result<()> {
    let resolved = match link.parent() {
        Some(parent) if original.is_relative() => parent.join(original),
        _ => original.to_path_buf(),
    };

    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(original, link)
    } else {
        std::os::windows::fs::symlink_file(original, link)
    }
}

#[cfg(unix)]
fn remove_file_or_link(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

// INVARIANT: Directory symlinks on Windows must go through remove_dir.
#[cfg(windows)]
fn remove_file_or_link(path: &Path) -> io::Result<()> {
    fs::remove_file(path).or_else(|_| fs::remove_dir(path))
}
