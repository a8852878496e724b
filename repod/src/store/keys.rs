// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Composite-key encoding for the package bucket.
//!
//! A package key is `repoName + "::" + relPath`. The separator is reserved
//! and must not appear inside `repoName`, since that would make the prefix
//! range used to enumerate a repository's packages ambiguous.

use thiserror::Error;

pub const SEPARATOR: &str = "::";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("repository name {0:?} must not contain the reserved separator \"::\"")]
pub struct ReservedSeparatorError(pub String);

/// Build the package-bucket key for `(repo_name, rel_path)`.
pub fn package_key(repo_name: &str, rel_path: &str) -> Result<String, ReservedSeparatorError> {
    if repo_name.contains(SEPARATOR) {
        return Err(ReservedSeparatorError(repo_name.to_owned()));
    }
    Ok(format!("{repo_name}{SEPARATOR}{rel_path}"))
}

/// The contiguous key-range prefix covering every package belonging to `repo_name`.
pub fn package_prefix(repo_name: &str) -> String {
    format!("{repo_name}{SEPARATOR}")
}

/// Split a package-bucket key back into `(repo_name, rel_path)`.
///
/// Because `repo_name` can never contain the separator, the first occurrence
/// unambiguously splits the key.
pub fn split_package_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(SEPARATOR)
}
