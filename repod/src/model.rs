// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! In-memory representation of a repository and its packages.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A registered repository and the packages discovered beneath it.
///
/// The package map is never serialized inline with the repository; it lives
/// in the store's package bucket and is re-attached on load (see
/// [`crate::store`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub abs_path: PathBuf,
    pub packages: BTreeMap<String, Package>,
}

impl Repository {
    pub fn new(name: impl Into<String>, abs_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            abs_path: abs_path.into(),
            packages: BTreeMap::new(),
        }
    }

    /// The set of relative package paths currently tracked for this repository.
    pub fn rel_paths(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }
}

/// The portion of a [`Repository`] that is persisted to the repo bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub name: String,
    pub abs_path: PathBuf,
}

/// A single `.rpm` file tracked within a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub rel_path: String,
    pub repo_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_rel_paths_are_sorted_by_btreemap() {
        let mut repo = Repository::new("R1", "/tmp/r1");
        repo.packages.insert(
            "c.rpm".into(),
            Package {
                rel_path: "c.rpm".into(),
                repo_name: "R1".into(),
            },
        );
        repo.packages.insert(
            "a/b.rpm".into(),
            Package {
                rel_path: "a/b.rpm".into(),
                repo_name: "R1".into(),
            },
        );

        let paths: Vec<_> = repo.rel_paths().collect();
        assert_eq!(paths, vec!["a/b.rpm", "c.rpm"]);
    }
}
