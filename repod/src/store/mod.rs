// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The Index Store: a bucketed, ordered, byte key/value persistence layer
//! for repositories and their packages, backed by an embedded database.
//!
//! This module owns the two buckets described by the data model (a repo
//! bucket and a package bucket) and the atomic multi-bucket transactions
//! used to keep them consistent. Domain logic (walking, watching,
//! generating metadata) lives elsewhere and talks to the store only through
//! the methods below.

pub mod keys;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;

use crate::model::{Package, Repository, RepositoryRecord};

const REPO_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("repos");
const PACKAGE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("packages");

const OPEN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum Error {
    #[error("index store at {0:?} is held by another process")]
    Unavailable(PathBuf),
    #[error("database error")]
    Database(#[from] redb::DatabaseError),
    #[error("transaction error")]
    Transaction(#[from] redb::TransactionError),
    #[error("table error")]
    Table(#[from] redb::TableError),
    #[error("storage error")]
    Storage(#[from] redb::StorageError),
    #[error("commit error")]
    Commit(#[from] redb::CommitError),
    #[error("serialize record")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    ReservedSeparator(#[from] keys::ReservedSeparatorError),
}

/// Outcome of a watcher-driven package removal; see §4.7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageRemoval {
    /// The package was present and has been removed; metadata should be regenerated.
    Removed(Repository),
    /// The repository's on-disk `absPath` no longer matches what the watcher remembers.
    AbsPathMismatch,
    /// The repository, or that specific package, is no longer present.
    NotFound,
}

pub struct Store {
    db: Database,
}

impl Store {
    /// Open the store at `path`, creating it if absent. Fails with
    /// [`Error::Unavailable`] if another process holds it past a short
    /// acquisition timeout.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_owned();
        let (tx, rx) = mpsc::channel();

        let opener_path = path.clone();
        std::thread::spawn(move || {
            let result = Database::create(&opener_path);
            let _ = tx.send(result);
        });

        let db = match rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(db)) => db,
            Ok(Err(err)) => return Err(err.into()),
            Err(mpsc::RecvTimeoutError::Timeout) => return Err(Error::Unavailable(path)),
            Err(mpsc::RecvTimeoutError::Disconnected) => return Err(Error::Unavailable(path)),
        };

        let store = Self { db };
        store.ensure_buckets()?;
        Ok(store)
    }

    /// Idempotent creation of both top-level buckets.
    pub fn ensure_buckets(&self) -> Result<(), Error> {
        let txn = self.db.begin_write()?;
        txn.open_table(REPO_TABLE)?;
        txn.open_table(PACKAGE_TABLE)?;
        txn.commit()?;
        Ok(())
    }

    /// Load a single repository, with its packages re-attached from the
    /// package bucket's `name + "::"` range. Returns `None` if absent.
    pub fn load_repository(&self, name: &str) -> Result<Option<Repository>, Error> {
        let txn = self.db.begin_read()?;
        load_repository_in(&txn, name)
    }

    /// Load every persisted repository, packages included.
    pub fn list_repositories(&self) -> Result<Vec<Repository>, Error> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(REPO_TABLE)?;

        let mut repos = Vec::new();
        for entry in table.iter()? {
            let (name, _) = entry?;
            if let Some(repo) = load_repository_in(&txn, name.value())? {
                repos.push(repo);
            }
        }
        Ok(repos)
    }

    /// Atomic repository persist (§4.4.1): replace the prior package set for
    /// `repo.name` and write the new repository record and package set in a
    /// single transaction.
    pub fn persist_repository(&self, repo: &Repository) -> Result<(), Error> {
        let txn = self.db.begin_write()?;
        {
            let mut packages = txn.open_table(PACKAGE_TABLE)?;
            delete_prefix(&mut packages, &keys::package_prefix(&repo.name))?;

            for package in repo.packages.values() {
                let key = keys::package_key(&repo.name, &package.rel_path)?;
                let value = serde_json::to_vec(package)?;
                packages.insert(key.as_str(), value.as_slice())?;
            }
        }
        {
            let mut repos = txn.open_table(REPO_TABLE)?;
            let record = RepositoryRecord {
                name: repo.name.clone(),
                abs_path: repo.abs_path.clone(),
            };
            let value = serde_json::to_vec(&record)?;
            repos.insert(repo.name.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Drop a repository and every package under its key prefix in a single transaction.
    pub fn remove_repository(&self, name: &str) -> Result<(), Error> {
        let txn = self.db.begin_write()?;
        {
            let mut packages = txn.open_table(PACKAGE_TABLE)?;
            delete_prefix(&mut packages, &keys::package_prefix(name))?;
        }
        {
            let mut repos = txn.open_table(REPO_TABLE)?;
            repos.remove(name)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Watcher-driven edit (§4.7 step 3.d): remove a single package path from
    /// a repository, verifying the remembered `abs_path` still matches.
    pub fn remove_package(
        &self,
        name: &str,
        expected_abs_path: &Path,
        rel_path: &str,
    ) -> Result<PackageRemoval, Error> {
        let Some(mut repo) = self.load_repository(name)? else {
            return Ok(PackageRemoval::NotFound);
        };

        if repo.abs_path != expected_abs_path {
            return Ok(PackageRemoval::AbsPathMismatch);
        }

        if repo.packages.remove(rel_path).is_none() {
            return Ok(PackageRemoval::NotFound);
        }

        self.persist_repository(&repo)?;
        Ok(PackageRemoval::Removed(repo))
    }

    pub fn close(self) {
        drop(self);
    }
}

fn load_repository_in(
    txn: &redb::ReadTransaction,
    name: &str,
) -> Result<Option<Repository>, Error> {
    let repos = txn.open_table(REPO_TABLE)?;
    let Some(guard) = repos.get(name)? else {
        return Ok(None);
    };
    let record: RepositoryRecord = serde_json::from_slice(guard.value())?;
    drop(guard);

    let packages_table = txn.open_table(PACKAGE_TABLE)?;
    let prefix = keys::package_prefix(name);

    let mut packages = BTreeMap::new();
    for entry in packages_table.range(prefix.as_str()..)? {
        let (key, value) = entry?;
        if !key.value().starts_with(&prefix) {
            break;
        }
        let package: Package = serde_json::from_slice(value.value())?;
        packages.insert(package.rel_path.clone(), package);
    }

    Ok(Some(Repository {
        name: record.name,
        abs_path: record.abs_path,
        packages,
    }))
}

fn delete_prefix(table: &mut redb::Table<'_, &str, &[u8]>, prefix: &str) -> Result<(), Error> {
    let keys: Vec<String> = {
        let mut found = Vec::new();
        for entry in table.range(prefix..)? {
            let (key, _) = entry?;
            if !key.value().starts_with(prefix) {
                break;
            }
            found.push(key.value().to_owned());
        }
        found
    };

    for key in keys {
        table.remove(key.as_str())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_or_create(dir.path().join("repod.redb")).unwrap();
        (dir, store)
    }

    fn sample_repo(name: &str, abs_path: &str, rel_paths: &[&str]) -> Repository {
        let mut repo = Repository::new(name, abs_path);
        for rel_path in rel_paths {
            repo.packages.insert(
                (*rel_path).to_owned(),
                Package {
                    rel_path: (*rel_path).to_owned(),
                    repo_name: name.to_owned(),
                },
            );
        }
        repo
    }

    #[test]
    fn persist_then_load_round_trips() {
        let (_dir, store) = temp_store();
        let repo = sample_repo("R2", "/tmp/r2", &["a/b.rpm", "c.rpm"]);

        store.persist_repository(&repo).unwrap();

        let loaded = store.load_repository("R2").unwrap().unwrap();
        assert_eq!(loaded, repo);
    }

    #[test]
    fn persist_replaces_prior_package_set_atomically() {
        let (_dir, store) = temp_store();
        store
            .persist_repository(&sample_repo("R2", "/tmp/r2", &["a/b.rpm", "c.rpm"]))
            .unwrap();

        store
            .persist_repository(&sample_repo("R2", "/tmp/r2", &["a/b.rpm"]))
            .unwrap();

        let loaded = store.load_repository("R2").unwrap().unwrap();
        assert_eq!(loaded.packages.len(), 1);
        assert!(loaded.packages.contains_key("a/b.rpm"));
    }

    #[test]
    fn remove_repository_drops_repo_and_packages_only() {
        let (_dir, store) = temp_store();
        store
            .persist_repository(&sample_repo("R2", "/tmp/r2", &["x.rpm"]))
            .unwrap();
        store
            .persist_repository(&sample_repo("R3", "/tmp/r3", &["x.rpm"]))
            .unwrap();

        store.remove_repository("R2").unwrap();

        assert!(store.load_repository("R2").unwrap().is_none());
        let r3 = store.load_repository("R3").unwrap().unwrap();
        assert!(r3.packages.contains_key("x.rpm"));
    }

    #[test]
    fn remove_package_deletes_tracked_path() {
        let (_dir, store) = temp_store();
        store
            .persist_repository(&sample_repo("R2", "/tmp/r2", &["a/b.rpm", "c.rpm"]))
            .unwrap();

        let outcome = store
            .remove_package("R2", Path::new("/tmp/r2"), "c.rpm")
            .unwrap();

        match outcome {
            PackageRemoval::Removed(repo) => {
                assert!(!repo.packages.contains_key("c.rpm"));
                assert!(repo.packages.contains_key("a/b.rpm"));
            }
            other => panic!("expected Removed, got {other:?}"),
        }

        let loaded = store.load_repository("R2").unwrap().unwrap();
        assert!(!loaded.packages.contains_key("c.rpm"));
    }

    #[test]
    fn remove_package_detects_abs_path_mismatch() {
        let (_dir, store) = temp_store();
        store
            .persist_repository(&sample_repo("R2", "/tmp/r2", &["c.rpm"]))
            .unwrap();

        let outcome = store
            .remove_package("R2", Path::new("/tmp/other"), "c.rpm")
            .unwrap();

        assert_eq!(outcome, PackageRemoval::AbsPathMismatch);
    }

    #[test]
    fn two_repos_sharing_a_relative_path_do_not_collide() {
        let (_dir, store) = temp_store();
        store
            .persist_repository(&sample_repo("R2", "/tmp/r2", &["x.rpm"]))
            .unwrap();
        store
            .persist_repository(&sample_repo("R3", "/tmp/r3", &["x.rpm"]))
            .unwrap();

        let r2 = store.load_repository("R2").unwrap().unwrap();
        let r3 = store.load_repository("R3").unwrap().unwrap();
        assert_eq!(r2.packages["x.rpm"].repo_name, "R2");
        assert_eq!(r3.packages["x.rpm"].repo_name, "R3");
    }
}
