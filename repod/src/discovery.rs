// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Discovery Walker (§4.4): scans a repository root for `.rpm` files and
//! commits the resulting package set through the Index Store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::lock::LockRegistry;
use crate::model::{Package, Repository};
use crate::{generator, store};

#[derive(Debug, Error)]
pub enum Error {
    #[error("repository name must not be empty")]
    EmptyName,
    #[error("repository root {0:?} does not exist or is not a directory")]
    InvalidRoot(PathBuf),
    #[error("failed to walk {root:?}")]
    Walk { root: PathBuf, source: walkdir::Error },
    #[error("failed to persist repository {name:?}")]
    Persist { name: String, source: store::Error },
}

/// Walk `abs_path`, build the in-memory repository record for `name`, and
/// persist it atomically. Invokes the metadata generator afterward; a
/// generator failure is reported through the return value but does not
/// revert the already-persisted index (§4.4 step 5, §7).
#[tracing::instrument(skip(store, locks, generator))]
pub async fn discover(
    store: &store::Store,
    locks: &Arc<LockRegistry>,
    generator: &generator::Generator,
    name: &str,
    abs_path: &Path,
) -> Result<Outcome, Error> {
    if name.is_empty() {
        return Err(Error::EmptyName);
    }
    if !abs_path.is_dir() {
        return Err(Error::InvalidRoot(abs_path.to_owned()));
    }

    let _lock = locks.acquire(name).await;

    let repo = walk(name, abs_path)?;
    info!(name, packages = repo.packages.len(), "discovered repository");

    store
        .persist_repository(&repo)
        .map_err(|source| Error::Persist {
            name: name.to_owned(),
            source,
        })?;

    let generated = match generator.generate(abs_path).await {
        Ok(()) => true,
        Err(err) => {
            warn!(name, error = %err, "metadata generator failed after discovery");
            false
        }
    };

    Ok(Outcome { repo, generated })
}

/// Result of a successful discovery: the committed record, and whether the
/// subsequent metadata-generator invocation succeeded.
#[derive(Debug)]
pub struct Outcome {
    pub repo: Repository,
    pub generated: bool,
}

/// Walk `abs_path` synchronously, collecting every regular `.rpm` file as a
/// package relative to the root. Symlinked directories are not followed, so
/// a symlink loop beneath the root cannot cause non-termination; a symlink
/// to a regular `.rpm` file is still indexed, since `is_file` resolves the
/// link target rather than trusting walkdir's unfollowed `file_type`.
fn walk(name: &str, abs_path: &Path) -> Result<Repository, Error> {
    let mut repo = Repository::new(name, abs_path);

    for entry in WalkDir::new(abs_path).follow_links(false) {
        let entry = entry.map_err(|source| Error::Walk {
            root: abs_path.to_owned(),
            source,
        })?;

        if !is_file(&entry) {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("rpm") {
            continue;
        }

        let rel_path = path
            .strip_prefix(abs_path)
            .expect("walked entry is under its root")
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");

        repo.packages.insert(
            rel_path.clone(),
            Package {
                rel_path,
                repo_name: name.to_owned(),
            },
        );
    }

    Ok(repo)
}

/// True for a regular file, and for a symlink whose target resolves to one.
/// `entry`'s `file_type` comes from an unfollowed walk (lstat), so a
/// symlink reports `is_symlink()` rather than `is_file()` even when it
/// points at a regular file; `fs::metadata` follows the link to check.
fn is_file(entry: &walkdir::DirEntry) -> bool {
    if entry.file_type().is_file() {
        return true;
    }
    entry.path_is_symlink() && fs::metadata(entry.path()).is_ok_and(|metadata| metadata.is_file())
}
