// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Reconciliation Sweeper (§4.6): periodically compares the persisted index
//! against on-disk reality and emits the set of drifted repositories.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::model::Repository;
use crate::store::{self, Store};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load repositories from index store")]
    Store(#[from] store::Error),
    #[error("failed to walk repository {name:?} at {root:?}")]
    Walk {
        name: String,
        root: std::path::PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

pub struct Sweeper {
    interval: Duration,
}

impl Sweeper {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Run the periodic tick loop until `shutdown` fires. While `paused`
    /// reads `true` (the Supervisor is Restarting), ticks are skipped
    /// outright rather than queued — a paused sweep is not made up later.
    pub async fn run(
        self,
        store: Arc<Store>,
        mut shutdown: watch::Receiver<bool>,
        paused: watch::Receiver<bool>,
        results: mpsc::Sender<Result<Vec<Repository>, Error>>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; consume it so sweeps start on
        // the configured cadence rather than the instant the task spawns.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    debug!("sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if *paused.borrow() {
                        debug!("sweeper paused, skipping tick");
                        continue;
                    }

                    let sweep_store = store.clone();
                    let outcome = tokio::task::spawn_blocking(move || sweep(&sweep_store))
                        .await
                        .expect("sweeper task panicked");

                    if let Err(err) = &outcome {
                        warn!(error = %err, "reconciliation sweep failed");
                    }

                    if results.send(outcome).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Run a single sweep over every persisted repository, returning the list
/// of repositories whose on-disk `.rpm` set differs from the index.
pub fn sweep(store: &Store) -> Result<Vec<Repository>, Error> {
    let repos = store.list_repositories()?;

    let mut drifted = Vec::new();
    for repo in repos {
        if has_drifted(&repo)? {
            drifted.push(repo);
        }
    }
    Ok(drifted)
}

fn has_drifted(repo: &Repository) -> Result<bool, Error> {
    let db_paths: HashSet<&str> = repo.rel_paths().collect();
    let mut seen = HashSet::new();

    for entry in WalkDir::new(&repo.abs_path).follow_links(false) {
        let entry = entry.map_err(|source| Error::Walk {
            name: repo.name.clone(),
            root: repo.abs_path.clone(),
            source,
        })?;

        if !is_file(&entry) {
            continue;
        }
        if entry.path().extension().and_then(|ext| ext.to_str()) != Some("rpm") {
            continue;
        }

        let rel_path = entry
            .path()
            .strip_prefix(&repo.abs_path)
            .expect("walked entry is under its root")
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");

        if !db_paths.contains(rel_path.as_str()) {
            // New file on disk the index doesn't know about: drifted.
            // First-hit optimization — no need to finish the walk.
            return Ok(true);
        }

        seen.insert(rel_path);
    }

    // Indexed files missing on disk: drifted.
    Ok(db_paths.iter().any(|path| !seen.contains(*path)))
}

/// True for a regular file, and for a symlink whose target resolves to one.
/// Mirrors [`crate::discovery::is_file`]: walkdir's unfollowed `file_type`
/// reports a symlink as `is_symlink()`, never `is_file()`, even when it
/// points at a regular file.
fn is_file(entry: &walkdir::DirEntry) -> bool {
    if entry.file_type().is_file() {
        return true;
    }
    entry.path_is_symlink() && fs::metadata(entry.path()).is_ok_and(|metadata| metadata.is_file())
}
