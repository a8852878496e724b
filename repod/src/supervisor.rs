// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Supervisor (§4.8): coordinates the Sweeper and Watcher Pool, handles
//! shutdown, and restarts watchers after drift is detected.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::generator::Generator;
use crate::lock::LockRegistry;
use crate::serve::{self, Mount};
use crate::store::{self, Store};
use crate::sweeper::{self, Sweeper};
use crate::watcher::{self, WatcherPool};
use crate::discovery;

#[derive(Debug, Error)]
pub enum Error {
    #[error("index store error")]
    Store(#[from] store::Error),
    #[error("reconciliation sweep failed")]
    Sweep(#[from] sweeper::Error),
    #[error("filesystem watcher failed")]
    Watcher(#[from] watcher::Error),
    #[error("rediscovery after drift detection failed")]
    RestartFailed,
    #[error("static file host failed")]
    Serve(#[from] serve::Error),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sweep_interval: Duration,
    pub bind_addr: SocketAddr,
    /// Mounts configured ahead of any discovered repository, merged with the
    /// per-repository mounts the Supervisor derives at Starting.
    pub extra_mounts: Vec<Mount>,
}

/// Drive the Supervisor's state machine for the lifetime of a `serve` run.
/// Returns once shutdown is complete, successfully or otherwise.
pub async fn run(store: Arc<Store>, generator: Arc<Generator>, config: Config) -> Result<(), Error> {
    let locks = Arc::new(LockRegistry::new());

    let (global_shutdown_tx, global_shutdown_rx) = watch::channel(false);
    let (paused_tx, paused_rx) = watch::channel(false);
    let (sweep_tx, mut sweep_rx) = mpsc::channel(1);
    let (watch_err_tx, mut watch_err_rx) = mpsc::channel(8);
    let (ready_tx, ready_rx) = watch::channel(false);

    info!("supervisor starting");

    let mut repos = store.list_repositories()?;
    let mut watchers = Some(WatcherPool::spawn(
        repos.clone(),
        store.clone(),
        locks.clone(),
        generator.clone(),
        watch_err_tx.clone(),
    ));

    let sweeper_handle = tokio::spawn(Sweeper::new(config.sweep_interval).run(
        store.clone(),
        global_shutdown_rx.clone(),
        paused_rx.clone(),
        sweep_tx.clone(),
    ));

    let mounts: Vec<Mount> = repos
        .iter()
        .map(|repo| Mount {
            prefix: repo.name.clone(),
            abs_path: repo.abs_path.clone(),
        })
        .chain(config.extra_mounts.iter().cloned())
        .collect();
    let mut http_shutdown_rx = global_shutdown_rx.clone();
    let http_handle = tokio::spawn(serve::run(config.bind_addr, mounts, ready_rx, async move {
        let _ = http_shutdown_rx.changed().await;
    }));

    let _ = ready_tx.send(true);
    info!("supervisor running");

    let result = loop {
        tokio::select! {
            biased;

            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for shutdown signal");
                }
                info!("shutdown signal received");
                break Ok(());
            }

            watch_error = watch_err_rx.recv() => {
                match watch_error {
                    Some(err) => {
                        warn!(error = %err, "watcher failed, stopping");
                        break Err(Error::Watcher(err));
                    }
                    None => {
                        // All watcher-pool senders are held for the supervisor's
                        // lifetime; a closed channel here would be a bug, not a
                        // normal shutdown path.
                        warn!("watcher error channel closed unexpectedly");
                    }
                }
            }

            tick = sweep_rx.recv() => {
                match tick {
                    Some(Ok(drifted)) if drifted.is_empty() => {}
                    Some(Ok(drifted)) => {
                        info!(count = drifted.len(), "drift detected, restarting watcher pool");

                        let _ = paused_tx.send(true);
                        if let Some(w) = watchers.take() {
                            w.shutdown().await;
                        }

                        match rediscover(&store, &locks, &generator, &drifted).await {
                            Ok(()) => {
                                repos = match store.list_repositories() {
                                    Ok(repos) => repos,
                                    Err(err) => break Err(Error::Store(err)),
                                };
                                watchers = Some(WatcherPool::spawn(
                                    repos.clone(),
                                    store.clone(),
                                    locks.clone(),
                                    generator.clone(),
                                    watch_err_tx.clone(),
                                ));
                                let _ = paused_tx.send(false);
                            }
                            Err(()) => break Err(Error::RestartFailed),
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "reconciliation sweep failed, stopping");
                        break Err(Error::Sweep(err));
                    }
                    None => {
                        warn!("sweeper task ended unexpectedly");
                        break Err(Error::RestartFailed);
                    }
                }
            }
        }
    };

    info!("supervisor stopping");
    let _ = global_shutdown_tx.send(true);
    if let Some(w) = watchers.take() {
        w.shutdown().await;
    }
    let _ = sweeper_handle.await;
    let _ = http_handle.await;

    // Every task holding a clone of `store` has now been awaited to
    // completion, so this is the last owner; close it explicitly rather
    // than leaving the database handle to an implicit `Drop`.
    match Arc::try_unwrap(store) {
        Ok(store) => store.close(),
        Err(_) => warn!("index store still has outstanding references at shutdown"),
    }

    result
}

/// Re-run discovery for every drifted repository concurrently, collecting errors.
async fn rediscover(
    store: &Arc<Store>,
    locks: &Arc<LockRegistry>,
    generator: &Arc<Generator>,
    drifted: &[crate::model::Repository],
) -> Result<(), ()> {
    let mut tasks = tokio::task::JoinSet::new();

    for repo in drifted {
        let name = repo.name.clone();
        let abs_path = repo.abs_path.clone();
        let store = store.clone();
        let locks = locks.clone();
        let generator = generator.clone();

        tasks.spawn(async move {
            discovery::discover(&store, &locks, &generator, &name, &abs_path)
                .await
                .map_err(|err| warn!(name = %name, error = %err, "rediscovery failed"))
        });
    }

    let mut failed = false;
    while let Some(outcome) = tasks.join_next().await {
        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(())) => failed = true,
            Err(join_err) => {
                warn!(error = %join_err, "rediscovery task panicked");
                failed = true;
            }
        }
    }

    if failed { Err(()) } else { Ok(()) }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::model::Repository;

    fn ok_generator(dir: &std::path::Path) -> Generator {
        let path = dir.join("fake-generator.sh");
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        Generator::resolve(Some(&path)).unwrap()
    }

    #[tokio::test]
    async fn rediscover_picks_up_new_files_for_every_drifted_repo() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(ok_generator(dir.path()));

        let r1 = dir.path().join("r1");
        let r2 = dir.path().join("r2");
        std::fs::create_dir_all(&r1).unwrap();
        std::fs::create_dir_all(&r2).unwrap();
        std::fs::write(r1.join("a.rpm"), b"").unwrap();
        std::fs::write(r2.join("b.rpm"), b"").unwrap();

        let store = Arc::new(Store::open_or_create(dir.path().join("repod.redb")).unwrap());
        store.persist_repository(&Repository::new("r1", &r1)).unwrap();
        store.persist_repository(&Repository::new("r2", &r2)).unwrap();
        let locks = Arc::new(LockRegistry::new());

        let drifted = vec![Repository::new("r1", &r1), Repository::new("r2", &r2)];
        rediscover(&store, &locks, &generator, &drifted).await.unwrap();

        let loaded_r1 = store.load_repository("r1").unwrap().unwrap();
        let loaded_r2 = store.load_repository("r2").unwrap().unwrap();
        assert!(loaded_r1.packages.contains_key("a.rpm"));
        assert!(loaded_r2.packages.contains_key("b.rpm"));
    }

    #[tokio::test]
    async fn rediscover_reports_failure_when_a_drifted_root_disappeared() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(ok_generator(dir.path()));
        let store = Arc::new(Store::open_or_create(dir.path().join("repod.redb")).unwrap());
        let locks = Arc::new(LockRegistry::new());

        let gone = dir.path().join("gone");
        let drifted = vec![Repository::new("gone", &gone)];

        let result = rediscover(&store, &locks, &generator, &drifted).await;
        assert!(result.is_err());
    }
}
