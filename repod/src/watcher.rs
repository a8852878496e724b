// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Per-Repository Watcher Pool (§4.7): one task per repository, watching
//! every currently-tracked package path individually and translating
//! removals/renames into index edits.

use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::generator::Generator;
use crate::lock::LockRegistry;
use crate::model::Repository;
use crate::store::{PackageRemoval, Store};

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create filesystem subscription for {name:?}")]
    Subscribe {
        name: String,
        #[source]
        source: notify::Error,
    },
    #[error("filesystem watch failed for {name:?}")]
    Watch {
        name: String,
        #[source]
        source: notify::Error,
    },
}

/// One generation of watcher tasks, one per repository. Dropping a
/// `WatcherPool` without calling [`WatcherPool::shutdown`] leaks the tasks;
/// callers must always await `shutdown`.
pub struct WatcherPool {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WatcherPool {
    /// Spawn one watcher task per repository in `repos`.
    pub fn spawn(
        repos: Vec<Repository>,
        store: Arc<Store>,
        locks: Arc<LockRegistry>,
        generator: Arc<Generator>,
        errors: mpsc::Sender<Error>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = repos
            .into_iter()
            .map(|repo| {
                tokio::spawn(run(
                    repo,
                    store.clone(),
                    locks.clone(),
                    generator.clone(),
                    shutdown_rx.clone(),
                    errors.clone(),
                ))
            })
            .collect();

        Self {
            shutdown: shutdown_tx,
            tasks,
        }
    }

    /// Close this generation's shutdown channel and wait for every watcher
    /// task to finish (§4.8 Restarting: "wait for all watcher tasks to
    /// finish" before recreating the pool).
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn run(
    repo: Repository,
    store: Arc<Store>,
    locks: Arc<LockRegistry>,
    generator: Arc<Generator>,
    mut shutdown: watch::Receiver<bool>,
    errors: mpsc::Sender<Error>,
) {
    let (event_tx, mut event_rx) = mpsc::channel::<notify::Result<Event>>(64);

    let mut watcher = match notify::recommended_watcher(move |event| {
        let _ = event_tx.blocking_send(event);
    }) {
        Ok(watcher) => watcher,
        Err(source) => {
            let _ = errors
                .send(Error::Subscribe {
                    name: repo.name.clone(),
                    source,
                })
                .await;
            return;
        }
    };

    for rel_path in repo.rel_paths() {
        let abs_path = repo.abs_path.join(rel_path);
        if let Err(source) = watcher.watch(&abs_path, RecursiveMode::NonRecursive) {
            warn!(name = %repo.name, path = %abs_path.display(), error = %source, "failed to watch package path");
        }
    }

    info!(name = %repo.name, packages = repo.packages.len(), "watcher registered");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!(name = %repo.name, "watcher shutting down");
                break;
            }
            event = event_rx.recv() => {
                match event {
                    Some(Ok(event)) => {
                        handle_event(&repo, &store, &locks, &generator, event).await;
                    }
                    Some(Err(source)) => {
                        let _ = errors
                            .send(Error::Watch {
                                name: repo.name.clone(),
                                source,
                            })
                            .await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // Drop the watcher explicitly so the subscription (and its OS-level
    // resources) is released on every exit path, not just the happy one.
    drop(watcher);
}

fn is_interesting(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Remove(_) | EventKind::Modify(notify::event::ModifyKind::Name(_))
    )
}

async fn handle_event(
    repo: &Repository,
    store: &Store,
    locks: &LockRegistry,
    generator: &Generator,
    event: Event,
) {
    if !is_interesting(&event.kind) {
        debug!(name = %repo.name, kind = ?event.kind, "ignoring uninteresting watch event");
        return;
    }

    for path in &event.paths {
        let Ok(rel_path) = path.strip_prefix(&repo.abs_path) else {
            continue;
        };
        let rel_path = rel_path.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");

        let _lock = locks.acquire(&repo.name).await;

        match store.remove_package(&repo.name, &repo.abs_path, &rel_path) {
            Ok(PackageRemoval::Removed(_)) => {
                info!(name = %repo.name, path = %rel_path, "package removed by watcher event");
                if let Err(err) = generator.generate(&repo.abs_path).await {
                    warn!(name = %repo.name, error = %err, "metadata generator failed after watcher edit");
                }
            }
            Ok(PackageRemoval::AbsPathMismatch) => {
                warn!(name = %repo.name, "watcher's remembered root no longer matches the stored repository, skipping edit");
            }
            Ok(PackageRemoval::NotFound) => {
                debug!(name = %repo.name, path = %rel_path, "watcher event for an already-untracked package");
            }
            Err(err) => {
                warn!(name = %repo.name, error = %err, "failed to persist watcher-driven removal");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    use notify::event::{AccessKind, ModifyKind, RemoveKind, RenameMode};

    use super::*;
    use crate::model::Package;

    #[test]
    fn is_interesting_flags_remove_and_rename_only() {
        assert!(is_interesting(&EventKind::Remove(RemoveKind::File)));
        assert!(is_interesting(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))));
        assert!(!is_interesting(&EventKind::Modify(ModifyKind::Data(
            notify::event::DataChange::Content
        ))));
        assert!(!is_interesting(&EventKind::Access(AccessKind::Close(
            notify::event::AccessMode::Write
        ))));
    }

    fn write_ok_script(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("fake-generator.sh");
        std::fs::write(&path, "#!/bin/sh\ntouch \"$(dirname \"$0\")/generated\"\nexit 0\n").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn setup() -> (tempfile::TempDir, Store, Generator, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let script = write_ok_script(dir.path());
        let generator = Generator::resolve(Some(&script)).unwrap();

        let store = Store::open_or_create(dir.path().join("repod.redb")).unwrap();

        std::fs::write(dir.path().join("a.rpm"), b"").unwrap();
        let mut repo = Repository::new("R1", dir.path());
        repo.packages.insert(
            "a.rpm".into(),
            Package {
                rel_path: "a.rpm".into(),
                repo_name: "R1".into(),
            },
        );
        store.persist_repository(&repo).unwrap();

        (dir, store, generator, repo)
    }

    #[tokio::test]
    async fn handle_event_removes_package_and_regenerates_on_remove() {
        let (dir, store, generator, repo) = setup();
        let locks = LockRegistry::new();

        let event = Event::new(EventKind::Remove(RemoveKind::File)).add_path(dir.path().join("a.rpm"));
        handle_event(&repo, &store, &locks, &generator, event).await;

        let loaded = store.load_repository("R1").unwrap().unwrap();
        assert!(!loaded.packages.contains_key("a.rpm"));
        assert!(dir.path().join("generated").exists());
    }

    #[tokio::test]
    async fn handle_event_ignores_touch_write_and_chmod_events() {
        let (dir, store, generator, repo) = setup();
        let locks = LockRegistry::new();

        let event = Event::new(EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)))
            .add_path(dir.path().join("a.rpm"));
        handle_event(&repo, &store, &locks, &generator, event).await;

        let loaded = store.load_repository("R1").unwrap().unwrap();
        assert!(loaded.packages.contains_key("a.rpm"));
        assert!(!dir.path().join("generated").exists());
    }

    /// Wires discovery, the Sweeper's drift check, and the watcher's event
    /// handler together end to end, against a fake generator script so the
    /// test never depends on a real `createrepo` installation.
    #[tokio::test]
    async fn discover_then_sweep_then_watcher_driven_removal() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_ok_script(dir.path());
        let generator = Generator::resolve(Some(&script)).unwrap();
        let locks = std::sync::Arc::new(LockRegistry::new());

        let repo_root = dir.path().join("repo");
        std::fs::create_dir_all(&repo_root).unwrap();
        std::fs::write(repo_root.join("a.rpm"), b"").unwrap();
        std::fs::write(repo_root.join("b.rpm"), b"").unwrap();

        let store = Store::open_or_create(dir.path().join("repod.redb")).unwrap();

        let outcome = crate::discovery::discover(&store, &locks, &generator, "scenario", &repo_root)
            .await
            .unwrap();
        assert_eq!(outcome.repo.packages.len(), 2);
        assert!(outcome.generated);

        assert!(crate::sweeper::sweep(&store).unwrap().is_empty());

        std::fs::remove_file(repo_root.join("b.rpm")).unwrap();
        let drifted = crate::sweeper::sweep(&store).unwrap();
        assert_eq!(drifted.len(), 1);
        assert_eq!(drifted[0].name, "scenario");

        let repo = store.load_repository("scenario").unwrap().unwrap();
        let event = Event::new(EventKind::Remove(RemoveKind::File)).add_path(repo_root.join("b.rpm"));
        handle_event(&repo, &store, &locks, &generator, event).await;

        let reconciled = store.load_repository("scenario").unwrap().unwrap();
        assert!(!reconciled.packages.contains_key("b.rpm"));
        assert!(reconciled.packages.contains_key("a.rpm"));
        assert!(crate::sweeper::sweep(&store).unwrap().is_empty());
    }
}
