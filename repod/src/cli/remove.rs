// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::Args;
use thiserror::Error;

use crate::cli::Global;
use crate::lock::LockRegistry;
use crate::settings::Settings;
use crate::{environment, store};

#[derive(Debug, Args)]
pub struct Command {
    /// Name of the repository to remove.
    pub name: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("resolve database path")]
    Environment(#[from] environment::Error),
    #[error("open index store")]
    Store(#[from] store::Error),
}

/// Atomic removal of a repository and its packages (§6). No filesystem
/// changes are made; this only affects the index store.
pub fn handle(command: Command, global: &Global, settings: &Settings) -> Result<(), Error> {
    let database_path = super::database_path(global, settings)?;
    let store = store::Store::open_or_create(database_path)?;
    let locks = LockRegistry::new();

    crate::runtime::block_on(async {
        let _lock = locks.acquire(&command.name).await;
        store.remove_repository(&command.name)
    })?;
    println!("removed {:?}", command.name);

    store.close();
    Ok(())
}
