// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::Args;
use thiserror::Error;

use crate::cli::Global;
use crate::settings::Settings;
use crate::{environment, store};

#[derive(Debug, Args)]
pub struct Command {
    /// Also print each repository's packages.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("resolve database path")]
    Environment(#[from] environment::Error),
    #[error("open index store")]
    Store(#[from] store::Error),
}

pub fn handle(command: Command, global: &Global, settings: &Settings) -> Result<(), Error> {
    let database_path = super::database_path(global, settings)?;
    let store = store::Store::open_or_create(database_path)?;

    let mut repos = store.list_repositories()?;
    repos.sort_by(|a, b| a.name.cmp(&b.name));

    for repo in repos {
        println!("{}\t{}", repo.name, repo.abs_path.display());
        if command.verbose {
            for rel_path in repo.rel_paths() {
                println!("  {rel_path}");
            }
        }
    }

    store.close();
    Ok(())
}
