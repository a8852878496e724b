// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use thiserror::Error;

use crate::cli::Global;
use crate::lock::LockRegistry;
use crate::settings::Settings;
use crate::{discovery, environment, generator, runtime, store};

#[derive(Debug, Args)]
pub struct Command {
    /// Name under which the repository is registered.
    pub name: String,
    /// Absolute path to the repository root.
    pub abs_path: PathBuf,
    /// Metadata generator binary, overriding auto-discovery on `$PATH`.
    #[arg(long)]
    pub generator: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("resolve database path")]
    Environment(#[from] environment::Error),
    #[error("open index store")]
    Store(#[from] store::Error),
    #[error("resolve metadata generator")]
    Generator(#[from] generator::Error),
    #[error("discover repository")]
    Discover(#[from] discovery::Error),
}

pub fn handle(command: Command, global: &Global, settings: &Settings) -> Result<(), Error> {
    let database_path = super::database_path(global, settings)?;
    let store = store::Store::open_or_create(database_path)?;
    let generator_path = command.generator.as_deref().or(settings.generator.as_deref());
    let generator = generator::Generator::resolve(generator_path)?;
    let locks = Arc::new(LockRegistry::new());

    let outcome = runtime::block_on(discovery::discover(
        &store,
        &locks,
        &generator,
        &command.name,
        &command.abs_path,
    ))?;

    println!(
        "discovered {:?} with {} package(s){}",
        outcome.repo.name,
        outcome.repo.packages.len(),
        if outcome.generated { "" } else { " (metadata generation failed, see logs)" }
    );

    store.close();
    Ok(())
}
