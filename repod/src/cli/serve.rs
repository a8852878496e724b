// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use thiserror::Error;

use crate::cli::Global;
use crate::settings::Settings;
use crate::{environment, generator, store, supervisor};

#[derive(Debug, Args)]
pub struct Command {
    /// Metadata generator binary, overriding auto-discovery on `$PATH`.
    #[arg(long)]
    pub generator: Option<PathBuf>,
    /// Reconciliation sweep interval, in seconds.
    #[arg(long)]
    pub sweep_interval: Option<u64>,
    /// Address to bind the static file host to.
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("resolve database path")]
    Environment(#[from] environment::Error),
    #[error("open index store")]
    Store(#[from] store::Error),
    #[error("resolve metadata generator")]
    Generator(#[from] generator::Error),
    #[error("supervisor")]
    Supervisor(#[from] supervisor::Error),
}

pub fn handle(command: Command, global: &Global, settings: &Settings) -> Result<(), Error> {
    let database_path = super::database_path(global, settings)?;
    let store = Arc::new(store::Store::open_or_create(database_path)?);

    let generator_path = command.generator.as_deref().or(settings.generator.as_deref());
    let generator = Arc::new(generator::Generator::resolve(generator_path)?);

    let sweep_interval = command
        .sweep_interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| settings.sweep_interval());
    let bind_addr = super::bind_addr(command.bind, settings);

    let config = supervisor::Config {
        sweep_interval,
        bind_addr,
        extra_mounts: settings.mounts.clone(),
    };

    crate::runtime::block_on(supervisor::run(store, generator, config))?;

    Ok(())
}
