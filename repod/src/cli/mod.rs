// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand as ClapSubcommand};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_common::{OutputDestination, OutputFormat};

mod discover;
mod list;
mod remove;
mod serve;

use crate::{environment, settings};

#[derive(Debug, Parser)]
#[command(name = "repod", version)]
pub struct Command {
    #[command(flatten)]
    pub global: Global,
    #[command(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Debug, clap::Args)]
pub struct Global {
    /// Path to an explicit configuration document, overriding the system/user scope lookup.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Index store location, overriding the configuration document and the built-in default.
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,
    /// Minimum severity to log.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: LogLevel,
    /// Log output encoding.
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,
    /// Append logs to this file instead of stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl From<LogFormat> for OutputFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Text => OutputFormat::Text,
            LogFormat::Json => OutputFormat::Json,
        }
    }
}

#[derive(Debug, ClapSubcommand)]
pub enum Subcommand {
    Discover(discover::Command),
    List(list::Command),
    Remove(remove::Command),
    Serve(serve::Command),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("discover")]
    Discover(#[from] discover::Error),
    #[error("list")]
    List(#[from] list::Error),
    #[error("remove")]
    Remove(#[from] remove::Error),
    #[error("serve")]
    Serve(#[from] serve::Error),
    #[error("load configuration")]
    Config(#[from] config::CreateUserError),
}

pub fn process() -> Result<(), Error> {
    let Command { global, subcommand } = Command::parse();

    init_logging(&global);

    let manager = config_manager(&global)?;
    // `Manager::load` orders entries least-specific to most-specific (vendor,
    // then admin, then, for the user scope, the user's own document last);
    // the most specific document present wins.
    let settings: settings::Settings = manager
        .load::<settings::Settings>()
        .into_iter()
        .last()
        .unwrap_or_default();

    match subcommand {
        Subcommand::Discover(command) => discover::handle(command, &global, &settings)?,
        Subcommand::List(command) => list::handle(command, &global, &settings)?,
        Subcommand::Remove(command) => remove::handle(command, &global, &settings)?,
        Subcommand::Serve(command) => serve::handle(command, &global, &settings)?,
    }

    Ok(())
}

fn init_logging(global: &Global) {
    let destination = match &global.log_file {
        Some(path) => OutputDestination::File(path.to_string_lossy().into_owned()),
        None => OutputDestination::Stderr,
    };
    tracing_common::init(global.log_format.into(), global.log_level.into(), destination);
}

fn config_manager(global: &Global) -> Result<config::Manager, config::CreateUserError> {
    if let Some(path) = &global.config {
        Ok(config::Manager::custom(path))
    } else {
        config::Manager::user(environment::PROGRAM)
    }
}

/// Resolve the database path: `--database` overrides the configuration
/// document, which overrides the built-in default.
pub(crate) fn database_path(global: &Global, settings: &settings::Settings) -> Result<PathBuf, environment::Error> {
    if let Some(path) = &global.database {
        return Ok(path.clone());
    }
    if let Some(path) = &settings.database {
        return Ok(path.clone());
    }
    environment::default_database_path()
}

pub(crate) fn bind_addr(cli_override: Option<SocketAddr>, settings: &settings::Settings) -> SocketAddr {
    cli_override.unwrap_or(settings.bind)
}
