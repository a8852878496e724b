// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Path resolution that doesn't belong to any single component: the
//! program name used for [`config::Manager`] scoping, and the database's
//! default location (§6: "alongside the executable").

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const PROGRAM: &str = "repod";

const DATABASE_FILE_NAME: &str = "repod.redb";

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to locate the running executable")]
    CurrentExe(#[source] io::Error),
}

/// The database path used when neither `--database` nor the configuration
/// document names one: the directory containing the running executable.
pub fn default_database_path() -> Result<PathBuf, Error> {
    let exe = std::env::current_exe().map_err(Error::CurrentExe)?;
    let dir = exe.parent().map(Path::to_owned).unwrap_or_else(|| PathBuf::from("."));
    Ok(dir.join(DATABASE_FILE_NAME))
}
