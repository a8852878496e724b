// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

mod cli;
mod discovery;
mod environment;
mod generator;
mod lock;
mod model;
mod runtime;
mod serve;
mod settings;
mod store;
mod supervisor;
mod sweeper;
mod watcher;

use tracing::error;

use crate::cli::Error;

fn main() {
    if let Err(err) = cli::process() {
        report_error(err);
        std::process::exit(1);
    }
}

/// Report an execution error to the user, preserving the full source chain.
fn report_error(error: Error) {
    let chain = std::iter::successors(Some(&error as &dyn std::error::Error), |e| e.source())
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(": ");

    error!(%chain, "command execution failed");
    println!("Error: {chain}");
}
