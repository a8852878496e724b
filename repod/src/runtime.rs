// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::future::Future;

use tokio::runtime;

/// Run the provided future on a single-use runtime that is dropped before
/// returning. Used by the synchronous CLI subcommands (`discover`, `list`,
/// `remove`), which each need a handful of async calls without requiring the
/// whole process to run under `#[tokio::main]`.
pub fn block_on<T, F>(task: F) -> T
where
    F: Future<Output = T>,
{
    let temp_rt = runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("temp runtime");
    temp_rt.block_on(task)
}
