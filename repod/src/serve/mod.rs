// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Static File Host (§4.9): serves each repository root under a URL prefix
//! equal to its name, plus a `/healthz` liveness endpoint (expansion, §6).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Debug, Error)]
pub enum Error {
    #[error("prefix {0:?} is mounted by more than one repository")]
    DuplicatePrefix(String),
    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server error")]
    Serve(#[source] std::io::Error),
}

/// A single `{prefix, absPath}` mount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    pub prefix: String,
    pub abs_path: PathBuf,
}

#[derive(Clone)]
struct AppState {
    ready: watch::Receiver<bool>,
}

/// Build the router for the given mounts. Fails if two mounts share a prefix.
fn router(mounts: &[Mount], ready: watch::Receiver<bool>) -> Result<Router, Error> {
    let mut seen = HashSet::new();
    let mut router = Router::new().route("/healthz", get(healthz)).with_state(AppState { ready });

    for mount in mounts {
        if !seen.insert(mount.prefix.clone()) {
            return Err(Error::DuplicatePrefix(mount.prefix.clone()));
        }

        let route = format!("/{}", mount.prefix.trim_matches('/'));
        router = router.nest_service(&route, ServeDir::new(&mount.abs_path));
    }

    Ok(router.layer(TraceLayer::new_for_http()))
}

async fn healthz(State(state): State<AppState>) -> StatusCode {
    if *state.ready.borrow() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Serve `mounts` on `addr` until `shutdown` resolves.
pub async fn run(
    addr: SocketAddr,
    mounts: Vec<Mount>,
    ready: watch::Receiver<bool>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Error> {
    let app = router(&mounts, ready)?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Bind { addr, source })?;

    info!(%addr, mounts = mounts.len(), "static file host listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(Error::Serve)
}
