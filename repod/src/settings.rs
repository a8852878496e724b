// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The settings document loaded by [`config::Manager`] (§2.1/§6): database
//! path, generator binary, sweep interval, HTTP bind address, and the
//! Static File Host's mounts. Every field is optional on disk; absent
//! fields fall back to built-in defaults, and command-line flags override
//! whatever is loaded here.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use config::Config;
use serde::{Deserialize, Serialize};

use crate::serve::Mount;
use crate::sweeper;

fn default_bind() -> SocketAddr {
    "0.0.0.0:3000".parse().expect("valid default bind address")
}

fn default_sweep_interval_secs() -> u64 {
    sweeper::DEFAULT_INTERVAL.as_secs()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: Option<PathBuf>,
    pub generator: Option<PathBuf>,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    pub mounts: Vec<Mount>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: None,
            generator: None,
            sweep_interval_secs: default_sweep_interval_secs(),
            bind: default_bind(),
            mounts: Vec::new(),
        }
    }
}

impl Settings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Config for Settings {
    fn domain() -> String {
        "repod".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_built_in_constants() {
        let settings = Settings::default();
        assert_eq!(settings.sweep_interval(), sweeper::DEFAULT_INTERVAL);
        assert_eq!(settings.bind, default_bind());
        assert!(settings.mounts.is_empty());
    }

    #[test]
    fn round_trips_through_yaml() {
        let settings = Settings {
            database: Some(PathBuf::from("/var/lib/repod/repod.redb")),
            generator: Some(PathBuf::from("/usr/bin/createrepo_c")),
            sweep_interval_secs: 30,
            bind: "127.0.0.1:8080".parse().unwrap(),
            mounts: vec![Mount {
                prefix: "updates".into(),
                abs_path: "/srv/repos/updates".into(),
            }],
        };

        let yaml = serde_yaml::to_string(&settings).unwrap();
        let parsed: Settings = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.sweep_interval_secs, 30);
        assert_eq!(parsed.mounts.len(), 1);
    }
}
