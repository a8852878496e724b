// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Metadata Generator Invoker (§4.5): runs the external `createrepo`-style
//! tool against a repository root after its index changes.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

/// Bound on how much combined stdout/stderr is kept in a failure report.
const EXCERPT_LIMIT: usize = 4096;

#[derive(Debug, Error)]
pub enum Error {
    #[error("metadata generator {0:?} not found on PATH")]
    NotFound(String),
    #[error("metadata generator could not be launched")]
    Spawn(#[source] std::io::Error),
    #[error("metadata generator exited with {status}: {excerpt}")]
    Failed { status: String, excerpt: String },
}

/// The resolved, absolute path to the metadata generator binary, fixed once
/// at process start (§4.5: "resolved once at process start").
#[derive(Debug, Clone)]
pub struct Generator {
    binary: PathBuf,
}

impl Generator {
    /// Resolve the generator binary. If `explicit` is `None`, search `$PATH`
    /// for `createrepo_c` first, falling back to `createrepo`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, Error> {
        if let Some(path) = explicit {
            return Ok(Self {
                binary: path.to_path_buf(),
            });
        }

        for candidate in ["createrepo_c", "createrepo"] {
            if let Ok(path) = which::which(candidate) {
                return Ok(Self { binary: path });
            }
        }

        Err(Error::NotFound("createrepo_c or createrepo".to_owned()))
    }

    /// Invoke the generator against `abs_path`, waiting for it to complete.
    #[tracing::instrument(skip(self), fields(generator = %self.binary.display()))]
    pub async fn generate(&self, abs_path: &Path) -> Result<(), Error> {
        info!(root = %abs_path.display(), "invoking metadata generator");

        let output = Command::new(&self.binary)
            .arg("--update")
            .arg(abs_path)
            .output()
            .await
            .map_err(Error::Spawn)?;

        if output.status.success() {
            return Ok(());
        }

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        let mut excerpt = String::from_utf8_lossy(&combined).into_owned();
        truncate_at_char_boundary(&mut excerpt, EXCERPT_LIMIT);

        warn!(root = %abs_path.display(), status = %output.status, "metadata generator failed");

        Err(Error::Failed {
            status: output.status.to_string(),
            excerpt,
        })
    }
}

/// Truncate `s` to at most `limit` bytes, backing off to the nearest
/// preceding char boundary. `String::truncate` panics on a mid-character
/// split, which a raw byte limit over uncontrolled subprocess output cannot
/// rule out.
fn truncate_at_char_boundary(s: &mut String, limit: usize) {
    let mut boundary = limit.min(s.len());
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    s.truncate(boundary);
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn succeeds_on_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", "#!/bin/sh\nexit 0\n");

        let generator = Generator::resolve(Some(&script)).unwrap();
        generator.generate(dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn reports_non_zero_exit_with_excerpt() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "fail.sh",
            "#!/bin/sh\necho 'boom' >&2\nexit 1\n",
        );

        let generator = Generator::resolve(Some(&script)).unwrap();
        let err = generator.generate(dir.path()).await.unwrap_err();

        match err {
            Error::Failed { excerpt, .. } => assert!(excerpt.contains("boom")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn truncate_at_char_boundary_never_panics_on_a_split_multibyte_char() {
        // "é" is 2 bytes (0xC3 0xA9); a limit landing between them must back
        // off to the preceding boundary rather than splitting the char.
        let mut s = "x".repeat(4095) + "é";
        assert_eq!(s.len(), 4097);

        truncate_at_char_boundary(&mut s, EXCERPT_LIMIT);

        assert_eq!(s.len(), 4095);
        assert!(s.is_char_boundary(s.len()));
    }
}
