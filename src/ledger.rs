use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, instrument};

/// Errors returned by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to read ledger file `{path}`")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to append to ledger file `{path}`")]
    Append {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create ledger directory `{path}`")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Append-only record of device identities that have been through the
/// acceptance sequence.
///
/// Backed by a flat UTF-8 text file, one identity per line. Entries are
/// never removed or rewritten; membership is re-read from disk on every
/// call so an operator can inspect or back up the file between runs.
/// Callers must serialise `record_if_new` — a single test station with a
/// single writer is assumed.
#[derive(Debug, Clone)]
pub struct DeviceLedger {
    path: PathBuf,
}

impl DeviceLedger {
    /// Opens a ledger at `path`. The backing file is created lazily on the
    /// first append; a missing file reads as an empty ledger.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records `identity` unless it is already present.
    ///
    /// Returns `true` when the identity was already in the ledger (nothing
    /// is appended), `false` when it was appended now.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing file cannot be read or appended.
    #[instrument(skip(self), level = "debug", fields(path = %self.path.display()))]
    pub fn record_if_new(&self, identity: &str) -> Result<bool, LedgerError> {
        if self.contains(identity)? {
            info!(identity, "device already recorded in ledger");
            return Ok(true);
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| LedgerError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| LedgerError::Append {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{identity}").map_err(|source| LedgerError::Append {
            path: self.path.clone(),
            source,
        })?;

        info!(identity, "recorded newly tested device");
        Ok(false)
    }

    fn contains(&self, identity: &str) -> Result<bool, LedgerError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(source) => {
                return Err(LedgerError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        Ok(contents.lines().any(|line| line == identity))
    }
}
