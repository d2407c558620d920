//! JSON file-backed persistence for Pixnet gateway state.
//!
//! Provides [`JsonStore`], a snapshot store that serializes a value to a
//! named JSON file under a state directory. Writes go to a temporary file
//! first and are renamed into place, so a crash mid-write never leaves a
//! truncated snapshot behind.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from snapshot persistence.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Filesystem operation failed.
    #[error("io error on {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Serialization to JSON failed.
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A named JSON snapshot file under a state directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    /// Create a store for `<state_dir>/<name>.json`.
    ///
    /// The state directory is created if it does not exist; failure to
    /// create it is logged and surfaces later as a save error.
    #[must_use]
    pub fn new(state_dir: &Path, name: &str) -> Self {
        if let Err(e) = fs::create_dir_all(state_dir) {
            warn!(dir = %state_dir.display(), error = %e, "failed to create state directory");
        }
        Self {
            path: state_dir.join(format!("{name}.json")),
        }
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, falling back to `T::default()` when the file is
    /// missing or unreadable.
    ///
    /// A corrupt snapshot is logged and treated as absent rather than
    /// aborting startup.
    #[must_use]
    pub fn load<T: DeserializeOwned + Default>(&self) -> T {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return T::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read snapshot");
                return T::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt snapshot ignored");
                T::default()
            }
        }
    }

    /// Save a snapshot atomically (write to `.tmp`, then rename).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem step fails.
    pub fn save<T: Serialize>(&self, value: &T) -> Result<(), PersistError> {
        let json = serde_json::to_vec_pretty(value)?;
        let tmp = self.path.with_extension("json.tmp");

        fs::write(&tmp, &json).map_err(|source| PersistError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| PersistError::Io {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = %self.path.display(), bytes = json.len(), "snapshot saved");
        Ok(())
    }
}
