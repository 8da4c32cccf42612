use core::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::io;

use thiserror::Error;

pub type Result<T, E = OcflError> = core::result::Result<T, E>;

/// All errors surfaced by the library.
///
/// Structural errors (`InvalidPath` through `InventoryKey`) indicate that a value violates
/// one of the inventory's internal rules. `Validation` wraps a coded spec-rule violation.
/// `Io` wraps backend failures with the operation and path that failed.
#[derive(Error)]
pub enum OcflError {
    #[error("Invalid path '{0}'")]
    InvalidPath(String),

    #[error("Conflicting path '{0}'")]
    PathConflict(String),

    #[error("Conflicting digest '{0}'")]
    DigestConflict(String),

    #[error("Digest {0} is not present in the manifest and no source file was supplied for it")]
    MissingDigest(String),

    #[error("Unknown digest algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("Unexpected inventory field '{0}'")]
    InventoryKey(String),

    #[error("[{code}] {message}")]
    Validation { code: String, message: String },

    #[error("Failed to {operation} '{path}': {source}")]
    Io {
        operation: &'static str,
        path: String,
        source: io::Error,
    },

    #[error("Digest mismatch on '{path}': expected {algorithm} {expected}; got {got}")]
    DigestMismatch {
        path: String,
        algorithm: String,
        expected: String,
        got: String,
    },

    #[error("{0}")]
    Protocol(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("The storage root does not have a usable storage layout; object ids cannot be resolved")]
    LayoutUnbound,

    #[error("{original} (cleanup of the partial version also failed: {cleanup})")]
    CleanupFailed {
        original: Box<OcflError>,
        cleanup: String,
    },

    #[error("{0}")]
    Serde(#[from] serde_json::Error),
}

impl OcflError {
    /// Wraps an io error with the operation that was being performed and the path it targeted
    pub fn io(operation: &'static str, path: impl Into<String>, source: io::Error) -> Self {
        OcflError::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Constructs an `OcflError::NotFound` for an object, optionally qualified by a version
pub fn not_found(object_id: &str, version: Option<&str>) -> OcflError {
    match version {
        Some(version) => OcflError::NotFound(format!("Object {object_id} version {version}")),
        None => OcflError::NotFound(format!("Object {object_id}")),
    }
}

impl Debug for OcflError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}
