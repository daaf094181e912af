use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ArtifactError;
use crate::record::RawRecord;

/// Read the crawl artifact: one JSON array of objects.
pub fn read_records(path: &Path) -> Result<Vec<RawRecord>, ArtifactError> {
    let bytes = std::fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ArtifactError::Missing(path.to_path_buf())
        } else {
            ArtifactError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let value: Value = serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let Value::Array(items) = value else {
        return Err(ArtifactError::NotArray(path.to_path_buf()));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(RawRecord(map)),
            _ => Err(ArtifactError::NotArray(path.to_path_buf())),
        })
        .collect()
}

/// Records produced by the last crawl, or `None` when there is nothing new.
///
/// A missing, empty or unreadable artifact is "no new data", never a failure.
pub fn new_data(path: &Path) -> Option<Vec<RawRecord>> {
    match read_records(path) {
        Ok(records) if records.is_empty() => {
            debug!(path = %path.display(), "Artifact is empty");
            None
        }
        Ok(records) => Some(records),
        Err(ArtifactError::Missing(_)) => {
            debug!(path = %path.display(), "No artifact produced");
            None
        }
        Err(e) => {
            warn!(error = %e, "Ignoring unusable artifact");
            None
        }
    }
}

/// Delete an artifact left behind by an earlier run.
pub fn remove_stale(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
