//! Error taxonomy for the crawl → load pipeline.
//!
//! Each error belongs to one boundary: validation errors stay inside a batch,
//! crawl/artifact/persistence errors stay inside a target. Nothing here is
//! surfaced to the process exit status except through the run report.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A raw record that could not be turned into a canonical one.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CrawlFailure {
    #[error("failed to start crawl process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("crawl timed out after {0:?}")]
    Timeout(Duration),

    #[error(
        "crawl exited with status {}",
        .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into())
    )]
    Exit { code: Option<i32> },

    #[error("failed to wait for crawl process: {0}")]
    Wait(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("failed to read artifact {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact {} is not a JSON array of objects", .0.display())]
    NotArray(PathBuf),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("failed to open destination store {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to prepare store location {}: {source}", .path.display())]
    Location {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid destination table name: {0:?}")]
    InvalidTable(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
