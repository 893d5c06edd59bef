use std::path::PathBuf;

use thiserror::Error;
use tokio::task::JoinError;

#[derive(Error, Debug)]
pub enum KiIngestorError {
    #[error("Bad Connection String: {0}")]
    Format(#[from] DsnError),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't open {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Line {line} is not valid JSON: {source}")]
    Decode {
        line: u64,
        source: serde_json::Error,
    },

    #[error("Unsupported transport {0:?}, expected tcp, http or https")]
    UnsupportedTransport(String),

    #[error("Http Client Error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Pipeline Clog: ingestion pool closed before the input ran out")]
    PoolClosed,

    #[error("Ingestion task died: {0}")]
    TaskDied(#[from] JoinError),
}

/// Failures while parsing a connection string. All of them are fatal and
/// happen before any input is touched.
#[derive(Error, Debug)]
pub enum DsnError {
    #[error("{0:?} does not look like [user[:password]@][transport[(address)]]/database[?params]")]
    NoMatch(String),

    #[error("unknown time zone {name:?}: {reason}")]
    UnknownTimeZone { name: String, reason: String },

    #[error("invalid duration {literal:?}: {reason}")]
    InvalidDuration { literal: String, reason: String },
}

/// A store refused or never received a write. Workers report these and move on.
#[derive(Error, Debug)]
pub enum RemoteWriteError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("store answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("store rejected write: {0}")]
    Rejected(String),
}
