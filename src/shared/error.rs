use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("watch root unavailable: {path}: {reason}")]
    WatchRootUnavailable { path: PathBuf, reason: String },
    #[error("failed to bind {addr}: {source}")]
    PortBindError {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("channel send failure: {0}")]
    ChannelSendFailure(String),
    #[error("file watch overflow, events may have been dropped: {0}")]
    TransientWatchOverflow(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("unsupported config format: {format}")]
    UnsupportedFormat { format: String },
    #[error("config parse error: {0}")]
    ParseConfigError(String),
    #[error("io error")]
    IoError(#[from] std::io::Error),
}
