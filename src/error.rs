use std::{io, time::Duration};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Neither a connection nor an address was given to the builder.
    #[error("no address specified for Graphite server")]
    NoAddress,
    #[error("failed to connect to Graphite server at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("cancelled")]
    Cancelled,
    #[error("timed out after {0:?} waiting for a free queue slot")]
    Timeout(Duration),
    #[error("metric name must have at least one segment")]
    EmptyName,
    #[error("invalid metric name segment: {0:?}")]
    InvalidSegment(String),
    #[error("invalid tag: {key:?}={value:?}")]
    InvalidTag { key: String, value: String },
    #[error("invalid metric value: {0:?}")]
    InvalidValue(String),
    #[error("malformed metric line: {0}")]
    Parse(String),
    /// Every attempt to write one batch failed; `source` is the last error.
    #[error("failed to send metrics after {attempts} tries: {source}")]
    WriteExhausted {
        attempts: usize,
        #[source]
        source: io::Error,
    },
    #[error("client has stopped and cannot submit again")]
    Stopped,
    #[error("metric queue closed")]
    QueueClosed,
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
