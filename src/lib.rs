//! Queued, batched delivery of metrics to a Graphite plaintext collector.

use std::{fmt, time::SystemTime};

pub mod buf;
pub mod codec;
pub mod config;
pub mod error;
pub mod exporter;
pub mod key;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use exporter::{ClientBuilder, GraphiteClient, MetricSender, MetricStream, SubmitStats};
pub use key::{MetricKey, Tags};
pub use tokio_util::sync::CancellationToken;

/// One measurement waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    key: MetricKey,
    value: String,
    time: SystemTime,
}
impl Sample {
    /// `value` is forwarded verbatim; it must be non-empty and free of
    /// whitespace to keep the line well formed.
    pub fn new(key: MetricKey, value: impl Into<String>, time: SystemTime) -> Result<Self> {
        let value = value.into();
        if value.is_empty() || value.chars().any(char::is_whitespace) {
            return Err(Error::InvalidValue(value));
        }
        Ok(Self { key, value, time })
    }

    pub fn key(&self) -> &MetricKey {
        &self.key
    }
    pub fn value(&self) -> &str {
        &self.value
    }
    pub fn time(&self) -> SystemTime {
        self.time
    }
}

/// The wire line, without newline.
impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        codec::encode_sample(f, self)
    }
}
