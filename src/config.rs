use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Samples buffered before producers start waiting.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1000;
/// Samples written per message.
pub const DEFAULT_MAX_METRICS_PER_MESSAGE: usize = 1;
/// Write attempts per message before the submit loop gives up.
pub const DEFAULT_MAX_TRIES: usize = 3;

/// Tuning for [`GraphiteClient`](crate::GraphiteClient).
///
/// A zero count means "unset" and is replaced by its default when the client
/// is built; it never disables the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub max_buffer_size: usize,
    pub max_metrics_per_message: usize,
    pub max_tries: usize,
    /// Pause between failed write attempts of the same message. Zero retries
    /// immediately.
    #[serde(with = "humantime_duration")]
    pub retry_delay: Duration,
}
impl ClientConfig {
    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }
    pub fn with_max_metrics_per_message(mut self, max_metrics_per_message: usize) -> Self {
        self.max_metrics_per_message = max_metrics_per_message;
        self
    }
    pub fn with_max_tries(mut self, max_tries: usize) -> Self {
        self.max_tries = max_tries;
        self
    }
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn normalized(self) -> Self {
        fn or_default(value: usize, default: usize) -> usize {
            if value == 0 {
                default
            } else {
                value
            }
        }
        Self {
            max_buffer_size: or_default(self.max_buffer_size, DEFAULT_MAX_BUFFER_SIZE),
            max_metrics_per_message: or_default(
                self.max_metrics_per_message,
                DEFAULT_MAX_METRICS_PER_MESSAGE,
            ),
            max_tries: or_default(self.max_tries, DEFAULT_MAX_TRIES),
            retry_delay: self.retry_delay,
        }
    }
}
impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_metrics_per_message: DEFAULT_MAX_METRICS_PER_MESSAGE,
            max_tries: DEFAULT_MAX_TRIES,
            retry_delay: Duration::ZERO,
        }
    }
}

mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_default() {
        let config = ClientConfig {
            max_buffer_size: 0,
            max_metrics_per_message: 0,
            max_tries: 0,
            retry_delay: Duration::ZERO,
        }
        .normalized();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.max_buffer_size, 1000);
        assert_eq!(config.max_metrics_per_message, 1);
        assert_eq!(config.max_tries, 3);
    }

    #[test]
    fn explicit_values_survive_normalization() {
        let config = ClientConfig::default()
            .with_max_buffer_size(10)
            .with_max_metrics_per_message(2)
            .with_max_tries(1)
            .normalized();
        assert_eq!(config.max_buffer_size, 10);
        assert_eq!(config.max_metrics_per_message, 2);
        assert_eq!(config.max_tries, 1);
    }

    #[test]
    fn deserializes_partial_config() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"max_tries": 5, "retry_delay": "250ms"}"#).unwrap();
        assert_eq!(config.max_tries, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.max_buffer_size, DEFAULT_MAX_BUFFER_SIZE);
    }

    #[test]
    fn rejects_unparseable_delay() {
        let res = serde_json::from_str::<ClientConfig>(r#"{"retry_delay": "soon"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn serializes_delay_as_text() {
        let config = ClientConfig::default().with_retry_delay(Duration::from_secs(2));
        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["retry_delay"], "2s");
    }
}
