//! # Client Configuration
//!
//! [`ClientConfig`] holds the knobs of a client actor. It deserializes with `serde`
//! (missing fields fall back to the defaults) so it can be embedded in an application's
//! own configuration file, and [`ClientConfig::from_env`] applies `ACCESS_*`
//! environment overrides on top of the defaults.
//!
//! | Field | Default | Environment |
//! |-------|---------|-------------|
//! | `mailbox_capacity` | 32 | `ACCESS_MAILBOX_CAPACITY` |
//! | `request_timeout_ms` | 30000 | `ACCESS_REQUEST_TIMEOUT_MS` |
//! | `max_retries` | 5 | `ACCESS_MAX_RETRIES` |

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Capacity of the actor's command mailbox.
    pub mailbox_capacity: usize,
    /// How long the head request may stay unanswered before it is retried.
    pub request_timeout_ms: u64,
    /// Retransmissions allowed per request before it fails.
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 32,
            request_timeout_ms: 30_000,
            max_retries: 5,
        }
    }
}

impl ClientConfig {
    /// Defaults, overridden by any `ACCESS_*` environment variables that are set.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(capacity) = parse_override(&lookup, "ACCESS_MAILBOX_CAPACITY") {
            self = self.with_mailbox_capacity(capacity);
        }
        if let Some(timeout) = parse_override(&lookup, "ACCESS_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = timeout;
        }
        if let Some(retries) = parse_override(&lookup, "ACCESS_MAX_RETRIES") {
            self.max_retries = retries;
        }
        self
    }
}

fn parse_override<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_reference_timeout() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.mailbox_capacity, 32);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ClientConfig = serde_json::from_str(r#"{ "max_retries": 2 }"#).unwrap();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.request_timeout_ms, 30_000);
    }

    #[test]
    fn test_overrides_skip_bad_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ACCESS_REQUEST_TIMEOUT_MS", "1500"),
            ("ACCESS_MAX_RETRIES", "lots"),
            ("ACCESS_MAILBOX_CAPACITY", "0"),
        ]);
        let config =
            ClientConfig::default().with_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.request_timeout(), Duration::from_millis(1500));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.mailbox_capacity, 1);
    }
}
