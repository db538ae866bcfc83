use std::time::Duration;

use serde::{Deserialize, Deserializer, de::Error as _};

/// Runtime knobs of a [`crate::Server`].
///
/// Deserializable so hosts can embed it in their own configuration files; every field has a
/// default, durations are written the human way (`5s`, `250ms`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// How long an outgoing request waits for the peer's response before failing
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// How often every connection is swept for timed-out outgoing requests.  Must not be zero.
    #[serde(deserialize_with = "nonzero_interval")]
    pub tick_interval: Duration,

    /// If set, how often the current server status is broadcast to every connection.  Must not be
    /// zero.
    #[serde(deserialize_with = "optional_nonzero_interval")]
    pub status_heartbeat_interval: Option<Duration>,

    /// Longest message, in bytes, accepted by the line-delimited acceptor
    pub max_message_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            tick_interval: Duration::from_secs(1),
            status_heartbeat_interval: None,
            max_message_length: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Shortest period the server will run a periodic task at.  Shorter intervals set in code are
    /// raised to this.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);
}

fn nonzero_interval<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let interval: Duration = humantime_serde::deserialize(deserializer)?;
    if interval.is_zero() {
        return Err(D::Error::custom("interval must be greater than zero"));
    }
    Ok(interval)
}

fn optional_nonzero_interval<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    let interval: Option<Duration> = humantime_serde::deserialize(deserializer)?;
    if interval.is_some_and(|interval| interval.is_zero()) {
        return Err(D::Error::custom("interval must be greater than zero"));
    }
    Ok(interval)
}
