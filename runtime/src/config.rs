//! Configuration for the reconciler runtime.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Default key prefix under which snapshots are persisted
pub const DEFAULT_SNAPSHOT_KEY_PREFIX: &str = "entitlements.snapshot";

/// Default event channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Default graceful shutdown timeout in seconds
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Reconciler runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Prefix for every key the snapshot store writes
    pub snapshot_key_prefix: String,
    /// Buffered events per subscriber before the oldest are dropped
    pub event_capacity: usize,
    /// How long `shutdown` waits for in-flight effects
    pub shutdown_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            snapshot_key_prefix: DEFAULT_SNAPSHOT_KEY_PREFIX.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

impl ReconcilerConfig {
    /// Load configuration from environment variables.
    ///
    /// - `ENTITLEMENTS_SNAPSHOT_KEY_PREFIX`
    /// - `ENTITLEMENTS_EVENT_CAPACITY`
    /// - `ENTITLEMENTS_SHUTDOWN_TIMEOUT_SECS`
    ///
    /// Missing or unparsable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let event_capacity = lookup("ENTITLEMENTS_EVENT_CAPACITY")
            .and_then(|s| s.trim().parse().ok())
            .filter(|capacity: &usize| *capacity > 0)
            .unwrap_or(DEFAULT_EVENT_CAPACITY);

        Self {
            snapshot_key_prefix: lookup("ENTITLEMENTS_SNAPSHOT_KEY_PREFIX")
                .filter(|prefix| !prefix.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SNAPSHOT_KEY_PREFIX.to_string()),
            event_capacity,
            shutdown_timeout: Duration::from_secs(
                lookup("ENTITLEMENTS_SHUTDOWN_TIMEOUT_SECS")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            ),
        }
    }

    /// Set the snapshot key prefix
    #[must_use]
    pub fn with_snapshot_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.snapshot_key_prefix = prefix.into();
        self
    }

    /// Set the event channel capacity
    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
