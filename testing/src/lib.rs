//! # Entitlements Testing
//!
//! Testing utilities for the entitlement crates.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - Scripted and in-memory collaborators ([`mocks`])
//! - Option and transaction fixtures ([`fixtures`])
//! - A Given/When/Then harness for reducers ([`ReducerTest`])
//!
//! ## Example
//!
//! ```ignore
//! use entitlements_testing::{fixtures, mocks::MockTransactionSource, test_clock};
//!
//! #[tokio::test]
//! async fn test_renewal_is_acknowledged() {
//!     let source = Arc::new(MockTransactionSource::new());
//!     let reconciler = Reconciler::new(test_clock(), source.clone(), /* ... */);
//!     reconciler.start_listening(fixtures::catalog()).await.unwrap();
//!
//!     source.push(fixtures::unlock(&fixtures::lifetime(), "tx-1").into());
//!     source.wait_for_finished(1, Duration::from_secs(1)).await;
//! }
//! ```

use chrono::{DateTime, Utc};
use entitlements_core::environment::Clock;

mod collaborators;
pub mod fixtures;

pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations of environment traits and collaborators
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use parking_lot::Mutex;
    use std::sync::Arc;

    pub use crate::collaborators::{
        InMemoryKeyValueStore, MockProductCatalog, MockPurchaseInitiator, MockTransactionSource,
    };

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use entitlements_testing::mocks::FixedClock;
    /// use entitlements_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when told to
    ///
    /// Clones share the same time, so a test can keep one copy and hand the
    /// other to the code under test.
    ///
    /// ```
    /// use entitlements_testing::mocks::ManualClock;
    /// use entitlements_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = ManualClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.advance(Duration::days(31));
    /// assert_eq!(clock.now() - before, Duration::days(31));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock();
            *time += by;
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock() = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock()
        }
    }
}

/// Install a test-friendly `tracing` subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new(test_clock().now());
        let shared = clock.clone();

        clock.advance(chrono::Duration::hours(2));

        assert_eq!(shared.now(), test_clock().now() + chrono::Duration::hours(2));
    }
}
