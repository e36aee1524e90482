//! Typed entitlement event channel.
//!
//! Every observable outcome of the reconciler is published here: per-option
//! deltas, full restores, cold-start seeds and purchase failures. Consumers
//! subscribe instead of being injected as a single delegate.

use entitlements_core::entitlement::{EntitlementSnapshot, EntitlementState};
use entitlements_core::error::EntitlementError;
use entitlements_core::option::PurchaseOption;
use tokio::sync::broadcast;

/// An outcome published by the reconciler.
#[derive(Clone, Debug, PartialEq)]
pub enum EntitlementEvent {
    /// An option's entitlement changed (or was re-confirmed)
    Updated {
        /// The option the state belongs to
        option: PurchaseOption,
        /// Its new state
        state: EntitlementState,
    },
    /// A full re-sync completed
    Restored {
        /// The resulting authoritative snapshot
        snapshot: EntitlementSnapshot,
    },
    /// The persisted snapshot was installed at cold start (not authoritative)
    Seeded {
        /// Cached snapshot
        snapshot: EntitlementSnapshot,
    },
    /// A purchase attempt failed; the snapshot was not touched
    PurchaseFailed {
        /// The option the user tried to buy
        option: PurchaseOption,
        /// Why it failed
        error: EntitlementError,
    },
}

impl EntitlementEvent {
    /// Short label for logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Updated { .. } => "updated",
            Self::Restored { .. } => "restored",
            Self::Seeded { .. } => "seeded",
            Self::PurchaseFailed { .. } => "purchase_failed",
        }
    }
}

/// Fan-out channel for [`EntitlementEvent`]s.
///
/// Publishing never blocks and never fails when nobody is subscribed.
/// Subscribers that fall more than `capacity` events behind lose the oldest ones.
#[derive(Clone, Debug)]
pub struct EventChannel {
    sender: broadcast::Sender<EntitlementEvent>,
}

impl EventChannel {
    /// Create a channel buffering up to `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EntitlementEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: EntitlementEvent) {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::trace!(kind, receivers, "Published entitlement event");
            },
            Err(_) => {
                tracing::trace!(kind, "No subscribers for entitlement event");
            },
        }
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CAPACITY)
    }
}
