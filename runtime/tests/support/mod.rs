//! Shared harness for reconciler integration tests

#![allow(dead_code)] // Each test binary uses a subset
#![allow(clippy::unwrap_used)]

use entitlements_core::source::{KeyValueStore, PurchaseInitiator, TransactionSource};
use entitlements_runtime::{EntitlementEvent, Reconciler, ReconcilerConfig};
use entitlements_testing::mocks::{InMemoryKeyValueStore, MockPurchaseInitiator, MockTransactionSource};
use entitlements_testing::{ManualClock, test_clock};
use entitlements_core::environment::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const TIMEOUT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub clock: ManualClock,
    pub source: Arc<MockTransactionSource>,
    pub purchaser: Arc<MockPurchaseInitiator>,
    pub storage: Arc<InMemoryKeyValueStore>,
    pub reconciler: Arc<Reconciler<ManualClock>>,
}

pub fn harness() -> Harness {
    harness_with(Arc::new(InMemoryKeyValueStore::new()))
}

pub fn harness_with(storage: Arc<InMemoryKeyValueStore>) -> Harness {
    entitlements_testing::init_test_tracing();

    let clock = ManualClock::new(test_clock().now());
    let source = Arc::new(MockTransactionSource::new());
    let purchaser = Arc::new(MockPurchaseInitiator::new());
    let reconciler = Reconciler::new(
        clock.clone(),
        Arc::clone(&source) as Arc<dyn TransactionSource>,
        Arc::clone(&purchaser) as Arc<dyn PurchaseInitiator>,
        Arc::clone(&storage) as Arc<dyn KeyValueStore>,
        ReconcilerConfig::default().with_shutdown_timeout(Duration::from_secs(1)),
    );

    Harness {
        clock,
        source,
        purchaser,
        storage,
        reconciler: Arc::new(reconciler),
    }
}

pub async fn next_event(events: &mut broadcast::Receiver<EntitlementEvent>) -> EntitlementEvent {
    tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap()
}

pub fn drain(events: &mut broadcast::Receiver<EntitlementEvent>) -> Vec<EntitlementEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
