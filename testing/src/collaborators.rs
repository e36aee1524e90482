//! In-memory and scripted collaborators
//!
//! - [`MockTransactionSource`]: push-driven updates stream, recorded acknowledgements
//! - [`MockProductCatalog`]: in-memory catalog with recorded requests
//! - [`MockPurchaseInitiator`]: scripted purchase outcomes
//! - [`InMemoryKeyValueStore`]: `HashMap`-backed persistence

use entitlements_core::error::{EntitlementError, Result};
use entitlements_core::product::ProductMetadata;
use entitlements_core::product_id::ProductId;
use entitlements_core::source::{
    BoxFuture, KeyValueStore, ProductCatalog, PurchaseInitiator, TransactionSource, VerificationStream,
};
use entitlements_core::transaction::{PurchaseOutcome, VerificationResult, VerifiedTransaction};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct SourceState {
    subscribers: Vec<mpsc::UnboundedSender<VerificationResult>>,
    subscriptions: usize,
    delivered: Arc<AtomicUsize>,
    finished: Vec<VerifiedTransaction>,
    current: Vec<VerificationResult>,
    sync_failure: Option<EntitlementError>,
    sync_delay: Option<Duration>,
    sync_calls: usize,
}

/// Upstream transaction source driven by the test.
///
/// Every call to `updates()` opens a new subscription; [`push`](Self::push)
/// delivers to all open ones.
///
/// # Example
///
/// ```
/// use entitlements_testing::mocks::MockTransactionSource;
/// use entitlements_core::source::TransactionSource;
/// use entitlements_core::transaction::VerifiedTransaction;
/// use futures::StreamExt;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let source = MockTransactionSource::new();
/// let mut updates = source.updates();
///
/// source.push(VerifiedTransaction::new("com.app.lifetime", "tx-1").into());
/// assert!(updates.next().await.is_some());
/// assert_eq!(source.subscription_count(), 1);
/// # }
/// ```
#[derive(Default)]
pub struct MockTransactionSource {
    state: Mutex<SourceState>,
}

impl MockTransactionSource {
    /// Create a source with no transactions
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `result` to every open subscription, returning how many received it
    pub fn push(&self, result: VerificationResult) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state
            .subscribers
            .iter()
            .filter(|tx| tx.send(result.clone()).is_ok())
            .count()
    }

    /// End every open stream
    pub fn end_streams(&self) {
        self.state.lock().subscribers.clear();
    }

    /// How many times `updates()` was called
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions
    }

    /// Subscriptions whose receiving side is still alive
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        self.state
            .lock()
            .subscribers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Items handed out by any stream so far
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.state.lock().delivered.load(Ordering::SeqCst)
    }

    /// Every acknowledged transaction, in acknowledgement order
    #[must_use]
    pub fn finished(&self) -> Vec<VerifiedTransaction> {
        self.state.lock().finished.clone()
    }

    /// Ids of every acknowledged transaction
    #[must_use]
    pub fn finished_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .finished
            .iter()
            .map(|tx| tx.transaction_id.clone())
            .collect()
    }

    /// Wait until at least `count` transactions were acknowledged.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_for_finished(&self, count: usize, timeout: Duration) -> bool {
        let poll = async {
            while self.state.lock().finished.len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    /// Results returned by the next full syncs
    pub fn set_current_entitlements(&self, results: Vec<VerificationResult>) {
        let mut state = self.state.lock();
        state.current = results;
        state.sync_failure = None;
    }

    /// Make full syncs fail with `error`
    pub fn fail_sync(&self, error: EntitlementError) {
        self.state.lock().sync_failure = Some(error);
    }

    /// Hold every full sync for `delay` before answering
    pub fn set_sync_delay(&self, delay: Duration) {
        self.state.lock().sync_delay = Some(delay);
    }

    /// How many full syncs were requested
    #[must_use]
    pub fn sync_calls(&self) -> usize {
        self.state.lock().sync_calls
    }
}

impl TransactionSource for MockTransactionSource {
    fn updates(&self) -> VerificationStream {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let delivered = {
            let mut state = self.state.lock();
            state.subscribers.push(tx);
            state.subscriptions += 1;
            Arc::clone(&state.delivered)
        };

        Box::pin(async_stream::stream! {
            while let Some(result) = rx.recv().await {
                delivered.fetch_add(1, Ordering::SeqCst);
                yield result;
            }
        })
    }

    fn current_entitlements(&self) -> BoxFuture<'_, Result<Vec<VerificationResult>>> {
        Box::pin(async move {
            let (delay, outcome) = {
                let mut state = self.state.lock();
                state.sync_calls += 1;
                let outcome = match &state.sync_failure {
                    Some(error) => Err(error.clone()),
                    None => Ok(state.current.clone()),
                };
                (state.sync_delay, outcome)
            };

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            outcome
        })
    }

    fn finish(&self, transaction: VerifiedTransaction) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.state.lock().finished.push(transaction);
        })
    }
}

/// In-memory product catalog.
#[derive(Default)]
pub struct MockProductCatalog {
    products: RwLock<HashMap<ProductId, ProductMetadata>>,
    failure: Mutex<Option<EntitlementError>>,
    requests: Mutex<Vec<Vec<ProductId>>>,
}

impl MockProductCatalog {
    /// Catalog resolving exactly `products`
    #[must_use]
    pub fn new(products: Vec<ProductMetadata>) -> Self {
        let catalog = Self::default();
        for product in products {
            catalog.insert(product);
        }
        catalog
    }

    /// Add or replace a product
    pub fn insert(&self, product: ProductMetadata) {
        self.products.write().insert(product.id.clone(), product);
    }

    /// Stop resolving a product
    pub fn remove(&self, id: &ProductId) {
        self.products.write().remove(id);
    }

    /// Make every fetch fail with `error` until [`recover`](Self::recover)
    pub fn fail_with(&self, error: EntitlementError) {
        *self.failure.lock() = Some(error);
    }

    /// Let fetches succeed again
    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    /// Ids of every fetch, in call order
    #[must_use]
    pub fn requests(&self) -> Vec<Vec<ProductId>> {
        self.requests.lock().clone()
    }
}

impl ProductCatalog for MockProductCatalog {
    fn fetch_metadata(&self, ids: Vec<ProductId>) -> BoxFuture<'_, Result<Vec<ProductMetadata>>> {
        Box::pin(async move {
            self.requests.lock().push(ids.clone());

            if let Some(error) = self.failure.lock().clone() {
                return Err(error);
            }

            let products = self.products.read();
            Ok(ids.iter().filter_map(|id| products.get(id).cloned()).collect())
        })
    }
}

/// Purchase flow answering with scripted outcomes, in order.
///
/// Once the script is exhausted every purchase fails with
/// [`EntitlementError::StoreUnavailable`].
#[derive(Default)]
pub struct MockPurchaseInitiator {
    script: Mutex<VecDeque<Result<PurchaseOutcome>>>,
    purchased: Mutex<Vec<ProductMetadata>>,
}

impl MockPurchaseInitiator {
    /// Create an initiator with an empty script
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next purchase
    pub fn will_return(&self, outcome: Result<PurchaseOutcome>) {
        self.script.lock().push_back(outcome);
    }

    /// Products passed to `purchase`, in call order
    #[must_use]
    pub fn purchased(&self) -> Vec<ProductMetadata> {
        self.purchased.lock().clone()
    }
}

impl PurchaseInitiator for MockPurchaseInitiator {
    fn purchase(&self, product: ProductMetadata) -> BoxFuture<'_, Result<PurchaseOutcome>> {
        Box::pin(async move {
            self.purchased.lock().push(product);
            self.script
                .lock()
                .pop_front()
                .unwrap_or(Err(EntitlementError::StoreUnavailable))
        })
    }
}

/// `HashMap`-backed key-value persistence.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryKeyValueStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Every stored key, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Remove everything (for test isolation)
    pub fn clear(&self) {
        self.data.write().clear();
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Vec<u8>) {
        self.data.write().insert(key.to_string(), value);
    }
}
