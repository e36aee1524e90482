//! Collaborator traits: upstream store, catalog, purchase flow and persistence.
//!
//! # Dyn Compatibility
//!
//! Async operations return `Pin<Box<dyn Future>>` instead of using `async fn`
//! so the runtime can hold collaborators as `Arc<dyn …>` and capture them in
//! effects.

use crate::error::Result;
use crate::product::ProductMetadata;
use crate::product_id::ProductId;
use crate::transaction::{PurchaseOutcome, VerificationResult, VerifiedTransaction};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Potentially infinite stream of upstream transaction updates.
pub type VerificationStream = Pin<Box<dyn Stream<Item = VerificationResult> + Send>>;

/// The upstream store's transaction feed.
///
/// Delivers every purchase, renewal, expiration, refund and cross-device sync.
/// Items may arrive unordered and duplicated.
pub trait TransactionSource: Send + Sync {
    /// Open a new subscription to transaction updates.
    ///
    /// Restartable: every call returns a fresh stream.
    fn updates(&self) -> VerificationStream;

    /// Fetch every currently valid transaction (full re-sync, not the delta stream).
    ///
    /// # Errors
    ///
    /// Fails as a unit when the upstream cannot be reached.
    fn current_entitlements(&self) -> BoxFuture<'_, Result<Vec<VerificationResult>>>;

    /// Acknowledge a delivered transaction so it is not delivered again.
    fn finish(&self, transaction: VerifiedTransaction) -> BoxFuture<'_, ()>;
}

/// The upstream product catalog.
pub trait ProductCatalog: Send + Sync {
    /// Fetch metadata for the given ids.
    ///
    /// Ids the catalog cannot resolve are omitted from the result.
    ///
    /// # Errors
    ///
    /// Fails as a unit on transport errors.
    fn fetch_metadata(&self, ids: Vec<ProductId>) -> BoxFuture<'_, Result<Vec<ProductMetadata>>>;
}

/// The upstream purchase flow.
pub trait PurchaseInitiator: Send + Sync {
    /// Start a purchase and wait for its outcome.
    ///
    /// # Errors
    ///
    /// Fails with a transport or availability error when the flow could not run.
    fn purchase(&self, product: ProductMetadata) -> BoxFuture<'_, Result<PurchaseOutcome>>;
}

/// Synchronous, process-local key-value persistence.
pub trait KeyValueStore: Send + Sync {
    /// Read the bytes stored under `key`
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: Vec<u8>);
}
