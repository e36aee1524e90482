//! Transaction reconciler.
//!
//! Owns the live upstream subscription, the `remoteProductId → option`
//! lookup table and the authoritative entitlement snapshot. State lives in a
//! [`Store`]: every fold runs under its write lock, reads take the read lock
//! and never observe a partial fold.
//!
//! ```text
//!  updates stream ──► listener task ──► Store::send(TransactionReceived)
//!                                          │ reduce: lookup, map, fold
//!                                          ▼
//!                     acknowledge ─► [ notify…, persist ]
//! ```

mod listener;
mod reducer;

pub use reducer::{
    ListenerStatus, Origin, ReconcilerAction, ReconcilerEnvironment, ReconcilerReducer,
    ReconcilerState, SnapshotProvenance, derive_batch,
};

use crate::config::ReconcilerConfig;
use crate::events::{EntitlementEvent, EventChannel};
use crate::snapshot_store::SnapshotStore;
use crate::store::Store;
use entitlements_core::entitlement::{EntitlementSnapshot, EntitlementState};
use entitlements_core::environment::Clock;
use entitlements_core::error::{EntitlementError, Result};
use entitlements_core::exclusivity;
use entitlements_core::option::{OptionTable, PurchaseOption};
use entitlements_core::product::ProductMetadata;
use entitlements_core::product_id::ProductId;
use entitlements_core::source::{KeyValueStore, PurchaseInitiator, TransactionSource};
use entitlements_core::transaction::{PurchaseOutcome, VerificationResult};
use listener::ListenerHandle;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

/// Store hosting the reconciler reducer
pub(crate) type ReconcilerStore<C> =
    Store<ReconcilerState, ReconcilerAction, ReconcilerEnvironment<C>, ReconcilerReducer<C>>;

fn collect_options<I>(options: I) -> Vec<PurchaseOption>
where
    I: IntoIterator,
    I::Item: Into<PurchaseOption>,
{
    options.into_iter().map(Into::into).collect()
}

/// The entitlement reconciliation engine.
///
/// # Example
///
/// ```ignore
/// let reconciler = Reconciler::new(SystemClock, source, purchaser, storage, ReconcilerConfig::from_env());
/// let mut events = reconciler.subscribe();
///
/// reconciler.start_listening(options).await?;
/// while let Ok(event) = events.recv().await {
///     render(event);
/// }
/// ```
pub struct Reconciler<C: Clock + Clone + 'static> {
    store: ReconcilerStore<C>,
    purchaser: Arc<dyn PurchaseInitiator>,
    listener: Mutex<Option<ListenerHandle>>,
    config: ReconcilerConfig,
}

impl<C: Clock + Clone + 'static> Reconciler<C> {
    /// Create a stopped reconciler with an empty lookup table.
    #[must_use]
    pub fn new(
        clock: C,
        source: Arc<dyn TransactionSource>,
        purchaser: Arc<dyn PurchaseInitiator>,
        storage: Arc<dyn KeyValueStore>,
        config: ReconcilerConfig,
    ) -> Self {
        let environment = ReconcilerEnvironment::new(
            clock,
            source,
            SnapshotStore::new(storage, config.snapshot_key_prefix.clone()),
            EventChannel::new(config.event_capacity),
        );

        Self {
            store: Store::new(ReconcilerState::default(), ReconcilerReducer::new(), environment),
            purchaser,
            listener: Mutex::new(None),
            config,
        }
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    fn env(&self) -> &ReconcilerEnvironment<C> {
        self.store.environment()
    }

    async fn dispatch(&self, action: ReconcilerAction) -> Result<()> {
        let mut handle = self.store.send(action).await?;
        handle.wait().await;
        Ok(())
    }

    /// Replace the lookup table. Safe while listening or restoring.
    ///
    /// # Errors
    ///
    /// Fails only after [`shutdown`](Self::shutdown).
    pub async fn configure<I>(&self, options: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<PurchaseOption>,
    {
        self.dispatch(ReconcilerAction::Configure {
            options: collect_options(options),
        })
        .await
    }

    /// Replace the lookup table and open the upstream subscription.
    ///
    /// Idempotent: while a subscription is open only the table is replaced.
    ///
    /// # Errors
    ///
    /// Fails only after [`shutdown`](Self::shutdown).
    #[tracing::instrument(skip_all, name = "reconciler_start_listening")]
    pub async fn start_listening<I>(&self, options: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<PurchaseOption>,
    {
        let mut listener = self.listener.lock().await;
        let options = collect_options(options);

        if self.is_listening().await {
            tracing::debug!("Already listening, replacing lookup table");
            return self.dispatch(ReconcilerAction::Configure { options }).await;
        }

        // A stream that ended upstream leaves its finished task behind
        if let Some(ended) = listener.take() {
            ended.stop().await;
        }

        self.dispatch(ReconcilerAction::ListenerStarted { options }).await?;
        *listener = Some(ListenerHandle::spawn(self.store.clone()));
        Ok(())
    }

    /// Cancel the subscription and clear the lookup table.
    ///
    /// Waits for every item already pulled from the stream; each one is still
    /// acknowledged. No stream-originated event is published after this
    /// returns. Idempotent while stopped.
    ///
    /// # Errors
    ///
    /// Fails only after [`shutdown`](Self::shutdown).
    #[tracing::instrument(skip_all, name = "reconciler_stop_listening")]
    pub async fn stop_listening(&self) -> Result<()> {
        let mut listener = self.listener.lock().await;

        let Some(handle) = listener.take() else {
            tracing::debug!("Not listening");
            return Ok(());
        };

        handle.stop().await;
        self.dispatch(ReconcilerAction::ListenerStopped).await
    }

    /// Whether the upstream subscription is open
    ///
    /// Turns false once the stream ends upstream, after its last item was folded.
    pub async fn is_listening(&self) -> bool {
        self.store
            .state(|s| s.status == ListenerStatus::Listening)
            .await
    }

    async fn fetch_current(&self) -> Result<Vec<VerificationResult>> {
        let start = std::time::Instant::now();
        let results = self.env().source.current_entitlements().await;
        metrics::histogram!("entitlements.restore.duration_seconds").record(start.elapsed().as_secs_f64());

        results.inspect_err(|error| {
            tracing::warn!(error = %error, "Full re-sync failed");
            metrics::counter!("entitlements.restore.failed").increment(1);
        })
    }

    /// Replace the lookup table, re-sync every valid transaction upstream and
    /// fold the batch in one pass.
    ///
    /// Publishes [`EntitlementEvent::Restored`] and returns the same snapshot,
    /// evaluated as of the moment the re-sync answered.
    ///
    /// # Errors
    ///
    /// Returns the upstream error and leaves the snapshot untouched when the
    /// re-sync fails.
    #[tracing::instrument(skip_all, name = "reconciler_restore")]
    pub async fn restore<I>(&self, options: I) -> Result<EntitlementSnapshot>
    where
        I: IntoIterator,
        I::Item: Into<PurchaseOption>,
    {
        self.configure(options).await?;

        let results = self.fetch_current().await?;
        let synced_at = self.env().clock.now();
        let (mut handle, snapshot) = self
            .store
            .send_and_read(ReconcilerAction::RestoreCompleted { results, synced_at }, |s| {
                s.snapshot.effective_at(synced_at)
            })
            .await?;
        handle.wait().await;

        Ok(snapshot)
    }

    /// Derive a snapshot for `options` from a full re-sync, without touching
    /// reconciler state, publishing or persisting.
    ///
    /// # Errors
    ///
    /// Returns the upstream error when the re-sync fails.
    #[tracing::instrument(skip_all, name = "reconciler_current_snapshot_for")]
    pub async fn current_snapshot_for<I>(&self, options: I) -> Result<EntitlementSnapshot>
    where
        I: IntoIterator,
        I::Item: Into<PurchaseOption>,
    {
        let table = OptionTable::from_options(options);
        let results = self.fetch_current().await?;
        let now = self.env().clock.now();
        let incoming = derive_batch(&table, &results, now);

        Ok(exclusivity::reduce(&EntitlementSnapshot::new(), &incoming, &table).effective_at(now))
    }

    /// Purchase `option` through the upstream purchase flow.
    ///
    /// A successful purchase is folded exactly like a stream update and the
    /// resulting state is returned. Every failure is published as
    /// [`EntitlementEvent::PurchaseFailed`] and returned without touching the
    /// snapshot.
    ///
    /// # Errors
    ///
    /// - [`EntitlementError::ProductUnresolvable`] if `product` is not the option's product
    /// - [`EntitlementError::UserCancelled`] / [`EntitlementError::PendingApproval`] on those outcomes
    /// - [`EntitlementError::Unknown`] if the resulting transaction failed verification
    /// - whatever the purchase flow reported otherwise
    #[tracing::instrument(skip_all, name = "reconciler_initiate", fields(product_id = %product.id))]
    pub async fn initiate(
        &self,
        option: impl Into<PurchaseOption>,
        product: &ProductMetadata,
    ) -> Result<EntitlementState> {
        let option = option.into();

        if product.id != option.remote_product_id {
            tracing::warn!(option = %option.id, "Product metadata does not belong to option");
            return self.fail_purchase(option, EntitlementError::ProductUnresolvable).await;
        }

        let outcome = match self.purchaser.purchase(product.clone()).await {
            Ok(outcome) => outcome,
            Err(error) => return self.fail_purchase(option, error).await,
        };

        match outcome {
            PurchaseOutcome::Success(VerificationResult::Verified(transaction)) => {
                let product_id = transaction.remote_product_id.clone();
                self.dispatch(ReconcilerAction::TransactionReceived {
                    result: VerificationResult::Verified(transaction),
                    origin: Origin::Purchase(option),
                })
                .await?;
                Ok(self.entitlement_state(&product_id).await)
            },
            PurchaseOutcome::Success(VerificationResult::Unverified {
                transaction,
                reason,
            }) => {
                self.dispatch(ReconcilerAction::TransactionReceived {
                    result: VerificationResult::Unverified {
                        transaction,
                        reason: reason.clone(),
                    },
                    origin: Origin::Purchase(option.clone()),
                })
                .await?;
                self.fail_purchase(option, EntitlementError::Unknown(reason)).await
            },
            PurchaseOutcome::Cancelled => self.fail_purchase(option, EntitlementError::UserCancelled).await,
            PurchaseOutcome::PendingApproval => {
                self.fail_purchase(option, EntitlementError::PendingApproval).await
            },
        }
    }

    async fn fail_purchase(&self, option: PurchaseOption, error: EntitlementError) -> Result<EntitlementState> {
        self.dispatch(ReconcilerAction::PurchaseFailed {
            option,
            error: error.clone(),
        })
        .await?;
        Err(error)
    }

    /// Install the persisted snapshot if nothing authoritative arrived yet.
    ///
    /// Returns whether the cache was installed.
    ///
    /// # Errors
    ///
    /// Fails only after [`shutdown`](Self::shutdown).
    pub async fn seed_from_cache(&self) -> Result<bool> {
        let snapshot = self.env().snapshots.load_by_product_id();
        if snapshot.is_empty() {
            return Ok(false);
        }

        self.dispatch(ReconcilerAction::SnapshotSeeded { snapshot }).await?;
        Ok(self.store.state(|s| s.provenance == SnapshotProvenance::Cached).await)
    }

    /// Current state of one product, re-evaluated against the clock.
    ///
    /// Never fails: unknown products read as [`EntitlementState::Inactive`].
    pub async fn entitlement_state(&self, product_id: &ProductId) -> EntitlementState {
        let now = self.env().clock.now();
        self.store
            .state(|s| s.snapshot.state(product_id).effective_at(now))
            .await
    }

    /// Whether `product_id` grants access right now
    pub async fn is_active(&self, product_id: &ProductId) -> bool {
        self.entitlement_state(product_id).await.is_active()
    }

    /// Full snapshot, re-evaluated against the clock
    pub async fn snapshot(&self) -> EntitlementSnapshot {
        let now = self.env().clock.now();
        self.store.state(|s| s.snapshot.effective_at(now)).await
    }

    /// Whether the snapshot comes from an authoritative fold rather than the cache
    pub async fn is_authoritative(&self) -> bool {
        self.store
            .state(|s| s.provenance == SnapshotProvenance::Live)
            .await
    }

    /// Subscribe to entitlement events published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EntitlementEvent> {
        self.env().events.subscribe()
    }

    /// Stop listening, then wait for running effects up to the configured timeout.
    ///
    /// Every later operation fails with [`EntitlementError::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns an error if effects are still running at the timeout.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_listening().await?;
        self.store.shutdown(self.config.shutdown_timeout).await?;
        Ok(())
    }
}

impl<C: Clock + Clone + 'static> std::fmt::Debug for Reconciler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
