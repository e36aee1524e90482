//! The reconciler's pure fold.
//!
//! Lookup, mapping and exclusivity folding happen inside `reduce`, under the
//! store's write lock. Acknowledgement, notification and persistence are
//! returned as effects:
//!
//! ```text
//! Sequential[ acknowledge, Parallel[ notify…, persist ] ]
//! ```

use crate::events::{EntitlementEvent, EventChannel};
use crate::snapshot_store::SnapshotStore;
use chrono::{DateTime, Utc};
use entitlements_core::entitlement::{EntitlementSnapshot, EntitlementState};
use entitlements_core::environment::Clock;
use entitlements_core::error::EntitlementError;
use entitlements_core::option::{OptionTable, PurchaseOption};
use entitlements_core::source::TransactionSource;
use entitlements_core::transaction::{VerificationResult, VerifiedTransaction};
use entitlements_core::{SmallVec, effect::Effect, exclusivity, mapper, reducer::Reducer, smallvec};
use std::marker::PhantomData;
use std::sync::Arc;

/// Whether a listener subscription is open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListenerStatus {
    /// No subscription
    #[default]
    Stopped,
    /// Consuming the upstream stream
    Listening,
}

/// Where the current snapshot came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SnapshotProvenance {
    /// Nothing recorded yet
    #[default]
    Empty,
    /// Seeded from the snapshot store; not authoritative
    Cached,
    /// At least one authoritative fold happened
    Live,
}

/// Where a transaction entered the reconciler.
#[derive(Clone, Debug, PartialEq)]
pub enum Origin {
    /// The long-lived updates stream
    Stream,
    /// A purchase started through this reconciler, for the given option
    Purchase(PurchaseOption),
}

impl Origin {
    const fn label(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Purchase(_) => "purchase",
        }
    }
}

/// Reconciler state, owned by the store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconcilerState {
    /// `remoteProductId → option` lookup table
    pub table: OptionTable,
    /// Authoritative entitlement map
    pub snapshot: EntitlementSnapshot,
    /// Listener lifecycle
    pub status: ListenerStatus,
    /// Whether `snapshot` can be trusted
    pub provenance: SnapshotProvenance,
}

impl ReconcilerState {
    /// Drop seeded entries before the first authoritative fold.
    fn supersede_cache(&mut self) {
        if self.provenance == SnapshotProvenance::Cached {
            tracing::info!(entries = self.snapshot.len(), "Discarding cached snapshot");
            self.snapshot = EntitlementSnapshot::new();
        }
        self.provenance = SnapshotProvenance::Live;
    }
}

/// Actions processed by [`ReconcilerReducer`].
#[derive(Clone, Debug, PartialEq)]
pub enum ReconcilerAction {
    /// Replace the lookup table
    Configure {
        /// New option catalog
        options: Vec<PurchaseOption>,
    },
    /// A listener subscription was opened (or re-confirmed) with these options
    ListenerStarted {
        /// New option catalog
        options: Vec<PurchaseOption>,
    },
    /// The listener stopped; the lookup table is cleared
    ListenerStopped,
    /// The upstream stream ended on its own; the lookup table is kept
    StreamEnded,
    /// A single transaction arrived
    TransactionReceived {
        /// Verification outcome
        result: VerificationResult,
        /// Stream or local purchase
        origin: Origin,
    },
    /// A full upstream re-sync returned
    RestoreCompleted {
        /// Every currently valid transaction
        results: Vec<VerificationResult>,
        /// When the re-sync answered; the batch is mapped and published as of this instant
        synced_at: DateTime<Utc>,
    },
    /// A persisted snapshot was loaded at cold start
    SnapshotSeeded {
        /// Loaded snapshot
        snapshot: EntitlementSnapshot,
    },
    /// A purchase attempt failed
    PurchaseFailed {
        /// The option being purchased
        option: PurchaseOption,
        /// Classified failure
        error: EntitlementError,
    },
}

/// Injected dependencies of the reconciler.
#[derive(Clone)]
pub struct ReconcilerEnvironment<C: Clock> {
    /// Wall clock
    pub clock: C,
    /// Upstream transaction feed (for acknowledgement)
    pub source: Arc<dyn TransactionSource>,
    /// Advisory persistence
    pub snapshots: SnapshotStore,
    /// Published outcomes
    pub events: EventChannel,
}

impl<C: Clock> ReconcilerEnvironment<C> {
    /// Create an environment
    #[must_use]
    pub fn new(
        clock: C,
        source: Arc<dyn TransactionSource>,
        snapshots: SnapshotStore,
        events: EventChannel,
    ) -> Self {
        Self {
            clock,
            source,
            snapshots,
            events,
        }
    }
}

/// Reducer folding transactions into [`ReconcilerState`].
pub struct ReconcilerReducer<C> {
    _clock: PhantomData<fn() -> C>,
}

impl<C> ReconcilerReducer<C> {
    /// Create the reducer
    #[must_use]
    pub const fn new() -> Self {
        Self { _clock: PhantomData }
    }
}

impl<C> Default for ReconcilerReducer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for ReconcilerReducer<C> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for ReconcilerReducer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReconcilerReducer")
    }
}

/// Map a batch of results against `table` into an `incoming` snapshot.
///
/// Unverified results and unknown products are logged and left out. When a
/// product appears more than once, the later result wins.
#[must_use]
pub fn derive_batch(
    table: &OptionTable,
    results: &[VerificationResult],
    now: DateTime<Utc>,
) -> EntitlementSnapshot {
    let mut incoming = EntitlementSnapshot::new();

    for result in results {
        match result {
            VerificationResult::Verified(transaction) => {
                if table.contains(&transaction.remote_product_id) {
                    incoming.insert(
                        transaction.remote_product_id.clone(),
                        mapper::map(transaction, now),
                    );
                } else {
                    tracing::debug!(
                        product_id = %transaction.remote_product_id,
                        "Ignoring synced transaction for unconfigured product"
                    );
                }
            },
            VerificationResult::Unverified {
                transaction,
                reason,
            } => {
                tracing::warn!(
                    product_id = %transaction.remote_product_id,
                    transaction_id = %transaction.transaction_id,
                    reason = %reason,
                    "Skipping unverified synced transaction"
                );
            },
        }
    }

    incoming
}

fn acknowledge<C: Clock>(
    env: &ReconcilerEnvironment<C>,
    transaction: VerifiedTransaction,
) -> Effect<ReconcilerAction> {
    let source = Arc::clone(&env.source);
    Effect::fire_and_forget(async move {
        let transaction_id = transaction.transaction_id.clone();
        source.finish(transaction).await;
        metrics::counter!("entitlements.transactions.acknowledged").increment(1);
        tracing::trace!(transaction_id = %transaction_id, "Transaction acknowledged");
    })
}

fn publish<C: Clock>(env: &ReconcilerEnvironment<C>, event: EntitlementEvent) -> Effect<ReconcilerAction> {
    let events = env.events.clone();
    Effect::fire_and_forget(async move {
        events.publish(event);
    })
}

fn persist<C: Clock>(
    env: &ReconcilerEnvironment<C>,
    snapshot: &EntitlementSnapshot,
) -> Effect<ReconcilerAction> {
    let snapshots = env.snapshots.clone();
    let snapshot = snapshot.clone();
    Effect::fire_and_forget(async move {
        snapshots.save(&snapshot);
    })
}

impl<C: Clock> ReconcilerReducer<C> {
    fn transaction_received(
        state: &mut ReconcilerState,
        result: VerificationResult,
        origin: &Origin,
        env: &ReconcilerEnvironment<C>,
    ) -> SmallVec<[Effect<ReconcilerAction>; 4]> {
        metrics::counter!("entitlements.transactions.received", "origin" => origin.label()).increment(1);

        let transaction = match result {
            VerificationResult::Verified(transaction) => transaction,
            VerificationResult::Unverified {
                transaction,
                reason,
            } => {
                tracing::warn!(
                    product_id = %transaction.remote_product_id,
                    transaction_id = %transaction.transaction_id,
                    reason = %reason,
                    "Acknowledging unverified transaction without folding"
                );
                metrics::counter!("entitlements.transactions.unverified").increment(1);
                return smallvec![acknowledge(env, transaction)];
            },
        };

        let product_id = transaction.remote_product_id.clone();
        let (option, fallback) = match (state.table.get(&product_id), origin) {
            (Some(option), _) => (option.clone(), None),
            (None, Origin::Purchase(option)) if option.remote_product_id == product_id => {
                (option.clone(), Some(state.table.including(option.clone())))
            },
            (None, _) => {
                tracing::debug!(
                    product_id = %product_id,
                    transaction_id = %transaction.transaction_id,
                    "Acknowledging transaction for unknown product"
                );
                metrics::counter!("entitlements.transactions.unknown_product").increment(1);
                return smallvec![acknowledge(env, transaction)];
            },
        };

        state.supersede_cache();
        // An unconfigured purchase still competes with its group peers
        let table = fallback.as_ref().unwrap_or(&state.table);

        let mapped = mapper::map(&transaction, env.clock.now());
        tracing::debug!(
            option = %option.id,
            product_id = %product_id,
            transaction_id = %transaction.transaction_id,
            state = mapped.label(),
            origin = origin.label(),
            "Folding transaction"
        );

        let incoming = EntitlementSnapshot::single(product_id.clone(), mapped);
        let next = exclusivity::reduce(&state.snapshot, &incoming, table);
        let suppressed: Vec<(PurchaseOption, EntitlementState)> = state
            .snapshot
            .changes_to(&next)
            .into_iter()
            .filter(|(id, _)| *id != product_id)
            .filter_map(|(id, peer_state)| table.get(&id).map(|peer| (peer.clone(), peer_state)))
            .collect();
        state.snapshot = next;

        metrics::counter!("entitlements.transactions.folded").increment(1);
        if matches!(origin, Origin::Purchase(_)) {
            metrics::counter!("entitlements.purchases.succeeded").increment(1);
        }

        let mut fan_out = Vec::with_capacity(suppressed.len() + 2);
        fan_out.push(publish(
            env,
            EntitlementEvent::Updated {
                option,
                state: state.snapshot.state(&product_id),
            },
        ));
        for (peer, peer_state) in suppressed {
            fan_out.push(publish(
                env,
                EntitlementEvent::Updated {
                    option: peer,
                    state: peer_state,
                },
            ));
        }
        fan_out.push(persist(env, &state.snapshot));

        smallvec![Effect::chain(vec![
            acknowledge(env, transaction),
            Effect::merge(fan_out),
        ])]
    }
}

impl<C: Clock> Reducer for ReconcilerReducer<C> {
    type State = ReconcilerState;
    type Action = ReconcilerAction;
    type Environment = ReconcilerEnvironment<C>;

    fn reduce(
        &self,
        state: &mut ReconcilerState,
        action: ReconcilerAction,
        env: &ReconcilerEnvironment<C>,
    ) -> SmallVec<[Effect<ReconcilerAction>; 4]> {
        match action {
            ReconcilerAction::Configure { options } => {
                state.table = OptionTable::from_options(options);
                tracing::info!(options = state.table.len(), "Lookup table replaced");
                smallvec![Effect::None]
            },
            ReconcilerAction::ListenerStarted { options } => {
                state.table = OptionTable::from_options(options);
                state.status = ListenerStatus::Listening;
                tracing::info!(options = state.table.len(), "Listening for transactions");
                smallvec![Effect::None]
            },
            ReconcilerAction::ListenerStopped => {
                state.table = OptionTable::default();
                state.status = ListenerStatus::Stopped;
                tracing::info!("Stopped listening, lookup table cleared");
                smallvec![Effect::None]
            },
            ReconcilerAction::StreamEnded => {
                state.status = ListenerStatus::Stopped;
                tracing::info!("Transaction stream ended upstream");
                smallvec![Effect::None]
            },
            ReconcilerAction::TransactionReceived { result, origin } => {
                Self::transaction_received(state, result, &origin, env)
            },
            ReconcilerAction::RestoreCompleted { results, synced_at } => {
                state.supersede_cache();

                let incoming = derive_batch(&state.table, &results, synced_at);
                state.snapshot = exclusivity::reduce(&state.snapshot, &incoming, &state.table);

                metrics::counter!("entitlements.restore.completed").increment(1);
                tracing::info!(
                    synced = results.len(),
                    folded = incoming.len(),
                    entries = state.snapshot.len(),
                    "Restore folded"
                );

                smallvec![Effect::merge(vec![
                    publish(
                        env,
                        EntitlementEvent::Restored {
                            snapshot: state.snapshot.effective_at(synced_at),
                        },
                    ),
                    persist(env, &state.snapshot),
                ])]
            },
            ReconcilerAction::SnapshotSeeded { snapshot } => {
                if state.provenance != SnapshotProvenance::Empty || snapshot.is_empty() {
                    tracing::debug!(provenance = ?state.provenance, "Ignoring cached snapshot");
                    return smallvec![Effect::None];
                }

                tracing::info!(entries = snapshot.len(), "Seeded snapshot from cache");
                state.snapshot = snapshot;
                state.provenance = SnapshotProvenance::Cached;

                smallvec![publish(
                    env,
                    EntitlementEvent::Seeded {
                        snapshot: state.snapshot.clone(),
                    },
                )]
            },
            ReconcilerAction::PurchaseFailed { option, error } => {
                tracing::warn!(option = %option.id, error = %error, "Purchase failed");
                metrics::counter!("entitlements.purchases.failed", "kind" => error.kind()).increment(1);
                smallvec![publish(env, EntitlementEvent::PurchaseFailed { option, error })]
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::Duration;
    use entitlements_core::product_id::ProductId;
    use entitlements_core::source::KeyValueStore;
    use entitlements_testing::mocks::{InMemoryKeyValueStore, MockTransactionSource};
    use entitlements_testing::{FixedClock, ReducerTest, assertions, fixtures, test_clock};

    fn env() -> ReconcilerEnvironment<FixedClock> {
        let storage: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        ReconcilerEnvironment::new(
            test_clock(),
            Arc::new(MockTransactionSource::new()),
            SnapshotStore::new(storage, "test"),
            EventChannel::new(16),
        )
    }

    fn now() -> DateTime<Utc> {
        test_clock().now()
    }

    fn configured() -> ReconcilerState {
        ReconcilerState {
            table: OptionTable::from_options(fixtures::catalog()),
            ..ReconcilerState::default()
        }
    }

    fn stream(transaction: VerifiedTransaction) -> ReconcilerAction {
        ReconcilerAction::TransactionReceived {
            result: transaction.into(),
            origin: Origin::Stream,
        }
    }

    fn is_ack_then_fan_out(effects: &[Effect<ReconcilerAction>], fan_out: usize) -> bool {
        match effects {
            [Effect::Sequential(steps)] => matches!(
                steps.as_slice(),
                [Effect::Future(_), Effect::Parallel(rest)] if rest.len() == fan_out
            ),
            _ => false,
        }
    }

    #[test]
    fn test_configure_replaces_table() {
        let mut state = configured();
        state.snapshot.insert(ProductId::new("com.app.lifetime"), EntitlementState::Inactive);

        ReducerTest::new(ReconcilerReducer::new())
            .with_env(env())
            .given_state(state)
            .when_action(ReconcilerAction::Configure {
                options: vec![fixtures::lifetime()],
            })
            .then_state(|state| {
                assert_eq!(state.table.len(), 1);
                assert!(state.table.contains(&ProductId::new("com.app.lifetime")));
                assert_eq!(state.snapshot.len(), 1);
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn test_listener_stopped_clears_table() {
        let mut state = configured();
        state.status = ListenerStatus::Listening;

        ReducerTest::new(ReconcilerReducer::new())
            .with_env(env())
            .given_state(state)
            .when_action(ReconcilerAction::ListenerStopped)
            .then_state(|state| {
                assert!(state.table.is_empty());
                assert_eq!(state.status, ListenerStatus::Stopped);
            })
            .run();
    }

    #[test]
    fn test_known_transaction_folds_and_fans_out() {
        let monthly = fixtures::pro_monthly();
        let tx = fixtures::subscription(&monthly, "tx-1", now() + Duration::days(30));

        ReducerTest::new(ReconcilerReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(stream(tx))
            .then_state(move |state| {
                assert!(state.snapshot.state(&monthly.remote_product_id).is_active());
                assert_eq!(state.provenance, SnapshotProvenance::Live);
            })
            // one notification plus persistence
            .then_effects(|effects| assert!(is_ack_then_fan_out(effects, 2)))
            .run();
    }

    #[test]
    fn test_suppressed_peer_is_notified() {
        let monthly = fixtures::pro_monthly();
        let yearly = fixtures::pro_yearly();
        let mut state = configured();
        state.snapshot.insert(
            yearly.remote_product_id.clone(),
            mapper::map(&fixtures::subscription(&yearly, "tx-y", now() + Duration::days(365)), now()),
        );
        state.provenance = SnapshotProvenance::Live;

        ReducerTest::new(ReconcilerReducer::new())
            .with_env(env())
            .given_state(state)
            .when_action(stream(fixtures::subscription(&monthly, "tx-m", now() + Duration::days(30))))
            .then_state(move |state| {
                assert!(state.snapshot.state(&monthly.remote_product_id).is_active());
                assert_eq!(state.snapshot.state(&yearly.remote_product_id), EntitlementState::Inactive);
            })
            .then_effects(|effects| assert!(is_ack_then_fan_out(effects, 3)))
            .run();
    }

    #[test]
    fn test_unknown_product_is_only_acknowledged() {
        let tx = VerifiedTransaction::new("com.other.app", "tx-9");

        ReducerTest::new(ReconcilerReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(stream(tx))
            .then_state(|state| {
                assert!(state.snapshot.is_empty());
                assert_eq!(state.provenance, SnapshotProvenance::Empty);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn test_unverified_is_only_acknowledged() {
        let tx = fixtures::unlock(&fixtures::lifetime(), "tx-2");

        ReducerTest::new(ReconcilerReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(ReconcilerAction::TransactionReceived {
                result: VerificationResult::Unverified {
                    transaction: tx,
                    reason: "signature mismatch".into(),
                },
                origin: Origin::Stream,
            })
            .then_state(|state| assert!(state.snapshot.is_empty()))
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn test_purchase_origin_folds_unconfigured_option() {
        let lifetime = fixtures::lifetime();
        let tx = fixtures::unlock(&lifetime, "tx-3");
        let product_id = lifetime.remote_product_id.clone();

        ReducerTest::new(ReconcilerReducer::new())
            .with_env(env())
            .given_state(ReconcilerState::default())
            .when_action(ReconcilerAction::TransactionReceived {
                result: tx.into(),
                origin: Origin::Purchase(lifetime),
            })
            .then_state(move |state| assert!(state.snapshot.state(&product_id).is_active()))
            .run();
    }

    #[test]
    fn test_unconfigured_purchase_displaces_active_peer() {
        let monthly = fixtures::pro_monthly();
        let yearly = fixtures::pro_yearly();
        let mut state = ReconcilerState {
            table: OptionTable::from_options(vec![yearly.clone()]),
            provenance: SnapshotProvenance::Live,
            ..ReconcilerState::default()
        };
        state.snapshot.insert(
            yearly.remote_product_id.clone(),
            mapper::map(&fixtures::subscription(&yearly, "tx-y", now() + Duration::days(365)), now()),
        );

        ReducerTest::new(ReconcilerReducer::new())
            .with_env(env())
            .given_state(state)
            .when_action(ReconcilerAction::TransactionReceived {
                result: fixtures::subscription(&monthly, "tx-m", now() + Duration::days(30)).into(),
                origin: Origin::Purchase(monthly.clone()),
            })
            .then_state(move |state| {
                assert!(state.snapshot.state(&monthly.remote_product_id).is_active());
                assert_eq!(state.snapshot.state(&yearly.remote_product_id), EntitlementState::Inactive);
                // The purchased option is not added to the configured table
                assert!(!state.table.contains(&monthly.remote_product_id));
            })
            // purchased option, displaced peer, persistence
            .then_effects(|effects| assert!(is_ack_then_fan_out(effects, 3)))
            .run();
    }

    #[test]
    fn test_stream_ended_keeps_table() {
        let mut state = configured();
        state.status = ListenerStatus::Listening;

        ReducerTest::new(ReconcilerReducer::new())
            .with_env(env())
            .given_state(state)
            .when_action(ReconcilerAction::StreamEnded)
            .then_state(|state| {
                assert_eq!(state.status, ListenerStatus::Stopped);
                assert_eq!(state.table.len(), fixtures::catalog().len());
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn test_restore_publishes_view_as_of_sync() {
        let monthly = fixtures::pro_monthly();
        let lapsed_at = now() + Duration::days(2);
        let mut state = configured();
        state.provenance = SnapshotProvenance::Live;
        state.snapshot.insert(
            monthly.remote_product_id.clone(),
            EntitlementState::SubscriptionActive {
                expires_at: lapsed_at,
                transaction_id: "tx-m".into(),
            },
        );
        let env = env();
        let mut events = env.events.subscribe();

        let mut effects = ReconcilerReducer::new()
            .reduce(
                &mut state,
                ReconcilerAction::RestoreCompleted {
                    results: Vec::new(),
                    synced_at: now() + Duration::days(3),
                },
                &env,
            )
            .into_vec();

        // Stored entry is untouched, the published view is evaluated at the sync
        assert!(matches!(
            state.snapshot.state(&monthly.remote_product_id),
            EntitlementState::SubscriptionActive { .. }
        ));
        let Some(Effect::Parallel(fan_out)) = effects.pop() else {
            panic!("expected publish and persist");
        };
        let futures: Vec<_> = fan_out
            .into_iter()
            .filter_map(|effect| match effect {
                Effect::Future(fut) => Some(fut),
                _ => None,
            })
            .collect();
        futures::executor::block_on(async {
            for fut in futures {
                fut.await;
            }
        });

        match events.try_recv().unwrap() {
            EntitlementEvent::Restored { snapshot } => assert_eq!(
                snapshot.state(&monthly.remote_product_id),
                EntitlementState::SubscriptionExpired {
                    expires_at: lapsed_at
                }
            ),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_first_live_fold_discards_cache() {
        let mut state = configured();
        state.snapshot.insert(
            ProductId::new("com.app.lifetime"),
            EntitlementState::PermanentUnlock {
                transaction_id: "cached".into(),
            },
        );
        state.provenance = SnapshotProvenance::Cached;
        let monthly = fixtures::pro_monthly();

        ReducerTest::new(ReconcilerReducer::new())
            .with_env(env())
            .given_state(state)
            .when_action(stream(fixtures::subscription(&monthly, "tx-4", now() + Duration::days(30))))
            .then_state(|state| {
                assert_eq!(state.snapshot.len(), 1);
                assert!(!state.snapshot.contains(&ProductId::new("com.app.lifetime")));
                assert_eq!(state.provenance, SnapshotProvenance::Live);
            })
            .run();
    }

    #[test]
    fn test_seed_only_when_empty() {
        let seed = EntitlementSnapshot::single(
            ProductId::new("com.app.lifetime"),
            EntitlementState::PermanentUnlock {
                transaction_id: "cached".into(),
            },
        );

        ReducerTest::new(ReconcilerReducer::new())
            .with_env(env())
            .given_state(ReconcilerState::default())
            .when_action(ReconcilerAction::SnapshotSeeded { snapshot: seed.clone() })
            .then_state(|state| {
                assert_eq!(state.provenance, SnapshotProvenance::Cached);
                assert_eq!(state.snapshot.len(), 1);
            })
            .then_effects(|effects| assertions::assert_has_future_effect(effects))
            .run();

        let live = ReconcilerState {
            provenance: SnapshotProvenance::Live,
            ..ReconcilerState::default()
        };
        ReducerTest::new(ReconcilerReducer::new())
            .with_env(env())
            .given_state(live)
            .when_action(ReconcilerAction::SnapshotSeeded { snapshot: seed })
            .then_state(|state| {
                assert!(state.snapshot.is_empty());
                assert_eq!(state.provenance, SnapshotProvenance::Live);
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn test_restore_batch_highest_sort_order_wins() {
        let monthly = fixtures::pro_monthly();
        let yearly = fixtures::pro_yearly();
        let results = vec![
            fixtures::subscription(&yearly, "tx-y", now() + Duration::days(365)).into(),
            fixtures::subscription(&monthly, "tx-m", now() + Duration::days(30)).into(),
            VerifiedTransaction::new("com.other.app", "tx-x").into(),
        ];

        ReducerTest::new(ReconcilerReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(ReconcilerAction::RestoreCompleted {
                results,
                synced_at: now(),
            })
            .then_state(move |state| {
                assert!(state.snapshot.state(&yearly.remote_product_id).is_active());
                assert_eq!(state.snapshot.state(&monthly.remote_product_id), EntitlementState::Inactive);
                assert!(!state.snapshot.contains(&ProductId::new("com.other.app")));
            })
            .then_effects(|effects| {
                assert!(matches!(effects, [Effect::Parallel(fan_out)] if fan_out.len() == 2));
            })
            .run();
    }

    #[test]
    fn test_purchase_failure_leaves_state() {
        ReducerTest::new(ReconcilerReducer::new())
            .with_env(env())
            .given_state(configured())
            .when_action(ReconcilerAction::PurchaseFailed {
                option: fixtures::lifetime(),
                error: EntitlementError::UserCancelled,
            })
            .then_state(|state| assert_eq!(*state, configured()))
            .then_effects(|effects| assertions::assert_has_future_effect(effects))
            .run();
    }

    #[test]
    fn test_derive_batch_skips_unverified_and_unknown() {
        let table = OptionTable::from_options(fixtures::catalog());
        let lifetime = fixtures::lifetime();
        let results = vec![
            VerificationResult::Unverified {
                transaction: fixtures::unlock(&lifetime, "tx-bad"),
                reason: "revoked certificate".into(),
            },
            VerifiedTransaction::new("com.other.app", "tx-x").into(),
        ];

        assert!(derive_batch(&table, &results, now()).is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn reduce_all(state: &mut ReconcilerState, actions: Vec<ReconcilerAction>) {
            let reducer = ReconcilerReducer::new();
            let env = env();
            for action in actions {
                let _ = reducer.reduce(state, action, &env);
            }
        }

        fn arbitrary_transaction() -> impl Strategy<Value = VerifiedTransaction> {
            (0usize..4, -40i64..400, any::<bool>(), 0u8..4).prop_map(|(option, days, revoked, tx)| {
                let catalog = fixtures::catalog();
                let option = &catalog[option];
                let tx_id = format!("tx-{tx}");
                let transaction = match option.category {
                    entitlements_core::option::PurchaseCategory::AutoRenewingSubscription => {
                        fixtures::subscription(option, &tx_id, now() + Duration::days(days))
                    },
                    _ => fixtures::unlock(option, &tx_id),
                };
                if revoked {
                    transaction.with_revoked_at(now())
                } else {
                    transaction
                }
            })
        }

        proptest! {
            #[test]
            fn prop_at_most_one_active_per_group(
                transactions in prop::collection::vec(arbitrary_transaction(), 1..24)
            ) {
                let mut state = configured();
                reduce_all(&mut state, transactions.into_iter().map(stream).collect());

                let active_pro = [fixtures::pro_monthly(), fixtures::pro_yearly()]
                    .iter()
                    .filter(|option| state.snapshot.state(&option.remote_product_id).is_active())
                    .count();
                prop_assert!(active_pro <= 1);
            }

            #[test]
            fn prop_refolding_the_same_transaction_is_idempotent(
                history in prop::collection::vec(arbitrary_transaction(), 0..12),
                repeated in arbitrary_transaction()
            ) {
                let mut once = configured();
                reduce_all(&mut once, history.iter().cloned().map(stream).collect());
                let mut twice = once.clone();

                reduce_all(&mut once, vec![stream(repeated.clone())]);
                reduce_all(&mut twice, vec![stream(repeated.clone()), stream(repeated)]);

                prop_assert_eq!(once.snapshot, twice.snapshot);
            }
        }
    }
}
