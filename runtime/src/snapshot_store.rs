//! Best-effort persistence of the entitlement snapshot.
//!
//! The store is advisory: it is written after every reconciled change and
//! read once at cold start. Nothing here is trusted for access control.
//!
//! # Layout
//!
//! ```text
//! {prefix}.index              -> ["com.app.pro.monthly", "com.app.lifetime"]
//! {prefix}.index.backup       -> same list, written just before the index
//! {prefix}.entry.{productId}  -> {"kind":"subscriptionActive","expiresAt":"…","transactionId":"…"}
//! ```
//!
//! Every entry is decoded on its own, so a corrupt entry costs only itself.
//! The index is kept twice; entries are lost only when both copies are unreadable.
//! A `kind` written by a newer version reads as [`EntitlementState::Inactive`].

use chrono::{DateTime, Utc};
use entitlements_core::entitlement::{EntitlementSnapshot, EntitlementState};
use entitlements_core::product_id::ProductId;
use entitlements_core::source::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Tagged on-disk form of [`EntitlementState`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum PersistedEntry {
    Inactive,
    PermanentUnlock {
        transaction_id: String,
    },
    SubscriptionActive {
        expires_at: DateTime<Utc>,
        transaction_id: String,
    },
    SubscriptionExpired {
        expires_at: DateTime<Utc>,
    },
    Revoked {
        revoked_at: DateTime<Utc>,
    },
    #[serde(other)]
    Unrecognized,
}

impl From<&EntitlementState> for PersistedEntry {
    fn from(state: &EntitlementState) -> Self {
        match state {
            EntitlementState::Inactive => Self::Inactive,
            EntitlementState::PermanentUnlock { transaction_id } => Self::PermanentUnlock {
                transaction_id: transaction_id.clone(),
            },
            EntitlementState::SubscriptionActive {
                expires_at,
                transaction_id,
            } => Self::SubscriptionActive {
                expires_at: *expires_at,
                transaction_id: transaction_id.clone(),
            },
            EntitlementState::SubscriptionExpired { expires_at } => Self::SubscriptionExpired {
                expires_at: *expires_at,
            },
            EntitlementState::Revoked { revoked_at } => Self::Revoked {
                revoked_at: *revoked_at,
            },
        }
    }
}

impl From<PersistedEntry> for EntitlementState {
    fn from(entry: PersistedEntry) -> Self {
        match entry {
            PersistedEntry::Inactive | PersistedEntry::Unrecognized => Self::Inactive,
            PersistedEntry::PermanentUnlock { transaction_id } => {
                Self::PermanentUnlock { transaction_id }
            },
            PersistedEntry::SubscriptionActive {
                expires_at,
                transaction_id,
            } => Self::SubscriptionActive {
                expires_at,
                transaction_id,
            },
            PersistedEntry::SubscriptionExpired { expires_at } => {
                Self::SubscriptionExpired { expires_at }
            },
            PersistedEntry::Revoked { revoked_at } => Self::Revoked { revoked_at },
        }
    }
}

/// Encode one state as persisted bytes.
///
/// # Errors
///
/// Returns the serializer error; unreachable for well-formed states.
pub fn encode_entry(state: &EntitlementState) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&PersistedEntry::from(state))
}

/// Decode persisted bytes into a state.
///
/// Unrecognized `kind` values decode to [`EntitlementState::Inactive`].
///
/// # Errors
///
/// Returns the deserializer error for truncated or malformed bytes.
pub fn decode_entry(bytes: &[u8]) -> serde_json::Result<EntitlementState> {
    serde_json::from_slice::<PersistedEntry>(bytes).map(EntitlementState::from)
}

/// Snapshot persistence over a shared [`KeyValueStore`].
///
/// Writes are not transactional: two concurrent saves race and the last one wins.
#[derive(Clone)]
pub struct SnapshotStore {
    storage: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl SnapshotStore {
    /// Create a store writing under `prefix`
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
        }
    }

    /// Key prefix in use
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn index_key(&self) -> String {
        format!("{}.index", self.prefix)
    }

    fn backup_index_key(&self) -> String {
        format!("{}.index.backup", self.prefix)
    }

    fn entry_key(&self, product_id: &ProductId) -> String {
        format!("{}.entry.{}", self.prefix, product_id)
    }

    /// Persist every entry of `snapshot`, then the backup index, then the index.
    pub fn save(&self, snapshot: &EntitlementSnapshot) {
        let mut index: Vec<&ProductId> = Vec::with_capacity(snapshot.len());

        for (product_id, state) in snapshot.iter() {
            match encode_entry(state) {
                Ok(bytes) => {
                    self.storage.set(&self.entry_key(product_id), bytes);
                    index.push(product_id);
                },
                Err(error) => {
                    tracing::warn!(product_id = %product_id, error = %error, "Failed to encode snapshot entry");
                },
            }
        }

        index.sort();
        match serde_json::to_vec(&index) {
            Ok(bytes) => {
                self.storage.set(&self.backup_index_key(), bytes.clone());
                self.storage.set(&self.index_key(), bytes);
                metrics::counter!("entitlements.snapshot_store.saves").increment(1);
                tracing::debug!(entries = index.len(), prefix = %self.prefix, "Saved entitlement snapshot");
            },
            Err(error) => {
                tracing::warn!(error = %error, "Failed to encode snapshot index");
            },
        }
    }

    fn read_index(&self, key: &str) -> serde_json::Result<Option<BTreeSet<ProductId>>> {
        self.storage
            .get(key)
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
    }

    /// The index, falling back to its backup when missing or corrupt.
    fn load_index(&self) -> Option<BTreeSet<ProductId>> {
        match self.read_index(&self.index_key()) {
            Ok(Some(index)) => return Some(index),
            Ok(None) => {},
            Err(error) => {
                tracing::warn!(error = %error, "Corrupt snapshot index, trying backup");
                metrics::counter!("entitlements.snapshot_store.corrupt_index").increment(1);
            },
        }

        match self.read_index(&self.backup_index_key()) {
            Ok(Some(index)) => {
                tracing::info!(entries = index.len(), "Recovered snapshot index from backup");
                metrics::counter!("entitlements.snapshot_store.index_recovered").increment(1);
                Some(index)
            },
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(error = %error, "Corrupt backup snapshot index, starting empty");
                metrics::counter!("entitlements.snapshot_store.corrupt_index").increment(1);
                None
            },
        }
    }

    /// Read back the last saved snapshot.
    ///
    /// A missing index is replaced by its backup; when both are missing or
    /// corrupt the snapshot is empty. Entries that fail to decode are skipped
    /// and logged.
    #[must_use]
    pub fn load_by_product_id(&self) -> EntitlementSnapshot {
        metrics::counter!("entitlements.snapshot_store.loads").increment(1);

        let Some(index) = self.load_index() else {
            tracing::debug!(prefix = %self.prefix, "No persisted snapshot");
            return EntitlementSnapshot::new();
        };

        let mut snapshot = EntitlementSnapshot::new();
        for product_id in index {
            let Some(bytes) = self.storage.get(&self.entry_key(&product_id)) else {
                tracing::warn!(product_id = %product_id, "Indexed snapshot entry is missing");
                metrics::counter!("entitlements.snapshot_store.skipped_entries").increment(1);
                continue;
            };

            match decode_entry(&bytes) {
                Ok(state) => {
                    snapshot.insert(product_id, state);
                },
                Err(error) => {
                    tracing::warn!(product_id = %product_id, error = %error, "Skipping undecodable snapshot entry");
                    metrics::counter!("entitlements.snapshot_store.skipped_entries").increment(1);
                },
            }
        }

        tracing::debug!(entries = snapshot.len(), "Loaded persisted snapshot");
        snapshot
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
