//! Entitlement states and snapshots.

use crate::product_id::ProductId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The authoritative per-option fact.
///
/// `SubscriptionActive` may go stale between events: readers that care about
/// wall-clock time use [`effective_at`](Self::effective_at) or
/// [`is_active_at`](Self::is_active_at).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EntitlementState {
    /// No grant
    #[default]
    Inactive,

    /// One-time purchase, never expires
    PermanentUnlock {
        /// Transaction that granted the unlock
        transaction_id: String,
    },

    /// Subscription grant valid while `now < expires_at`
    SubscriptionActive {
        /// End of the current period
        expires_at: DateTime<Utc>,
        /// Transaction of the current period
        transaction_id: String,
    },

    /// Subscription lapsed naturally
    SubscriptionExpired {
        /// When the last period ended
        expires_at: DateTime<Utc>,
    },

    /// Grant withdrawn upstream (refund, chargeback)
    Revoked {
        /// When the upstream store revoked the grant
        revoked_at: DateTime<Utc>,
    },
}

impl EntitlementState {
    /// Whether the stored variant grants access.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::PermanentUnlock { .. } | Self::SubscriptionActive { .. })
    }

    /// Whether the state grants access at `now`, treating an elapsed subscription as expired.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::PermanentUnlock { .. } => true,
            Self::SubscriptionActive { expires_at, .. } => now < *expires_at,
            _ => false,
        }
    }

    /// The state as observed at `now`.
    ///
    /// A `SubscriptionActive` whose `expires_at <= now` reads as
    /// `SubscriptionExpired`; every other variant is returned unchanged.
    #[must_use]
    pub fn effective_at(&self, now: DateTime<Utc>) -> Self {
        match self {
            Self::SubscriptionActive { expires_at, .. } if *expires_at <= now => {
                Self::SubscriptionExpired { expires_at: *expires_at }
            },
            other => other.clone(),
        }
    }

    /// Transaction behind the grant, if the state carries one
    #[must_use]
    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            Self::PermanentUnlock { transaction_id }
            | Self::SubscriptionActive { transaction_id, .. } => Some(transaction_id),
            _ => None,
        }
    }

    /// Short label for logs and metrics
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::PermanentUnlock { .. } => "permanent_unlock",
            Self::SubscriptionActive { .. } => "subscription_active",
            Self::SubscriptionExpired { .. } => "subscription_expired",
            Self::Revoked { .. } => "revoked",
        }
    }
}

/// Full mapping from product id to entitlement state.
///
/// One entry per option ever observed. Reading an absent product yields
/// [`EntitlementState::Inactive`], so feature gating always has an answer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntitlementSnapshot {
    entries: HashMap<ProductId, EntitlementState>,
}

impl EntitlementSnapshot {
    /// Create an empty snapshot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot holding a single entry
    #[must_use]
    pub fn single(product_id: ProductId, state: EntitlementState) -> Self {
        let mut snapshot = Self::new();
        snapshot.insert(product_id, state);
        snapshot
    }

    /// State for a product, `Inactive` when absent
    #[must_use]
    pub fn state(&self, product_id: &ProductId) -> EntitlementState {
        self.entries.get(product_id).cloned().unwrap_or_default()
    }

    /// Recorded state for a product, `None` when never observed
    #[must_use]
    pub fn get(&self, product_id: &ProductId) -> Option<&EntitlementState> {
        self.entries.get(product_id)
    }

    /// Insert or overwrite an entry, returning the previous state
    pub fn insert(&mut self, product_id: ProductId, state: EntitlementState) -> Option<EntitlementState> {
        self.entries.insert(product_id, state)
    }

    /// Whether the product has a recorded entry
    #[must_use]
    pub fn contains(&self, product_id: &ProductId) -> bool {
        self.entries.contains_key(product_id)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&ProductId, &EntitlementState)> {
        self.entries.iter()
    }

    /// Product ids whose state is active at `now`, sorted
    #[must_use]
    pub fn active_at(&self, now: DateTime<Utc>) -> Vec<ProductId> {
        let mut active: Vec<ProductId> = self
            .entries
            .iter()
            .filter(|(_, state)| state.is_active_at(now))
            .map(|(id, _)| id.clone())
            .collect();
        active.sort();
        active
    }

    /// Copy of the snapshot with every entry re-evaluated at `now`
    #[must_use]
    pub fn effective_at(&self, now: DateTime<Utc>) -> Self {
        self.entries
            .iter()
            .map(|(id, state)| (id.clone(), state.effective_at(now)))
            .collect()
    }

    /// Entries of `next` that differ from `self` (including newly recorded ones)
    #[must_use]
    pub fn changes_to(&self, next: &Self) -> Vec<(ProductId, EntitlementState)> {
        let mut changed: Vec<(ProductId, EntitlementState)> = next
            .entries
            .iter()
            .filter(|(id, state)| self.entries.get(*id) != Some(*state))
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();
        changed.sort_by(|a, b| a.0.cmp(&b.0));
        changed
    }
}

impl FromIterator<(ProductId, EntitlementState)> for EntitlementSnapshot {
    fn from_iter<I: IntoIterator<Item = (ProductId, EntitlementState)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for EntitlementSnapshot {
    type Item = (ProductId, EntitlementState);
    type IntoIter = std::collections::hash_map::IntoIter<ProductId, EntitlementState>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
