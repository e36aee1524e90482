//! Purchasable options and the product lookup table.

use crate::product_id::ProductId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How an option is sold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PurchaseCategory {
    /// Bought once, never expires
    OneTimeUnlock,
    /// Bought and used up
    Consumable,
    /// Renews until cancelled; exclusive within its group
    AutoRenewingSubscription,
    /// Runs for a fixed term without renewing
    FixedTermSubscription,
}

/// A caller-defined purchasable item mapped 1:1 to a remote store product.
///
/// Identity for entitlement purposes is [`remote_product_id`](Self::remote_product_id);
/// `id` is only meaningful to the caller. `display_metadata` is carried
/// through untouched.
///
/// Callers typically implement `From<TheirType> for PurchaseOption` and pass
/// their own values to the reconciler, which converts them at the boundary.
///
/// # Example
///
/// ```
/// use entitlements_core::option::{PurchaseCategory, PurchaseOption};
///
/// let monthly = PurchaseOption::new("pro_m", "com.app.pro.monthly", PurchaseCategory::AutoRenewingSubscription)
///     .with_group("pro")
///     .with_sort_order(1);
///
/// assert!(monthly.is_exclusive());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOption {
    /// Caller-facing identifier
    pub id: String,
    /// Product identifier in the upstream store
    pub remote_product_id: ProductId,
    /// Purchase category
    pub category: PurchaseCategory,
    /// Exclusivity group (only meaningful for auto-renewing subscriptions)
    pub group_id: Option<String>,
    /// Ordering used for display and for exclusivity tie-breaks
    pub sort_order: i32,
    /// Opaque caller payload (titles, feature lists, artwork keys, ...)
    pub display_metadata: serde_json::Value,
}

impl PurchaseOption {
    /// Create an option with no group, sort order 0 and empty metadata
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        remote_product_id: impl Into<ProductId>,
        category: PurchaseCategory,
    ) -> Self {
        Self {
            id: id.into(),
            remote_product_id: remote_product_id.into(),
            category,
            group_id: None,
            sort_order: 0,
            display_metadata: serde_json::Value::Null,
        }
    }

    /// Set the exclusivity group
    #[must_use]
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Set the sort order
    #[must_use]
    pub const fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Attach caller metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.display_metadata = metadata;
        self
    }

    /// Whether this option takes part in group exclusivity.
    ///
    /// Only auto-renewing subscriptions with a group do.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.category == PurchaseCategory::AutoRenewingSubscription && self.group_id.is_some()
    }

    /// Whether `other` is a distinct option competing in the same exclusivity group
    #[must_use]
    pub fn is_peer_of(&self, other: &Self) -> bool {
        self.is_exclusive()
            && other.is_exclusive()
            && self.category == other.category
            && self.group_id == other.group_id
            && self.remote_product_id != other.remote_product_id
    }
}

/// Lookup table `ProductId → PurchaseOption`.
///
/// Always built wholesale; a new table replaces the previous one, it is never
/// merged with it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OptionTable {
    by_product: HashMap<ProductId, PurchaseOption>,
}

impl OptionTable {
    /// Build a table from a list of options.
    ///
    /// When two options share a remote product id the later one wins.
    pub fn from_options<I>(options: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PurchaseOption>,
    {
        let mut by_product = HashMap::new();
        for option in options {
            let option: PurchaseOption = option.into();
            let product_id = option.remote_product_id.clone();
            if let Some(previous) = by_product.insert(product_id.clone(), option) {
                tracing::warn!(
                    product_id = %product_id,
                    replaced_option = %previous.id,
                    "Duplicate remote product id in option catalog, keeping the last option"
                );
            }
        }
        Self { by_product }
    }

    /// Look up the option for a remote product id
    #[must_use]
    pub fn get(&self, product_id: &ProductId) -> Option<&PurchaseOption> {
        self.by_product.get(product_id)
    }

    /// Whether the table knows this product id
    #[must_use]
    pub fn contains(&self, product_id: &ProductId) -> bool {
        self.by_product.contains_key(product_id)
    }

    /// Number of options in the table
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_product.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_product.is_empty()
    }

    /// Iterate over all options
    pub fn options(&self) -> impl Iterator<Item = &PurchaseOption> {
        self.by_product.values()
    }

    /// A copy of this table that also knows `option`.
    ///
    /// Used to fold a transaction for an option the caller never configured;
    /// the table itself is not changed.
    #[must_use]
    pub fn including(&self, option: PurchaseOption) -> Self {
        let mut by_product = self.by_product.clone();
        by_product.insert(option.remote_product_id.clone(), option);
        Self { by_product }
    }
}

impl<T: Into<PurchaseOption>> FromIterator<T> for OptionTable {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_options(iter)
    }
}
