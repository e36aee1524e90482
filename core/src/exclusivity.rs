//! Exclusivity reducer: at most one active subscription per group.
//!
//! Folding happens in two steps:
//!
//! 1. **Overlay**: every entry of `incoming` overwrites the matching entry of
//!    `current` (last writer wins per product).
//! 2. **Exclusivity**: within each group of auto-renewing subscriptions, one
//!    active option survives and every other active peer is forced to
//!    [`EntitlementState::Inactive`]. Options without a group, and options of
//!    any other category, are never touched.
//!
//! # Choosing the survivor
//!
//! Active group members are processed in a fixed order and the last one
//! processed wins:
//!
//! - entries already in `current` (and not overwritten) come first,
//!   entries from `incoming` come after them, so a fresh purchase displaces
//!   an older sibling;
//! - within each of those two sets, ascending `sort_order`, then ascending
//!   product id.
//!
//! So when a batch reports two siblings as active, the one with the highest
//! `sort_order` survives.

use crate::entitlement::{EntitlementSnapshot, EntitlementState};
use crate::option::{OptionTable, PurchaseOption};
use crate::product_id::ProductId;
use std::collections::HashMap;

/// Fold `incoming` into `current`, enforcing group exclusivity.
///
/// Entries whose product is missing from `table` are overlaid but never take
/// part in exclusivity (their category is unknown).
#[must_use]
pub fn reduce(
    current: &EntitlementSnapshot,
    incoming: &EntitlementSnapshot,
    table: &OptionTable,
) -> EntitlementSnapshot {
    let mut merged = current.clone();
    for (product_id, state) in incoming.iter() {
        merged.insert(product_id.clone(), state.clone());
    }

    // (from_incoming, sort_order, product id) gives the processing order.
    let mut contenders: Vec<(bool, i32, &PurchaseOption)> = merged
        .iter()
        .filter(|(_, state)| state.is_active())
        .filter_map(|(product_id, _)| table.get(product_id))
        .filter(|option| option.is_exclusive())
        .map(|option| {
            (
                incoming.contains(&option.remote_product_id),
                option.sort_order,
                option,
            )
        })
        .collect();
    contenders.sort_by(|a, b| {
        (a.0, a.1, &a.2.remote_product_id).cmp(&(b.0, b.1, &b.2.remote_product_id))
    });

    let mut survivors: HashMap<&str, &PurchaseOption> = HashMap::new();
    for &(_, _, option) in &contenders {
        if let Some(group) = option.group_id.as_deref() {
            survivors.insert(group, option);
        }
    }

    let suppressed: Vec<ProductId> = contenders
        .iter()
        .filter(|(_, _, option)| {
            option
                .group_id
                .as_deref()
                .and_then(|group| survivors.get(group))
                .is_some_and(|survivor| survivor.is_peer_of(option))
        })
        .map(|(_, _, option)| option.remote_product_id.clone())
        .collect();

    for product_id in suppressed {
        tracing::debug!(
            product_id = %product_id,
            "Deactivating subscription displaced by a sibling in the same group"
        );
        merged.insert(product_id, EntitlementState::Inactive);
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper;
    use crate::option::PurchaseCategory;
    use crate::transaction::VerifiedTransaction;
    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    fn subscription(id: &str, group: &str, sort_order: i32) -> PurchaseOption {
        PurchaseOption::new(id, id, PurchaseCategory::AutoRenewingSubscription)
            .with_group(group)
            .with_sort_order(sort_order)
    }

    fn active(tx: &str, days: i64) -> EntitlementState {
        EntitlementState::SubscriptionActive {
            expires_at: now() + Duration::days(days),
            transaction_id: tx.into(),
        }
    }

    fn id(value: &str) -> ProductId {
        ProductId::new(value)
    }

    fn pro_table() -> OptionTable {
        OptionTable::from_options(vec![subscription("pro_m", "pro", 0), subscription("pro_y", "pro", 1)])
    }

    #[test]
    fn test_newer_sibling_displaces_older() {
        let table = pro_table();

        let after_yearly = reduce(
            &EntitlementSnapshot::new(),
            &EntitlementSnapshot::single(id("pro_y"), active("y1", 365)),
            &table,
        );
        assert!(after_yearly.state(&id("pro_y")).is_active());
        assert!(after_yearly.get(&id("pro_m")).is_none());

        let after_monthly = reduce(
            &after_yearly,
            &EntitlementSnapshot::single(id("pro_m"), active("m1", 30)),
            &table,
        );
        assert!(after_monthly.state(&id("pro_m")).is_active());
        assert_eq!(after_monthly.state(&id("pro_y")), EntitlementState::Inactive);
    }

    #[test]
    fn test_ungrouped_unlock_survives_subscription_folds() {
        let table = OptionTable::from_options(vec![
            PurchaseOption::new("lifetime", "lifetime", PurchaseCategory::OneTimeUnlock),
            subscription("pro_m", "pro", 0),
            PurchaseOption::new("solo", "solo", PurchaseCategory::AutoRenewingSubscription),
        ]);
        let unlock = EntitlementState::PermanentUnlock { transaction_id: "1".into() };

        let mut snapshot = reduce(
            &EntitlementSnapshot::new(),
            &EntitlementSnapshot::single(id("lifetime"), unlock.clone()),
            &table,
        );
        snapshot = reduce(&snapshot, &EntitlementSnapshot::single(id("pro_m"), active("m", 30)), &table);
        snapshot = reduce(&snapshot, &EntitlementSnapshot::single(id("solo"), active("s", 30)), &table);

        assert_eq!(snapshot.state(&id("lifetime")), unlock);
        assert!(snapshot.state(&id("pro_m")).is_active());
        assert!(snapshot.state(&id("solo")).is_active());
    }

    #[test]
    fn test_other_groups_are_independent() {
        let table = OptionTable::from_options(vec![
            subscription("pro_m", "pro", 0),
            subscription("team_m", "team", 0),
        ]);
        let mut snapshot = reduce(
            &EntitlementSnapshot::new(),
            &EntitlementSnapshot::single(id("pro_m"), active("a", 30)),
            &table,
        );
        snapshot = reduce(&snapshot, &EntitlementSnapshot::single(id("team_m"), active("b", 30)), &table);

        assert!(snapshot.state(&id("pro_m")).is_active());
        assert!(snapshot.state(&id("team_m")).is_active());
    }

    #[test]
    fn test_batch_tie_break_prefers_highest_sort_order() {
        let table = pro_table();
        let incoming: EntitlementSnapshot = vec![
            (id("pro_m"), active("m", 30)),
            (id("pro_y"), active("y", 365)),
        ]
        .into_iter()
        .collect();

        let snapshot = reduce(&EntitlementSnapshot::new(), &incoming, &table);

        assert!(snapshot.state(&id("pro_y")).is_active());
        assert_eq!(snapshot.state(&id("pro_m")), EntitlementState::Inactive);
    }

    #[test]
    fn test_inactive_incoming_does_not_suppress() {
        let table = pro_table();
        let current = EntitlementSnapshot::single(id("pro_y"), active("y", 365));
        let incoming = EntitlementSnapshot::single(
            id("pro_m"),
            EntitlementState::SubscriptionExpired { expires_at: now() },
        );

        let snapshot = reduce(&current, &incoming, &table);
        assert!(snapshot.state(&id("pro_y")).is_active());
    }

    #[test]
    fn test_unknown_products_are_overlaid_untouched() {
        let table = pro_table();
        let current = EntitlementSnapshot::single(id("pro_y"), active("y", 365));
        let incoming = EntitlementSnapshot::single(id("legacy"), active("l", 10));

        let snapshot = reduce(&current, &incoming, &table);
        assert!(snapshot.state(&id("legacy")).is_active());
        assert!(snapshot.state(&id("pro_y")).is_active());
    }

    #[test]
    fn test_folding_twice_is_idempotent() {
        let table = pro_table();
        let tx = VerifiedTransaction::new("pro_m", "m1").with_expires_at(now() + Duration::days(30));
        let incoming = EntitlementSnapshot::single(id("pro_m"), mapper::map(&tx, now()));
        let current = EntitlementSnapshot::single(id("pro_y"), active("y", 365));

        let once = reduce(&current, &incoming, &table);
        let twice = reduce(&once, &incoming, &table);
        assert_eq!(once, twice);
    }

    fn arbitrary_fold() -> impl Strategy<Value = (usize, Option<i64>, bool)> {
        (0usize..4, proptest::option::of(-30i64..400), any::<bool>())
    }

    proptest! {
        #[test]
        fn property_at_most_one_active_per_group(folds in proptest::collection::vec(arbitrary_fold(), 1..40)) {
            let options = vec![
                subscription("pro_w", "pro", 0),
                subscription("pro_m", "pro", 1),
                subscription("pro_y", "pro", 2),
                PurchaseOption::new("lifetime", "lifetime", PurchaseCategory::OneTimeUnlock),
            ];
            let table = OptionTable::from_options(options.clone());
            let mut snapshot = EntitlementSnapshot::new();

            for (step, (index, expiry_days, revoked)) in folds.into_iter().enumerate() {
                let option = &options[index];
                let mut tx = VerifiedTransaction::new(option.remote_product_id.clone(), step.to_string());
                tx.expires_at = expiry_days.map(|days| now() + Duration::days(days));
                if revoked {
                    tx.revoked_at = Some(now());
                }
                let incoming = EntitlementSnapshot::single(option.remote_product_id.clone(), mapper::map(&tx, now()));
                snapshot = reduce(&snapshot, &incoming, &table);

                let active_in_group = ["pro_w", "pro_m", "pro_y"]
                    .iter()
                    .filter(|product| snapshot.state(&id(product)).is_active())
                    .count();
                prop_assert!(active_in_group <= 1);
            }
        }
    }
}
