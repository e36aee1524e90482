//! Option catalog and transaction fixtures
//!
//! The catalog models a typical app: a "pro" tier sold monthly and yearly
//! (mutually exclusive), a lifetime unlock and a consumable coin pack.

use chrono::{DateTime, Utc};
use entitlements_core::option::{PurchaseCategory, PurchaseOption};
use entitlements_core::product::ProductMetadata;
use entitlements_core::transaction::VerifiedTransaction;

/// Monthly pro subscription, group `pro`, sort order 0
#[must_use]
pub fn pro_monthly() -> PurchaseOption {
    PurchaseOption::new("pro_m", "com.app.pro.monthly", PurchaseCategory::AutoRenewingSubscription)
        .with_group("pro")
        .with_sort_order(0)
}

/// Yearly pro subscription, group `pro`, sort order 1
#[must_use]
pub fn pro_yearly() -> PurchaseOption {
    PurchaseOption::new("pro_y", "com.app.pro.yearly", PurchaseCategory::AutoRenewingSubscription)
        .with_group("pro")
        .with_sort_order(1)
}

/// One-time lifetime unlock, no group
#[must_use]
pub fn lifetime() -> PurchaseOption {
    PurchaseOption::new("lifetime", "com.app.lifetime", PurchaseCategory::OneTimeUnlock).with_sort_order(2)
}

/// Consumable coin pack
#[must_use]
pub fn coins() -> PurchaseOption {
    PurchaseOption::new("coins_100", "com.app.coins.100", PurchaseCategory::Consumable).with_sort_order(3)
}

/// Every fixture option
#[must_use]
pub fn catalog() -> Vec<PurchaseOption> {
    vec![pro_monthly(), pro_yearly(), lifetime(), coins()]
}

/// Subscription transaction for `option` expiring at `expires_at`
#[must_use]
pub fn subscription(
    option: &PurchaseOption,
    transaction_id: &str,
    expires_at: DateTime<Utc>,
) -> VerifiedTransaction {
    VerifiedTransaction::new(option.remote_product_id.clone(), transaction_id).with_expires_at(expires_at)
}

/// Non-expiring transaction for `option`
#[must_use]
pub fn unlock(option: &PurchaseOption, transaction_id: &str) -> VerifiedTransaction {
    VerifiedTransaction::new(option.remote_product_id.clone(), transaction_id)
}

/// Refunded transaction for `option`
#[must_use]
pub fn refund(option: &PurchaseOption, transaction_id: &str, revoked_at: DateTime<Utc>) -> VerifiedTransaction {
    unlock(option, transaction_id).with_revoked_at(revoked_at)
}

/// Catalog metadata for `option`
#[must_use]
pub fn metadata(option: &PurchaseOption) -> ProductMetadata {
    ProductMetadata::new(option.remote_product_id.clone(), option.id.clone())
        .with_price("$4.99", 4_990_000, "USD")
}
