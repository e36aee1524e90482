//! Entitlement mapper: classify a verified transaction.
//!
//! Priority order, first match wins:
//!
//! 1. `revoked_at` set → [`EntitlementState::Revoked`], whatever the expiry says
//! 2. `expires_at` set → expired when `expires_at <= now`, active otherwise
//! 3. otherwise → [`EntitlementState::PermanentUnlock`]

use crate::entitlement::EntitlementState;
use crate::transaction::VerifiedTransaction;
use chrono::{DateTime, Utc};

/// Map a transaction to the entitlement it grants at `now`.
///
/// Total and pure.
#[must_use]
pub fn map(transaction: &VerifiedTransaction, now: DateTime<Utc>) -> EntitlementState {
    if let Some(revoked_at) = transaction.revoked_at {
        return EntitlementState::Revoked { revoked_at };
    }

    match transaction.expires_at {
        Some(expires_at) if expires_at <= now => EntitlementState::SubscriptionExpired { expires_at },
        Some(expires_at) => EntitlementState::SubscriptionActive {
            expires_at,
            transaction_id: transaction.transaction_id.clone(),
        },
        None => EntitlementState::PermanentUnlock {
            transaction_id: transaction.transaction_id.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    #[test]
    fn test_no_expiry_is_permanent_unlock() {
        let tx = VerifiedTransaction::new("lifetime", "42");
        assert_eq!(
            map(&tx, now()),
            EntitlementState::PermanentUnlock { transaction_id: "42".into() }
        );
    }

    #[test]
    fn test_future_expiry_is_active() {
        let expires_at = now() + Duration::days(30);
        let tx = VerifiedTransaction::new("pro_m", "43").with_expires_at(expires_at);
        assert_eq!(
            map(&tx, now()),
            EntitlementState::SubscriptionActive { expires_at, transaction_id: "43".into() }
        );
    }

    #[test]
    fn test_expiry_at_now_is_expired() {
        let tx = VerifiedTransaction::new("pro_m", "44").with_expires_at(now());
        assert_eq!(map(&tx, now()), EntitlementState::SubscriptionExpired { expires_at: now() });
    }

    #[test]
    fn test_revocation_beats_future_expiry() {
        let revoked_at = now() - Duration::hours(1);
        let tx = VerifiedTransaction::new("pro_y", "45")
            .with_expires_at(now() + Duration::days(365))
            .with_revoked_at(revoked_at);
        assert_eq!(map(&tx, now()), EntitlementState::Revoked { revoked_at });
    }

    proptest! {
        #[test]
        fn property_revocation_always_wins(
            expiry_offset in proptest::option::of(-1_000_000i64..1_000_000),
            revoked_offset in -1_000_000i64..1_000_000,
        ) {
            let revoked_at = now() + Duration::seconds(revoked_offset);
            let mut tx = VerifiedTransaction::new("p", "t").with_revoked_at(revoked_at);
            tx.expires_at = expiry_offset.map(|s| now() + Duration::seconds(s));

            prop_assert_eq!(map(&tx, now()), EntitlementState::Revoked { revoked_at });
        }

        #[test]
        fn property_past_expiry_never_active(elapsed in 0i64..10_000_000) {
            let expires_at = now() - Duration::seconds(elapsed);
            let tx = VerifiedTransaction::new("p", "t").with_expires_at(expires_at);

            prop_assert_eq!(map(&tx, now()), EntitlementState::SubscriptionExpired { expires_at });
        }
    }
}
