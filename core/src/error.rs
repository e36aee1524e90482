//! Error taxonomy for purchase, restore and catalog operations.
//!
//! Mapping and exclusivity folding never fail. Errors only come from
//! collaborators (upstream store, catalog, purchase flow) and are surfaced to
//! callers without touching entitlement state.

use thiserror::Error;

/// Result alias used across the entitlement crates.
pub type Result<T> = std::result::Result<T, EntitlementError>;

/// Errors surfaced by entitlement operations.
///
/// `Clone` and `PartialEq` so an error can travel inside a runtime
/// `EntitlementEvent` and be asserted on in tests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    /// The user dismissed the purchase sheet
    #[error("Purchase cancelled by user")]
    UserCancelled,

    /// The purchase awaits approval (e.g. parental consent)
    #[error("Purchase pending approval")]
    PendingApproval,

    /// The network is unreachable or a transport call failed
    #[error("Network unavailable")]
    NetworkUnavailable,

    /// The upstream store refused service
    #[error("Store unavailable")]
    StoreUnavailable,

    /// Purchases are disabled for this user or device
    #[error("Purchase not allowed")]
    PurchaseNotAllowed,

    /// The upstream catalog does not know the requested product
    #[error("Product could not be resolved")]
    ProductUnresolvable,

    /// Anything the upstream reported that does not fit the other cases
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl EntitlementError {
    /// Whether retrying the same operation later can succeed.
    ///
    /// User decisions (`UserCancelled`) and policy refusals
    /// (`PurchaseNotAllowed`, `ProductUnresolvable`) are final for the attempt.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnavailable | Self::StoreUnavailable | Self::PendingApproval | Self::Unknown(_)
        )
    }

    /// Whether this error belongs to the network/transport category.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::NetworkUnavailable | Self::StoreUnavailable)
    }

    /// Collapse any error into the network category, keeping network-class errors as they are.
    #[must_use]
    pub fn into_network_category(self) -> Self {
        if self.is_network() {
            self
        } else {
            Self::NetworkUnavailable
        }
    }

    /// Short stable label, used as a metrics tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UserCancelled => "user_cancelled",
            Self::PendingApproval => "pending_approval",
            Self::NetworkUnavailable => "network_unavailable",
            Self::StoreUnavailable => "store_unavailable",
            Self::PurchaseNotAllowed => "purchase_not_allowed",
            Self::ProductUnresolvable => "product_unresolvable",
            Self::Unknown(_) => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability() {
        assert!(EntitlementError::NetworkUnavailable.is_recoverable());
        assert!(EntitlementError::Unknown("boom".into()).is_recoverable());
        assert!(!EntitlementError::UserCancelled.is_recoverable());
        assert!(!EntitlementError::ProductUnresolvable.is_recoverable());
    }

    #[test]
    fn test_network_category() {
        assert_eq!(
            EntitlementError::Unknown("tls".into()).into_network_category(),
            EntitlementError::NetworkUnavailable
        );
        assert_eq!(
            EntitlementError::StoreUnavailable.into_network_category(),
            EntitlementError::StoreUnavailable
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            EntitlementError::Unknown("receipt missing".into()).to_string(),
            "Unknown error: receipt missing"
        );
    }
}
