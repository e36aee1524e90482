//! Transactions delivered by the upstream store.

use crate::product_id::ProductId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An upstream-attested purchase, renewal, expiration or refund.
///
/// Every instance delivered by the transaction stream must be acknowledged
/// exactly once, whether or not the product is known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedTransaction {
    /// Product the transaction is for
    pub remote_product_id: ProductId,
    /// Upstream transaction identifier
    pub transaction_id: String,
    /// End of the subscription period, if any
    pub expires_at: Option<DateTime<Utc>>,
    /// Revocation time, if the grant was withdrawn
    pub revoked_at: Option<DateTime<Utc>>,
}

impl VerifiedTransaction {
    /// Non-expiring, non-revoked transaction
    #[must_use]
    pub fn new(remote_product_id: impl Into<ProductId>, transaction_id: impl Into<String>) -> Self {
        Self {
            remote_product_id: remote_product_id.into(),
            transaction_id: transaction_id.into(),
            expires_at: None,
            revoked_at: None,
        }
    }

    /// Set the expiry
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the revocation time
    #[must_use]
    pub const fn with_revoked_at(mut self, revoked_at: DateTime<Utc>) -> Self {
        self.revoked_at = Some(revoked_at);
        self
    }
}

/// One item of the upstream stream: a transaction whose payload either passed
/// or failed integrity verification.
///
/// Both cases carry the transaction so it can be acknowledged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationResult {
    /// Payload verified
    Verified(VerifiedTransaction),
    /// Payload failed verification
    Unverified {
        /// The transaction as decoded, unverified
        transaction: VerifiedTransaction,
        /// Why verification failed
        reason: String,
    },
}

impl VerificationResult {
    /// The transaction, verified or not
    #[must_use]
    pub const fn transaction(&self) -> &VerifiedTransaction {
        match self {
            Self::Verified(transaction) | Self::Unverified { transaction, .. } => transaction,
        }
    }

    /// Consume into the transaction, verified or not
    #[must_use]
    pub fn into_transaction(self) -> VerifiedTransaction {
        match self {
            Self::Verified(transaction) | Self::Unverified { transaction, .. } => transaction,
        }
    }

    /// The verified transaction, or `None` if verification failed
    #[must_use]
    pub const fn verified(&self) -> Option<&VerifiedTransaction> {
        match self {
            Self::Verified(transaction) => Some(transaction),
            Self::Unverified { .. } => None,
        }
    }

    /// Whether verification succeeded
    #[must_use]
    pub const fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }
}

impl From<VerifiedTransaction> for VerificationResult {
    fn from(transaction: VerifiedTransaction) -> Self {
        Self::Verified(transaction)
    }
}

/// Result of handing a product to the purchase flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// The store completed the purchase
    Success(VerificationResult),
    /// The user backed out
    Cancelled,
    /// The purchase awaits approval and will arrive later on the stream
    PendingApproval,
}
