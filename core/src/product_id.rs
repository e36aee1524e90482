//! Remote product identifiers.
//!
//! A [`ProductId`] is the identity of a purchasable option for entitlement
//! purposes. Transactions, snapshots and the product cache are all keyed by it;
//! the caller-facing option id never reaches the reconciliation logic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `ProductId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid product ID: {0}")]
pub struct ParseProductIdError(String);

/// Identifier of a product in the upstream store (e.g. `"com.app.pro.monthly"`).
///
/// # Validation
///
/// - `FromStr::from_str()`: rejects empty strings
/// - `From::from()` and `new()`: no validation (for identifiers the app controls)
///
/// Use `FromStr` for identifiers read from persisted or external input.
///
/// # Examples
///
/// ```
/// use entitlements_core::product_id::ProductId;
///
/// let id = ProductId::new("com.app.pro.monthly");
/// assert_eq!(id.as_str(), "com.app.pro.monthly");
///
/// let parsed: ProductId = "com.app.pro.yearly".parse().unwrap();
/// assert_eq!(parsed, ProductId::new("com.app.pro.yearly"));
/// assert!("".parse::<ProductId>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Create a new `ProductId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the product ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the `ProductId` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProductId {
    type Err = ParseProductIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ParseProductIdError("product ID cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ProductId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
