//! Remote product metadata as returned by the upstream catalog.

use crate::product_id::ProductId;
use serde::{Deserialize, Serialize};

/// Display and pricing details of a store product.
///
/// Feeds purchase initiation; entitlement logic never reads it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductMetadata {
    /// Product identifier
    pub id: ProductId,
    /// Localized name
    pub display_name: String,
    /// Localized description
    pub description: String,
    /// Localized, formatted price (e.g. `"$4.99"`)
    pub display_price: String,
    /// Price in millionths of the currency unit
    pub price_micros: i64,
    /// ISO 4217 currency code
    pub currency_code: String,
}

impl ProductMetadata {
    /// Metadata with the given id and name, and empty pricing
    #[must_use]
    pub fn new(id: impl Into<ProductId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            description: String::new(),
            display_price: String::new(),
            price_micros: 0,
            currency_code: String::new(),
        }
    }

    /// Set the price
    #[must_use]
    pub fn with_price(
        mut self,
        display_price: impl Into<String>,
        price_micros: i64,
        currency_code: impl Into<String>,
    ) -> Self {
        self.display_price = display_price.into();
        self.price_micros = price_micros;
        self.currency_code = currency_code.into();
        self
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
