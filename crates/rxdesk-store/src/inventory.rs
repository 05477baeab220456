//! Inventory rules.
//!
//! Stock adjustments and the product list filters used by the inventory
//! screen.

use crate::error::{Result, StoreError};
use crate::types::Product;

/// Compute the stock level after adding `delta` units.
///
/// # Errors
///
/// Returns `StoreError::InvariantViolation` if the result would be negative
/// or does not fit the stock column.
pub fn apply_stock_delta(product: &Product, delta: i64) -> Result<u32> {
    let next = i64::from(product.stock_quantity) + delta;
    if next < 0 {
        return Err(StoreError::InvariantViolation(format!(
            "cannot reduce stock of {} below zero ({} on hand, {delta} requested)",
            product.id, product.stock_quantity
        )));
    }
    u32::try_from(next).map_err(|_| {
        StoreError::InvariantViolation(format!("stock of {} would overflow", product.id))
    })
}

/// Filters applied to the product list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductFilter {
    /// Case-insensitive substring matched against name and description.
    pub search: Option<String>,
    /// Exact category.
    pub category: Option<String>,
    /// Only products at or below their low-stock threshold.
    pub low_stock_only: bool,
}

impl ProductFilter {
    /// Returns true if `product` passes every active filter.
    #[must_use]
    pub fn matches(&self, product: &Product) -> bool {
        if let Some(term) = self.search.as_deref().filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            if !product.name.to_lowercase().contains(&term)
                && !product.description.to_lowercase().contains(&term)
            {
                return false;
            }
        }

        if let Some(category) = self.category.as_deref().filter(|c| !c.is_empty()) {
            if product.category != category {
                return false;
            }
        }

        !self.low_stock_only || product.is_low_stock()
    }

    /// Keep the matching products, preserving order.
    #[must_use]
    pub fn apply<'a>(&self, products: &'a [Product]) -> Vec<&'a Product> {
        products.iter().filter(|p| self.matches(p)).collect()
    }
}
