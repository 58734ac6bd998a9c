//! Sale submission failures.

use thiserror::Error;

use kasir_core::{ItemId, StoreError};

/// Why a basket was not committed.
///
/// Every variant means the whole submission was discarded: no sale header,
/// no line items and no stock change are visible afterwards.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SaleError {
    /// The basket had no lines.
    #[error("basket has no lines")]
    EmptyBasket,

    /// A line asked for zero or negative units.
    #[error("line {line}: quantity must be positive, got {quantity} for item {item_id}")]
    InvalidQuantity {
        line: usize,
        item_id: ItemId,
        quantity: i64,
    },

    /// A referenced item does not exist.
    #[error("item {item_id} not found")]
    ItemNotFound { item_id: ItemId },

    /// Requested quantity exceeds what is on hand.
    #[error("insufficient stock for {name}: {available} available, {requested} requested")]
    InsufficientStock {
        item_id: ItemId,
        name: String,
        available: i64,
        requested: i64,
    },

    /// Pricing a line or the basket total overflowed.
    #[error("amount overflow while pricing item {item_id}")]
    AmountOverflow { item_id: ItemId },

    /// The ledger could not be read to derive the next sale code.
    #[error("sale code generation failed: {0}")]
    GenerationFailed(StoreError),

    /// A store write or the commit failed; everything was rolled back.
    #[error("sale could not be persisted: {0}")]
    PersistenceFailed(StoreError),
}

impl SaleError {
    /// Whether re-running the whole submission may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SaleError::PersistenceFailed(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// The item a line-level failure refers to.
    pub fn item_id(&self) -> Option<ItemId> {
        match self {
            SaleError::InvalidQuantity { item_id, .. }
            | SaleError::ItemNotFound { item_id }
            | SaleError::InsufficientStock { item_id, .. }
            | SaleError::AmountOverflow { item_id } => Some(*item_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_names_item_and_stock() {
        let err = SaleError::InsufficientStock {
            item_id: ItemId::new(3),
            name: "Gula Pasir 1kg".to_string(),
            available: 5,
            requested: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("Gula Pasir 1kg"));
        assert!(msg.contains("5 available"));
        assert_eq!(err.item_id(), Some(ItemId::new(3)));
    }

    #[test]
    fn only_persistence_conflicts_retry() {
        assert!(SaleError::PersistenceFailed(StoreError::conflict("dup code")).is_retryable());
        assert!(!SaleError::PersistenceFailed(StoreError::Timeout(10)).is_retryable());
        assert!(!SaleError::GenerationFailed(StoreError::conflict("busy")).is_retryable());
        assert!(!SaleError::EmptyBasket.is_retryable());
    }
}
