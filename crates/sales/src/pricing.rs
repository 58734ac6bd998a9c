//! Line validation and pricing.
//!
//! Rules, in order: the item must exist, its stock must cover the requested
//! quantity, and the subtotal is the currently stored sell price times the
//! quantity.

use tracing::debug;

use kasir_core::{ItemId, Money};
use kasir_inventory::{Item, ItemStore};

use crate::error::SaleError;
use crate::sale::SaleLine;

/// A validated, priced basket line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub item_id: ItemId,
    pub item_name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub subtotal: Money,
}

/// Apply the validation rules to one line against an already-resolved item.
pub fn price_line(line: &SaleLine, item: Option<&Item>) -> Result<PricedLine, SaleError> {
    let item = item.ok_or(SaleError::ItemNotFound {
        item_id: line.item_id,
    })?;

    if !item.covers(line.quantity) {
        return Err(SaleError::InsufficientStock {
            item_id: item.id,
            name: item.name.clone(),
            available: item.stock,
            requested: line.quantity,
        });
    }

    let subtotal = item
        .sell_price
        .checked_mul(line.quantity)
        .ok_or(SaleError::AmountOverflow { item_id: item.id })?;

    Ok(PricedLine {
        item_id: item.id,
        item_name: item.name.clone(),
        quantity: line.quantity,
        unit_price: item.sell_price,
        subtotal,
    })
}

/// Resolves and prices a line through the transaction's item store.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineValidator;

impl LineValidator {
    pub async fn validate<S>(&self, store: &mut S, line: &SaleLine) -> Result<PricedLine, SaleError>
    where
        S: ItemStore + ?Sized,
    {
        let item = store
            .get_item(line.item_id)
            .await
            .map_err(SaleError::PersistenceFailed)?;

        let priced = price_line(line, item.as_ref())?;
        debug!(
            item_id = %priced.item_id,
            quantity = priced.quantity,
            subtotal = %priced.subtotal,
            "line validated"
        );
        Ok(priced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn item(stock: i64, price: i64) -> Item {
        Item {
            id: ItemId::new(10),
            code: "BRG-010".to_string(),
            name: "Minyak Goreng 1L".to_string(),
            buy_price: Money::new(price / 2),
            sell_price: Money::new(price),
            stock,
        }
    }

    fn line(qty: i64) -> SaleLine {
        SaleLine::new(ItemId::new(10), qty)
    }

    #[test]
    fn missing_item_is_not_found() {
        assert_eq!(
            price_line(&line(1), None),
            Err(SaleError::ItemNotFound {
                item_id: ItemId::new(10)
            })
        );
    }

    #[test]
    fn short_stock_reports_name_and_available() {
        let err = price_line(&line(10), Some(&item(5, 1_000))).unwrap_err();
        match err {
            SaleError::InsufficientStock {
                name,
                available,
                requested,
                ..
            } => {
                assert_eq!(name, "Minyak Goreng 1L");
                assert_eq!(available, 5);
                assert_eq!(requested, 10);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
    }

    #[test]
    fn exact_stock_is_enough() {
        let priced = price_line(&line(5), Some(&item(5, 1_000))).unwrap();
        assert_eq!(priced.unit_price, Money::new(1_000));
        assert_eq!(priced.subtotal, Money::new(5_000));
    }

    #[test]
    fn overflowing_subtotal_is_rejected() {
        let err = price_line(&line(2), Some(&item(10, i64::MAX))).unwrap_err();
        assert_eq!(
            err,
            SaleError::AmountOverflow {
                item_id: ItemId::new(10)
            }
        );
    }

    proptest! {
        #[test]
        fn priced_iff_stock_covers(stock in 0i64..1_000, qty in 1i64..1_000, price in 0i64..1_000_000) {
            match price_line(&line(qty), Some(&item(stock, price))) {
                Ok(priced) => {
                    prop_assert!(qty <= stock);
                    prop_assert_eq!(priced.subtotal.minor_units(), price * qty);
                }
                Err(SaleError::InsufficientStock { available, requested, .. }) => {
                    prop_assert!(qty > stock);
                    prop_assert_eq!(available, stock);
                    prop_assert_eq!(requested, qty);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }
}
