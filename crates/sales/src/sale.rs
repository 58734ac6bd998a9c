use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kasir_core::{Entity, ItemId, Money, SaleId, SaleLineId};

use crate::code::SaleCode;
use crate::error::SaleError;

/// One requested basket line: item and quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub item_id: ItemId,
    pub quantity: i64,
}

impl SaleLine {
    pub fn new(item_id: ItemId, quantity: i64) -> Self {
        Self { item_id, quantity }
    }
}

/// Check the basket preconditions: at least one line, all quantities positive.
pub fn validate_basket(lines: &[SaleLine]) -> Result<(), SaleError> {
    if lines.is_empty() {
        return Err(SaleError::EmptyBasket);
    }
    for (idx, line) in lines.iter().enumerate() {
        if line.quantity <= 0 {
            return Err(SaleError::InvalidQuantity {
                line: idx + 1,
                item_id: line.item_id,
                quantity: line.quantity,
            });
        }
    }
    Ok(())
}

/// Persisted sale header. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub code: SaleCode,
    /// Sum of all line subtotals, fixed at commit time.
    pub total: Money,
    pub created_at: DateTime<Utc>,
}

impl Entity for Sale {
    type Id = SaleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Persisted sale line. `subtotal` is quantity times the unit price read at
/// the time of sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLineItem {
    pub id: SaleLineId,
    pub sale_id: SaleId,
    pub item_id: ItemId,
    pub quantity: i64,
    pub subtotal: Money,
}

impl Entity for SaleLineItem {
    type Id = SaleLineId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A committed sale together with its lines, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleReceipt {
    pub sale: Sale,
    pub lines: Vec<SaleLineItem>,
}

impl SaleReceipt {
    pub fn id(&self) -> SaleId {
        self.sale.id
    }

    pub fn code(&self) -> &SaleCode {
        &self.sale.code
    }

    pub fn total(&self) -> Money {
        self.sale.total
    }

    /// Units sold per item across all lines.
    pub fn quantity_of(&self, item_id: ItemId) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.item_id == item_id)
            .map(|l| l.quantity)
            .sum()
    }
}

/// Row of the sale history listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleSummary {
    pub id: SaleId,
    pub code: SaleCode,
    pub total: Money,
    pub created_at: DateTime<Utc>,
    pub line_count: u64,
}

/// One line of a sale detail view, joined with the item name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDetailLine {
    pub line_id: SaleLineId,
    pub item_id: ItemId,
    pub item_name: String,
    pub quantity: i64,
    /// Derived from the stored line, not from the item's current price.
    pub unit_price: Money,
    pub subtotal: Money,
}

/// A sale header with its lines for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDetail {
    pub sale: Sale,
    pub lines: Vec<SaleDetailLine>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn line(item: i64, qty: i64) -> SaleLine {
        SaleLine::new(ItemId::new(item), qty)
    }

    #[test]
    fn empty_basket_is_rejected() {
        assert_eq!(validate_basket(&[]), Err(SaleError::EmptyBasket));
    }

    #[test]
    fn non_positive_quantity_names_the_line() {
        let err = validate_basket(&[line(1, 2), line(2, 0)]).unwrap_err();
        assert_eq!(
            err,
            SaleError::InvalidQuantity {
                line: 2,
                item_id: ItemId::new(2),
                quantity: 0,
            }
        );
        assert!(validate_basket(&[line(1, -1)]).is_err());
        assert!(validate_basket(&[line(1, 1), line(1, 1)]).is_ok());
    }

    #[test]
    fn receipt_sums_repeated_items() {
        let sale_id = SaleId::new(1);
        let receipt = SaleReceipt {
            sale: Sale {
                id: sale_id,
                code: SaleCode::new("MP", NaiveDate::from_ymd_opt(2026, 10, 14).unwrap(), 1)
                    .unwrap(),
                total: Money::new(3_500),
                created_at: Utc::now(),
            },
            lines: vec![
                SaleLineItem {
                    id: SaleLineId::new(1),
                    sale_id,
                    item_id: ItemId::new(1),
                    quantity: 3,
                    subtotal: Money::new(1_500),
                },
                SaleLineItem {
                    id: SaleLineId::new(2),
                    sale_id,
                    item_id: ItemId::new(1),
                    quantity: 4,
                    subtotal: Money::new(2_000),
                },
            ],
        };
        assert_eq!(receipt.quantity_of(ItemId::new(1)), 7);
        assert_eq!(receipt.quantity_of(ItemId::new(2)), 0);

        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["sale"]["code"], "MP-20261014-0001");
        assert_eq!(json["sale"]["total"], 3_500);
    }
}
