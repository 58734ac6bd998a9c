use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use kasir_core::{Entity, ItemId, Money, StoreResult};

/// Catalog item as seen by the sale engine.
///
/// The catalog owns the lifecycle of this record; the engine only reads it and
/// applies relative stock decrements through [`ItemStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub code: String,
    pub name: String,
    /// Unit cost in smallest currency unit.
    pub buy_price: Money,
    /// Unit sell price in smallest currency unit.
    pub sell_price: Money,
    /// Units on hand, never negative.
    pub stock: i64,
}

impl Item {
    /// Whether the current stock can satisfy `quantity` units.
    pub fn covers(&self, quantity: i64) -> bool {
        quantity >= 0 && self.stock >= quantity
    }
}

impl Entity for Item {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Field set for registering an item with a store.
///
/// Catalog maintenance lives outside the sale engine; stores accept this so
/// hosts and tests can seed the items a basket refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub code: String,
    pub name: String,
    pub buy_price: Money,
    pub sell_price: Money,
    pub stock: i64,
}

impl NewItem {
    pub fn new(code: impl Into<String>, name: impl Into<String>, sell_price: Money, stock: i64) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            buy_price: Money::ZERO,
            sell_price,
            stock,
        }
    }

    pub fn with_buy_price(mut self, buy_price: Money) -> Self {
        self.buy_price = buy_price;
        self
    }

    pub fn into_item(self, id: ItemId) -> Item {
        Item {
            id,
            code: self.code,
            name: self.name,
            buy_price: self.buy_price,
            sell_price: self.sell_price,
            stock: self.stock,
        }
    }
}

/// Outcome of a conditional stock decrement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StockDecrement {
    /// Stock was reduced; `remaining` is the new level.
    Applied { remaining: i64 },
    /// Stock was left untouched because fewer than the requested units remain.
    Insufficient { available: i64 },
    /// No item with that id exists.
    NotFound,
}

/// Item lookup/mutation store, scoped to one open transaction.
///
/// Implementations must:
/// - answer `get_item` from the same snapshot the decrement writes to
/// - apply `decrement_stock` as a single conditional write
///   ("subtract if stock >= amount"), never as read-then-set
/// - never set stock to an absolute value
#[async_trait]
pub trait ItemStore: Send {
    /// Read an item by id. `Ok(None)` when it does not exist.
    async fn get_item(&mut self, id: ItemId) -> StoreResult<Option<Item>>;

    /// Atomically subtract `amount` units if at least that many remain.
    async fn decrement_stock(&mut self, id: ItemId, amount: i64) -> StoreResult<StockDecrement>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_item(stock: i64) -> Item {
        Item {
            id: ItemId::new(1),
            code: "BRG-001".to_string(),
            name: "Kopi Bubuk 200g".to_string(),
            buy_price: Money::new(8_000),
            sell_price: Money::new(10_000),
            stock,
        }
    }

    #[test]
    fn covers_exact_and_smaller_quantities() {
        let item = test_item(5);
        assert!(item.covers(5));
        assert!(item.covers(1));
        assert!(!item.covers(6));
    }

    #[test]
    fn empty_stock_covers_nothing_positive() {
        let item = test_item(0);
        assert!(item.covers(0));
        assert!(!item.covers(1));
        assert!(!item.covers(-1));
    }

    #[test]
    fn new_item_keeps_fields_when_assigned_an_id() {
        let item = NewItem::new("BRG-002", "Teh Celup", Money::new(4_500), 12)
            .with_buy_price(Money::new(3_000))
            .into_item(ItemId::new(9));
        assert_eq!(item.id, ItemId::new(9));
        assert_eq!(item.buy_price, Money::new(3_000));
        assert_eq!(item.sell_price, Money::new(4_500));
        assert_eq!(item.stock, 12);
    }

    #[test]
    fn serializes_prices_as_minor_units() {
        let json = serde_json::to_value(test_item(3)).unwrap();
        assert_eq!(json["sell_price"], 10_000);
        assert_eq!(json["stock"], 3);
        assert_eq!(json["id"], 1);
    }
}
