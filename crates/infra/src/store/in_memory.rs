//! In-memory sale store.
//!
//! Intended for tests/dev. Transactions are serialized by one async mutex:
//! `begin` takes the lock and clones the committed state into a working copy,
//! `commit` swaps the working copy in. Dropping a transaction releases the
//! lock and discards its writes.
//!
//! One-shot faults can be armed per operation to exercise failure paths.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use kasir_core::{ItemId, Money, SaleId, SaleLineId, StoreError, StoreResult};
use kasir_inventory::{Item, ItemStore, NewItem, StockDecrement};
use kasir_sales::{
    Sale, SaleCode, SaleDetail, SaleDetailLine, SaleHistory, SaleLedger, SaleLineItem, SaleStore,
    SaleSummary, SaleTransaction,
};

/// Store operation at which a fault can be injected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultPoint {
    Begin,
    CountSales,
    InsertHeader,
    InsertLine,
    DecrementStock,
    UpdateTotal,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct Ledger {
    items: BTreeMap<ItemId, Item>,
    sales: BTreeMap<SaleId, Sale>,
    lines: BTreeMap<SaleLineId, SaleLineItem>,
    last_item_id: i64,
    last_sale_id: i64,
    last_line_id: i64,
}

impl Ledger {
    fn next_sale_id(&mut self) -> SaleId {
        self.last_sale_id += 1;
        SaleId::new(self.last_sale_id)
    }

    fn next_line_id(&mut self) -> SaleLineId {
        self.last_line_id += 1;
        SaleLineId::new(self.last_line_id)
    }
}

#[derive(Debug, Default)]
struct Shared {
    committed: Ledger,
    faults: Vec<(FaultPoint, StoreError)>,
    commit_delay: Option<Duration>,
}

impl Shared {
    fn take_fault(&mut self, point: FaultPoint) -> StoreResult<()> {
        match self.faults.iter().position(|(p, _)| *p == point) {
            Some(idx) => Err(self.faults.remove(idx).1),
            None => Ok(()),
        }
    }
}

/// In-memory sale store.
#[derive(Debug, Clone, Default)]
pub struct InMemorySaleStore {
    shared: Arc<Mutex<Shared>>,
}

impl InMemorySaleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item and return it with its assigned id.
    pub async fn add_item(&self, item: NewItem) -> StoreResult<Item> {
        if item.stock < 0 {
            return Err(StoreError::backend("stock must not be negative"));
        }
        let mut shared = self.shared.lock().await;
        let ledger = &mut shared.committed;
        ledger.last_item_id += 1;
        let item = item.into_item(ItemId::new(ledger.last_item_id));
        ledger.items.insert(item.id, item.clone());
        Ok(item)
    }

    pub async fn item(&self, id: ItemId) -> Option<Item> {
        self.shared.lock().await.committed.items.get(&id).cloned()
    }

    pub async fn sale_count(&self) -> usize {
        self.shared.lock().await.committed.sales.len()
    }

    pub async fn line_item_count(&self) -> usize {
        self.shared.lock().await.committed.lines.len()
    }

    /// Arm a one-shot fault: the next call to `point` fails with `error`.
    ///
    /// Faults stack; arming the same point twice fails its next two calls.
    pub async fn inject_fault(&self, point: FaultPoint, error: StoreError) {
        self.shared.lock().await.faults.push((point, error));
    }

    /// Make the next commit wait `delay` before publishing its working copy.
    pub async fn delay_next_commit(&self, delay: Duration) {
        self.shared.lock().await.commit_delay = Some(delay);
    }

    /// Insert a committed header directly, bypassing the engine.
    ///
    /// Lets tests reproduce a code that is already taken for the day.
    pub async fn seed_sale(&self, code: SaleCode, total: Money, created_at: DateTime<Utc>) -> StoreResult<SaleId> {
        let mut shared = self.shared.lock().await;
        let ledger = &mut shared.committed;
        if ledger.sales.values().any(|s| s.code == code) {
            return Err(StoreError::conflict(format!("sale code {code} already exists")));
        }
        let id = ledger.next_sale_id();
        ledger.sales.insert(
            id,
            Sale {
                id,
                code,
                total,
                created_at,
            },
        );
        Ok(id)
    }
}

#[async_trait]
impl SaleStore for InMemorySaleStore {
    type Tx = InMemorySaleTx;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let mut guard = Arc::clone(&self.shared).lock_owned().await;
        guard.take_fault(FaultPoint::Begin)?;
        let working = guard.committed.clone();
        Ok(InMemorySaleTx { guard, working })
    }
}

#[async_trait]
impl SaleHistory for InMemorySaleStore {
    async fn list_sales(&self) -> StoreResult<Vec<SaleSummary>> {
        let shared = self.shared.lock().await;
        let ledger = &shared.committed;
        Ok(ledger
            .sales
            .values()
            .rev()
            .map(|sale| SaleSummary {
                id: sale.id,
                code: sale.code.clone(),
                total: sale.total,
                created_at: sale.created_at,
                line_count: ledger.lines.values().filter(|l| l.sale_id == sale.id).count() as u64,
            })
            .collect())
    }

    async fn sale_detail(&self, id: SaleId) -> StoreResult<Option<SaleDetail>> {
        let shared = self.shared.lock().await;
        let ledger = &shared.committed;
        let Some(sale) = ledger.sales.get(&id) else {
            return Ok(None);
        };

        let lines = ledger
            .lines
            .values()
            .filter(|l| l.sale_id == id)
            .map(|l| SaleDetailLine {
                line_id: l.id,
                item_id: l.item_id,
                item_name: ledger
                    .items
                    .get(&l.item_id)
                    .map(|i| i.name.clone())
                    .unwrap_or_default(),
                quantity: l.quantity,
                unit_price: l.subtotal.checked_div(l.quantity).unwrap_or(Money::ZERO),
                subtotal: l.subtotal,
            })
            .collect();

        Ok(Some(SaleDetail {
            sale: sale.clone(),
            lines,
        }))
    }
}

/// An open in-memory transaction. Holds the store lock until dropped.
#[derive(Debug)]
pub struct InMemorySaleTx {
    guard: OwnedMutexGuard<Shared>,
    working: Ledger,
}

#[async_trait]
impl ItemStore for InMemorySaleTx {
    async fn get_item(&mut self, id: ItemId) -> StoreResult<Option<Item>> {
        Ok(self.working.items.get(&id).cloned())
    }

    async fn decrement_stock(&mut self, id: ItemId, amount: i64) -> StoreResult<StockDecrement> {
        self.guard.take_fault(FaultPoint::DecrementStock)?;
        if amount < 0 {
            return Err(StoreError::backend("decrement amount must not be negative"));
        }
        let Some(item) = self.working.items.get_mut(&id) else {
            return Ok(StockDecrement::NotFound);
        };
        if item.stock < amount {
            return Ok(StockDecrement::Insufficient {
                available: item.stock,
            });
        }
        item.stock -= amount;
        Ok(StockDecrement::Applied {
            remaining: item.stock,
        })
    }
}

#[async_trait]
impl SaleLedger for InMemorySaleTx {
    async fn count_sales_between(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<u64> {
        self.guard.take_fault(FaultPoint::CountSales)?;
        Ok(self
            .working
            .sales
            .values()
            .filter(|s| s.created_at >= start && s.created_at < end)
            .count() as u64)
    }

    async fn insert_sale_header(
        &mut self,
        code: &SaleCode,
        total: Money,
        created_at: DateTime<Utc>,
    ) -> StoreResult<SaleId> {
        self.guard.take_fault(FaultPoint::InsertHeader)?;
        if self.working.sales.values().any(|s| &s.code == code) {
            return Err(StoreError::conflict(format!("sale code {code} already exists")));
        }
        let id = self.working.next_sale_id();
        self.working.sales.insert(
            id,
            Sale {
                id,
                code: code.clone(),
                total,
                created_at,
            },
        );
        Ok(id)
    }

    async fn update_sale_total(&mut self, sale_id: SaleId, total: Money) -> StoreResult<()> {
        self.guard.take_fault(FaultPoint::UpdateTotal)?;
        let sale = self
            .working
            .sales
            .get_mut(&sale_id)
            .ok_or_else(|| StoreError::backend(format!("sale {sale_id} does not exist")))?;
        sale.total = total;
        Ok(())
    }

    async fn insert_sale_line(
        &mut self,
        sale_id: SaleId,
        item_id: ItemId,
        quantity: i64,
        subtotal: Money,
    ) -> StoreResult<SaleLineId> {
        self.guard.take_fault(FaultPoint::InsertLine)?;
        if !self.working.sales.contains_key(&sale_id) {
            return Err(StoreError::backend(format!("sale {sale_id} does not exist")));
        }
        if !self.working.items.contains_key(&item_id) {
            return Err(StoreError::backend(format!("item {item_id} does not exist")));
        }
        let id = self.working.next_line_id();
        self.working.lines.insert(
            id,
            SaleLineItem {
                id,
                sale_id,
                item_id,
                quantity,
                subtotal,
            },
        );
        Ok(id)
    }
}

#[async_trait]
impl SaleTransaction for InMemorySaleTx {
    async fn commit(self) -> StoreResult<()> {
        let Self { mut guard, working } = self;
        guard.take_fault(FaultPoint::Commit)?;
        if let Some(delay) = guard.commit_delay.take() {
            tokio::time::sleep(delay).await;
        }
        guard.committed = working;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, h, 0, 0).unwrap()
    }

    fn code(seq: u64) -> SaleCode {
        SaleCode::new("MP", NaiveDate::from_ymd_opt(2026, 10, 14).unwrap(), seq).unwrap()
    }

    async fn store_with_item(stock: i64) -> (InMemorySaleStore, ItemId) {
        let store = InMemorySaleStore::new();
        let item = store
            .add_item(NewItem::new("BRG-001", "Gula Pasir 1kg", Money::new(15_000), stock))
            .await
            .unwrap();
        (store, item.id)
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible_and_dropped() {
        let (store, item_id) = store_with_item(5).await;

        let mut tx = store.begin().await.unwrap();
        let sale_id = tx.insert_sale_header(&code(1), Money::ZERO, at(3)).await.unwrap();
        tx.insert_sale_line(sale_id, item_id, 2, Money::new(30_000)).await.unwrap();
        assert_eq!(
            tx.decrement_stock(item_id, 2).await.unwrap(),
            StockDecrement::Applied { remaining: 3 }
        );
        drop(tx);

        assert_eq!(store.sale_count().await, 0);
        assert_eq!(store.line_item_count().await, 0);
        assert_eq!(store.item(item_id).await.unwrap().stock, 5);
    }

    #[tokio::test]
    async fn commit_publishes_the_working_copy() {
        let (store, item_id) = store_with_item(5).await;

        let mut tx = store.begin().await.unwrap();
        let sale_id = tx.insert_sale_header(&code(1), Money::ZERO, at(3)).await.unwrap();
        tx.insert_sale_line(sale_id, item_id, 2, Money::new(30_000)).await.unwrap();
        tx.decrement_stock(item_id, 2).await.unwrap();
        tx.update_sale_total(sale_id, Money::new(30_000)).await.unwrap();
        tx.commit().await.unwrap();

        let sales = store.list_sales().await.unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].total, Money::new(30_000));
        assert_eq!(sales[0].line_count, 1);
        assert_eq!(store.item(item_id).await.unwrap().stock, 3);

        let detail = store.sale_detail(sale_id).await.unwrap().unwrap();
        assert_eq!(detail.lines[0].item_name, "Gula Pasir 1kg");
        assert_eq!(detail.lines[0].unit_price, Money::new(15_000));
        assert!(store.sale_detail(SaleId::new(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conditional_decrement_never_goes_negative() {
        let (store, item_id) = store_with_item(1).await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.decrement_stock(item_id, 2).await.unwrap(),
            StockDecrement::Insufficient { available: 1 }
        );
        assert_eq!(
            tx.decrement_stock(ItemId::new(42), 1).await.unwrap(),
            StockDecrement::NotFound
        );
        assert_eq!(
            tx.decrement_stock(item_id, 1).await.unwrap(),
            StockDecrement::Applied { remaining: 0 }
        );
    }

    #[tokio::test]
    async fn duplicate_code_is_a_conflict() {
        let (store, _) = store_with_item(1).await;
        store.seed_sale(code(1), Money::ZERO, at(1)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_sale_header(&code(1), Money::ZERO, at(3)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn counts_use_a_half_open_window() {
        let (store, _) = store_with_item(1).await;
        store.seed_sale(code(1), Money::ZERO, at(0)).await.unwrap();
        store.seed_sale(code(2), Money::ZERO, at(5)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.count_sales_between(at(0), at(5)).await.unwrap(), 1);
        assert_eq!(tx.count_sales_between(at(0), at(6)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn faults_fire_once() {
        let (store, _) = store_with_item(1).await;
        store
            .inject_fault(FaultPoint::Commit, StoreError::unavailable("disk gone"))
            .await;

        let tx = store.begin().await.unwrap();
        assert_eq!(tx.commit().await, Err(StoreError::unavailable("disk gone")));

        let tx = store.begin().await.unwrap();
        assert_eq!(tx.commit().await, Ok(()));
    }
}
