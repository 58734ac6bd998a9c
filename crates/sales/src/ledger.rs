//! Store ports consumed by the sale engine.
//!
//! ## Unit of Work
//!
//! The engine never talks to a store outside a transaction. [`SaleStore::begin`]
//! opens one; the returned [`SaleTransaction`] exposes both the item and the
//! ledger operations, so one backing engine can serve both within the same
//! snapshot. Implementations must:
//!
//! - make nothing visible to other transactions before `commit`
//! - discard every write on `rollback`, **and** when the transaction value is
//!   dropped without being committed
//! - reject a second header with an existing `code` with `StoreError::Conflict`

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use kasir_core::{ItemId, Money, SaleId, SaleLineId, StoreResult};
use kasir_inventory::ItemStore;

use crate::code::SaleCode;
use crate::sale::{SaleDetail, SaleSummary};

/// Sale header and line persistence, scoped to one open transaction.
#[async_trait]
pub trait SaleLedger: Send {
    /// Number of sales whose timestamp lies in `[start, end)`.
    async fn count_sales_between(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Insert a header and return its id. A duplicate `code` is a conflict.
    async fn insert_sale_header(
        &mut self,
        code: &SaleCode,
        total: Money,
        created_at: DateTime<Utc>,
    ) -> StoreResult<SaleId>;

    async fn update_sale_total(&mut self, sale_id: SaleId, total: Money) -> StoreResult<()>;

    async fn insert_sale_line(
        &mut self,
        sale_id: SaleId,
        item_id: ItemId,
        quantity: i64,
        subtotal: Money,
    ) -> StoreResult<SaleLineId>;
}

/// An open all-or-nothing unit of work over items and the sale ledger.
#[async_trait]
pub trait SaleTransaction: ItemStore + SaleLedger + Send {
    async fn commit(self) -> StoreResult<()>;

    async fn rollback(self) -> StoreResult<()>;
}

/// Factory for sale transactions.
#[async_trait]
pub trait SaleStore: Send + Sync {
    type Tx: SaleTransaction;

    async fn begin(&self) -> StoreResult<Self::Tx>;
}

#[async_trait]
impl<S> SaleStore for Arc<S>
where
    S: SaleStore + ?Sized,
{
    type Tx = S::Tx;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        (**self).begin().await
    }
}

/// Read-only view over committed sales.
#[async_trait]
pub trait SaleHistory: Send + Sync {
    /// All committed sales, newest first.
    async fn list_sales(&self) -> StoreResult<Vec<SaleSummary>>;

    /// A committed sale with its lines. `Ok(None)` when it does not exist.
    async fn sale_detail(&self, id: SaleId) -> StoreResult<Option<SaleDetail>>;
}

#[async_trait]
impl<S> SaleHistory for Arc<S>
where
    S: SaleHistory + ?Sized,
{
    async fn list_sales(&self) -> StoreResult<Vec<SaleSummary>> {
        (**self).list_sales().await
    }

    async fn sale_detail(&self, id: SaleId) -> StoreResult<Option<SaleDetail>> {
        (**self).sale_detail(id).await
    }
}
