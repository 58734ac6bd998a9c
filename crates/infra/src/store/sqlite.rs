//! SQLite-backed sale store.
//!
//! Every unit of work is one `BEGIN IMMEDIATE` SQLite transaction on a pooled
//! connection. The write lock is taken up front, so concurrent writers wait on
//! `busy_timeout` instead of failing a read-to-write upgrade. Dropping an uncommitted [`SqliteSaleTx`] rolls it back when the
//! connection returns to the pool.
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLite code | StoreError | Scenario |
//! |------------|-------------|------------|----------|
//! | Database (unique violation) | `2067` | `Conflict` | Two transactions generated the same sale code |
//! | Database (busy / locked) | `5`, `6`, `261`, `262`, `517`, `773` | `Conflict` | Write contention between connections |
//! | Database (other) | any other | `Backend` | Check constraint, foreign key, malformed SQL |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` | Database cannot be reached |
//! | Other | N/A | `Backend` | Decode failures and the rest |
//!
//! ## Timestamps
//!
//! Stored as fixed-width UTC RFC 3339 text with millisecond precision
//! (`2026-10-14T03:00:00.000Z`), so lexical comparison in window queries
//! matches chronological order.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{FromRow, Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, instrument};

use kasir_core::{ItemId, Money, SaleId, SaleLineId, StoreError, StoreResult};
use kasir_inventory::{Item, ItemStore, NewItem, StockDecrement};
use kasir_sales::{
    Sale, SaleCode, SaleDetail, SaleDetailLine, SaleHistory, SaleLedger, SaleStore, SaleSummary,
    SaleTransaction,
};

use crate::config::StoreConfig;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL,
        name TEXT NOT NULL,
        buy_price INTEGER NOT NULL DEFAULT 0,
        sell_price INTEGER NOT NULL DEFAULT 0,
        stock INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sales (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        total INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sales_created_at ON sales (created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS sale_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sale_id INTEGER NOT NULL REFERENCES sales (id),
        item_id INTEGER NOT NULL REFERENCES items (id),
        quantity INTEGER NOT NULL CHECK (quantity > 0),
        subtotal INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sale_items_sale_id ON sale_items (sale_id)",
];

/// SQLite-backed sale store.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct SqliteSaleStore {
    pool: SqlitePool,
}

impl SqliteSaleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the configured database and apply the schema.
    ///
    /// An in-memory URL gets a single long-lived connection so every
    /// transaction sees the same database.
    pub async fn connect(config: &StoreConfig) -> anyhow::Result<Self> {
        let mut options = SqliteConnectOptions::from_str(&config.database_url)
            .with_context(|| format!("invalid database url {:?}", config.database_url))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool_options = if config.is_in_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open sqlite database {:?}", config.database_url))?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&self.pool)
                .await
                .context("failed to apply sale schema")?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register an item and return it with its assigned id.
    #[instrument(skip(self, item), fields(code = %item.code), err)]
    pub async fn add_item(&self, item: NewItem) -> StoreResult<Item> {
        let result = sqlx::query(
            r#"
            INSERT INTO items (code, name, buy_price, sell_price, stock)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&item.code)
        .bind(&item.name)
        .bind(item.buy_price.minor_units())
        .bind(item.sell_price.minor_units())
        .bind(item.stock)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("add_item", e))?;

        Ok(item.into_item(ItemId::new(result.last_insert_rowid())))
    }

    /// Committed state of one item.
    pub async fn item(&self, id: ItemId) -> StoreResult<Option<Item>> {
        let row = sqlx::query_as::<_, ItemRow>(
            "SELECT id, code, name, buy_price, sell_price, stock FROM items WHERE id = ?1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("item", e))?;

        Ok(row.map(Item::from))
    }

    pub async fn sale_count(&self) -> StoreResult<u64> {
        count(&self.pool, "SELECT COUNT(*) AS n FROM sales", "sale_count").await
    }

    pub async fn line_item_count(&self) -> StoreResult<u64> {
        count(&self.pool, "SELECT COUNT(*) AS n FROM sale_items", "line_item_count").await
    }
}

async fn count(pool: &SqlitePool, sql: &str, operation: &str) -> StoreResult<u64> {
    let n: i64 = sqlx::query(sql)
        .fetch_one(pool)
        .await
        .and_then(|row| row.try_get("n"))
        .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(n.max(0) as u64)
}

#[async_trait]
impl SaleStore for SqliteSaleStore {
    type Tx = SqliteSaleTx;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(SqliteSaleTx { tx })
    }
}

#[async_trait]
impl SaleHistory for SqliteSaleStore {
    #[instrument(skip(self), err)]
    async fn list_sales(&self) -> StoreResult<Vec<SaleSummary>> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT s.id, s.code, s.total, s.created_at, COUNT(si.id) AS line_count
            FROM sales s
            LEFT JOIN sale_items si ON si.sale_id = s.id
            GROUP BY s.id
            ORDER BY s.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_sales", e))?;

        rows.into_iter().map(SummaryRow::into_summary).collect()
    }

    #[instrument(skip(self), fields(sale_id = %id), err)]
    async fn sale_detail(&self, id: SaleId) -> StoreResult<Option<SaleDetail>> {
        let header = sqlx::query_as::<_, SaleRow>(
            "SELECT id, code, total, created_at FROM sales WHERE id = ?1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("sale_detail", e))?;

        let Some(header) = header else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, DetailLineRow>(
            r#"
            SELECT si.id, si.item_id, COALESCE(i.name, '') AS item_name, si.quantity, si.subtotal
            FROM sale_items si
            LEFT JOIN items i ON i.id = si.item_id
            WHERE si.sale_id = ?1
            ORDER BY si.id ASC
            "#,
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("sale_detail_lines", e))?;

        Ok(Some(SaleDetail {
            sale: header.into_sale()?,
            lines: lines.into_iter().map(SaleDetailLine::from).collect(),
        }))
    }
}

/// An open SQLite transaction.
pub struct SqliteSaleTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl ItemStore for SqliteSaleTx {
    #[instrument(skip(self), fields(item_id = %id), err(level = "warn"))]
    async fn get_item(&mut self, id: ItemId) -> StoreResult<Option<Item>> {
        let row = sqlx::query_as::<_, ItemRow>(
            "SELECT id, code, name, buy_price, sell_price, stock FROM items WHERE id = ?1",
        )
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_item", e))?;

        Ok(row.map(Item::from))
    }

    #[instrument(skip(self), fields(item_id = %id), err(level = "warn"))]
    async fn decrement_stock(&mut self, id: ItemId, amount: i64) -> StoreResult<StockDecrement> {
        if amount < 0 {
            return Err(StoreError::backend("decrement amount must not be negative"));
        }

        let remaining: Option<i64> = sqlx::query(
            "UPDATE items SET stock = stock - ?1 WHERE id = ?2 AND stock >= ?1 RETURNING stock",
        )
        .bind(amount)
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .and_then(|row| row.map(|r| r.try_get("stock")).transpose())
        .map_err(|e| map_sqlx_error("decrement_stock", e))?;

        if let Some(remaining) = remaining {
            return Ok(StockDecrement::Applied { remaining });
        }

        let available: Option<i64> = sqlx::query("SELECT stock FROM items WHERE id = ?1")
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .and_then(|row| row.map(|r| r.try_get("stock")).transpose())
            .map_err(|e| map_sqlx_error("decrement_stock", e))?;

        debug!(?available, "conditional decrement not applied");
        Ok(match available {
            Some(available) => StockDecrement::Insufficient { available },
            None => StockDecrement::NotFound,
        })
    }
}

#[async_trait]
impl SaleLedger for SqliteSaleTx {
    #[instrument(skip(self), err(level = "warn"))]
    async fn count_sales_between(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<u64> {
        let n: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM sales WHERE created_at >= ?1 AND created_at < ?2",
        )
        .bind(encode_timestamp(start))
        .bind(encode_timestamp(end))
        .fetch_one(&mut *self.tx)
        .await
        .and_then(|row| row.try_get("n"))
        .map_err(|e| map_sqlx_error("count_sales_between", e))?;

        Ok(n.max(0) as u64)
    }

    #[instrument(skip(self, code), fields(code = %code), err(level = "warn"))]
    async fn insert_sale_header(
        &mut self,
        code: &SaleCode,
        total: Money,
        created_at: DateTime<Utc>,
    ) -> StoreResult<SaleId> {
        let result = sqlx::query("INSERT INTO sales (code, total, created_at) VALUES (?1, ?2, ?3)")
            .bind(code.to_string())
            .bind(total.minor_units())
            .bind(encode_timestamp(created_at))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_sale_header", e))?;

        Ok(SaleId::new(result.last_insert_rowid()))
    }

    #[instrument(skip(self), fields(sale_id = %sale_id), err(level = "warn"))]
    async fn update_sale_total(&mut self, sale_id: SaleId, total: Money) -> StoreResult<()> {
        let result = sqlx::query("UPDATE sales SET total = ?1 WHERE id = ?2")
            .bind(total.minor_units())
            .bind(sale_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_sale_total", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::backend(format!("sale {sale_id} does not exist")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(sale_id = %sale_id, item_id = %item_id), err(level = "warn"))]
    async fn insert_sale_line(
        &mut self,
        sale_id: SaleId,
        item_id: ItemId,
        quantity: i64,
        subtotal: Money,
    ) -> StoreResult<SaleLineId> {
        let result = sqlx::query(
            "INSERT INTO sale_items (sale_id, item_id, quantity, subtotal) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(sale_id.get())
        .bind(item_id.get())
        .bind(quantity)
        .bind(subtotal.minor_units())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_sale_line", e))?;

        Ok(SaleLineId::new(result.last_insert_rowid()))
    }
}

#[async_trait]
impl SaleTransaction for SqliteSaleTx {
    async fn commit(self) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn decode_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::backend(format!("malformed timestamp {raw:?}: {e}")))
}

/// SQLite result codes that signal write contention (busy / locked variants).
fn is_contention_code(code: &str) -> bool {
    matches!(code, "5" | "6" | "261" | "262" | "517" | "773")
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            if db_err.is_unique_violation() {
                return StoreError::Conflict(msg);
            }
            match db_err.code().as_deref() {
                Some(code) if is_contention_code(code) => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool unavailable in {}", operation))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {}: {}", operation, e)),
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct ItemRow {
    id: i64,
    code: String,
    name: String,
    buy_price: i64,
    sell_price: i64,
    stock: i64,
}

impl<'r> FromRow<'r, SqliteRow> for ItemRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(ItemRow {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            buy_price: row.try_get("buy_price")?,
            sell_price: row.try_get("sell_price")?,
            stock: row.try_get("stock")?,
        })
    }
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: ItemId::new(row.id),
            code: row.code,
            name: row.name,
            buy_price: Money::new(row.buy_price),
            sell_price: Money::new(row.sell_price),
            stock: row.stock,
        }
    }
}

#[derive(Debug)]
struct SaleRow {
    id: i64,
    code: String,
    total: i64,
    created_at: String,
}

impl<'r> FromRow<'r, SqliteRow> for SaleRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(SaleRow {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            total: row.try_get("total")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl SaleRow {
    fn into_sale(self) -> StoreResult<Sale> {
        let code = self
            .code
            .parse::<SaleCode>()
            .map_err(|e| StoreError::backend(format!("stored sale code {:?} is malformed: {e}", self.code)))?;
        Ok(Sale {
            id: SaleId::new(self.id),
            code,
            total: Money::new(self.total),
            created_at: decode_timestamp(&self.created_at)?,
        })
    }
}

#[derive(Debug)]
struct SummaryRow {
    sale: SaleRow,
    line_count: i64,
}

impl<'r> FromRow<'r, SqliteRow> for SummaryRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(SummaryRow {
            sale: SaleRow::from_row(row)?,
            line_count: row.try_get("line_count")?,
        })
    }
}

impl SummaryRow {
    fn into_summary(self) -> StoreResult<SaleSummary> {
        let line_count = self.line_count.max(0) as u64;
        let sale = self.sale.into_sale()?;
        Ok(SaleSummary {
            id: sale.id,
            code: sale.code,
            total: sale.total,
            created_at: sale.created_at,
            line_count,
        })
    }
}

#[derive(Debug)]
struct DetailLineRow {
    id: i64,
    item_id: i64,
    item_name: String,
    quantity: i64,
    subtotal: i64,
}

impl<'r> FromRow<'r, SqliteRow> for DetailLineRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(DetailLineRow {
            id: row.try_get("id")?,
            item_id: row.try_get("item_id")?,
            item_name: row.try_get("item_name")?,
            quantity: row.try_get("quantity")?,
            subtotal: row.try_get("subtotal")?,
        })
    }
}

impl From<DetailLineRow> for SaleDetailLine {
    fn from(row: DetailLineRow) -> Self {
        let subtotal = Money::new(row.subtotal);
        SaleDetailLine {
            line_id: SaleLineId::new(row.id),
            item_id: ItemId::new(row.item_id),
            item_name: row.item_name,
            quantity: row.quantity,
            unit_price: subtotal.checked_div(row.quantity).unwrap_or(Money::ZERO),
            subtotal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_are_fixed_width_and_sortable() {
        let early = Utc.with_ymd_and_hms(2026, 10, 14, 3, 0, 0).unwrap();
        let late = early + chrono::TimeDelta::milliseconds(1_500);
        let (a, b) = (encode_timestamp(early), encode_timestamp(late));
        assert_eq!(a, "2026-10-14T03:00:00.000Z");
        assert_eq!(b, "2026-10-14T03:00:01.500Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(decode_timestamp(&b).unwrap(), late);
    }

    #[test]
    fn malformed_timestamp_is_a_backend_error() {
        assert!(matches!(decode_timestamp("yesterday"), Err(StoreError::Backend(_))));
    }

    #[test]
    fn contention_codes_are_recognised() {
        for code in ["5", "6", "517"] {
            assert!(is_contention_code(code));
        }
        assert!(!is_contention_code("19"));
        assert!(!is_contention_code("2067"));
    }

    #[test]
    fn pool_errors_map_to_unavailable() {
        assert!(matches!(
            map_sqlx_error("begin", sqlx::Error::PoolClosed),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error("get_item", sqlx::Error::RowNotFound),
            StoreError::Backend(_)
        ));
    }
}
