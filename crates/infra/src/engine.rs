//! Sale transaction coordinator.
//!
//! `SaleEngine` turns a basket into one committed sale or nothing:
//!
//! 1. check the basket shape (non-empty, positive quantities)
//! 2. open a transaction, generate the day's next code, insert a zero-total header
//! 3. per line: validate and price against the transaction's view of the item,
//!    insert the line, conditionally decrement stock
//! 4. write the accumulated total and commit
//!
//! Any failure rolls the whole transaction back. A store conflict (duplicate
//! code or write contention) reruns the unit of work from step 2, up to the
//! configured number of attempts. Steps 2 to 4, short of the commit, are
//! bounded by a timeout; an expired attempt is dropped, which rolls it back. The
//! commit itself is awaited to completion so a durable sale is never
//! reported as a timeout.

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{Span, debug, info, instrument, warn};

use kasir_core::{Money, StoreError};
use kasir_inventory::{ItemStore, StockDecrement};
use kasir_sales::{
    CodeGenerator, LineValidator, Sale, SaleError, SaleLedger, SaleLine, SaleLineItem, SaleReceipt,
    SaleStore, SaleTransaction, validate_basket,
};

use crate::config::{ConfigError, EngineConfig};

/// Coordinates sale submissions against an injected store.
pub struct SaleEngine<S> {
    store: S,
    generator: CodeGenerator,
    validator: LineValidator,
    max_attempts: u32,
    retry_backoff: Duration,
    timeout: Duration,
}

impl<S> SaleEngine<S>
where
    S: SaleStore,
{
    pub fn new(store: S, config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            generator: config.code_generator()?,
            validator: LineValidator,
            max_attempts: config.max_attempts,
            retry_backoff: config.retry_backoff(),
            timeout: config.transaction_timeout(),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn code_generator(&self) -> &CodeGenerator {
        &self.generator
    }

    /// Record a sale stamped with the current time.
    pub async fn submit(&self, basket: &[SaleLine]) -> Result<SaleReceipt, SaleError> {
        self.submit_at(basket, Utc::now()).await
    }

    /// Record a sale stamped with `now`.
    ///
    /// The timestamp is truncated to milliseconds, the precision stores keep.
    /// Submitting the same basket twice records two sales.
    #[instrument(
        skip(self, basket),
        fields(lines = basket.len(), code = tracing::field::Empty, attempts = tracing::field::Empty),
        err
    )]
    pub async fn submit_at(&self, basket: &[SaleLine], now: DateTime<Utc>) -> Result<SaleReceipt, SaleError> {
        validate_basket(basket)?;
        let now = now.trunc_subsecs(3);

        let mut attempt = 1;
        loop {
            match self.attempt(basket, now).await {
                Ok(receipt) => {
                    let span = Span::current();
                    span.record("code", tracing::field::display(receipt.code()));
                    span.record("attempts", attempt);
                    info!(
                        sale_id = %receipt.id(),
                        code = %receipt.code(),
                        total = %receipt.total(),
                        "sale committed"
                    );
                    return Ok(receipt);
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    warn!(attempt, max_attempts = self.max_attempts, error = %err, "sale attempt conflicted; retrying");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    Span::current().record("attempts", attempt);
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, basket: &[SaleLine], now: DateTime<Utc>) -> Result<SaleReceipt, SaleError> {
        let (tx, receipt) = match tokio::time::timeout(self.timeout, self.prepare(basket, now)).await {
            Ok(prepared) => prepared?,
            Err(_) => {
                let ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(timeout_ms = ms, "sale attempt timed out; transaction dropped");
                return Err(SaleError::PersistenceFailed(StoreError::Timeout(ms)));
            }
        };

        // Once COMMIT is issued its outcome is the sale's outcome.
        tx.commit().await.map_err(SaleError::PersistenceFailed)?;
        Ok(receipt)
    }

    /// Run everything up to the commit, returning the still-open transaction.
    async fn prepare(&self, basket: &[SaleLine], now: DateTime<Utc>) -> Result<(S::Tx, SaleReceipt), SaleError> {
        let mut tx = self.store.begin().await.map_err(SaleError::PersistenceFailed)?;

        match self.record_sale(&mut tx, basket, now).await {
            Ok(receipt) => Ok((tx, receipt)),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed; transaction discarded");
                }
                Err(err)
            }
        }
    }

    async fn record_sale(
        &self,
        tx: &mut S::Tx,
        basket: &[SaleLine],
        now: DateTime<Utc>,
    ) -> Result<SaleReceipt, SaleError> {
        let code = self.generator.generate(&mut *tx, now).await?;
        let sale_id = tx
            .insert_sale_header(&code, Money::ZERO, now)
            .await
            .map_err(SaleError::PersistenceFailed)?;

        let mut total = Money::ZERO;
        let mut lines = Vec::with_capacity(basket.len());
        for line in basket {
            let priced = self.validator.validate(&mut *tx, line).await?;
            total = total
                .checked_add(priced.subtotal)
                .ok_or(SaleError::AmountOverflow {
                    item_id: priced.item_id,
                })?;

            let line_id = tx
                .insert_sale_line(sale_id, priced.item_id, priced.quantity, priced.subtotal)
                .await
                .map_err(SaleError::PersistenceFailed)?;

            match tx
                .decrement_stock(priced.item_id, priced.quantity)
                .await
                .map_err(SaleError::PersistenceFailed)?
            {
                StockDecrement::Applied { remaining } => {
                    debug!(item_id = %priced.item_id, remaining, "stock decremented");
                }
                StockDecrement::Insufficient { available } => {
                    return Err(SaleError::InsufficientStock {
                        item_id: priced.item_id,
                        name: priced.item_name,
                        available,
                        requested: priced.quantity,
                    });
                }
                StockDecrement::NotFound => {
                    return Err(SaleError::ItemNotFound {
                        item_id: priced.item_id,
                    });
                }
            }

            lines.push(SaleLineItem {
                id: line_id,
                sale_id,
                item_id: priced.item_id,
                quantity: priced.quantity,
                subtotal: priced.subtotal,
            });
        }

        tx.update_sale_total(sale_id, total)
            .await
            .map_err(SaleError::PersistenceFailed)?;

        Ok(SaleReceipt {
            sale: Sale {
                id: sale_id,
                code,
                total,
                created_at: now,
            },
            lines,
        })
    }
}
