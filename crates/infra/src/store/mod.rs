//! Sale store implementations.
//!
//! Both implement [`kasir_sales::SaleStore`] for the write path and
//! [`kasir_sales::SaleHistory`] for the read side.

pub mod in_memory;
pub mod sqlite;

pub use in_memory::{FaultPoint, InMemorySaleStore, InMemorySaleTx};
pub use sqlite::{SqliteSaleStore, SqliteSaleTx};
