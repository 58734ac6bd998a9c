//! Inventory domain module.
//!
//! The item record the sale engine reads, and the store port through which it
//! reads items and decrements their stock.

pub mod item;

pub use item::{Item, ItemStore, NewItem, StockDecrement};
