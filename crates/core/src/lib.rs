//! `kasir-core`: shared building blocks for the point-of-sale domain.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, money, and the error types every store and engine speaks.

pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult, StoreError, StoreResult};
pub use id::{ItemId, SaleId, SaleLineId};
pub use money::Money;
pub use value_object::ValueObject;
