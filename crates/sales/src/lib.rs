//! Sales domain module.
//!
//! Sale records, daily sale codes, line pricing rules and the store ports the
//! transaction coordinator drives. No IO lives here; stores are traits.

pub mod code;
pub mod error;
pub mod ledger;
pub mod pricing;
pub mod sale;

pub use code::{BusinessCalendar, CodeGenerator, DayBounds, SaleCode};
pub use error::SaleError;
pub use ledger::{SaleHistory, SaleLedger, SaleStore, SaleTransaction};
pub use pricing::{LineValidator, PricedLine, price_line};
pub use sale::{
    Sale, SaleDetail, SaleDetailLine, SaleLine, SaleLineItem, SaleReceipt, SaleSummary,
    validate_basket,
};
