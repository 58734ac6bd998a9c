//! Infrastructure layer: sale coordinator, configuration and store adapters.

pub mod config;
pub mod engine;
pub mod store;


pub use config::{ConfigError, EngineConfig, KasirConfig, StoreConfig, UtcOffset};
pub use engine::SaleEngine;
pub use store::{FaultPoint, InMemorySaleStore, SqliteSaleStore};

/// Initialize logging from a loaded configuration.
pub fn init_observability(config: &KasirConfig) {
    kasir_observability::init(config.log_format);
}
