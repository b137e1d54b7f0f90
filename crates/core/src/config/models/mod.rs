pub mod app_config;
pub mod database;
pub mod engine;
pub mod observability;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use engine::{BackfillConfig, CatalogConfig, LedgerConfig, RegistryConfig};
pub use observability::ObservabilityConfig;
