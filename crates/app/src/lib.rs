pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod store;

pub use config::{ConfigLoad, ConfigPaths, StoreConfig, default_config_path, load_or_create};
pub use error::{AppError, Result};
pub use ingest::{IngestIssue, IngestStats, load_samples};
pub use logging::init_logging;
pub use store::open_store;
