use meter_db::Connection;
use tracing::info;

use crate::config::StoreConfig;
use crate::error::Result;

/// Connects to the store named by the configuration.
pub fn open_store(config: &StoreConfig) -> Result<Connection> {
    let conn = Connection::connect(&config.database_connection)?;
    info!("metering store ready");
    Ok(conn)
}
