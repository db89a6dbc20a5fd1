#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid connection descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("unsupported database type: {0}")]
    UnsupportedScheme(String),
    #[error("cannot open store: {0}")]
    Unreachable(String),
    #[error("authentication failed for user {0}")]
    Authentication(String),
    #[error("missing required meter specifier")]
    MissingMeter,
    #[error("invalid stored timestamp: {0}")]
    InvalidTimestamp(i64),
}

impl DbError {
    /// Errors raised while opening the store. These are fatal at startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidDescriptor(_)
                | Self::UnsupportedScheme(_)
                | Self::Unreachable(_)
                | Self::Authentication(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
