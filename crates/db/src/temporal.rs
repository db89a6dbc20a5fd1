use chrono::{DateTime, Utc};

use crate::error::{DbError, Result};

/// Stored form of a timestamp: microseconds since the Unix epoch, so that
/// range predicates and min/max compare numerically.
pub(crate) fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

/// Converts a stored or aggregated time value back to a timestamp. Backends
/// do not necessarily return the temporal type they were given, so every
/// value coming out of storage or out of a reduce goes through here.
pub(crate) fn coerce_timestamp(value: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value).ok_or(DbError::InvalidTimestamp(value))
}
