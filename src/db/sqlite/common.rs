use chrono::{DateTime, Utc};

use crate::db::error::{DbError, DbResult};

/// Parse a millisecond timestamp from the database, returning a DbError on failure
pub fn parse_millis(millis: i64) -> DbResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| DbError::Internal(format!("Invalid timestamp in database: {}", millis)))
}
