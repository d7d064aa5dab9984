//! Row conversion helpers shared by the repositories.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::domain::ports::errors::StoreError;

/// Format a timestamp for storage.
///
/// Fixed microsecond precision with a `Z` suffix so stored values compare
/// lexicographically in SQL.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Parse(format!("invalid timestamp '{s}': {e}")))
}

pub fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    s.as_deref().map(parse_ts).transpose()
}

pub fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Parse(format!("invalid UUID '{s}': {e}")))
}

pub fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>, StoreError> {
    s.as_deref().map(parse_uuid).transpose()
}

/// Deserialize a JSON text column, treating NULL as `Value::Null`.
pub fn parse_json(s: Option<String>) -> Result<serde_json::Value, StoreError> {
    match s {
        Some(text) => Ok(serde_json::from_str(&text)?),
        None => Ok(serde_json::Value::Null),
    }
}
