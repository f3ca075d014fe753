use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

pub mod entity;
pub mod history;
pub mod notification;
pub mod outbox;
pub mod request;
pub mod user;
pub mod workflow;

pub use entity::{EntityStatusRecord, EntityStatusUpdater, SqlEntityStatusUpdater};
pub use notification::{NotificationRecord, SqlNotifier};
pub use outbox::{OutboxRecord, OutboxStatus};
pub use request::{RequestFilter, RequestScope};
pub use user::SqlUserDirectory;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("approval request `{request_id}` changed concurrently (expected version {expected})")]
    VersionConflict { request_id: String, expected: u32 },
}

impl RepositoryError {
    /// Lost optimistic updates and SQLite lock contention can both succeed
    /// when the whole transaction is run again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::VersionConflict { .. } => true,
            Self::Database(sqlx::Error::Database(error)) => {
                matches!(error.code().as_deref(), Some("5" | "6" | "517"))
                    || error.message().contains("database is locked")
            }
            _ => false,
        }
    }
}

pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    value.parse::<Decimal>().map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_json(column: &str, value: String) -> Result<serde_json::Value, RepositoryError> {
    serde_json::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid json in `{column}`: {error}"))
    })
}


#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{format_timestamp, parse_decimal, parse_timestamp, RepositoryError};

    #[test]
    fn timestamps_sort_lexicographically_in_storage_format() {
        let earlier = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).single().expect("timestamp");
        let later = earlier + chrono::Duration::microseconds(1);

        assert!(format_timestamp(earlier) < format_timestamp(later));
        assert_eq!(format_timestamp(earlier), "2026-10-18T09:00:00.000000Z");
        assert_eq!(
            parse_timestamp("created_at", format_timestamp(later)).expect("parse"),
            later
        );
    }

    #[test]
    fn malformed_values_surface_as_decode_errors() {
        assert!(matches!(
            parse_decimal("amount", "12,5".to_string()),
            Err(RepositoryError::Decode(message)) if message.contains("amount")
        ));
        assert!(!RepositoryError::Decode("x".to_string()).is_retryable());
        assert!(RepositoryError::VersionConflict { request_id: "r".to_string(), expected: 1 }
            .is_retryable());
    }
}
