// ⚠️ Error taxonomy for the analytics core
// Three kinds only: bad input, storage down, unexpected record shape

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Malformed or out-of-range filter parameters (bad date, negative offset, ...)
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The storage collaborator failed to respond or connect
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A returned record did not have the shape the aggregation needs
    #[error("aggregation failed: {0}")]
    Aggregation(String),
}

impl AnalyticsError {
    pub fn invalid_filter(msg: impl Into<String>) -> Self {
        AnalyticsError::InvalidFilter(msg.into())
    }

    pub fn aggregation(msg: impl Into<String>) -> Self {
        AnalyticsError::Aggregation(msg.into())
    }

    /// Caller supplied bad input; never worth retrying
    pub fn is_client_error(&self) -> bool {
        matches!(self, AnalyticsError::InvalidFilter(_))
    }

    /// Stable name used in error responses
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyticsError::InvalidFilter(_) => "InvalidFilterError",
            AnalyticsError::StorageUnavailable(_) => "StorageUnavailableError",
            AnalyticsError::Aggregation(_) => "AggregationError",
        }
    }
}

impl From<rusqlite::Error> for AnalyticsError {
    fn from(err: rusqlite::Error) -> Self {
        AnalyticsError::StorageUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        assert!(AnalyticsError::invalid_filter("bad date").is_client_error());
        assert!(!AnalyticsError::aggregation("missing field").is_client_error());
        assert!(!AnalyticsError::StorageUnavailable("down".into()).is_client_error());
    }

    #[test]
    fn test_sqlite_errors_are_storage_errors() {
        let err: AnalyticsError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.kind(), "StorageUnavailableError");
    }
}
