//! Error taxonomy for the sink.

/// Result type for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Errors that can occur while opening, writing or closing a store.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Invalid configuration, detected before any I/O.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation not permitted in the handle's current state.
    #[error("Usage error: {0}")]
    Usage(String),

    /// The storage engine rejected a statement.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Query build error: {0}")]
    Query(#[from] sea_query::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Render error: {0}")]
    Render(#[from] serde_yaml::Error),

    /// Persisted metadata is missing or inconsistent.
    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    pub(crate) fn closed() -> Self {
        SinkError::Usage("store handle is not open".to_string())
    }

    pub(crate) fn read_only() -> Self {
        SinkError::Usage("store handle was opened for inspection only".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_errors_describe_state() {
        assert!(SinkError::closed().to_string().contains("not open"));
        assert!(SinkError::read_only().to_string().contains("inspection"));
    }

    #[test]
    fn test_configuration_error_display() {
        let err = SinkError::Configuration("unknown nesting mode \"deep\"".to_string());
        assert!(err.to_string().starts_with("Configuration error"));
        assert!(err.to_string().contains("deep"));
    }
}
