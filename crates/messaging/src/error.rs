use thiserror::Error;

/// Error returned by a business handler running under the inbox guard.
///
/// The distinction drives the consumer's redelivery schedule: transient
/// failures are retried with backoff, fatal failures go straight to the
/// dead-letter destination.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The failure is expected to clear on retry (gateway timeout,
    /// broker hiccup, contended resource).
    #[error("transient handler failure: {0}")]
    Transient(String),

    /// The message can never be processed (malformed payload,
    /// irrecoverable business state).
    #[error("fatal handler failure: {0}")]
    Fatal(String),
}

impl HandlerError {
    /// Returns true if the consumer should retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

/// Errors that can occur in the messaging layer.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A broker publish/subscribe error occurred.
    #[error("Broker error: {0}")]
    Broker(String),

    /// The wrapped business handler failed; nothing was committed.
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
}

impl MessagingError {
    /// Returns true if a consumer should retry after this error.
    ///
    /// Infrastructure faults are retryable; serialization faults and fatal
    /// handler failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            MessagingError::Database(_) | MessagingError::Broker(_) => true,
            MessagingError::Handler(e) => e.is_transient(),
            MessagingError::Migration(_) | MessagingError::Serialization(_) => false,
        }
    }
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_handler_errors_are_retryable() {
        let err = MessagingError::Handler(HandlerError::Transient("timeout".to_string()));
        assert!(err.is_retryable());
    }

    #[test]
    fn fatal_handler_errors_are_not_retryable() {
        let err = MessagingError::Handler(HandlerError::Fatal("bad payload".to_string()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn serialization_errors_are_not_retryable() {
        let err = MessagingError::Serialization(serde_json::from_str::<i32>("x").unwrap_err());
        assert!(!err.is_retryable());
    }

    #[test]
    fn broker_errors_are_retryable() {
        let err = MessagingError::Broker("connection reset".to_string());
        assert!(err.is_retryable());
    }
}
