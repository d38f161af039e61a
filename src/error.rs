//! Error type shared by every layer of the crate.

/// Errors raised while building records, paging through queries or talking
/// to the remote search service.
#[derive(Debug, thiserror::Error)]
pub enum DimensionsError {
    /// Payload was not a JSON object, or had an impossible shape
    #[error("Malformed data: {0}")]
    MalformedData(String),

    /// Field is not part of the entity's declared schema
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Server response disagreed with what the request implies
    #[error("Data mismatch: {0}")]
    DataMismatch(String),

    /// Search text was invalid, locally or according to the server
    #[error("Request rejected: {0}")]
    RequestRejected(String),

    /// Server kept reporting that results were not ready, or failed outright
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The service is refusing requests because of its rate limits
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Credentials were rejected or have expired
    #[error("Authentication failure: {0}")]
    AuthenticationFailure(String),

    /// Transport-level connectivity problem
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DimensionsError {
    /// Whether the server response disagreed with the client's expectations.
    pub fn is_data_mismatch(&self) -> bool {
        matches!(self, DimensionsError::DataMismatch(_))
    }
}

impl From<serde_json::Error> for DimensionsError {
    fn from(err: serde_json::Error) -> Self {
        DimensionsError::DataMismatch(format!("JSON: {}", err))
    }
}

impl From<reqwest::Error> for DimensionsError {
    fn from(err: reqwest::Error) -> Self {
        DimensionsError::NetworkFailure(err.to_string())
    }
}

impl From<config::ConfigError> for DimensionsError {
    fn from(err: config::ConfigError) -> Self {
        DimensionsError::Config(err.to_string())
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, DimensionsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_errors_are_data_mismatches() {
        let err: DimensionsError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(err.is_data_mismatch());
        assert!(err.to_string().starts_with("Data mismatch: JSON:"));
    }

    #[test]
    fn test_display_messages() {
        let err = DimensionsError::UnknownField("Publication has no field 'colour'".to_string());
        assert_eq!(
            err.to_string(),
            "Unknown field: Publication has no field 'colour'"
        );
    }
}
