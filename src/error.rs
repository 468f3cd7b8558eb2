//! Error types for geocoding operations.
//!
//! Reverse-geocode lookups swallow these errors and degrade to "no name";
//! the audit engine captures them per song as [`Severity::Error`] results
//! instead of propagating them out of a batch.
//!
//! [`Severity::Error`]: crate::Severity::Error

use thiserror::Error;

/// Failures from forward or reverse geocoding services.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// Transport-level failure (connection refused, timeout, TLS).
    #[error("geocoding request failed: {0}")]
    Request(String),

    /// Non-success HTTP status from the service.
    #[error("geocoding service returned HTTP {0}")]
    Status(u16),

    /// Rate limited and the capped retry attempts are exhausted.
    #[error("geocoding rate limited after {0} attempts")]
    RateLimited(u32),

    /// Malformed or unexpected response payload.
    #[error("unexpected geocoding response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GeocodeError::Status(503);
        assert_eq!(err.to_string(), "geocoding service returned HTTP 503");

        let err = GeocodeError::RateLimited(4);
        assert_eq!(err.to_string(), "geocoding rate limited after 4 attempts");
    }
}
