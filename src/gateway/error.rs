//! Error types for the gateway client.

use thiserror::Error;

/// Errors raised by the gateway HTTP client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GatewayApiError {
    /// Raised when the request never produced an HTTP response.
    #[error("gateway request failed: {message}")]
    Transport {
        /// Underlying transport error message.
        message: String,
    },
    /// Raised when the gateway answered with a non-success status.
    #[error("gateway returned status {status}: {message}")]
    Api {
        /// HTTP status code of the response.
        status: u16,
        /// Response body, which the gateway uses for error descriptions.
        message: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("failed to decode gateway response: {message}")]
    Decode {
        /// Parser error message.
        message: String,
    },
}
