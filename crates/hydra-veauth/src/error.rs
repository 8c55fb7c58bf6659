//! Error types for the credential exchange.

use thiserror::Error;

/// Result type alias using the veauth error type.
pub type Result<T> = std::result::Result<T, VeauthError>;

/// Error type for credential exchange operations.
#[derive(Debug, Error)]
pub enum VeauthError {
    /// Network/connectivity error.
    #[error("Network error: {0}")]
    Network(String),

    /// The OpenAPI returned a structured error.
    #[error("API error {code}: {message}")]
    Api {
        /// Vendor error code.
        code: String,
        /// Vendor error message.
        message: String,
    },

    /// The account has no API keys to exchange for.
    #[error("list api keys returned empty list")]
    EmptyKeyList,

    /// The key lookup succeeded but carried no key material.
    #[error("get raw api key returned no key")]
    MissingApiKey,

    /// Malformed response from the OpenAPI.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for VeauthError {
    fn from(err: reqwest::Error) -> Self {
        VeauthError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for VeauthError {
    fn from(err: serde_json::Error) -> Self {
        VeauthError::Serialization(err.to_string())
    }
}
