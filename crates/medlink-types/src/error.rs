//! Error hierarchy for Medlink.

use thiserror::Error;

/// Errors from the telemedicine gateway and the system of record.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Resource not found")]
    NotFound,

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Server error: {status} {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected response payload: {0}")]
    Decode(String),

    #[error("Request timeout")]
    Timeout,
}

/// Failures of a room provisioning call. No partial room handle accompanies any of these.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Invalid provisioning request: {0}")]
    InvalidRequest(String),

    #[error("Telemedicine service unavailable: {0}")]
    ServiceUnavailable(#[source] GatewayError),

    #[error("Room provisioning failed: {0}")]
    ProvisioningFailed(#[source] GatewayError),
}

/// Errors raised when an operation requires the stored credential.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("No credential available; sign in again")]
    TokenMissing,

    #[error("Stored credential is invalid: {reason}")]
    TokenInvalid { reason: String },
}

/// Errors from a physical key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// A durable credential envelope that cannot be decoded.
///
/// Never crosses the credential store boundary; it is logged and the
/// session is treated as absent.
#[derive(Debug, Error)]
#[error("Malformed credential envelope: {0}")]
pub struct CredentialDecodeError(pub String);

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
