//! Error types for the tolino cloud client.
//!
//! Transport failures surface as `Http`; status and parse failures use the
//! variant of the operation that hit them.

use thiserror::Error;

/// Fallback text used when the backend gives no readable reason.
pub const REASON_UNKNOWN: &str = "reason unknown";

/// Main error type for partner login and cloud operations.
#[derive(Error, Debug)]
pub enum CloudError {
    /// Partner id is not in the registry
    #[error("Unknown partner id: {0}")]
    UnknownPartner(u32),

    /// Partner descriptor lacks something its auth flow needs
    #[error("Invalid partner {id}: {reason}")]
    InvalidPartner { id: u32, reason: String },

    /// Credential POST was rejected or the login cookie never appeared
    #[error("Login to {partner} failed")]
    AuthenticationFailed { partner: String },

    /// Token-announcement page had no usable token
    #[error("Access token request to {partner} failed: {reason}")]
    TokenExtractionFailed { partner: String, reason: String },

    /// Authorize redirect carried no `code`
    #[error("Authorization code request to {partner} failed")]
    AuthorizationCodeMissing { partner: String },

    /// Token endpoint answered with an error or an incomplete document
    #[error("Access token exchange with {partner} failed: {reason}")]
    TokenExchangeFailed { partner: String, reason: String },

    #[error("Device registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Unregister {device_id} failed: {message}")]
    UnregisterFailed { device_id: String, message: String },

    #[error("Device list request failed: {0}")]
    DeviceListFailed(String),

    #[error("Inventory request failed: {0}")]
    InventoryParseFailed(String),

    #[error("File upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete {document_id} failed: {message}")]
    DeleteFailed { document_id: String, message: String },

    #[error("Download info request failed: {0}")]
    DownloadInfoFailed(String),

    #[error("Download request failed: {0}")]
    DownloadFailed(String),

    #[error("Metadata update for {document_id} failed: {message}")]
    MetadataFailed { document_id: String, message: String },

    #[error("Cover upload for {document_id} failed: {message}")]
    CoverFailed { document_id: String, message: String },

    #[error("Logout failed: {0}")]
    LogoutFailed(String),

    /// Operation issued in a session state that does not allow it
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// HTTP transport failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Reading a local file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error type for configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Config directory not found
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, CloudError>;
