//! Tolino - command line access to the tolino e-reader cloud.
//!
//! This library provides functionality for:
//! - Logging in through the partner storefronts that resell the cloud
//! - Registering this client as a reader device
//! - Listing, uploading, downloading, deleting and editing cloud documents

pub mod auth;
pub mod config;
pub mod console;
pub mod error;
pub mod hardware;
mod http;
pub mod models;
pub mod partners;
pub mod session;
pub mod utils;

// Re-export commonly used types
pub use auth::Credentials;
pub use config::Config;
pub use console::Console;
pub use error::{CloudError, ConfigError};
pub use hardware::hardware_id;
pub use models::{Device, DownloadInfo, InventoryItem, MetadataUpdate};
pub use partners::{AuthFlow, BackendGeneration, BoshEndpoints, LoginForm, Partner, PartnerRegistry};
pub use session::{CloudSession, SessionState};
