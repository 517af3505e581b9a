//! Core types shared by the inventory scanner crates.

pub mod config;
pub mod error;
pub mod record;

pub use config::{OutputPaths, ScanConfig};
pub use error::{credential_remediation, is_invalid_client_token, ConfigError, ProviderError, ScanError};
pub use record::{FailureReport, ResourceKind, ResourceRecord, TagValue, NOT_FOUND};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
