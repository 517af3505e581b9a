//! Error taxonomy shared by every scanning stage, plus the credential classifier.

use std::error::Error as StdError;
use thiserror::Error;

/// Provider error codes that mean the caller's session token is unusable.
pub const INVALID_TOKEN_CODES: &[&str] = &["InvalidClientTokenId", "ExpiredToken", "ExpiredTokenException"];

const TOKEN_KEYWORDS: &[&str] = &["invalidclienttokenid", "invalid client token id", "expired"];

/// A failed call against the provider capability boundary.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered with a structured error code.
    #[error("{operation} failed ({code}): {message}")]
    Api { operation: String, code: String, message: String },
    /// Anything the provider surfaced without a structured code.
    #[error("{0}")]
    Transport(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not decode provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn api(operation: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::Api { operation: operation.into(), code: code.into(), message: message.into() }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ProviderError::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

/// Two-tier outcome of a provider call as seen by the scanner.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Credentials are known-bad: stop the current profile.
    #[error("credentials rejected: {0}")]
    Credential(#[source] ProviderError),
    /// Skip the resource or region and keep scanning.
    #[error(transparent)]
    Recoverable(ProviderError),
}

impl ScanError {
    pub fn classify(err: ProviderError) -> Self {
        if is_invalid_client_token(&err) {
            ScanError::Credential(err)
        } else {
            ScanError::Recoverable(err)
        }
    }

    pub fn is_credential(&self) -> bool {
        matches!(self, ScanError::Credential(_))
    }
}

impl From<ProviderError> for ScanError {
    fn from(err: ProviderError) -> Self {
        ScanError::classify(err)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("At least one region must be specified")]
    NoRegions,
    #[error("parallel profile count must be at least 1")]
    InvalidParallelism,
}

/// Return true if the error looks like an invalid or expired session token.
///
/// Structured codes are checked first anywhere in the source chain; the
/// rendered text is the fallback because not every call path keeps the code.
pub fn is_invalid_client_token(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(code) = e.downcast_ref::<ProviderError>().and_then(ProviderError::code) {
            if INVALID_TOKEN_CODES.contains(&code) {
                return true;
            }
        }
        current = e.source();
    }
    let text = err.to_string().to_lowercase();
    TOKEN_KEYWORDS.iter().any(|k| text.contains(k))
}

/// Remediation hint shown when a profile's credentials are rejected.
pub fn credential_remediation(profile: &str) -> String {
    format!(
        "Profile {profile}: AWS session token appears invalid or expired. \
         Please run 'aws sso login --profile {profile}' or refresh your credentials and try again."
    )
}
