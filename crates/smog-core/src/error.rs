//! Error types for the relay engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can stop the relay from starting or an `auth`/`config`
/// command from completing.
///
/// Failures while relaying a single message are [`crate::RelayError`]s
/// and never surface here.
#[derive(Debug, Error)]
pub enum Error {
    /// `OAuth2` or token storage failure.
    #[error("OAuth error: {0}")]
    OAuth(#[from] smog_oauth::Error),

    /// SMTP server failure.
    #[error("SMTP error: {0}")]
    Smtp(#[from] smog_smtp::Error),

    /// HTTP client could not be built.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No configuration file was found in any search location.
    #[error("no configuration file found (searched {})", format_paths(.0))]
    ConfigNotFound(Vec<PathBuf>),

    /// Refusing to overwrite an existing configuration file.
    #[error("config file already exists: {}", .0.display())]
    ConfigExists(PathBuf),

    /// The SMTP password is still the shipped default.
    #[error("the SMTP password is set to the default value; change SmtpPassword before running the server")]
    InsecurePassword,

    /// No stored Google token.
    #[error("no Google API token found at {}; run 'smog auth login' to authorize", .0.display())]
    CredentialMissing(PathBuf),

    /// The stored Google token has expired and cannot be refreshed.
    #[error("the Google API token at {} has expired and has no refresh token; run 'smog auth login'", .0.display())]
    CredentialExpired(PathBuf),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
