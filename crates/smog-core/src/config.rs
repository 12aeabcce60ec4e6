//! Relay configuration.
//!
//! The configuration is a single JSON object with PascalCase keys. Every
//! key is optional; missing keys take the defaults below.
//!
//! ```json
//! {
//!   "LogLevel": "Minimal",
//!   "GoogleCredentialsPath": "/etc/smog/credentials.json",
//!   "SmtpUser": "smog",
//!   "SmtpPassword": "a long random string",
//!   "AllowedSubnets": ["192.168.1.0/24", "127.0.0.1"]
//! }
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smog_smtp::ServerConfig;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Password shipped in the default configuration. The server refuses to
/// run while it is still in place.
pub const DEFAULT_SMTP_PASSWORD: &str = "changeme";

/// File name looked up in each configuration directory.
pub const CONFIG_FILE_NAME: &str = "smog.json";

const MEGABYTE: u64 = 1024 * 1024;

/// How much to log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Log nothing.
    Disabled,
    /// Informational messages and above.
    #[default]
    Minimal,
    /// Everything, including per-command debug output.
    Verbose,
}

/// Settings for the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// Detail level for logs.
    pub log_level: LogLevel,
    /// Log file. Empty logs to the console.
    pub log_path: String,
    /// Client secret file downloaded from the Google Cloud console.
    pub google_credentials_path: String,
    /// Where the OAuth token is stored. Empty uses the user config dir.
    pub google_token_path: String,
    /// Username SMTP clients authenticate with.
    pub smtp_user: String,
    /// Password SMTP clients authenticate with.
    pub smtp_password: String,
    /// TCP port to listen on.
    pub smtp_port: u16,
    /// Address to bind.
    pub listen_address: String,
    /// Largest message Gmail should receive, in megabytes. `0` disables
    /// the limit.
    pub message_size_limit_mb: u64,
    /// Client addresses or CIDR blocks allowed to connect. Empty allows
    /// everyone.
    pub allowed_subnets: Vec<String>,
    /// Seconds to wait for each client line.
    pub read_timeout: u64,
    /// Seconds a single reply may take to write.
    pub write_timeout: u64,
    /// Recipients allowed per message.
    pub max_recipients: usize,
    /// Seconds in-flight connections get to finish on shutdown.
    pub shutdown_grace_period: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Minimal,
            log_path: String::new(),
            google_credentials_path: String::new(),
            google_token_path: String::new(),
            smtp_user: "smog".to_string(),
            smtp_password: DEFAULT_SMTP_PASSWORD.to_string(),
            smtp_port: 2525,
            listen_address: "0.0.0.0".to_string(),
            message_size_limit_mb: 10,
            allowed_subnets: Vec::new(),
            read_timeout: 10,
            write_timeout: 10,
            max_recipients: 50,
            shutdown_grace_period: 10,
        }
    }
}

impl Config {
    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a value has the wrong
    /// type.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("unable to read {}: {e}", path.display()))
        })?;
        let config = Self::from_json(&contents).map_err(|e| {
            Error::Config(format!("unable to parse {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Loads `path`, or the first file found in [`Config::search_paths`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if no
    /// explicit path was given and none of the search locations exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let candidates = Self::search_paths();
        match candidates.iter().find(|p| p.is_file()) {
            Some(found) => Self::from_file(found),
            None => Err(Error::ConfigNotFound(candidates)),
        }
    }

    /// Locations tried, in order, when no path is given: the system
    /// directory, the user config directory, then the working directory.
    #[must_use]
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(dir) = system_config_dir() {
            paths.push(dir.join(CONFIG_FILE_NAME));
        }
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("smog").join(CONFIG_FILE_NAME));
        }
        paths.push(PathBuf::from(CONFIG_FILE_NAME));
        paths
    }

    /// Checks the settings the server cannot run without.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsecurePassword`] while the default password is
    /// configured, and [`Error::Config`] for empty credentials.
    pub fn validate(&self) -> Result<()> {
        if self.smtp_user.is_empty() {
            return Err(Error::Config("SmtpUser must not be empty".to_string()));
        }
        if self.smtp_password.is_empty() {
            return Err(Error::Config("SmtpPassword must not be empty".to_string()));
        }
        if self.smtp_password == DEFAULT_SMTP_PASSWORD {
            return Err(Error::InsecurePassword);
        }
        Ok(())
    }

    /// Path of the stored OAuth token.
    #[must_use]
    pub fn token_path(&self) -> PathBuf {
        if self.google_token_path.is_empty() {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("smog")
                .join("token.json")
        } else {
            PathBuf::from(&self.google_token_path)
        }
    }

    /// Path of the Google client secret file.
    #[must_use]
    pub fn credentials_path(&self) -> PathBuf {
        PathBuf::from(&self.google_credentials_path)
    }

    /// Log file, if one is configured.
    #[must_use]
    pub fn log_file(&self) -> Option<PathBuf> {
        (!self.log_path.is_empty()).then(|| PathBuf::from(&self.log_path))
    }

    /// Configured limit on the encoded message, in bytes. `0` means
    /// unlimited.
    #[must_use]
    pub const fn size_limit_bytes(&self) -> u64 {
        self.message_size_limit_mb.saturating_mul(MEGABYTE)
    }

    /// Largest raw message accepted on the wire, in bytes.
    ///
    /// Base64 inflates the payload by 4/3, so three quarters of the
    /// configured limit keeps the encoded message within it. `0` means
    /// unlimited.
    #[must_use]
    pub const fn raw_size_ceiling(&self) -> u64 {
        self.size_limit_bytes().saturating_mul(3) / 4
    }

    /// Settings for the SMTP listener.
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_message_bytes: self.raw_size_ceiling(),
            max_recipients: self.max_recipients,
            read_timeout: Duration::from_secs(self.read_timeout),
            write_timeout: Duration::from_secs(self.write_timeout),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_period),
            ..ServerConfig::default()
        }
    }

    /// Default configuration written by `config create` into `dir`.
    #[must_use]
    pub fn template(dir: &Path) -> Self {
        Self {
            google_credentials_path: dir.join("credentials.json").display().to_string(),
            ..Self::default()
        }
    }

    /// Writes the default configuration to `dir/smog.json`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigExists`] rather than overwriting an existing
    /// file, or an I/O error if the directory cannot be written.
    pub fn create_default(dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(CONFIG_FILE_NAME);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::ConfigExists(path));
            }
            Err(e) => return Err(e.into()),
        };

        let mut contents = serde_json::to_string_pretty(&Self::template(dir))?;
        contents.push('\n');
        file.write_all(contents.as_bytes())?;

        info!(path = %path.display(), "default configuration file created");
        Ok(path)
    }
}

/// System-wide configuration directory for this platform.
///
/// # Errors
///
/// Returns an error on Windows when `ProgramData` is not set.
pub fn system_config_dir() -> Result<PathBuf> {
    if cfg!(windows) {
        std::env::var_os("ProgramData")
            .map(|dir| PathBuf::from(dir).join("smog"))
            .ok_or_else(|| Error::Config("ProgramData environment variable not set".to_string()))
    } else if cfg!(target_os = "macos") {
        Ok(PathBuf::from("/Library/Application Support/smog"))
    } else {
        Ok(PathBuf::from("/etc/smog"))
    }
}
