//! Logging setup.
//!
//! Log lines are JSON. They go to the configured file, and to stdout when
//! `--verbose` is given, when no file is configured or when the file
//! cannot be opened. `RUST_LOG` overrides the configured level.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use smog_core::LogLevel;
use tracing::warn;
use tracing_subscriber::fmt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const CRATES: [&str; 5] = ["smog", "smog_core", "smog_smtp", "smog_oauth", "smog_mime"];

/// Filter directives for a configured level, `None` when logging is off.
fn directives(level: LogLevel) -> Option<String> {
    match level {
        LogLevel::Disabled => None,
        LogLevel::Minimal => Some("info".to_string()),
        LogLevel::Verbose => {
            let mut directives = vec!["info".to_string()];
            directives.extend(CRATES.iter().map(|krate| format!("{krate}=debug")));
            Some(directives.join(","))
        }
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Installs the global subscriber.
pub fn init(level: LogLevel, file: Option<&Path>, verbose: bool) {
    let Some(directives) = directives(level) else {
        return;
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    let (file_layer, file_error) = match file.map(|path| (path, open_log_file(path))) {
        Some((_, Ok(log_file))) => (
            Some(fmt::layer().json().with_writer(Mutex::new(log_file))),
            None,
        ),
        Some((path, Err(e))) => (None, Some((path, e))),
        None => (None, None),
    };

    let console = verbose || file.is_none() || file_error.is_some();
    let console_layer = console.then(|| fmt::layer().json().with_writer(std::io::stdout));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    if let Some((path, e)) = file_error {
        warn!(
            path = %path.display(),
            error = %e,
            "failed to open log file, logging to the console"
        );
    }
}
