//! Structured logging utilities for vdrive components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use vdrive_config::{log_drive_info, log_fs_warn};
//!
//! log_drive_info!("File added", key = "notes.txt", size = 42u64);
//! log_fs_warn!("Lookup failed", name = "x", error = tracing::field::display(&err));
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const DRIVE: &'static str = "DRIVE";
    pub const INDEX: &'static str = "INDEX";
    pub const FS: &'static str = "FS";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Map a `-v` count to a level, starting from `Warn`.
    pub fn from_verbosity(verbose: u8) -> Self {
        match verbose {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

// === DRIVE logging macros ===

#[macro_export]
macro_rules! log_drive_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "DRIVE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_drive_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "DRIVE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_drive_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "DRIVE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_drive_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "DRIVE", $($key = $value,)* $msg)
    };
}

// === INDEX logging macros ===

#[macro_export]
macro_rules! log_index_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "INDEX", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_index_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "INDEX", $($key = $value,)* $msg)
    };
}

// === FS logging macros ===

#[macro_export]
macro_rules! log_fs_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "FS", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_fs_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "FS", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_fs_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "FS", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_fs_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "FS", $($key = $value,)* $msg)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CLI", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CLI", $($key = $value,)* $msg)
    };
}

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "VDRIVE_LOG";

/// Initialize logging with the given level filter.
/// Call this once at application startup.
///
/// `VDRIVE_LOG` wins over `RUST_LOG`; `level` applies when neither is set.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    // A subscriber may already be installed (tests, embedding hosts).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
