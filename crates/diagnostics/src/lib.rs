// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Structured logging shared by the nlds-admin crates
//!
//! Logging is off unless the `NLDS_ADMIN_LOG` environment variable selects a level:
//! - `NLDS_ADMIN_LOG=off` (default) - no logs
//! - `NLDS_ADMIN_LOG=error` / `warn` - problems only (unroutable messages, retries)
//! - `NLDS_ADMIN_LOG=info` - broker connections, split and dump progress
//! - `NLDS_ADMIN_LOG=debug` - per-message detail (delivery tags, correlation ids)
//!
//! Events are written to stderr so command output on stdout stays clean.

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable selecting the log level
pub const LOG_ENV_VAR: &str = "NLDS_ADMIN_LOG";

static INIT: Once = Once::new();

/// Parsed value of [`LOG_ENV_VAR`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSetting {
    Off,
    Level(emit::Level),
    /// Unrecognised value, logging falls back to info
    Unknown,
}

/// Interpret a log level string the way [`init_diagnostics`] does
pub fn parse_log_setting(value: &str) -> LogSetting {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" => LogSetting::Off,
        "debug" => LogSetting::Level(emit::Level::Debug),
        "info" => LogSetting::Level(emit::Level::Info),
        "warn" => LogSetting::Level(emit::Level::Warn),
        "error" => LogSetting::Level(emit::Level::Error),
        _ => LogSetting::Unknown,
    }
}

/// Initialize diagnostics based on the NLDS_ADMIN_LOG environment variable
///
/// Safe to call more than once, only the first call configures the emitter.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let log_level = std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| "off".to_string());

        let level = match parse_log_setting(&log_level) {
            LogSetting::Off => return,
            LogSetting::Level(level) => level,
            LogSetting::Unknown => {
                // Nothing is wired up yet, so this one goes straight to stderr
                eprintln!(
                    "Warning: Unknown {} value '{}', using 'info'",
                    LOG_ENV_VAR, log_level
                );
                emit::Level::Info
            }
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        // The emitter lives for the rest of the process
        std::mem::forget(rt);
    });
}

/// Log normal operations (connections opened, messages split, files dumped)
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log detailed diagnostics (delivery tags, correlation ids, chunk sizes)
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log recoverable conditions (reconnects, unroutable messages, requeued deliveries)
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log failures that end an operation
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

/// Short form of [`log_info!`]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Short form of [`log_debug!`]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Short form of [`log_warn!`]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Short form of [`log_error!`]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

/// Re-export the init function for convenience
pub use init_diagnostics as init;
