//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ripple_framework::AccessList;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RippleConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Dispatch and action egress settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// User and group lists for access checks.
    #[serde(default)]
    pub access: AccessConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Line format.
    #[serde(default)]
    pub format: LogFormat,

    /// Where log lines go.
    #[serde(default)]
    pub output: LogOutput,

    /// Log file, required when `output` is `file`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Rotation policy of the log file.
    #[serde(default)]
    pub rotation: LogRotation,

    /// Span lifecycle events to log.
    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    /// Per-target levels, e.g. `ripple_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            rotation: LogRotation::default(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            filters: HashMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line, abbreviated.
    #[default]
    Compact,
    /// Single-line with all fields.
    Full,
    /// Multi-line, for development.
    Pretty,
    /// Newline-delimited JSON.
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Log file rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Daily,
    Hourly,
    Minutely,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

// =============================================================================
// Dispatch
// =============================================================================

/// Dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound for dispatching one event, in milliseconds. Unbounded when
    /// absent.
    #[serde(default)]
    pub dispatch_timeout_ms: Option<u64>,

    /// How long `send_and_wait` waits for a response, in milliseconds.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Maximum number of events dispatched concurrently.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Capacity of the outbound frame channel.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// How long shutdown waits for running dispatches before cancelling
    /// them, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: None,
            response_timeout_ms: default_response_timeout_ms(),
            max_in_flight: default_max_in_flight(),
            outbound_capacity: default_outbound_capacity(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_ms.map(Duration::from_millis)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_response_timeout_ms() -> u64 {
    30000
}

fn default_max_in_flight() -> usize {
    256
}

fn default_outbound_capacity() -> usize {
    1024
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

// =============================================================================
// Access
// =============================================================================

/// User and group lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub owner: Option<i64>,
    pub super_users: Vec<i64>,
    pub white_users: Vec<i64>,
    pub black_users: Vec<i64>,
    pub white_groups: Vec<i64>,
}

impl AccessConfig {
    /// Converts to the list consumed by `AccessChecker`.
    pub fn to_access_list(&self) -> AccessList {
        AccessList {
            owner: self.owner,
            super_users: self.super_users.clone(),
            white_users: self.white_users.clone(),
            black_users: self.black_users.clone(),
            white_groups: self.white_groups.clone(),
        }
    }
}
