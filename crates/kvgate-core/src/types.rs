//! Shared types used across kvgate crates.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Log severity. Lower numeric value means higher severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Notice = 2,
    Info = 3,
    Debug = 4,
    Trace = 8,
}

impl LogLevel {
    pub const ALL: [LogLevel; 6] = [
        LogLevel::Error,
        LogLevel::Warning,
        LogLevel::Notice,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    /// Numeric severity used for threshold comparison.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Single-letter tag written in front of every log line.
    pub fn letter(self) -> char {
        match self {
            LogLevel::Error => 'E',
            LogLevel::Warning => 'W',
            LogLevel::Notice => 'N',
            LogLevel::Info => 'I',
            LogLevel::Debug => 'D',
            LogLevel::Trace => 'T',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Notice => "notice",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "notice" => Ok(LogLevel::Notice),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(ParseLevelError(other.to_string())),
        }
    }
}

/// Verbosity threshold: a message is emitted when its level is numerically
/// less than or equal to this value.
///
/// Accepts either a level name (`"warn"`) or a raw number (`5`) in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "VerbosityRepr")]
pub struct Verbosity(pub u8);

impl Verbosity {
    pub fn allows(self, level: LogLevel) -> bool {
        level.as_u8() <= self.0
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity(LogLevel::Notice.as_u8())
    }
}

impl From<LogLevel> for Verbosity {
    fn from(level: LogLevel) -> Self {
        Verbosity(level.as_u8())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VerbosityRepr {
    Number(u8),
    Name(String),
}

impl TryFrom<VerbosityRepr> for Verbosity {
    type Error = ParseLevelError;

    fn try_from(repr: VerbosityRepr) -> Result<Self, Self::Error> {
        match repr {
            VerbosityRepr::Number(n) => Ok(Verbosity(n)),
            VerbosityRepr::Name(name) => name.parse::<LogLevel>().map(Verbosity::from),
        }
    }
}

/// When buffered log writes are forced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "FsyncRepr")]
pub enum FsyncPolicy {
    /// Leave it to the OS (`"auto"`).
    #[default]
    Never,
    /// Sync after every line (`"all"`).
    EveryWrite,
    /// Sync on a recurring timer, in milliseconds.
    PeriodicMillis(u64),
}

impl FsyncPolicy {
    pub fn period(self) -> Option<Duration> {
        match self {
            FsyncPolicy::PeriodicMillis(ms) => Some(Duration::from_millis(ms)),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FsyncRepr {
    Millis(u64),
    Mode(String),
}

impl TryFrom<FsyncRepr> for FsyncPolicy {
    type Error = String;

    fn try_from(repr: FsyncRepr) -> Result<Self, Self::Error> {
        match repr {
            FsyncRepr::Millis(0) => Err("fsync period must be at least 1ms".to_string()),
            FsyncRepr::Millis(ms) => Ok(FsyncPolicy::PeriodicMillis(ms)),
            FsyncRepr::Mode(mode) => match mode.as_str() {
                "auto" => Ok(FsyncPolicy::Never),
                "all" => Ok(FsyncPolicy::EveryWrite),
                other => Err(format!(
                    "invalid fsync mode {other:?}, expected \"auto\", \"all\" or a period in ms"
                )),
            },
        }
    }
}

/// Backend credentials.
///
/// A bare string is the legacy single-secret form; a two-element array is
/// `[username, password]`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "AuthRepr")]
pub enum BackendAuth {
    Legacy { password: String },
    User { username: String, password: String },
}

impl fmt::Debug for BackendAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendAuth::Legacy { .. } => f
                .debug_struct("Legacy")
                .field("password", &"<redacted>")
                .finish(),
            BackendAuth::User { username, .. } => f
                .debug_struct("User")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AuthRepr {
    Secret(String),
    Pair(Vec<String>),
}

impl TryFrom<AuthRepr> for BackendAuth {
    type Error = String;

    fn try_from(repr: AuthRepr) -> Result<Self, Self::Error> {
        match repr {
            AuthRepr::Secret(password) => Ok(BackendAuth::Legacy { password }),
            AuthRepr::Pair(pair) => match <[String; 2]>::try_from(pair) {
                Ok([username, password]) => Ok(BackendAuth::User { username, password }),
                Err(pair) => Err(format!(
                    "auth must be a secret or [username, password], got {} elements",
                    pair.len()
                )),
            },
        }
    }
}
