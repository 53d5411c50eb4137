use std::time::Duration;
use thiserror::Error;

/// Raw register data that could not be turned into an engineering value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("{signal}: expected {expected} register words, got {got}")]
    WordCount {
        signal: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{signal}: raw value {raw} exceeds {max}")]
    RawOutOfRange { signal: &'static str, raw: u16, max: u16 },
    #[error("{signal}: raw value {raw} is not a known option")]
    UnknownOption { signal: &'static str, raw: u16 },
}

/// An engineering value that does not fit the register it is destined for.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("{signal}: {value} is outside the representable range {min}..={max}")]
    OutOfRange {
        signal: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{signal}: {value} is not a finite number")]
    NotFinite { signal: &'static str, value: f64 },
    #[error("{signal}: expected a {expected} value")]
    WrongKind {
        signal: &'static str,
        expected: &'static str,
    },
    #[error("{signal}: unknown option {label:?}")]
    UnknownOption { signal: &'static str, label: String },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("connection closed by peer")]
    Closed,
    #[error("connection is being torn down")]
    ShuttingDown,
    #[error("reconnect backoff, next attempt in {0:?}")]
    Backoff(Duration),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("modbus exception {code:#04x} for function {function:#04x}")]
    Exception { function: u8, code: u8 },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Errors after which the socket can no longer be trusted.
    pub fn breaks_link(&self) -> bool {
        !matches!(self, Self::Exception { .. } | Self::Backoff(_))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("power {value} kW is outside {min}..={max} kW")]
    Power { value: f64, min: f64, max: f64 },
    #[error("duration {value} min is outside {min}..={max} min")]
    Duration { value: u32, min: u32, max: u32 },
    #[error("{what} SOC {value}% is outside {min}..={max}%")]
    Soc {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("export target {0} kW must be a non-negative number")]
    ExportTarget(f64),
    #[error("no power limit configured for {0}")]
    MissingLimit(&'static str),
    #[error("{signal} {value} is outside {min}..={max}")]
    Setting {
        signal: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("unknown signal {0:?}")]
    UnknownSignal(String),
    #[error("{0} is read-only")]
    ReadOnly(&'static str),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("device {device} is a follower, control is not permitted")]
pub struct RoleError {
    pub device: String,
}

/// Everything the core can hand back to a caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Role(#[from] RoleError),
}

impl Error {
    /// Transport failures may succeed when repeated, nothing else will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
