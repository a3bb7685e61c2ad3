//! Error mapping guide:
//! - Everything that can fail before a relay session starts is a `GateError` and is fatal.
//! - Once both streams are open, failures are `TransferError` values reported inside the
//!   relay outcome; they end the session but never the process.
//! - Map config errors to exit code 2 (usage); every other fatal error to 1.
use std::fmt;
use std::io;
use std::time::Duration;

use crate::relay::Side;

/// Provisioning request failed or returned an unusable response.
#[derive(Debug)]
pub enum ProvisionError {
    /// Connect failure, timeout or any other transport-level problem.
    Transport { timed_out: bool, message: String },
    /// Control plane answered with a non-2xx status.
    Status(u16),
    /// Body could not be read or parsed as a JSON object.
    Body(String),
    /// Address field absent, not a string, or empty.
    MissingAddress { field: String },
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionError::Transport {
                timed_out: true,
                message,
            } => write!(f, "provisioning request timed out: {message}"),
            ProvisionError::Transport { message, .. } => {
                write!(f, "provisioning request failed: {message}")
            }
            ProvisionError::Status(code) => {
                write!(f, "provisioning endpoint returned HTTP {code}")
            }
            ProvisionError::Body(msg) => write!(f, "provisioning response unusable: {msg}"),
            ProvisionError::MissingAddress { field } => {
                write!(f, "provisioning response has no '{field}' address")
            }
        }
    }
}

impl std::error::Error for ProvisionError {}

impl From<reqwest::Error> for ProvisionError {
    fn from(e: reqwest::Error) -> Self {
        ProvisionError::Transport {
            timed_out: e.is_timeout(),
            message: e.to_string(),
        }
    }
}

/// Where a connection could not be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    Inbound,
    Backend,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectStage::Inbound => f.write_str("inbound"),
            ConnectStage::Backend => f.write_str("backend"),
        }
    }
}

/// Fatal, process-terminating errors.
#[derive(Debug)]
pub enum GateError {
    Config(String),
    Provision(ProvisionError),
    Connect {
        stage: ConnectStage,
        source: io::Error,
    },
    /// Only possible when an overall readiness deadline is configured.
    ReadinessDeadline { backend: String, waited: Duration },
}

impl GateError {
    pub fn connect(stage: ConnectStage, source: io::Error) -> Self {
        GateError::Connect { stage, source }
    }

    /// All gate errors end the process; session-scoped failures are `TransferError`s.
    pub fn is_fatal(&self) -> bool {
        true
    }
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::Config(msg) => write!(f, "invalid configuration: {msg}"),
            GateError::Provision(e) => fmt::Display::fmt(e, f),
            GateError::Connect { stage, source } => {
                write!(f, "{stage} connection failed: {source}")
            }
            GateError::ReadinessDeadline { backend, waited } => write!(
                f,
                "backend {backend} not reachable after {}",
                humantime::format_duration(*waited)
            ),
        }
    }
}

impl std::error::Error for GateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GateError::Provision(e) => Some(e),
            GateError::Connect { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ProvisionError> for GateError {
    fn from(e: ProvisionError) -> Self {
        GateError::Provision(e)
    }
}

/// Convert a fatal error to the process exit code.
pub fn exit_code_for_gate_error(e: &GateError) -> u8 {
    match e {
        GateError::Config(_) => 2,
        _ => 1,
    }
}

/// Session-scoped relay failure. Absorbed by the relay engine.
#[derive(Debug)]
pub enum TransferError {
    /// Streams could not be switched to non-blocking mode.
    Setup(io::Error),
    Read { side: Side, source: io::Error },
    Write { side: Side, source: io::Error },
    /// Readiness multiplexer itself failed.
    Poll(io::Error),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Setup(e) => write!(f, "relay setup failed: {e}"),
            TransferError::Read { side, source } => write!(f, "read from {side} failed: {source}"),
            TransferError::Write { side, source } => {
                write!(f, "write to {side} failed: {source}")
            }
            TransferError::Poll(e) => write!(f, "readiness wait failed: {e}"),
        }
    }
}

impl std::error::Error for TransferError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_binary_except_usage() {
        let e = GateError::Provision(ProvisionError::Status(500));
        assert_eq!(exit_code_for_gate_error(&e), 1);
        let e = GateError::connect(ConnectStage::Backend, io::ErrorKind::ConnectionRefused.into());
        assert_eq!(exit_code_for_gate_error(&e), 1);
        assert_eq!(exit_code_for_gate_error(&GateError::Config("x".into())), 2);
    }

    #[test]
    fn test_display_mentions_stage_and_status() {
        let e = GateError::connect(ConnectStage::Inbound, io::ErrorKind::NotConnected.into());
        assert!(e.to_string().starts_with("inbound connection failed"), "{e}");
        let e: GateError = ProvisionError::Status(503).into();
        assert_eq!(e.to_string(), "provisioning endpoint returned HTTP 503");
        let e = ProvisionError::MissingAddress {
            field: "vm_ip".into(),
        };
        assert_eq!(e.to_string(), "provisioning response has no 'vm_ip' address");
    }
}
