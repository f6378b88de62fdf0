//! Client error types.
//!
//! Everything that can go wrong after submission falls into one of four
//! kinds: connection, timeout, command, or protocol. `InvalidArgument`
//! covers local validation that rejects a call before anything reaches
//! the wire.

use nvmf_protocol::{ProtocolError, StatusField};
use std::fmt;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// TCP failures, socket closed mid-operation, ICReq/ICResp rejection.
    /// Fatal for the session.
    #[error("connection error: {0}")]
    Connection(String),

    /// A per-command or keep-alive deadline expired. Only the affected
    /// command fails; the session survives.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The controller completed the command with a non-zero status.
    #[error("command failed: {0}")]
    Command(CommandFailure),

    /// Malformed PDU, digest mismatch, unknown command id, decoder
    /// failure, or a received termination request. Fatal for the session.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The call was rejected by local validation before submission.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn conn(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    pub(crate) fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Whether this error tears down the whole session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Protocol(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Connection(err.to_string())
    }
}

/// A completion with a non-zero status field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    /// Opcode of the command that failed.
    pub opcode: u8,
    /// Command id the failure correlates to.
    pub cid: u16,
    /// The raw status field of the completion.
    pub status: StatusField,
    /// Command-specific completion dword 0.
    pub dw0: u32,
}

impl CommandFailure {
    pub fn status_code(&self) -> u8 {
        self.status.status_code()
    }

    pub fn status_code_type(&self) -> u8 {
        self.status.status_code_type()
    }

    /// The Do-Not-Retry bit of the status field.
    pub fn do_not_retry(&self) -> bool {
        self.status.do_not_retry()
    }

    pub fn description(&self) -> &'static str {
        self.status.description()
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "opcode {:#04x} cid {}: {}",
            self.opcode, self.cid, self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failure_display() {
        let failure = CommandFailure {
            opcode: 0x02,
            cid: 7,
            status: StatusField::from_parts(0x2, 0x80),
            dw0: 0,
        };
        let text = Error::Command(failure).to_string();
        assert!(text.contains("opcode 0x02"));
        assert!(text.contains("cid 7"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::conn("refused").is_fatal());
        assert!(Error::Protocol(ProtocolError::UnknownPduType(0x42)).is_fatal());
        assert!(!Error::timeout("deadline").is_fatal());
        assert!(!Error::invalid("zero blocks").is_fatal());
    }

    #[test]
    fn test_io_error_maps_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(Error::from(io), Error::Connection(_)));
    }

    #[test]
    fn test_dnr_exposed() {
        let failure = CommandFailure {
            opcode: 0x01,
            cid: 1,
            status: StatusField(1 << 15 | 0x20 << 1),
            dw0: 0,
        };
        assert!(failure.do_not_retry());
        assert_eq!(failure.description(), "Namespace is Write Protected");
    }
}
