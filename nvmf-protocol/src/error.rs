//! Protocol error types.

use thiserror::Error;

/// Errors raised by the PDU codec and payload decoders.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown PDU type: {0:#04x}")]
    UnknownPduType(u8),

    #[error("unexpected PDU type: expected {expected}, got {got}")]
    UnexpectedPdu { expected: &'static str, got: u8 },

    #[error("PDU too large: {plen} bytes (max {max})")]
    PduTooLarge { plen: u32, max: u32 },

    #[error("invalid header length {hlen} for PDU type {pdu_type:#04x}")]
    InvalidHeaderLength { pdu_type: u8, hlen: u8 },

    #[error("PDU length {plen} inconsistent with header fields (expected {expected})")]
    LengthMismatch { plen: u32, expected: u32 },

    #[error("header digest mismatch: expected {expected:#010x}, got {actual:#010x}")]
    HeaderDigestMismatch { expected: u32, actual: u32 },

    #[error("data digest mismatch: expected {expected:#010x}, got {actual:#010x}")]
    DataDigestMismatch { expected: u32, actual: u32 },

    #[error("unsupported PDU format version: {0:#06x}")]
    UnsupportedPfv(u16),

    #[error("{what} truncated: need {needed} bytes, got {got}")]
    TruncatedPayload {
        what: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("invalid {field}: {value:#x}")]
    InvalidField { field: &'static str, value: u64 },

    #[error("NQN too long: {0} bytes (max 223)")]
    NqnTooLong(usize),

    #[error("C2HData carries SUCCESS without LAST_PDU (flags {0:#04x})")]
    SuccessWithoutLast(u8),

    #[error("controller terminated the connection (fes {fes:#06x}, fei {fei:#010x})")]
    ConnectionTerminated { fes: u16, fei: u32 },
}

impl ProtocolError {
    pub(crate) fn truncated(what: &'static str, needed: usize, got: usize) -> Self {
        ProtocolError::TruncatedPayload { what, needed, got }
    }
}

/// Checks that `data` holds at least `needed` bytes before a decoder reads it.
pub(crate) fn ensure_len(
    data: &[u8],
    needed: usize,
    what: &'static str,
) -> Result<(), ProtocolError> {
    if data.len() < needed {
        Err(ProtocolError::truncated(what, needed, data.len()))
    } else {
        Ok(())
    }
}
