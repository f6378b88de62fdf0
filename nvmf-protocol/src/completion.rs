//! Completion queue entry packing and the status field.

use crate::error::{ensure_len, ProtocolError};
use crate::status;
use bytes::{Buf, BufMut};
use std::fmt;

/// Size of a completion queue entry in bytes.
pub const CQE_SIZE: usize = 16;

/// A 16-byte completion queue entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cqe {
    /// Command-specific result (e.g. controller id for Connect, feature
    /// value for Get Features, AEN payload for async event completions).
    pub dw0: u32,
    pub dw1: u32,
    pub sq_head: u16,
    pub sq_id: u16,
    pub cid: u16,
    /// Raw status word: phase bit 0, SC bits 8:1, SCT bits 11:9,
    /// More bit 14, DNR bit 15.
    pub status: u16,
}

impl Cqe {
    /// A successful completion for `cid`, used when a C2HData PDU carries
    /// the SUCCESS flag and no CapsuleResp follows.
    pub fn success(cid: u16) -> Self {
        Self {
            cid,
            ..Default::default()
        }
    }

    pub fn status_field(&self) -> StatusField {
        StatusField(self.status)
    }

    pub fn is_success(&self) -> bool {
        self.status_field().status_code() == 0 && self.status_field().status_code_type() == 0
    }

    pub fn encode(&self) -> [u8; CQE_SIZE] {
        let mut out = [0u8; CQE_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32_le(self.dw0);
        buf.put_u32_le(self.dw1);
        buf.put_u16_le(self.sq_head);
        buf.put_u16_le(self.sq_id);
        buf.put_u16_le(self.cid);
        buf.put_u16_le(self.status);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(data, CQE_SIZE, "completion entry")?;
        let mut buf = &data[..CQE_SIZE];
        Ok(Self {
            dw0: buf.get_u32_le(),
            dw1: buf.get_u32_le(),
            sq_head: buf.get_u16_le(),
            sq_id: buf.get_u16_le(),
            cid: buf.get_u16_le(),
            status: buf.get_u16_le(),
        })
    }
}

/// The 16-bit status word of a completion entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusField(pub u16);

impl StatusField {
    /// Builds a status word from SCT and SC (phase clear, no DNR/More).
    pub fn from_parts(sct: u8, sc: u8) -> Self {
        Self((sc as u16) << 1 | ((sct & 0x7) as u16) << 9)
    }

    pub fn phase(&self) -> bool {
        self.0 & 0x1 != 0
    }

    /// Status Code, bits 8:1.
    pub fn status_code(&self) -> u8 {
        (self.0 >> 1) as u8
    }

    /// Status Code Type, bits 11:9.
    pub fn status_code_type(&self) -> u8 {
        ((self.0 >> 9) & 0x7) as u8
    }

    pub fn more(&self) -> bool {
        self.0 & (1 << 14) != 0
    }

    /// Do Not Retry, bit 15.
    pub fn do_not_retry(&self) -> bool {
        self.0 & (1 << 15) != 0
    }

    pub fn is_success(&self) -> bool {
        self.status_code() == 0 && self.status_code_type() == 0
    }

    /// Human-readable description of this status.
    pub fn description(&self) -> &'static str {
        status::describe(self.status_code_type(), self.status_code())
    }
}

impl fmt::Display for StatusField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (sct={:#x}, sc={:#04x})",
            self.description(),
            self.status_code_type(),
            self.status_code()
        )?;
        if self.do_not_retry() {
            write!(f, " [DNR]")?;
        }
        if self.more() {
            write!(f, " [More]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cqe_roundtrip() {
        let cqe = Cqe {
            dw0: 0xDEAD_BEEF,
            dw1: 7,
            sq_head: 12,
            sq_id: 0,
            cid: 42,
            status: StatusField::from_parts(0, 0x02).0,
        };
        assert_eq!(Cqe::decode(&cqe.encode()).unwrap(), cqe);
    }

    #[test]
    fn test_status_field_decomposition() {
        // DNR | sct=2 | sc=0x80
        let status = StatusField(1 << 15 | 2 << 9 | 0x80 << 1);
        assert_eq!(status.status_code_type(), 2);
        assert_eq!(status.status_code(), 0x80);
        assert!(status.do_not_retry());
        assert!(!status.more());
        assert!(!status.is_success());
    }

    #[test]
    fn test_phase_bit_ignored_for_success() {
        let status = StatusField(0x1);
        assert!(status.phase());
        assert!(status.is_success());
    }

    #[test]
    fn test_from_parts_roundtrip() {
        let status = StatusField::from_parts(0x2, 0x80);
        assert_eq!(status.status_code_type(), 0x2);
        assert_eq!(status.status_code(), 0x80);
    }

    #[test]
    fn test_display_mentions_dnr() {
        let status = StatusField(1 << 15 | 0x02 << 1);
        let text = status.to_string();
        assert!(text.contains("Invalid Field in Command"));
        assert!(text.contains("[DNR]"));
    }

    #[test]
    fn test_short_cqe_rejected() {
        assert!(Cqe::decode(&[0u8; 15]).is_err());
    }
}
