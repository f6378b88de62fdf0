//! Submission queue entry packing.
//!
//! A submission entry is 64 bytes, little-endian throughout:
//!
//! ```text
//! +--------+-------+------+--------------+--------+--------+----------+
//! | opcode | flags | cid  | nsid/fctype  | cdw2-3 |  mptr  |   sgl1   |
//! | 1 byte |1 byte |2 byte|   4 bytes    | 8 bytes| 8 bytes| 16 bytes |
//! +--------+-------+------+--------------+--------+--------+----------+
//! | cdw10 .. cdw15 (6 x 4 bytes)                                      |
//! +-------------------------------------------------------------------+
//! ```
//!
//! Fabrics commands (opcode 0x7F) repurpose byte 4 as the fabrics command
//! type and cdw10+ per the NVMe-oF spec.

use crate::error::{ensure_len, ProtocolError};
use crate::NQN_MAX_LEN;
use bytes::{Buf, BufMut};

/// Size of a submission queue entry in bytes.
pub const SQE_SIZE: usize = 64;

/// Size of the Fabric Connect data structure in bytes.
pub const CONNECT_DATA_SIZE: usize = 1024;

/// PSDT=01b: SGLs are used for all data transfers.
pub const CMD_FLAGS_SGL: u8 = 0x40;

/// Admin command opcodes.
pub mod opcode {
    pub const GET_LOG_PAGE: u8 = 0x02;
    pub const IDENTIFY: u8 = 0x06;
    pub const SET_FEATURES: u8 = 0x09;
    pub const GET_FEATURES: u8 = 0x0A;
    pub const ASYNC_EVENT_REQUEST: u8 = 0x0C;
    pub const KEEP_ALIVE: u8 = 0x18;
    pub const FABRICS: u8 = 0x7F;

    // NVM command set (I/O) opcodes share the numeric space with admin
    // opcodes; context (queue) disambiguates.
    pub const FLUSH: u8 = 0x00;
    pub const WRITE: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const WRITE_ZEROES: u8 = 0x08;
    pub const RESERVATION_REGISTER: u8 = 0x0D;
    pub const RESERVATION_REPORT: u8 = 0x0E;
    pub const RESERVATION_ACQUIRE: u8 = 0x11;
    pub const RESERVATION_RELEASE: u8 = 0x15;
}

/// Fabrics command types (byte 4 of a fabrics SQE).
pub mod fabrics {
    pub const PROPERTY_SET: u8 = 0x00;
    pub const CONNECT: u8 = 0x01;
    pub const PROPERTY_GET: u8 = 0x04;
}

/// CNS selectors for the Identify command.
pub mod cns {
    pub const NAMESPACE: u8 = 0x00;
    pub const CONTROLLER: u8 = 0x01;
    pub const ACTIVE_NAMESPACE_LIST: u8 = 0x02;
}

/// Log page identifiers.
pub mod log_page {
    pub const ERROR_INFORMATION: u8 = 0x01;
    pub const SMART_HEALTH: u8 = 0x02;
    pub const CHANGED_NAMESPACE_LIST: u8 = 0x04;
    pub const ANA: u8 = 0x0C;
    pub const DISCOVERY: u8 = 0x70;
}

/// Feature identifiers for Get/Set Features.
pub mod feature {
    pub const VOLATILE_WRITE_CACHE: u8 = 0x06;
    pub const NUMBER_OF_QUEUES: u8 = 0x07;
    pub const ASYNC_EVENT_CONFIG: u8 = 0x0B;
    pub const KEEP_ALIVE_TIMER: u8 = 0x0F;
}

/// SGL identifier byte: transport SGL data block (type 5, subtype Ah).
pub const SGL_ID_TRANSPORT_DATA_BLOCK: u8 = 0x5A;

/// SGL identifier byte: data block with offset, used for in-capsule data.
pub const SGL_ID_IN_CAPSULE_DATA: u8 = 0x01;

/// SGL entry 1 of a submission entry (bytes 24..40).
///
/// Layout: address (8), length (4), reserved (3), identifier (1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SglDescriptor {
    pub addr: u64,
    pub len: u32,
    pub id: u8,
}

impl SglDescriptor {
    /// Transport SGL data block covering `len` bytes (data-in, or data-out
    /// transferred through R2T).
    pub fn transport(len: u32) -> Self {
        Self {
            addr: 0,
            len,
            id: SGL_ID_TRANSPORT_DATA_BLOCK,
        }
    }

    /// In-capsule data block covering `len` bytes following the SQE.
    pub fn in_capsule(len: u32) -> Self {
        Self {
            addr: 0,
            len,
            id: SGL_ID_IN_CAPSULE_DATA,
        }
    }
}

/// A 64-byte submission queue entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sqe {
    pub opcode: u8,
    pub flags: u8,
    pub cid: u16,
    /// NSID for admin/NVM commands; fabrics command type in the low byte
    /// for fabrics commands.
    pub nsid: u32,
    pub cdw2: u32,
    pub cdw3: u32,
    pub mptr: u64,
    pub sgl: SglDescriptor,
    pub cdw10: u32,
    pub cdw11: u32,
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
    pub cdw15: u32,
}

impl Sqe {
    fn new(opcode: u8, cid: u16, nsid: u32) -> Self {
        Self {
            opcode,
            flags: CMD_FLAGS_SGL,
            cid,
            nsid,
            ..Default::default()
        }
    }

    /// Fabrics command type, meaningful only when `opcode` is 0x7F.
    pub fn fctype(&self) -> u8 {
        (self.nsid & 0xFF) as u8
    }

    pub fn set_cid(&mut self, cid: u16) {
        self.cid = cid;
    }

    /// Points SGL1 at in-capsule data of `len` bytes.
    pub fn set_sgl_in_capsule(&mut self, len: u32) {
        self.sgl = SglDescriptor::in_capsule(len);
    }

    /// Points SGL1 at a transport data block of `len` bytes.
    pub fn set_sgl_transport(&mut self, len: u32) {
        self.sgl = SglDescriptor::transport(len);
    }

    /// Encodes the entry into its 64-byte wire form.
    pub fn encode(&self) -> [u8; SQE_SIZE] {
        let mut out = [0u8; SQE_SIZE];
        let mut buf = &mut out[..];
        buf.put_u8(self.opcode);
        buf.put_u8(self.flags);
        buf.put_u16_le(self.cid);
        buf.put_u32_le(self.nsid);
        buf.put_u32_le(self.cdw2);
        buf.put_u32_le(self.cdw3);
        buf.put_u64_le(self.mptr);
        buf.put_u64_le(self.sgl.addr);
        buf.put_u32_le(self.sgl.len);
        buf.put_bytes(0, 3);
        buf.put_u8(self.sgl.id);
        buf.put_u32_le(self.cdw10);
        buf.put_u32_le(self.cdw11);
        buf.put_u32_le(self.cdw12);
        buf.put_u32_le(self.cdw13);
        buf.put_u32_le(self.cdw14);
        buf.put_u32_le(self.cdw15);
        out
    }

    /// Decodes a 64-byte wire entry.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(data, SQE_SIZE, "submission entry")?;
        let mut buf = &data[..SQE_SIZE];
        let opcode = buf.get_u8();
        let flags = buf.get_u8();
        let cid = buf.get_u16_le();
        let nsid = buf.get_u32_le();
        let cdw2 = buf.get_u32_le();
        let cdw3 = buf.get_u32_le();
        let mptr = buf.get_u64_le();
        let addr = buf.get_u64_le();
        let len = buf.get_u32_le();
        buf.advance(3);
        let id = buf.get_u8();
        Ok(Self {
            opcode,
            flags,
            cid,
            nsid,
            cdw2,
            cdw3,
            mptr,
            sgl: SglDescriptor { addr, len, id },
            cdw10: buf.get_u32_le(),
            cdw11: buf.get_u32_le(),
            cdw12: buf.get_u32_le(),
            cdw13: buf.get_u32_le(),
            cdw14: buf.get_u32_le(),
            cdw15: buf.get_u32_le(),
        })
    }

    // ------------------------------------------------------------------
    // Fabrics commands
    // ------------------------------------------------------------------

    /// Fabric Connect for queue `qid`. `sqsize` is 0-based, KATO in
    /// milliseconds. Carries a 1024-byte connect data structure in-capsule.
    pub fn fabric_connect(cid: u16, qid: u16, sqsize: u16, kato_ms: u32) -> Self {
        let mut sqe = Self::new(opcode::FABRICS, cid, fabrics::CONNECT as u32);
        sqe.sgl = SglDescriptor::in_capsule(CONNECT_DATA_SIZE as u32);
        // cdw10: RECFMT 15:0 (zero) | QID 31:16
        sqe.cdw10 = (qid as u32) << 16;
        // cdw11: SQSIZE 15:0 | CATTR 23:16 (zero)
        sqe.cdw11 = sqsize as u32;
        sqe.cdw12 = kato_ms;
        sqe
    }

    /// Property Get of 4 or 8 bytes at `offset`.
    pub fn property_get(cid: u16, offset: u32, eight_byte: bool) -> Self {
        let mut sqe = Self::new(opcode::FABRICS, cid, fabrics::PROPERTY_GET as u32);
        sqe.cdw10 = if eight_byte { 0x01 } else { 0x00 };
        sqe.cdw11 = offset;
        sqe
    }

    /// Property Set at `offset`.
    pub fn property_set(cid: u16, offset: u32, value: u64) -> Self {
        let mut sqe = Self::new(opcode::FABRICS, cid, fabrics::PROPERTY_SET as u32);
        sqe.cdw11 = offset;
        sqe.cdw12 = value as u32;
        sqe.cdw13 = (value >> 32) as u32;
        sqe
    }

    // ------------------------------------------------------------------
    // Admin commands
    // ------------------------------------------------------------------

    /// Identify with the given CNS selector; data-in of 4096 bytes.
    pub fn identify(cid: u16, cns_value: u8, nsid: u32) -> Self {
        let mut sqe = Self::new(opcode::IDENTIFY, cid, nsid);
        sqe.sgl = SglDescriptor::transport(crate::IDENTIFY_DATA_SIZE as u32);
        sqe.cdw10 = cns_value as u32;
        sqe
    }

    /// Get Log Page reading `len` bytes (must be a non-zero multiple of 4).
    pub fn get_log_page(cid: u16, lid: u8, nsid: u32, len: u32) -> Self {
        let mut sqe = Self::new(opcode::GET_LOG_PAGE, cid, nsid);
        sqe.sgl = SglDescriptor::transport(len);
        let numd = len / 4 - 1;
        sqe.cdw10 = lid as u32 | (numd & 0xFFFF) << 16;
        sqe.cdw11 = numd >> 16;
        sqe
    }

    pub fn get_features(cid: u16, fid: u8, nsid: u32) -> Self {
        let mut sqe = Self::new(opcode::GET_FEATURES, cid, nsid);
        sqe.cdw10 = fid as u32;
        sqe
    }

    pub fn set_features(cid: u16, fid: u8, value: u32, nsid: u32, save: bool) -> Self {
        let mut sqe = Self::new(opcode::SET_FEATURES, cid, nsid);
        sqe.cdw10 = fid as u32 | (save as u32) << 31;
        sqe.cdw11 = value;
        sqe
    }

    pub fn keep_alive(cid: u16) -> Self {
        Self::new(opcode::KEEP_ALIVE, cid, 0)
    }

    pub fn async_event_request(cid: u16) -> Self {
        Self::new(opcode::ASYNC_EVENT_REQUEST, cid, 0)
    }

    // ------------------------------------------------------------------
    // NVM I/O commands
    // ------------------------------------------------------------------

    /// Read `nlb0 + 1` blocks starting at `slba`; `data_len` is the
    /// transfer size in bytes.
    pub fn read(cid: u16, nsid: u32, slba: u64, nlb0: u16, data_len: u32) -> Self {
        let mut sqe = Self::new(opcode::READ, cid, nsid);
        sqe.sgl = SglDescriptor::transport(data_len);
        sqe.cdw10 = slba as u32;
        sqe.cdw11 = (slba >> 32) as u32;
        sqe.cdw12 = nlb0 as u32;
        sqe
    }

    /// Write `nlb0 + 1` blocks starting at `slba`. The SGL descriptor is
    /// finalised at submission, once in-capsule eligibility is known.
    pub fn write(cid: u16, nsid: u32, slba: u64, nlb0: u16, data_len: u32) -> Self {
        let mut sqe = Self::new(opcode::WRITE, cid, nsid);
        sqe.sgl = SglDescriptor::transport(data_len);
        sqe.cdw10 = slba as u32;
        sqe.cdw11 = (slba >> 32) as u32;
        sqe.cdw12 = nlb0 as u32;
        sqe
    }

    pub fn write_zeroes(cid: u16, nsid: u32, slba: u64, nlb0: u16) -> Self {
        let mut sqe = Self::new(opcode::WRITE_ZEROES, cid, nsid);
        sqe.cdw10 = slba as u32;
        sqe.cdw11 = (slba >> 32) as u32;
        sqe.cdw12 = nlb0 as u32;
        sqe
    }

    pub fn flush(cid: u16, nsid: u32) -> Self {
        Self::new(opcode::FLUSH, cid, nsid)
    }

    // ------------------------------------------------------------------
    // Reservation commands
    // ------------------------------------------------------------------

    /// Reservation Register; keys travel in a 16-byte data-out payload.
    pub fn reservation_register(cid: u16, nsid: u32, rrega: u8, iekey: bool, cptpl: u8) -> Self {
        let mut sqe = Self::new(opcode::RESERVATION_REGISTER, cid, nsid);
        sqe.sgl = SglDescriptor::in_capsule(16);
        sqe.cdw10 = (rrega & 0x7) as u32 | (iekey as u32) << 3 | ((cptpl & 0x3) as u32) << 30;
        sqe
    }

    /// Reservation Report reading `len` bytes.
    pub fn reservation_report(cid: u16, nsid: u32, len: u32, eds: bool) -> Self {
        let mut sqe = Self::new(opcode::RESERVATION_REPORT, cid, nsid);
        sqe.sgl = SglDescriptor::transport(len);
        sqe.cdw10 = len / 4 - 1;
        sqe.cdw11 = eds as u32;
        sqe
    }

    /// Reservation Acquire; keys travel in a 16-byte data-out payload.
    pub fn reservation_acquire(cid: u16, nsid: u32, racqa: u8, rtype: u8) -> Self {
        let mut sqe = Self::new(opcode::RESERVATION_ACQUIRE, cid, nsid);
        sqe.sgl = SglDescriptor::in_capsule(16);
        sqe.cdw10 = (racqa & 0x7) as u32 | (rtype as u32) << 8;
        sqe
    }

    /// Reservation Release; the key travels in an 8-byte data-out payload.
    pub fn reservation_release(cid: u16, nsid: u32, rrela: u8, rtype: u8) -> Self {
        let mut sqe = Self::new(opcode::RESERVATION_RELEASE, cid, nsid);
        sqe.sgl = SglDescriptor::in_capsule(8);
        sqe.cdw10 = (rrela & 0x7) as u32 | (rtype as u32) << 8;
        sqe
    }
}

/// Builds the 1024-byte Fabric Connect data structure.
///
/// Host identifier at offset 0, controller id 0xFFFF (dynamic) at 16,
/// subsystem NQN at 256, host NQN at 512; NQNs NUL-padded to 256 bytes.
pub fn connect_data(
    host_id: &[u8; 16],
    host_nqn: &str,
    subsys_nqn: &str,
) -> Result<Vec<u8>, ProtocolError> {
    if host_nqn.len() > NQN_MAX_LEN {
        return Err(ProtocolError::NqnTooLong(host_nqn.len()));
    }
    if subsys_nqn.len() > NQN_MAX_LEN {
        return Err(ProtocolError::NqnTooLong(subsys_nqn.len()));
    }
    let mut data = vec![0u8; CONNECT_DATA_SIZE];
    data[..16].copy_from_slice(host_id);
    data[16..18].copy_from_slice(&0xFFFFu16.to_le_bytes());
    data[256..256 + subsys_nqn.len()].copy_from_slice(subsys_nqn.as_bytes());
    data[512..512 + host_nqn.len()].copy_from_slice(host_nqn.as_bytes());
    Ok(data)
}

/// 16-byte payload for Reservation Register: current key then new key.
pub fn reservation_register_data(crkey: u64, nrkey: u64) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&crkey.to_le_bytes());
    out[8..].copy_from_slice(&nrkey.to_le_bytes());
    out
}

/// 16-byte payload for Reservation Acquire: current key then preempt key.
pub fn reservation_acquire_data(crkey: u64, prkey: u64) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&crkey.to_le_bytes());
    out[8..].copy_from_slice(&prkey.to_le_bytes());
    out
}
