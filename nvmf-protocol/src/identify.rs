//! Identify Controller and Identify Namespace decoders.
//!
//! Both data structures are 4096 bytes; offsets follow the Identify
//! figures of the NVMe base spec, with the fabrics-only fields (IOCCSZ,
//! IORCSZ, ICDOFF) from the NVMe-oF addendum.

use crate::error::{ensure_len, ProtocolError};
use crate::fields::{ascii_field, u16_at, u32_at, u64_at};
use crate::IDENTIFY_DATA_SIZE;

/// Parsed Identify Controller data structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInfo {
    pub vid: u16,
    pub ssvid: u16,
    /// Serial number, right-trimmed ASCII.
    pub serial_number: String,
    /// Model number, right-trimmed ASCII.
    pub model_number: String,
    /// Firmware revision, right-trimmed ASCII.
    pub firmware_revision: String,
    pub rab: u8,
    /// IEEE OUI identifier (24 bits).
    pub ieee_oui: u32,
    pub cmic: u8,
    /// Maximum data transfer size as a power-of-two multiple of the
    /// minimum page size; 0 means unlimited.
    pub mdts: u8,
    pub controller_id: u16,
    /// Raw VER register value.
    pub version: u32,
    pub rtd3r: u32,
    pub rtd3e: u32,
    /// Optional Asynchronous Events Supported bitmap.
    pub oaes: u32,
    pub ctratt: u32,
    pub oacs: u16,
    pub acl: u8,
    /// Asynchronous Event Request Limit, 0-based.
    pub aerl: u8,
    /// Keep Alive Support granularity in 100 ms units; 0 means unsupported.
    pub kas: u16,
    pub sanicap: u32,
    pub hmpre: u32,
    pub hmmin: u32,
    pub sqes: u8,
    pub cqes: u8,
    /// Maximum outstanding commands; 0 means not reported.
    pub maxcmd: u16,
    /// Number of namespaces.
    pub nn: u32,
    /// Optional NVM command support bitmap.
    pub oncs: u16,
    /// NVM subsystem NQN, right-trimmed.
    pub subnqn: String,
    /// I/O command capsule size in 16-byte units.
    pub ioccsz: u32,
    /// I/O response capsule size in 16-byte units.
    pub iorcsz: u32,
    /// In-capsule data offset in 16-byte units.
    pub icdoff: u16,
    pub msdbd: u8,
}

impl ControllerInfo {
    /// Parses a 4096-byte Identify Controller payload.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(data, IDENTIFY_DATA_SIZE, "Identify Controller data")?;
        Ok(Self {
            vid: u16_at(data, 0),
            ssvid: u16_at(data, 2),
            serial_number: ascii_field(data, 4, 20),
            model_number: ascii_field(data, 24, 40),
            firmware_revision: ascii_field(data, 64, 8),
            rab: data[72],
            ieee_oui: u32::from(data[73]) | u32::from(data[74]) << 8 | u32::from(data[75]) << 16,
            cmic: data[76],
            mdts: data[77],
            controller_id: u16_at(data, 78),
            version: u32_at(data, 80),
            rtd3r: u32_at(data, 84),
            rtd3e: u32_at(data, 88),
            oaes: u32_at(data, 92),
            ctratt: u32_at(data, 96),
            oacs: u16_at(data, 256),
            acl: data[258],
            aerl: data[259],
            kas: u16_at(data, 320),
            sanicap: u32_at(data, 328),
            hmpre: u32_at(data, 272),
            hmmin: u32_at(data, 276),
            sqes: data[512],
            cqes: data[513],
            maxcmd: u16_at(data, 514),
            nn: u32_at(data, 516),
            oncs: u16_at(data, 520),
            subnqn: ascii_field(data, 768, 256),
            ioccsz: u32_at(data, 1792),
            iorcsz: u32_at(data, 1796),
            icdoff: u16_at(data, 1800),
            msdbd: data[1803],
        })
    }

    /// NVMe version as (major, minor, tertiary).
    pub fn version_parts(&self) -> (u16, u8, u8) {
        (
            (self.version >> 16) as u16,
            (self.version >> 8) as u8,
            self.version as u8,
        )
    }

    /// Bytes available for in-capsule data on the I/O queue, from IOCCSZ.
    pub fn in_capsule_data_limit(&self) -> usize {
        let capsule = self.ioccsz as usize * 16;
        capsule.saturating_sub(crate::SQE_SIZE)
    }
}

/// One entry of the LBA format table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LbaFormat {
    /// Metadata size per block in bytes.
    pub ms: u16,
    /// LBA data size as a power of two.
    pub lbads: u8,
    /// Relative performance, 0 (best) to 3 (degraded).
    pub rp: u8,
}

/// Parsed Identify Namespace data structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    /// Namespace size in logical blocks.
    pub nsze: u64,
    /// Namespace capacity in logical blocks.
    pub ncap: u64,
    /// Namespace utilisation in logical blocks.
    pub nuse: u64,
    pub nsfeat: u8,
    /// Number of LBA formats, 0-based.
    pub nlbaf: u8,
    pub flbas: u8,
    pub mc: u8,
    pub dpc: u8,
    pub dps: u8,
    pub nmic: u8,
    /// Reservation capabilities bitmap.
    pub rescap: u8,
    pub fpi: u8,
    pub nawun: u16,
    pub nawupf: u16,
    pub nabsn: u16,
    pub nabo: u16,
    pub nabspf: u16,
    /// ANA group this namespace belongs to.
    pub anagrpid: u32,
    /// The 16-entry LBA format table.
    pub lba_formats: [LbaFormat; 16],
    /// Block size in bytes of the currently formatted LBA format.
    pub block_size: u32,
}

impl NamespaceInfo {
    /// Parses a 4096-byte Identify Namespace payload.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(data, IDENTIFY_DATA_SIZE, "Identify Namespace data")?;

        let mut lba_formats = [LbaFormat::default(); 16];
        for (i, fmt) in lba_formats.iter_mut().enumerate() {
            let raw = u32_at(data, 128 + i * 4);
            *fmt = LbaFormat {
                ms: raw as u16,
                lbads: (raw >> 16) as u8,
                rp: ((raw >> 24) & 0x3) as u8,
            };
        }

        let flbas = data[26];
        let current = lba_formats[(flbas & 0x0F) as usize];
        if current.lbads > 31 {
            return Err(ProtocolError::InvalidField {
                field: "lbads",
                value: current.lbads as u64,
            });
        }
        let block_size = 1u32 << current.lbads;

        Ok(Self {
            nsze: u64_at(data, 0),
            ncap: u64_at(data, 8),
            nuse: u64_at(data, 16),
            nsfeat: data[24],
            nlbaf: data[25],
            flbas,
            mc: data[27],
            dpc: data[28],
            dps: data[29],
            nmic: data[30],
            rescap: data[31],
            fpi: data[32],
            nawun: u16_at(data, 34),
            nawupf: u16_at(data, 36),
            nabsn: u16_at(data, 40),
            nabo: u16_at(data, 42),
            nabspf: u16_at(data, 44),
            anagrpid: u32_at(data, 92),
            lba_formats,
            block_size,
        })
    }

    /// Whether the namespace supports reservations at all.
    pub fn supports_reservations(&self) -> bool {
        self.rescap != 0
    }
}

/// Parses a CNS 02h active namespace list: ascending NSIDs, 0-terminated.
pub fn parse_namespace_list(data: &[u8]) -> Result<Vec<u32>, ProtocolError> {
    if data.len() % 4 != 0 {
        return Err(ProtocolError::truncated(
            "namespace list",
            data.len() + (4 - data.len() % 4),
            data.len(),
        ));
    }
    let mut nsids = Vec::new();
    for chunk in data.chunks_exact(4) {
        let nsid = u32::from_le_bytes(chunk.try_into().unwrap());
        if nsid == 0 {
            break;
        }
        nsids.push(nsid);
    }
    Ok(nsids)
}

/// Parses a Changed Namespace List log page (LID 04h): up to 1024 NSIDs,
/// 0-terminated. A first entry of 0xFFFFFFFF means more than 1024
/// namespaces changed; the list is returned as-is with that marker.
pub fn parse_changed_namespace_list(data: &[u8]) -> Result<Vec<u32>, ProtocolError> {
    ensure_len(data, 4, "changed namespace list")?;
    let mut nsids = Vec::new();
    for chunk in data.chunks_exact(4).take(1024) {
        let nsid = u32::from_le_bytes(chunk.try_into().unwrap());
        if nsid == 0 {
            break;
        }
        nsids.push(nsid);
        if nsid == u32::MAX {
            break;
        }
    }
    Ok(nsids)
}
