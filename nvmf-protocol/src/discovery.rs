//! Discovery log page decoder (LID 70h).

use crate::error::{ensure_len, ProtocolError};
use crate::fields::{ascii_field, u16_at, u64_at};

/// Size of one discovery log entry.
pub const DISCOVERY_ENTRY_SIZE: usize = 1024;

/// Size of the discovery log header; entries start at offset 1024.
pub const DISCOVERY_HEADER_SIZE: usize = 16;

/// Transport types (TRTYPE).
pub mod trtype {
    pub const RDMA: u8 = 1;
    pub const FIBRE_CHANNEL: u8 = 2;
    pub const TCP: u8 = 3;
    pub const LOOP: u8 = 254;
}

/// Address families (ADRFAM).
pub mod adrfam {
    pub const IPV4: u8 = 1;
    pub const IPV6: u8 = 2;
}

/// Subsystem types (SUBTYPE).
pub mod subtype {
    pub const DISCOVERY_REFERRAL: u8 = 1;
    pub const NVME: u8 = 2;
    pub const CURRENT_DISCOVERY: u8 = 3;
}

/// One discovery log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEntry {
    pub trtype: u8,
    pub adrfam: u8,
    pub subtype: u8,
    /// Transport requirements (TREQ).
    pub treq: u8,
    pub port_id: u16,
    pub controller_id: u16,
    /// Admin max SQ size advertised by the port.
    pub asqsz: u16,
    /// Transport service id; the TCP port number in decimal.
    pub trsvcid: String,
    pub subnqn: String,
    /// Transport address; an IP address for TCP.
    pub traddr: String,
    /// Transport-specific address subtype, right-trimmed.
    pub tsas: String,
}

impl DiscoveryEntry {
    fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(data, DISCOVERY_ENTRY_SIZE, "discovery log entry")?;
        Ok(Self {
            trtype: data[0],
            adrfam: data[1],
            subtype: data[2],
            treq: data[3],
            port_id: u16_at(data, 4),
            controller_id: u16_at(data, 6),
            asqsz: u16_at(data, 8),
            trsvcid: ascii_field(data, 32, 32),
            subnqn: ascii_field(data, 256, 256),
            traddr: ascii_field(data, 512, 256),
            tsas: ascii_field(data, 768, 256),
        })
    }

    /// Whether this entry describes an I/O-capable NVMe subsystem.
    pub fn is_nvme_subsystem(&self) -> bool {
        self.subtype == subtype::NVME
    }
}

/// Parsed discovery log page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryLogPage {
    /// Generation counter; changes whenever the log content changes.
    pub generation: u64,
    /// Number of records the controller holds (may exceed `entries.len()`
    /// when the fetch was smaller than the full log).
    pub num_records: u64,
    pub record_format: u16,
    pub entries: Vec<DiscoveryEntry>,
}

impl DiscoveryLogPage {
    /// Parses a discovery log fetch. Decodes the complete entries covered
    /// by both `numrec` and the buffer; `num_records` preserves the
    /// controller's count so callers can detect a short fetch.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(data, DISCOVERY_HEADER_SIZE, "discovery log header")?;
        let generation = u64_at(data, 0);
        let num_records = u64_at(data, 8);
        // RECFMT sits just past the minimal 16-byte header fetch.
        let record_format = if data.len() >= 18 { u16_at(data, 16) } else { 0 };

        let available = data.len().saturating_sub(DISCOVERY_ENTRY_SIZE) / DISCOVERY_ENTRY_SIZE;
        let count = num_records.min(available as u64) as usize;
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let offset = DISCOVERY_ENTRY_SIZE + i * DISCOVERY_ENTRY_SIZE;
            entries.push(DiscoveryEntry::parse(&data[offset..offset + DISCOVERY_ENTRY_SIZE])?);
        }

        Ok(Self {
            generation,
            num_records,
            record_format,
            entries,
        })
    }
}

#[cfg(test)]
pub(crate) fn build_entry(
    subnqn: &str,
    traddr: &str,
    trsvcid: &str,
    subtype_value: u8,
    port_id: u16,
) -> Vec<u8> {
    let mut entry = vec![0u8; DISCOVERY_ENTRY_SIZE];
    entry[0] = trtype::TCP;
    entry[1] = adrfam::IPV4;
    entry[2] = subtype_value;
    entry[4..6].copy_from_slice(&port_id.to_le_bytes());
    entry[6..8].copy_from_slice(&0xFFFFu16.to_le_bytes());
    entry[8..10].copy_from_slice(&32u16.to_le_bytes());
    entry[32..32 + trsvcid.len()].copy_from_slice(trsvcid.as_bytes());
    entry[256..256 + subnqn.len()].copy_from_slice(subnqn.as_bytes());
    entry[512..512 + traddr.len()].copy_from_slice(traddr.as_bytes());
    entry
}

#[cfg(test)]
pub(crate) fn build_log(generation: u64, entries: &[Vec<u8>]) -> Vec<u8> {
    let mut data = vec![0u8; DISCOVERY_ENTRY_SIZE];
    data[0..8].copy_from_slice(&generation.to_le_bytes());
    data[8..16].copy_from_slice(&(entries.len() as u64).to_le_bytes());
    for entry in entries {
        data.extend_from_slice(entry);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_entries() {
        let log = build_log(
            3,
            &[
                build_entry("nqn.2024-01.com.example:s1", "10.0.0.1", "4420", subtype::NVME, 1),
                build_entry(
                    "nqn.2014-08.org.nvmexpress.discovery",
                    "10.0.0.1",
                    "8009",
                    subtype::CURRENT_DISCOVERY,
                    2,
                ),
            ],
        );
        let parsed = DiscoveryLogPage::parse(&log).unwrap();
        assert_eq!(parsed.generation, 3);
        assert_eq!(parsed.num_records, 2);
        assert_eq!(parsed.entries.len(), 2);

        let first = &parsed.entries[0];
        assert_eq!(first.subnqn, "nqn.2024-01.com.example:s1");
        assert_eq!(first.traddr, "10.0.0.1");
        assert_eq!(first.trsvcid.parse::<u16>().unwrap(), 4420);
        assert!(first.is_nvme_subsystem());
        assert!(!parsed.entries[1].is_nvme_subsystem());
    }

    #[test]
    fn test_short_fetch_keeps_num_records() {
        // Header claims 4 records but the buffer holds only one
        let mut log = build_log(1, &[build_entry("nqn.x", "1.1.1.1", "4420", subtype::NVME, 1)]);
        log[8..16].copy_from_slice(&4u64.to_le_bytes());
        let parsed = DiscoveryLogPage::parse(&log).unwrap();
        assert_eq!(parsed.num_records, 4);
        assert_eq!(parsed.entries.len(), 1);
    }

    #[test]
    fn test_header_only_fetch() {
        let mut header = vec![0u8; 16];
        header[0..8].copy_from_slice(&7u64.to_le_bytes());
        header[8..16].copy_from_slice(&2u64.to_le_bytes());
        let parsed = DiscoveryLogPage::parse(&header).unwrap();
        assert_eq!(parsed.generation, 7);
        assert_eq!(parsed.num_records, 2);
        assert!(parsed.entries.is_empty());
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(DiscoveryLogPage::parse(&[0u8; 8]).is_err());
    }
}
