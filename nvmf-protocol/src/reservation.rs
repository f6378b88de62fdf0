//! Reservation Report decoder and reservation command enums.

use crate::error::{ensure_len, ProtocolError};
use crate::fields::{u16_at, u32_at, u64_at};

/// Reservation types (RTYPE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReservationType {
    WriteExclusive = 1,
    ExclusiveAccess = 2,
    WriteExclusiveRegistrantsOnly = 3,
    ExclusiveAccessRegistrantsOnly = 4,
    WriteExclusiveAllRegistrants = 5,
    ExclusiveAccessAllRegistrants = 6,
}

impl ReservationType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::WriteExclusive),
            2 => Some(Self::ExclusiveAccess),
            3 => Some(Self::WriteExclusiveRegistrantsOnly),
            4 => Some(Self::ExclusiveAccessRegistrantsOnly),
            5 => Some(Self::WriteExclusiveAllRegistrants),
            6 => Some(Self::ExclusiveAccessAllRegistrants),
            _ => None,
        }
    }
}

/// Reservation Register actions (RREGA).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegisterAction {
    Register = 0,
    Unregister = 1,
    Replace = 2,
}

/// Reservation Acquire actions (RACQA).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AcquireAction {
    Acquire = 0,
    Preempt = 1,
    PreemptAndAbort = 2,
}

/// Reservation Release actions (RRELA).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReleaseAction {
    Release = 0,
    Clear = 1,
}

/// One registered controller in a reservation report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registrant {
    pub controller_id: u16,
    /// RCSTS bit 0: this registrant holds the reservation.
    pub holds_reservation: bool,
    pub reservation_key: u64,
    /// 64-bit host id zero-extended in the standard format; full 128 bits
    /// in the extended format.
    pub host_id: u128,
}

/// Parsed Reservation Report data structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationReport {
    /// Generation counter, bumped on register/unregister/preempt/clear.
    pub generation: u32,
    /// Current reservation type; `None` when nothing is reserved.
    pub rtype: Option<ReservationType>,
    /// Persist Through Power Loss state.
    pub ptpls: bool,
    pub registrants: Vec<Registrant>,
}

impl ReservationReport {
    /// Parses a Reservation Report payload. `extended` selects the EDS=1
    /// layout (64-byte registrants with 128-bit host ids) over the
    /// standard one (24-byte registrants with 64-bit host ids).
    pub fn parse(data: &[u8], extended: bool) -> Result<Self, ProtocolError> {
        ensure_len(data, 24, "reservation status header")?;
        let generation = u32_at(data, 0);
        let rtype = ReservationType::from_u8(data[4]);
        let regctl = u16_at(data, 5) as usize;
        let ptpls = data[9] & 0x1 != 0;

        let (base, entry_size) = if extended { (64, 64) } else { (24, 24) };
        ensure_len(data, base + regctl * entry_size, "registrant descriptors")?;

        let mut registrants = Vec::with_capacity(regctl);
        for i in 0..regctl {
            let entry = &data[base + i * entry_size..base + (i + 1) * entry_size];
            let controller_id = u16_at(entry, 0);
            let holds_reservation = entry[2] & 0x1 != 0;
            let (reservation_key, host_id) = if extended {
                let key = u64_at(entry, 8);
                let lo = u64_at(entry, 16) as u128;
                let hi = u64_at(entry, 24) as u128;
                (key, hi << 64 | lo)
            } else {
                (u64_at(entry, 16), u64_at(entry, 8) as u128)
            };
            registrants.push(Registrant {
                controller_id,
                holds_reservation,
                reservation_key,
                host_id,
            });
        }

        Ok(Self {
            generation,
            rtype,
            ptpls,
            registrants,
        })
    }

    /// The registrant currently holding the reservation, if any.
    pub fn holder(&self) -> Option<&Registrant> {
        self.registrants.iter().find(|r| r.holds_reservation)
    }
}

#[cfg(test)]
pub(crate) fn build_report(
    generation: u32,
    rtype: u8,
    extended: bool,
    registrants: &[(u16, bool, u64, u128)],
) -> Vec<u8> {
    let (base, entry_size) = if extended { (64, 64) } else { (24, 24) };
    let mut data = vec![0u8; base + registrants.len() * entry_size];
    data[0..4].copy_from_slice(&generation.to_le_bytes());
    data[4] = rtype;
    data[5..7].copy_from_slice(&(registrants.len() as u16).to_le_bytes());
    for (i, (cntlid, holder, rkey, hostid)) in registrants.iter().enumerate() {
        let entry = &mut data[base + i * entry_size..base + (i + 1) * entry_size];
        entry[0..2].copy_from_slice(&cntlid.to_le_bytes());
        entry[2] = *holder as u8;
        if extended {
            entry[8..16].copy_from_slice(&rkey.to_le_bytes());
            entry[16..32].copy_from_slice(&hostid.to_le_bytes());
        } else {
            entry[8..16].copy_from_slice(&(*hostid as u64).to_le_bytes());
            entry[16..24].copy_from_slice(&rkey.to_le_bytes());
        }
    }
    data
}
