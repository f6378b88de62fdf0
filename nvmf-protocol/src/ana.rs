//! Asymmetric Namespace Access log page decoder (LID 0Ch).

use crate::error::{ensure_len, ProtocolError};
use crate::fields::{u32_at, u64_at};

/// ANA group states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnaState {
    Optimized,
    NonOptimized,
    Inaccessible,
    PersistentLoss,
    /// Transitioning between states; also used for values this crate does
    /// not recognise.
    Change,
}

impl AnaState {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x0F {
            0x01 => AnaState::Optimized,
            0x02 => AnaState::NonOptimized,
            0x03 => AnaState::Inaccessible,
            0x04 => AnaState::PersistentLoss,
            _ => AnaState::Change,
        }
    }

    /// Whether I/O can be issued through this path.
    pub fn is_accessible(&self) -> bool {
        matches!(self, AnaState::Optimized | AnaState::NonOptimized)
    }
}

/// One ANA group descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnaGroup {
    pub group_id: u32,
    pub change_count: u64,
    pub state: AnaState,
    /// NSIDs belonging to this group, in the controller's order.
    pub namespace_ids: Vec<u32>,
}

/// Parsed ANA log page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnaLogPage {
    pub change_count: u64,
    pub groups: Vec<AnaGroup>,
}

impl AnaLogPage {
    /// Parses an ANA log page: a 16-byte header followed by variable-length
    /// group descriptors (32-byte fixed part plus 4 bytes per NSID).
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(data, 16, "ANA log page header")?;
        let change_count = u64_at(data, 0);
        let ngrps = crate::fields::u16_at(data, 8) as usize;

        let mut groups = Vec::with_capacity(ngrps);
        let mut offset = 16;
        for _ in 0..ngrps {
            ensure_len(data, offset + 32, "ANA group descriptor")?;
            let group_id = u32_at(data, offset);
            let nnsids = u32_at(data, offset + 4) as usize;
            let group_change_count = u64_at(data, offset + 8);
            let state = AnaState::from_u8(data[offset + 16]);

            let list_end = offset + 32 + nnsids * 4;
            ensure_len(data, list_end, "ANA group namespace list")?;
            let namespace_ids = data[offset + 32..list_end]
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                .collect();

            groups.push(AnaGroup {
                group_id,
                change_count: group_change_count,
                state,
                namespace_ids,
            });
            offset = list_end;
        }

        Ok(Self {
            change_count,
            groups,
        })
    }

    /// The ANA state of `nsid`, if any group lists it.
    pub fn namespace_state(&self, nsid: u32) -> Option<AnaState> {
        self.groups
            .iter()
            .find(|g| g.namespace_ids.contains(&nsid))
            .map(|g| g.state)
    }

    /// Groups currently usable for I/O.
    pub fn accessible_groups(&self) -> impl Iterator<Item = &AnaGroup> {
        self.groups.iter().filter(|g| g.state.is_accessible())
    }
}

#[cfg(test)]
pub(crate) fn build_log(change_count: u64, groups: &[(u32, u8, &[u32])]) -> Vec<u8> {
    let mut data = vec![0u8; 16];
    data[0..8].copy_from_slice(&change_count.to_le_bytes());
    data[8..10].copy_from_slice(&(groups.len() as u16).to_le_bytes());
    for (group_id, state, nsids) in groups {
        let mut desc = vec![0u8; 32];
        desc[0..4].copy_from_slice(&group_id.to_le_bytes());
        desc[4..8].copy_from_slice(&(nsids.len() as u32).to_le_bytes());
        desc[8..16].copy_from_slice(&change_count.to_le_bytes());
        desc[16] = *state;
        data.extend_from_slice(&desc);
        for nsid in *nsids {
            data.extend_from_slice(&nsid.to_le_bytes());
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_groups() {
        let data = build_log(5, &[(1, 0x01, &[1, 2]), (2, 0x03, &[3])]);
        let log = AnaLogPage::parse(&data).unwrap();
        assert_eq!(log.change_count, 5);
        assert_eq!(log.groups.len(), 2);
        assert_eq!(log.groups[0].state, AnaState::Optimized);
        assert_eq!(log.groups[0].namespace_ids, vec![1, 2]);
        assert_eq!(log.groups[1].state, AnaState::Inaccessible);
        assert_eq!(log.namespace_state(3), Some(AnaState::Inaccessible));
        assert_eq!(log.namespace_state(9), None);
        assert_eq!(log.accessible_groups().count(), 1);
    }

    #[test]
    fn test_unknown_state_maps_to_change() {
        let data = build_log(1, &[(1, 0x0E, &[])]);
        let log = AnaLogPage::parse(&data).unwrap();
        assert_eq!(log.groups[0].state, AnaState::Change);
    }

    #[test]
    fn test_truncated_descriptor_rejected() {
        let mut data = build_log(1, &[(1, 0x01, &[1, 2, 3])]);
        data.truncate(data.len() - 4);
        assert!(matches!(
            AnaLogPage::parse(&data),
            Err(ProtocolError::TruncatedPayload { .. })
        ));
    }

    #[test]
    fn test_declared_count_beyond_buffer_rejected() {
        let mut data = build_log(1, &[(1, 0x01, &[1])]);
        // Claim a second group that is not present
        data[8] = 2;
        assert!(AnaLogPage::parse(&data).is_err());
    }
}
