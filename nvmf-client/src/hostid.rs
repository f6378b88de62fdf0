//! Host identity helpers.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generates a host NQN in the uuid form recommended by the NVMe spec.
pub fn generate_host_nqn() -> String {
    format!("nqn.2014-08.org.nvmexpress:uuid:{}", Uuid::new_v4())
}

/// Derives the 128-bit host identifier from a host NQN: the first 16
/// bytes of its SHA-256. Deterministic, so the same NQN always presents
/// the same identity to controllers.
pub fn derive_host_id(host_nqn: &str) -> [u8; 16] {
    let digest = Sha256::digest(host_nqn.as_bytes());
    let mut id = [0u8; 16];
    id.copy_from_slice(&digest[..16]);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_nqn_shape() {
        let nqn = generate_host_nqn();
        assert!(nqn.starts_with("nqn.2014-08.org.nvmexpress:uuid:"));
        assert!(nqn.len() <= nvmf_protocol::NQN_MAX_LEN);
        assert_ne!(nqn, generate_host_nqn());
    }

    #[test]
    fn test_host_id_deterministic() {
        let a = derive_host_id("nqn.2014-08.org.nvmexpress:uuid:test");
        let b = derive_host_id("nqn.2014-08.org.nvmexpress:uuid:test");
        assert_eq!(a, b);
        assert_ne!(a, derive_host_id("nqn.2014-08.org.nvmexpress:uuid:other"));
        assert_ne!(a, [0u8; 16]);
    }
}
