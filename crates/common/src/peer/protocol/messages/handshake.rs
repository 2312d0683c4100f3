use serde::{Deserialize, Serialize};

use crate::crypto::{DiscoveryKey, Secret};

/// Bump when the message set or its encoding changes
pub const PROTOCOL_VERSION: u16 = 1;
pub const NONCE_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("protocol version mismatch: ours {ours}, theirs {theirs}")]
    Version { ours: u16, theirs: u16 },
    #[error("peer is replicating a different project: {0}")]
    WrongProject(DiscoveryKey),
    #[error("peer does not hold the replication key")]
    BadProof,
    #[error("expected a handshake, got {0}")]
    Unexpected(&'static str),
}

/// First message on every connection, sent by both sides.
///
/// `proof` is a BLAKE3 MAC keyed with the replication key over
/// `discovery_key || nonce`, so each side shows it holds the shared
/// secret without sending it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub version: u16,
    pub discovery_key: DiscoveryKey,
    #[serde(with = "crate::crypto::fixed_bytes")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(with = "crate::crypto::fixed_bytes")]
    pub proof: [u8; 32],
}

fn proof(replication_key: &Secret, discovery_key: &DiscoveryKey, nonce: &[u8; NONCE_SIZE]) -> [u8; 32] {
    let mut data = Vec::with_capacity(32 + NONCE_SIZE);
    data.extend_from_slice(discovery_key.as_bytes());
    data.extend_from_slice(nonce);
    replication_key.keyed_hash(&data)
}

impl Handshake {
    pub fn new(replication_key: &Secret) -> Self {
        let discovery_key = replication_key.discovery_key();
        let nonce = crate::crypto::random_bytes::<NONCE_SIZE>();
        Self {
            version: PROTOCOL_VERSION,
            discovery_key,
            nonce,
            proof: proof(replication_key, &discovery_key, &nonce),
        }
    }

    /// Check a handshake received from a peer against our replication key.
    pub fn verify(&self, replication_key: &Secret) -> Result<(), HandshakeError> {
        if self.version != PROTOCOL_VERSION {
            return Err(HandshakeError::Version {
                ours: PROTOCOL_VERSION,
                theirs: self.version,
            });
        }
        if self.discovery_key != replication_key.discovery_key() {
            return Err(HandshakeError::WrongProject(self.discovery_key));
        }
        // blake3::Hash compares in constant time
        let expected = blake3::Hash::from(proof(replication_key, &self.discovery_key, &self.nonce));
        if expected != blake3::Hash::from(self.proof) {
            return Err(HandshakeError::BadProof);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_handshake_verifies_with_same_key() {
        let key = Secret::generate();
        let handshake = Handshake::new(&key);
        assert!(handshake.verify(&key).is_ok());
        assert_ne!(Handshake::new(&key).nonce, handshake.nonce);
    }

    #[test]
    fn test_handshake_rejects_other_project() {
        let handshake = Handshake::new(&Secret::generate());
        assert!(matches!(
            handshake.verify(&Secret::generate()),
            Err(HandshakeError::WrongProject(_))
        ));
    }

    #[test]
    fn test_handshake_rejects_forged_proof() {
        let key = Secret::generate();
        let mut handshake = Handshake::new(&key);
        handshake.proof[0] ^= 0xff;
        assert_eq!(handshake.verify(&key), Err(HandshakeError::BadProof));
    }

    #[test]
    fn test_handshake_rejects_other_version() {
        let key = Secret::generate();
        let mut handshake = Handshake::new(&key);
        handshake.version += 1;
        assert!(matches!(
            handshake.verify(&key),
            Err(HandshakeError::Version { .. })
        ));
    }
}
