use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Size of BLAKE3 hash in bytes (256 bits)
pub const BLAKE3_HASH_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
#[error("invalid {kind} hex: {reason}")]
pub struct ParseHashError {
    kind: &'static str,
    reason: String,
}

fn parse_hash_hex(kind: &'static str, s: &str) -> Result<[u8; BLAKE3_HASH_SIZE], ParseHashError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let mut buff = [0u8; BLAKE3_HASH_SIZE];
    hex::decode_to_slice(s, &mut buff).map_err(|e| ParseHashError {
        kind,
        reason: e.to_string(),
    })?;
    Ok(buff)
}

/// Content address of an entry: BLAKE3 over its canonical bytes.
///
/// Other entries point at drafts and notes by digest (a draft's
/// `parents`, a note's `draft` and `parent`, a mark's `draft`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(#[serde(with = "super::fixed_bytes")] [u8; BLAKE3_HASH_SIZE]);

impl Digest {
    pub fn of(bytes: &[u8]) -> Self {
        Digest(*blake3::hash(bytes).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; BLAKE3_HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for log lines and terse listings.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<[u8; BLAKE3_HASH_SIZE]> for Digest {
    fn from(bytes: [u8; BLAKE3_HASH_SIZE]) -> Self {
        Digest(bytes)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = ParseHashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hash_hex("digest", s).map(Digest)
    }
}

/// Public, non-secret project handle: the hash of the replication key.
///
/// Used to rendezvous with peers and as the key of every per-project
/// table, without revealing the shared secret itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiscoveryKey(#[serde(with = "super::fixed_bytes")] [u8; BLAKE3_HASH_SIZE]);

impl DiscoveryKey {
    pub fn as_bytes(&self) -> &[u8; BLAKE3_HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<[u8; BLAKE3_HASH_SIZE]> for DiscoveryKey {
    fn from(bytes: [u8; BLAKE3_HASH_SIZE]) -> Self {
        DiscoveryKey(bytes)
    }
}

impl fmt::Debug for DiscoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiscoveryKey({})", self.short())
    }
}

impl fmt::Display for DiscoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for DiscoveryKey {
    type Err = ParseHashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hash_hex("discovery key", s).map(DiscoveryKey)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_digest_hex_round_trip() {
        let digest = Digest::of(b"some canonical bytes");
        let parsed: Digest = digest.to_hex().parse().unwrap();
        assert_eq!(parsed, digest);
        assert_eq!(digest.short().len(), 8);
    }

    #[test]
    fn test_digest_parse_rejects_short_input() {
        assert!("abcd".parse::<Digest>().is_err());
        assert!("zz".repeat(32).parse::<DiscoveryKey>().is_err());
    }
}
