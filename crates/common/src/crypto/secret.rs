use std::fmt;

use serde::{Deserialize, Serialize};

use super::digest::DiscoveryKey;

/// Size of a project secret in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;

/// Errors that can occur while handling shared secrets
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
}

/// A 256-bit symmetric secret shared by every device in a project.
///
/// Projects carry two of these: the replication key, whose possession
/// is proven during the handshake and whose hash is the project's
/// [`DiscoveryKey`], and the encryption key handed to the transport for
/// payload confidentiality.
///
/// `Debug` never prints the key material.
#[derive(PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Secret(#[serde(with = "super::fixed_bytes")] [u8; SECRET_SIZE]);

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl Secret {
    /// Generate a new random secret using a cryptographically secure RNG
    pub fn generate() -> Self {
        Self(super::random_bytes::<SECRET_SIZE>())
    }

    /// Create a secret from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != SECRET_SIZE {
            return Err(anyhow::anyhow!(
                "invalid secret size, expected {}, got {}",
                SECRET_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0; SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    pub fn bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.0
    }

    /// Public rendezvous handle for the project this secret replicates.
    pub fn discovery_key(&self) -> DiscoveryKey {
        DiscoveryKey::from(*blake3::hash(&self.0).as_bytes())
    }

    /// Keyed BLAKE3 MAC over `data`, used to prove possession of the
    /// secret without revealing it.
    pub fn keyed_hash(&self, data: &[u8]) -> [u8; 32] {
        *blake3::keyed_hash(&self.0, data).as_bytes()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_discovery_key_is_stable_hash() {
        let secret = Secret::generate();
        assert_eq!(secret.discovery_key(), secret.discovery_key());
        assert_ne!(secret.discovery_key(), Secret::generate().discovery_key());
        assert_ne!(secret.discovery_key().as_bytes(), secret.bytes());
    }

    #[test]
    fn test_keyed_hash_depends_on_key() {
        let a = Secret::generate();
        let b = Secret::generate();
        assert_eq!(a.keyed_hash(b"msg"), a.keyed_hash(b"msg"));
        assert_ne!(a.keyed_hash(b"msg"), b.keyed_hash(b"msg"));
    }

    #[test]
    fn test_from_slice_rejects_bad_length() {
        assert!(Secret::from_slice(&[0u8; 31]).is_err());
        assert!(Secret::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = Secret::from([7u8; SECRET_SIZE]);
        assert_eq!(format!("{:?}", secret), "Secret(..)");
    }
}
