//! Cryptographic primitives for draftsync
//!
//! - **Identity**: Ed25519 keypairs (`SecretKey`/`PublicKey`). Each log is
//!   named by its author's public key and every envelope carries a
//!   detached `Signature` over the entry's canonical bytes.
//! - **Content addressing**: BLAKE3 `Digest`s over canonical bytes.
//! - **Project secrets**: 256-bit shared `Secret`s. The replication key
//!   hashes to the public `DiscoveryKey` and keys the handshake proof.
//!
//! The primitives themselves come from `ed25519-dalek` and `blake3`; this
//! module only gives them project-specific names and encodings.

mod digest;
mod keys;
mod secret;

pub use digest::{Digest, DiscoveryKey, ParseHashError, BLAKE3_HASH_SIZE};
pub use keys::{
    KeyError, PublicKey, SecretKey, Signature, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};
pub use secret::{Secret, SecretError, SECRET_SIZE};

/// Fill a fixed-size buffer from the OS RNG.
///
/// Panics if the platform RNG is unavailable.
pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buff = [0u8; N];
    getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
    buff
}

/// Serde adapter for fixed-size byte arrays.
///
/// Binary formats (bincode on the wire, DAG-CBOR for signing) get a
/// byte string; human-readable formats get lowercase hex.
pub(crate) mod fixed_bytes {
    use std::fmt;

    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FixedVisitor<const N: usize>;

        impl<'de, const N: usize> Visitor<'de> for FixedVisitor<N> {
            type Value = [u8; N];

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} bytes or {} hex characters", N, N * 2)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                let mut out = [0u8; N];
                hex::decode_to_slice(v, &mut out).map_err(E::custom)?;
                Ok(out)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                <[u8; N]>::try_from(v).map_err(|_| E::invalid_length(v.len(), &self))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut out = [0u8; N];
                for (i, byte) in out.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }
                Ok(out)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(FixedVisitor::<N>)
        } else {
            deserializer.deserialize_bytes(FixedVisitor::<N>)
        }
    }
}
