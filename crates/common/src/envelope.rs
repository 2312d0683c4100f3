//! Envelope codec: the signed, indexed wrapper around an [`Entry`].
//!
//! `seal` validates and signs an entry for a position in its author's
//! log; `open` re-checks both on the receiving side. Input from the
//! network only ever goes through `open`, and every failure is a value
//! the caller can drop.

use serde::{Deserialize, Serialize};

use crate::crypto::{Digest, PublicKey, SecretKey, Signature};
use crate::entry::{EncodeError, Entry, SchemaError};

/// A `(log, index)` pair naming one slot in one author's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPosition {
    pub log: PublicKey,
    pub index: u64,
}

impl LogPosition {
    pub fn new(log: PublicKey, index: u64) -> Self {
        Self { log, index }
    }
}

impl std::fmt::Display for LogPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", &self.log.to_hex()[..8], self.index)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("schema invalid: {0}")]
    SchemaInvalid(#[from] SchemaError),
    #[error("signature invalid for log {0}")]
    SignatureInvalid(PublicKey),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// An entry plus the author key, log index and signature that place it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub log_public_key: PublicKey,
    pub index: u64,
    pub entry: Entry,
    pub signature: Signature,
}

impl Envelope {
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.log_public_key, self.index)
    }

    /// Content address of the wrapped entry.
    pub fn digest(&self) -> Result<Digest, EncodeError> {
        self.entry.digest()
    }
}

/// Validate `entry`, sign its canonical bytes with `identity` and place it
/// at `index` in that identity's log.
pub fn seal(entry: Entry, identity: &SecretKey, index: u64) -> Result<Envelope, EnvelopeError> {
    entry.validate()?;
    let bytes = entry.canonical_bytes()?;
    let signature = identity.sign(&bytes);
    Ok(Envelope {
        log_public_key: identity.public(),
        index,
        entry,
        signature,
    })
}

/// Check an envelope's schema, then its signature. Returns the entry on
/// success.
pub fn open(envelope: &Envelope) -> Result<&Entry, EnvelopeError> {
    envelope.entry.validate()?;
    let bytes = envelope.entry.canonical_bytes()?;
    envelope
        .log_public_key
        .verify(&bytes, &envelope.signature)
        .map_err(|_| EnvelopeError::SignatureInvalid(envelope.log_public_key))?;
    Ok(&envelope.entry)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::Secret;
    use crate::entry::{Draft, Timestamp};

    fn project() -> crate::crypto::DiscoveryKey {
        Secret::generate().discovery_key()
    }

    #[test]
    fn test_seal_then_open_returns_entry() {
        let identity = SecretKey::generate();
        let entry = Entry::draft(project(), vec![], "first words");
        let envelope = seal(entry.clone(), &identity, 0).unwrap();

        assert_eq!(envelope.log_public_key, identity.public());
        assert_eq!(envelope.index, 0);
        assert_eq!(open(&envelope).unwrap(), &entry);
        assert_eq!(envelope.digest().unwrap(), entry.digest().unwrap());
    }

    #[test]
    fn test_open_survives_bincode_transit() {
        let identity = SecretKey::generate();
        let entry = Entry::note(project(), Digest::of(b"d"), None, None, "nice");
        let envelope = seal(entry, &identity, 3).unwrap();

        let wire = bincode::serialize(&envelope).unwrap();
        let received: Envelope = bincode::deserialize(&wire).unwrap();
        assert!(open(&received).is_ok());
        assert_eq!(received.position(), LogPosition::new(identity.public(), 3));
    }

    #[test]
    fn test_tampered_text_fails_signature() {
        let identity = SecretKey::generate();
        let mut envelope = seal(Entry::draft(project(), vec![], "original"), &identity, 0).unwrap();
        if let Entry::Draft(draft) = &mut envelope.entry {
            draft.text = "forged".into();
        }
        assert!(matches!(
            open(&envelope),
            Err(EnvelopeError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_wrong_author_fails_signature() {
        let identity = SecretKey::generate();
        let mut envelope = seal(Entry::intro(project(), "Ada", "desk"), &identity, 0).unwrap();
        envelope.log_public_key = SecretKey::generate().public();
        assert!(matches!(
            open(&envelope),
            Err(EnvelopeError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_schema_checked_before_signature() {
        let identity = SecretKey::generate();
        let parent = Digest::of(b"p");
        let entry = Entry::Draft(Draft {
            project: project(),
            parents: vec![parent, parent],
            text: String::new(),
            timestamp: Timestamp::from_millis(1),
        });
        assert!(matches!(
            seal(entry.clone(), &identity, 0),
            Err(EnvelopeError::SchemaInvalid(_))
        ));

        // a peer can still ship it to us; open must reject without panicking
        let envelope = Envelope {
            log_public_key: identity.public(),
            index: 0,
            signature: identity.sign(&entry.canonical_bytes().unwrap()),
            entry,
        };
        assert!(matches!(
            open(&envelope),
            Err(EnvelopeError::SchemaInvalid(SchemaError::DuplicateParent(_)))
        ));
    }
}
