/**
 * Cryptographic types and operations.
 *  - Ed25519 identities and signatures
 *  - Project secrets and the discovery keys derived from them
 *  - BLAKE3 content digests
 */
pub mod crypto;
/**
 * The entry schema: drafts, intros, marks and notes,
 *  with validation and canonical encoding.
 */
pub mod entry;
/**
 * Signed, positioned wrappers around entries.
 *  Sealing signs an entry into a log, opening
 *  checks the signature and schema again.
 */
pub mod envelope;
/**
 * Per-project storage for envelopes, keyed by
 *  (log, index), with the secondary indices the
 *  projections need.
 */
pub mod log_store;
/**
 * Replication sessions and the swarm that
 *  owns them.
 */
pub mod peer;
/**
 * Projects, invitations and the identities a
 *  device writes with.
 */
pub mod project;
/**
 * Read-side views computed from stored envelopes:
 *  the draft graph, current marks and note threads.
 */
pub mod projection;
/**
 * In-process multi-peer harness for tests.
 */
pub mod testkit;

pub mod prelude {
    pub use crate::crypto::{Digest, DiscoveryKey, PublicKey, Secret, SecretKey};
    pub use crate::entry::{Entry, EntryKind, MarkId, Timestamp};
    pub use crate::envelope::{open, seal, Envelope, EnvelopeError, LogPosition};
    pub use crate::log_store::{LogStore, LogStoreError, MemoryLogStore};
    pub use crate::peer::{PeerEvent, PeerId, Swarm};
    pub use crate::project::{Invitation, MemoryProjectRegistry, Project, ProjectRegistry};
}
