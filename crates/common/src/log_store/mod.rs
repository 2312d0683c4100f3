//! Per-project storage of every author's append-only log.
//!
//! [`LogStore`] is the single seam between replication, projections and
//! whatever actually holds the bytes. The contract that matters:
//!
//! - `put_envelope` only accepts the next contiguous index of a log, and
//!   only after the envelope opens cleanly and names the right project.
//!   Anything else is rejected without writing.
//! - Successful appends are announced on a broadcast channel so sessions
//!   can offer them to peers and the UI can refresh.
//! - Secondary lookups (children of a draft, entries pointing at a draft,
//!   marks by identifier) back the projections.

mod memory;
mod offers;

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::broadcast;

use crate::crypto::{Digest, DiscoveryKey, PublicKey, SecretKey};
use crate::entry::{Entry, EntryKind, MarkId};
use crate::envelope::{self, Envelope, EnvelopeError, LogPosition};

pub use memory::{MemoryLogStore, MemoryLogStoreError};
pub use offers::list_offers;

/// Capacity of the append notification channel. Slow subscribers see
/// `Lagged` and are expected to resync.
pub const APPEND_CHANNEL_CAPACITY: usize = 1024;

/// Notification that a new envelope landed in a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub project: DiscoveryKey,
    pub position: LogPosition,
    pub digest: Digest,
}

#[derive(thiserror::Error, Debug)]
pub enum LogStoreError<T> {
    /// The backing store failed; nothing was written
    #[error("unhandled log store provider error: {0}")]
    Provider(#[from] T),
    /// The append does not extend the log by exactly one
    ///  (covers resends of an index we already hold)
    #[error("out of order append to {log}: got index {index}, expected {expected}")]
    OutOfOrder {
        log: PublicKey,
        index: u64,
        expected: u64,
    },
    /// The envelope failed to open
    #[error("invalid envelope: {0}")]
    Invalid(EnvelopeError),
    /// The entry names a different project than the one being written
    #[error("entry belongs to project {found}, not {expected}")]
    ProjectMismatch {
        expected: DiscoveryKey,
        found: DiscoveryKey,
    },
}

impl<T> LogStoreError<T> {
    /// Whether the error came from the peer's input rather than our
    ///  storage. These are dropped and logged, never fatal.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, LogStoreError::Provider(_))
    }
}

#[async_trait]
pub trait LogStore: Send + Sync + Debug + Clone + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Append an envelope to its author's log within `project`
    ///
    /// # Returns
    /// * `Ok(Digest)` - The digest of the stored entry
    /// * `Err(LogStoreError::OutOfOrder)` - `envelope.index` is not the log head + 1
    /// * `Err(LogStoreError::Invalid)` - The envelope fails schema or signature checks
    /// * `Err(LogStoreError::ProjectMismatch)` - The entry names another project
    ///
    /// Implementations must check the index and write atomically, so two
    ///  racing puts of the same position leave exactly one envelope.
    async fn put_envelope(
        &self,
        project: &DiscoveryKey,
        envelope: Envelope,
    ) -> Result<Digest, LogStoreError<Self::Error>>;

    async fn get_envelope(
        &self,
        project: &DiscoveryKey,
        log: &PublicKey,
        index: u64,
    ) -> Result<Option<Envelope>, LogStoreError<Self::Error>>;

    async fn get_by_digest(
        &self,
        project: &DiscoveryKey,
        digest: &Digest,
    ) -> Result<Option<Envelope>, LogStoreError<Self::Error>>;

    /// Highest index held for `log`, `None` for an empty log
    async fn log_head(
        &self,
        project: &DiscoveryKey,
        log: &PublicKey,
    ) -> Result<Option<u64>, LogStoreError<Self::Error>>;

    /// Every non-empty log in the project with its head index
    async fn list_logs(
        &self,
        project: &DiscoveryKey,
    ) -> Result<Vec<(PublicKey, u64)>, LogStoreError<Self::Error>>;

    /// Draft envelopes whose `parents` contain `parent`
    async fn children_of(
        &self,
        project: &DiscoveryKey,
        parent: &Digest,
    ) -> Result<Vec<Envelope>, LogStoreError<Self::Error>>;

    /// Mark and note envelopes whose `draft` is `draft`
    async fn referencing_draft(
        &self,
        project: &DiscoveryKey,
        draft: &Digest,
    ) -> Result<Vec<Envelope>, LogStoreError<Self::Error>>;

    /// Every mark `author` has written, grouped by identifier, in log order
    async fn marks_by_identifier(
        &self,
        project: &DiscoveryKey,
        author: &PublicKey,
    ) -> Result<BTreeMap<MarkId, Vec<Envelope>>, LogStoreError<Self::Error>>;

    /// Every envelope of one entry kind across all logs in the project
    async fn envelopes_of_kind(
        &self,
        project: &DiscoveryKey,
        kind: EntryKind,
    ) -> Result<Vec<Envelope>, LogStoreError<Self::Error>>;

    /// Subscribe to successful appends across all projects
    fn subscribe(&self) -> broadcast::Receiver<Appended>;

    /// Lazily enumerate every `(log, index)` the project holds.
    ///  Each call starts a fresh, finite enumeration.
    fn list_offers(
        &self,
        project: DiscoveryKey,
    ) -> BoxStream<'static, Result<LogPosition, LogStoreError<Self::Error>>> {
        list_offers(self.clone(), project)
    }
}

/// Open an envelope destined for `project` and return its digest.
///
/// Shared by every store implementation so that the checks run before
///  any lock or transaction is taken.
pub fn admit<T>(project: &DiscoveryKey, envelope: &Envelope) -> Result<Digest, LogStoreError<T>> {
    let entry = envelope::open(envelope).map_err(LogStoreError::Invalid)?;
    if entry.project() != project {
        return Err(LogStoreError::ProjectMismatch {
            expected: *project,
            found: *entry.project(),
        });
    }
    envelope
        .digest()
        .map_err(|e| LogStoreError::Invalid(EnvelopeError::Encode(e)))
}

/// Seal `entry` as the next envelope of `identity`'s log and store it.
pub async fn append<L: LogStore>(
    store: &L,
    project: &DiscoveryKey,
    identity: &SecretKey,
    entry: Entry,
) -> Result<Envelope, LogStoreError<L::Error>> {
    let index = store
        .log_head(project, &identity.public())
        .await?
        .map_or(0, |head| head + 1);
    let envelope = envelope::seal(entry, identity, index).map_err(LogStoreError::Invalid)?;
    store.put_envelope(project, envelope.clone()).await?;
    Ok(envelope)
}
