use std::collections::BTreeMap;

use serde::Serialize;

use crate::crypto::{Digest, DiscoveryKey, PublicKey};
use crate::entry::{Entry, EntryKind, MarkId, Timestamp};
use crate::envelope::Envelope;
use crate::log_store::{LogStore, LogStoreError};

/// The current state of one mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkRecord {
    pub author: PublicKey,
    pub identifier: MarkId,
    pub name: String,
    pub draft: Digest,
    pub timestamp: Timestamp,
    /// digest of the mark entry itself
    pub digest: Digest,
}

impl MarkRecord {
    fn from_envelope(envelope: &Envelope) -> Option<Self> {
        let Entry::Mark(mark) = &envelope.entry else {
            return None;
        };
        Some(MarkRecord {
            author: envelope.log_public_key,
            identifier: mark.identifier,
            name: mark.name.clone(),
            draft: mark.draft,
            timestamp: mark.timestamp,
            digest: envelope.digest().ok()?,
        })
    }

    fn supersedes(&self, other: &MarkRecord) -> bool {
        (self.timestamp, self.digest) > (other.timestamp, other.digest)
    }
}

/// Resolve marks to one current record per `(author, identifier)`.
///
/// The latest timestamp wins; equal timestamps fall to the greater
/// digest. Output is ordered by author, then identifier.
pub fn current_marks(envelopes: &[Envelope]) -> Vec<MarkRecord> {
    let mut current: BTreeMap<(PublicKey, MarkId), MarkRecord> = BTreeMap::new();
    for record in envelopes.iter().filter_map(MarkRecord::from_envelope) {
        let key = (record.author, record.identifier);
        match current.get(&key) {
            Some(existing) if !record.supersedes(existing) => {}
            _ => {
                current.insert(key, record);
            }
        }
    }
    current.into_values().collect()
}

pub async fn load_current_marks<L: LogStore>(
    store: &L,
    project: &DiscoveryKey,
) -> Result<Vec<MarkRecord>, LogStoreError<L::Error>> {
    let marks = store.envelopes_of_kind(project, EntryKind::Mark).await?;
    Ok(current_marks(&marks))
}

/// Current marks that point at `draft`.
///
/// Resolution happens across every mark with the same key first, so a
/// mark that has since moved to another draft does not show up here.
pub async fn marks_for_draft<L: LogStore>(
    store: &L,
    project: &DiscoveryKey,
    draft: &Digest,
) -> Result<Vec<MarkRecord>, LogStoreError<L::Error>> {
    let referencing = store.referencing_draft(project, draft).await?;

    let mut resolved = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for record in referencing.iter().filter_map(MarkRecord::from_envelope) {
        if !seen.insert((record.author, record.identifier)) {
            continue;
        }
        let history = store
            .marks_by_identifier(project, &record.author)
            .await?
            .remove(&record.identifier)
            .unwrap_or_default();
        resolved.extend(current_marks(&history));
    }
    resolved.retain(|record| &record.draft == draft);
    Ok(resolved)
}

/// Current marks written by one author.
pub async fn author_marks<L: LogStore>(
    store: &L,
    project: &DiscoveryKey,
    author: &PublicKey,
) -> Result<Vec<MarkRecord>, LogStoreError<L::Error>> {
    let by_identifier = store.marks_by_identifier(project, author).await?;
    Ok(by_identifier
        .values()
        .flat_map(|history| current_marks(history))
        .collect())
}
