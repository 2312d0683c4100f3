//! Read-side views over a project's logs.
//!
//! Nothing here is persisted. Each view is a pure function over a slice
//! of envelopes plus a thin `load_*` wrapper that pulls the relevant
//! envelopes from a [`LogStore`](crate::log_store::LogStore), so callers
//! simply recompute after a `Changed` notification.

mod drafts;
mod marks;
mod notes;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::crypto::{DiscoveryKey, PublicKey};
use crate::entry::{Entry, EntryKind, Timestamp};
use crate::envelope::Envelope;
use crate::log_store::{LogStore, LogStoreError};

pub use drafts::{draft_children, draft_graph, load_draft_graph, Brief};
pub use marks::{author_marks, current_marks, load_current_marks, marks_for_draft, MarkRecord};
pub use notes::{load_note_forest, note_forest, NoteNode};

/// Who is behind a log, as of their latest intro.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntroRecord {
    pub author: PublicKey,
    pub name: String,
    pub device: String,
    pub timestamp: Timestamp,
}

/// Latest intro per author. Later log entries win over earlier ones at
/// equal timestamps.
pub fn latest_intros(envelopes: &[Envelope]) -> BTreeMap<PublicKey, IntroRecord> {
    let mut latest: BTreeMap<PublicKey, (u64, IntroRecord)> = BTreeMap::new();
    for envelope in envelopes {
        let Entry::Intro(intro) = &envelope.entry else {
            continue;
        };
        let record = IntroRecord {
            author: envelope.log_public_key,
            name: intro.name.clone(),
            device: intro.device.clone(),
            timestamp: intro.timestamp,
        };
        match latest.get(&record.author) {
            Some((index, existing))
                if (existing.timestamp, *index) >= (record.timestamp, envelope.index) => {}
            _ => {
                latest.insert(record.author, (envelope.index, record));
            }
        }
    }
    latest
        .into_iter()
        .map(|(author, (_, record))| (author, record))
        .collect()
}

pub async fn load_intros<L: LogStore>(
    store: &L,
    project: &DiscoveryKey,
) -> Result<BTreeMap<PublicKey, IntroRecord>, LogStoreError<L::Error>> {
    let intros = store.envelopes_of_kind(project, EntryKind::Intro).await?;
    Ok(latest_intros(&intros))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{Secret, SecretKey};
    use crate::log_store::{append, MemoryLogStore};

    #[tokio::test]
    async fn test_latest_intro_per_author() {
        let store = MemoryLogStore::new();
        let project = Secret::generate().discovery_key();
        let alice = SecretKey::generate();
        let bob = SecretKey::generate();

        append(&store, &project, &alice, Entry::intro(project, "Alice", "laptop"))
            .await
            .unwrap();
        append(&store, &project, &alice, Entry::intro(project, "Alice B.", "laptop"))
            .await
            .unwrap();
        append(&store, &project, &bob, Entry::intro(project, "Bob", "phone"))
            .await
            .unwrap();

        let intros = load_intros(&store, &project).await.unwrap();
        assert_eq!(intros.len(), 2);
        assert_eq!(intros[&alice.public()].name, "Alice B.");
        assert_eq!(intros[&bob.public()].device, "phone");
    }
}
