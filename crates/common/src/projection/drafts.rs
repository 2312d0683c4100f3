use std::collections::HashSet;

use serde::Serialize;

use crate::crypto::{Digest, DiscoveryKey, PublicKey};
use crate::entry::{Entry, EntryKind, Timestamp};
use crate::envelope::Envelope;
use crate::log_store::{LogStore, LogStoreError};

/// Lightweight view of a draft for graph display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Brief {
    pub digest: Digest,
    pub parents: Vec<Digest>,
    pub timestamp: Timestamp,
    pub author: PublicKey,
}

impl Brief {
    fn from_envelope(envelope: &Envelope) -> Option<Self> {
        let Entry::Draft(draft) = &envelope.entry else {
            return None;
        };
        Some(Brief {
            digest: envelope.digest().ok()?,
            parents: draft.parents.clone(),
            timestamp: draft.timestamp,
            author: envelope.log_public_key,
        })
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// Assemble the presentable draft graph from a set of envelopes.
///
/// Drafts are walked once in `(timestamp, digest)` order. A draft is kept
/// when it has no parents or when at least one of its parents was already
/// kept earlier in the walk. This is a single forward pass: a draft whose
/// parent sorts after it stays hidden even if that parent is present.
///
/// Non-draft envelopes are ignored. Output is in walk order.
pub fn draft_graph(envelopes: &[Envelope]) -> Vec<Brief> {
    let mut briefs: Vec<Brief> = envelopes.iter().filter_map(Brief::from_envelope).collect();
    briefs.sort_by(|a, b| (a.timestamp, a.digest).cmp(&(b.timestamp, b.digest)));

    let mut included: HashSet<Digest> = HashSet::with_capacity(briefs.len());
    briefs.retain(|brief| {
        let keep = brief.parents.is_empty() || brief.parents.iter().any(|p| included.contains(p));
        if keep {
            included.insert(brief.digest);
        }
        keep
    });
    briefs
}

/// Load every draft in `project` and build its graph.
pub async fn load_draft_graph<L: LogStore>(
    store: &L,
    project: &DiscoveryKey,
) -> Result<Vec<Brief>, LogStoreError<L::Error>> {
    let drafts = store.envelopes_of_kind(project, EntryKind::Draft).await?;
    Ok(draft_graph(&drafts))
}

/// Direct children of `parent`, oldest first. Unlike the graph this does
/// not hide orphans; it answers "what was written on top of this draft".
pub async fn draft_children<L: LogStore>(
    store: &L,
    project: &DiscoveryKey,
    parent: &Digest,
) -> Result<Vec<Brief>, LogStoreError<L::Error>> {
    let mut children: Vec<Brief> = store
        .children_of(project, parent)
        .await?
        .iter()
        .filter_map(Brief::from_envelope)
        .collect();
    children.sort_by(|a, b| (a.timestamp, a.digest).cmp(&(b.timestamp, b.digest)));
    Ok(children)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{Secret, SecretKey};
    use crate::entry::Draft;
    use crate::envelope::seal;

    struct Author {
        key: SecretKey,
        next: u64,
        project: DiscoveryKey,
    }

    impl Author {
        fn new(project: DiscoveryKey) -> Self {
            Self {
                key: SecretKey::generate(),
                next: 0,
                project,
            }
        }

        fn draft(&mut self, parents: Vec<Digest>, at: i64) -> Envelope {
            let entry = Entry::Draft(Draft {
                project: self.project,
                parents,
                text: format!("draft at {at}"),
                timestamp: Timestamp::from_millis(at),
            });
            let envelope = seal(entry, &self.key, self.next).unwrap();
            self.next += 1;
            envelope
        }
    }

    fn digests(briefs: &[Brief]) -> Vec<Digest> {
        briefs.iter().map(|b| b.digest).collect()
    }

    #[test]
    fn test_linear_history_in_time_order() {
        let mut a = Author::new(Secret::generate().discovery_key());
        let d1 = a.draft(vec![], 10);
        let d2 = a.draft(vec![d1.digest().unwrap()], 20);
        let d3 = a.draft(vec![d2.digest().unwrap()], 30);

        let graph = draft_graph(&[d3.clone(), d1.clone(), d2.clone()]);
        assert_eq!(
            digests(&graph),
            vec![d1.digest().unwrap(), d2.digest().unwrap(), d3.digest().unwrap()]
        );
        assert_eq!(graph[0].author, a.key.public());
    }

    #[test]
    fn test_orphan_hidden_until_parent_arrives() {
        let project = Secret::generate().discovery_key();
        let mut a = Author::new(project);
        let mut b = Author::new(project);
        let d1 = a.draft(vec![], 10);
        let d2 = b.draft(vec![d1.digest().unwrap()], 20);

        assert!(draft_graph(&[d2.clone()]).is_empty());
        let graph = draft_graph(&[d2.clone(), d1.clone()]);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_merge_needs_only_one_known_parent() {
        let project = Secret::generate().discovery_key();
        let mut a = Author::new(project);
        let d1 = a.draft(vec![], 10);
        let missing = Digest::of(b"never ingested");
        let merge = a.draft(vec![missing, d1.digest().unwrap()], 20);

        let graph = draft_graph(&[d1, merge]);
        assert_eq!(graph.len(), 2);
        assert!(graph[1].is_merge());
    }

    #[test]
    fn test_child_stamped_before_parent_stays_hidden() {
        let project = Secret::generate().discovery_key();
        let mut a = Author::new(project);
        let mut b = Author::new(project);
        // b's clock runs behind: the child sorts before its parent
        let parent = a.draft(vec![], 100);
        let child = b.draft(vec![parent.digest().unwrap()], 50);

        let graph = draft_graph(&[parent.clone(), child]);
        assert_eq!(digests(&graph), vec![parent.digest().unwrap()]);
    }

    #[test]
    fn test_descendant_of_hidden_draft_is_hidden() {
        let project = Secret::generate().discovery_key();
        let mut a = Author::new(project);
        let orphan = a.draft(vec![Digest::of(b"gone")], 10);
        let grandchild = a.draft(vec![orphan.digest().unwrap()], 20);

        assert!(draft_graph(&[orphan, grandchild]).is_empty());
    }

    #[test]
    fn test_non_drafts_ignored() {
        let project = Secret::generate().discovery_key();
        let key = SecretKey::generate();
        let intro = seal(Entry::intro(project, "Ada", "desk"), &key, 0).unwrap();
        assert!(draft_graph(&[intro]).is_empty());
    }
}
