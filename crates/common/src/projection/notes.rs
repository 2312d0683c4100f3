use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::crypto::{Digest, DiscoveryKey, PublicKey};
use crate::entry::{Entry, TextRange, Timestamp};
use crate::envelope::Envelope;
use crate::log_store::{LogStore, LogStoreError};

/// A note and the replies attached beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteNode {
    pub digest: Digest,
    pub author: PublicKey,
    pub parent: Option<Digest>,
    pub range: Option<TextRange>,
    pub text: String,
    pub timestamp: Timestamp,
    pub children: Vec<NoteNode>,
}

impl NoteNode {
    /// Number of notes in this subtree, itself included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(NoteNode::size).sum::<usize>()
    }
}

/// Build the reply forest for the notes on `draft`.
///
/// Roots are notes with no parent. A reply is attached under the note
/// whose digest it names; replies to notes not present are left out until
/// that note arrives. Siblings are ordered by `(timestamp, digest)`.
pub fn note_forest(draft: &Digest, envelopes: &[Envelope]) -> Vec<NoteNode> {
    let mut nodes: HashMap<Digest, NoteNode> = HashMap::new();
    for envelope in envelopes {
        let Entry::Note(note) = &envelope.entry else {
            continue;
        };
        if &note.draft != draft {
            continue;
        }
        let Ok(digest) = envelope.digest() else {
            continue;
        };
        nodes.entry(digest).or_insert_with(|| NoteNode {
            digest,
            author: envelope.log_public_key,
            parent: note.parent,
            range: note.range,
            text: note.text.clone(),
            timestamp: note.timestamp,
            children: Vec::new(),
        });
    }

    let mut replies: HashMap<Digest, Vec<Digest>> = HashMap::new();
    let mut roots = Vec::new();
    for node in nodes.values() {
        match node.parent {
            Some(parent) => replies.entry(parent).or_default().push(node.digest),
            None => roots.push(node.digest),
        }
    }

    let mut visited = HashSet::new();
    let mut forest: Vec<NoteNode> = roots
        .into_iter()
        .filter_map(|root| attach(root, &mut nodes, &replies, &mut visited))
        .collect();
    sort_siblings(&mut forest);
    forest
}

fn attach(
    digest: Digest,
    nodes: &mut HashMap<Digest, NoteNode>,
    replies: &HashMap<Digest, Vec<Digest>>,
    visited: &mut HashSet<Digest>,
) -> Option<NoteNode> {
    if !visited.insert(digest) {
        return None;
    }
    let mut node = nodes.remove(&digest)?;
    if let Some(children) = replies.get(&digest) {
        node.children = children
            .iter()
            .filter_map(|child| attach(*child, nodes, replies, visited))
            .collect();
        sort_siblings(&mut node.children);
    }
    Some(node)
}

fn sort_siblings(nodes: &mut [NoteNode]) {
    nodes.sort_by(|a, b| (a.timestamp, a.digest).cmp(&(b.timestamp, b.digest)));
}

/// Load the notes on `draft` and build their forest.
pub async fn load_note_forest<L: LogStore>(
    store: &L,
    project: &DiscoveryKey,
    draft: &Digest,
) -> Result<Vec<NoteNode>, LogStoreError<L::Error>> {
    let referencing = store.referencing_draft(project, draft).await?;
    Ok(note_forest(draft, &referencing))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{Secret, SecretKey};
    use crate::entry::Note;
    use crate::envelope::seal;

    fn note(
        project: DiscoveryKey,
        key: &SecretKey,
        index: u64,
        draft: Digest,
        parent: Option<Digest>,
        at: i64,
    ) -> Envelope {
        let entry = Entry::Note(Note {
            project,
            draft,
            parent,
            range: None,
            text: format!("note {at}"),
            timestamp: Timestamp::from_millis(at),
        });
        seal(entry, key, index).unwrap()
    }

    #[test]
    fn test_replies_nest_under_parent() {
        let project = Secret::generate().discovery_key();
        let key = SecretKey::generate();
        let draft = Digest::of(b"draft");

        let root = note(project, &key, 0, draft, None, 1);
        let reply = note(project, &key, 1, draft, Some(root.digest().unwrap()), 2);
        let nested = note(project, &key, 2, draft, Some(reply.digest().unwrap()), 3);
        let other_root = note(project, &key, 3, draft, None, 4);

        let forest = note_forest(&draft, &[nested, other_root, reply.clone(), root.clone()]);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].digest, root.digest().unwrap());
        assert_eq!(forest[0].size(), 3);
        assert_eq!(forest[0].children[0].digest, reply.digest().unwrap());
        assert_eq!(forest[1].size(), 1);
    }

    #[test]
    fn test_reply_to_missing_note_is_omitted() {
        let project = Secret::generate().discovery_key();
        let key = SecretKey::generate();
        let draft = Digest::of(b"draft");

        let parent = note(project, &key, 0, draft, None, 1);
        let reply = note(project, &key, 1, draft, Some(parent.digest().unwrap()), 2);

        assert!(note_forest(&draft, &[reply.clone()]).is_empty());

        let forest = note_forest(&draft, &[reply.clone(), parent.clone()]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].children.len(), 1);
        assert_eq!(forest[0].children[0].digest, reply.digest().unwrap());
    }

    #[test]
    fn test_notes_on_other_drafts_ignored() {
        let project = Secret::generate().discovery_key();
        let key = SecretKey::generate();
        let here = Digest::of(b"here");
        let there = Digest::of(b"there");

        let a = note(project, &key, 0, here, None, 1);
        let b = note(project, &key, 1, there, None, 2);
        let forest = note_forest(&here, &[a, b]);
        assert_eq!(forest.len(), 1);
    }
}
