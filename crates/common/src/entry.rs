//! # Entries
//!
//! The payloads authors append to their logs. An [`Entry`] is a closed
//! union of four kinds:
//!
//! - **Draft**: a version of the text. `parents` links it into the draft
//!   DAG (no parents = original, one = revision, several = merge).
//! - **Intro**: who is behind a log (a display name and a device label).
//! - **Mark**: a movable, named pointer at a draft. Re-marking with the
//!   same `identifier` supersedes the earlier mark.
//! - **Note**: a comment on a draft, optionally replying to another note
//!   and optionally anchored to a character range.
//!
//! Every entry names the project it belongs to and carries a timestamp.
//! Entries are content addressed by the BLAKE3 [`Digest`] of their
//! canonical bytes (DAG-CBOR), which is also what the author signs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{Digest, DiscoveryKey};

/// Longest accepted intro/mark name or device label, in characters.
pub const MAX_NAME_LENGTH: usize = 256;
/// Most parents a single draft may reference.
pub const MAX_PARENTS: usize = 64;
/// Largest accepted draft or note body, in bytes.
pub const MAX_TEXT_SIZE: usize = 1024 * 1024;
/// Size of a mark identifier in bytes.
pub const MARK_ID_SIZE: usize = 8;

/// An entry failed shape validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("text exceeds {MAX_TEXT_SIZE} bytes")]
    TextTooLarge,
    #[error("draft references {0} parents, at most {MAX_PARENTS} allowed")]
    TooManyParents(usize),
    #[error("draft lists parent {0} more than once")]
    DuplicateParent(Digest),
    #[error("note range is empty or inverted ({start}..{end})")]
    InvalidRange { start: u64, end: u64 },
    #[error("note replies to its own draft {0}")]
    ParentIsDraft(Digest),
}

/// Failure to produce canonical bytes for an entry.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode entry: {0}")]
pub struct EncodeError(String);

/// Milliseconds since the Unix epoch, UTC.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(Utc::now().timestamp_millis())
    }

    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.3f")),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Stable identifier shared by every revision of one mark.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarkId(#[serde(with = "crate::crypto::fixed_bytes")] [u8; MARK_ID_SIZE]);

impl MarkId {
    /// Fresh random identifier for a new mark.
    pub fn generate() -> Self {
        MarkId(crate::crypto::random_bytes::<MARK_ID_SIZE>())
    }

    pub fn as_bytes(&self) -> &[u8; MARK_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; MARK_ID_SIZE]> for MarkId {
    fn from(bytes: [u8; MARK_ID_SIZE]) -> Self {
        MarkId(bytes)
    }
}

impl fmt::Debug for MarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MarkId({})", self.to_hex())
    }
}

impl fmt::Display for MarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for MarkId {
    type Err = hex::FromHexError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut buff = [0u8; MARK_ID_SIZE];
        hex::decode_to_slice(s, &mut buff)?;
        Ok(MarkId(buff))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub project: DiscoveryKey,
    pub parents: Vec<Digest>,
    pub text: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intro {
    pub project: DiscoveryKey,
    pub name: String,
    pub device: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mark {
    pub project: DiscoveryKey,
    pub identifier: MarkId,
    pub name: String,
    pub draft: Digest,
    pub timestamp: Timestamp,
}

/// Character range a note is anchored to, `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub project: DiscoveryKey,
    pub draft: Digest,
    pub parent: Option<Digest>,
    pub range: Option<TextRange>,
    pub text: String,
    pub timestamp: Timestamp,
}

/// The payload of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entry {
    Draft(Draft),
    Intro(Intro),
    Mark(Mark),
    Note(Note),
}

/// Discriminant of an [`Entry`], used as a storage index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Draft,
    Intro,
    Mark,
    Note,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Draft => "draft",
            EntryKind::Intro => "intro",
            EntryKind::Mark => "mark",
            EntryKind::Note => "note",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn check_name(field: &'static str, value: &str) -> Result<(), SchemaError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SchemaError::Empty { field });
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(SchemaError::TooLong {
            field,
            max: MAX_NAME_LENGTH,
        });
    }
    Ok(())
}

fn check_text(text: &str) -> Result<(), SchemaError> {
    if text.len() > MAX_TEXT_SIZE {
        return Err(SchemaError::TextTooLarge);
    }
    Ok(())
}

impl Entry {
    /// A new draft stamped with the current time.
    pub fn draft(project: DiscoveryKey, parents: Vec<Digest>, text: impl Into<String>) -> Self {
        Entry::Draft(Draft {
            project,
            parents,
            text: text.into(),
            timestamp: Timestamp::now(),
        })
    }

    pub fn intro(project: DiscoveryKey, name: impl Into<String>, device: impl Into<String>) -> Self {
        Entry::Intro(Intro {
            project,
            name: name.into(),
            device: device.into(),
            timestamp: Timestamp::now(),
        })
    }

    /// A mark on `draft`. Pass the identifier of an existing mark to move
    /// it, or `None` to start a new one.
    pub fn mark(
        project: DiscoveryKey,
        identifier: Option<MarkId>,
        name: impl Into<String>,
        draft: Digest,
    ) -> Self {
        Entry::Mark(Mark {
            project,
            identifier: identifier.unwrap_or_else(MarkId::generate),
            name: name.into(),
            draft,
            timestamp: Timestamp::now(),
        })
    }

    pub fn note(
        project: DiscoveryKey,
        draft: Digest,
        parent: Option<Digest>,
        range: Option<TextRange>,
        text: impl Into<String>,
    ) -> Self {
        Entry::Note(Note {
            project,
            draft,
            parent,
            range,
            text: text.into(),
            timestamp: Timestamp::now(),
        })
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Draft(_) => EntryKind::Draft,
            Entry::Intro(_) => EntryKind::Intro,
            Entry::Mark(_) => EntryKind::Mark,
            Entry::Note(_) => EntryKind::Note,
        }
    }

    /// Project the entry declares it belongs to.
    pub fn project(&self) -> &DiscoveryKey {
        match self {
            Entry::Draft(d) => &d.project,
            Entry::Intro(i) => &i.project,
            Entry::Mark(m) => &m.project,
            Entry::Note(n) => &n.project,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Entry::Draft(d) => d.timestamp,
            Entry::Intro(i) => i.timestamp,
            Entry::Mark(m) => m.timestamp,
            Entry::Note(n) => n.timestamp,
        }
    }

    /// The draft this entry refers to, for marks and notes.
    pub fn draft_ref(&self) -> Option<&Digest> {
        match self {
            Entry::Mark(m) => Some(&m.draft),
            Entry::Note(n) => Some(&n.draft),
            Entry::Draft(_) | Entry::Intro(_) => None,
        }
    }

    /// Check the entry's shape beyond what deserialization guarantees.
    pub fn validate(&self) -> Result<(), SchemaError> {
        match self {
            Entry::Draft(draft) => {
                if draft.parents.len() > MAX_PARENTS {
                    return Err(SchemaError::TooManyParents(draft.parents.len()));
                }
                for (i, parent) in draft.parents.iter().enumerate() {
                    if draft.parents[..i].contains(parent) {
                        return Err(SchemaError::DuplicateParent(*parent));
                    }
                }
                check_text(&draft.text)
            }
            Entry::Intro(intro) => {
                check_name("name", &intro.name)?;
                check_name("device", &intro.device)
            }
            Entry::Mark(mark) => check_name("name", &mark.name),
            Entry::Note(note) => {
                if let Some(range) = note.range {
                    if range.start >= range.end {
                        return Err(SchemaError::InvalidRange {
                            start: range.start,
                            end: range.end,
                        });
                    }
                }
                if note.parent.as_ref() == Some(&note.draft) {
                    return Err(SchemaError::ParentIsDraft(note.draft));
                }
                if note.text.trim().is_empty() {
                    return Err(SchemaError::Empty { field: "text" });
                }
                check_text(&note.text)
            }
        }
    }

    /// Deterministic DAG-CBOR encoding; the bytes that get hashed and signed.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| EncodeError(e.to_string()))
    }

    pub fn digest(&self) -> Result<Digest, EncodeError> {
        Ok(Digest::of(&self.canonical_bytes()?))
    }
}
