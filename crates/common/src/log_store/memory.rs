use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{admit, Appended, LogStore, LogStoreError, APPEND_CHANNEL_CAPACITY};
use crate::crypto::{Digest, DiscoveryKey, PublicKey};
use crate::entry::{Entry, EntryKind, MarkId};
use crate::envelope::{Envelope, LogPosition};

/// In-memory log store using HashMaps
#[derive(Debug, Clone)]
pub struct MemoryLogStore {
    inner: Arc<RwLock<MemoryLogStoreInner>>,
    appended: broadcast::Sender<Appended>,
}

#[derive(Debug, Default)]
struct MemoryLogStoreInner {
    projects: HashMap<DiscoveryKey, ProjectLogs>,
}

#[derive(Debug, Default)]
struct ProjectLogs {
    /// author -> envelopes, position in the vec == index
    logs: BTreeMap<PublicKey, Vec<Envelope>>,
    /// digest -> first position holding that entry
    by_digest: HashMap<Digest, LogPosition>,
    /// parent digest -> drafts listing it as a parent
    draft_parents: HashMap<Digest, Vec<LogPosition>>,
    /// draft digest -> marks and notes pointing at it
    entry_drafts: HashMap<Digest, Vec<LogPosition>>,
    /// author -> identifier -> mark positions
    marks: HashMap<PublicKey, BTreeMap<MarkId, Vec<LogPosition>>>,
}

impl ProjectLogs {
    fn get(&self, position: &LogPosition) -> Option<&Envelope> {
        self.logs
            .get(&position.log)
            .and_then(|log| log.get(position.index as usize))
    }

    fn collect(&self, positions: Option<&Vec<LogPosition>>) -> Vec<Envelope> {
        positions
            .map(|positions| {
                positions
                    .iter()
                    .filter_map(|p| self.get(p).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn index(&mut self, position: LogPosition, digest: Digest, entry: &Entry) {
        self.by_digest.entry(digest).or_insert(position);
        match entry {
            Entry::Draft(draft) => {
                for parent in &draft.parents {
                    self.draft_parents.entry(*parent).or_default().push(position);
                }
            }
            Entry::Mark(mark) => {
                self.entry_drafts.entry(mark.draft).or_default().push(position);
                self.marks
                    .entry(position.log)
                    .or_default()
                    .entry(mark.identifier)
                    .or_default()
                    .push(position);
            }
            Entry::Note(note) => {
                self.entry_drafts.entry(note.draft).or_default().push(position);
            }
            Entry::Intro(_) => {}
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryLogStoreError {
    #[error("memory store error: {0}")]
    Internal(String),
}

type Result<T> = std::result::Result<T, LogStoreError<MemoryLogStoreError>>;

impl MemoryLogStore {
    pub fn new() -> Self {
        let (appended, _) = broadcast::channel(APPEND_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(MemoryLogStoreInner::default())),
            appended,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryLogStoreInner>> {
        self.inner.read().map_err(|e| {
            LogStoreError::Provider(MemoryLogStoreError::Internal(format!(
                "failed to acquire read lock: {}",
                e
            )))
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryLogStoreInner>> {
        self.inner.write().map_err(|e| {
            LogStoreError::Provider(MemoryLogStoreError::Internal(format!(
                "failed to acquire write lock: {}",
                e
            )))
        })
    }
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    type Error = MemoryLogStoreError;

    async fn put_envelope(&self, project: &DiscoveryKey, envelope: Envelope) -> Result<Digest> {
        // signature checks happen before the lock is taken
        let digest = admit(project, &envelope)?;
        let position = envelope.position();

        {
            let mut inner = self.write()?;
            let logs = inner.projects.entry(*project).or_default();
            let log = logs.logs.entry(position.log).or_default();

            let expected = log.len() as u64;
            if position.index != expected {
                return Err(LogStoreError::OutOfOrder {
                    log: position.log,
                    index: position.index,
                    expected,
                });
            }

            log.push(envelope.clone());
            logs.index(position, digest, &envelope.entry);
        }

        tracing::trace!(project = %project.short(), %position, "appended");
        // no subscribers is fine
        let _ = self.appended.send(Appended {
            project: *project,
            position,
            digest,
        });
        Ok(digest)
    }

    async fn get_envelope(
        &self,
        project: &DiscoveryKey,
        log: &PublicKey,
        index: u64,
    ) -> Result<Option<Envelope>> {
        let inner = self.read()?;
        Ok(inner
            .projects
            .get(project)
            .and_then(|logs| logs.get(&LogPosition::new(*log, index)))
            .cloned())
    }

    async fn get_by_digest(
        &self,
        project: &DiscoveryKey,
        digest: &Digest,
    ) -> Result<Option<Envelope>> {
        let inner = self.read()?;
        Ok(inner.projects.get(project).and_then(|logs| {
            logs.by_digest
                .get(digest)
                .and_then(|position| logs.get(position))
                .cloned()
        }))
    }

    async fn log_head(&self, project: &DiscoveryKey, log: &PublicKey) -> Result<Option<u64>> {
        let inner = self.read()?;
        Ok(inner
            .projects
            .get(project)
            .and_then(|logs| logs.logs.get(log))
            .and_then(|log| (log.len() as u64).checked_sub(1)))
    }

    async fn list_logs(&self, project: &DiscoveryKey) -> Result<Vec<(PublicKey, u64)>> {
        let inner = self.read()?;
        Ok(inner
            .projects
            .get(project)
            .map(|logs| {
                logs.logs
                    .iter()
                    .filter_map(|(key, log)| {
                        (log.len() as u64).checked_sub(1).map(|head| (*key, head))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn children_of(&self, project: &DiscoveryKey, parent: &Digest) -> Result<Vec<Envelope>> {
        let inner = self.read()?;
        Ok(inner
            .projects
            .get(project)
            .map(|logs| logs.collect(logs.draft_parents.get(parent)))
            .unwrap_or_default())
    }

    async fn referencing_draft(
        &self,
        project: &DiscoveryKey,
        draft: &Digest,
    ) -> Result<Vec<Envelope>> {
        let inner = self.read()?;
        Ok(inner
            .projects
            .get(project)
            .map(|logs| logs.collect(logs.entry_drafts.get(draft)))
            .unwrap_or_default())
    }

    async fn marks_by_identifier(
        &self,
        project: &DiscoveryKey,
        author: &PublicKey,
    ) -> Result<BTreeMap<MarkId, Vec<Envelope>>> {
        let inner = self.read()?;
        let Some(logs) = inner.projects.get(project) else {
            return Ok(BTreeMap::new());
        };
        Ok(logs
            .marks
            .get(author)
            .map(|by_id| {
                by_id
                    .iter()
                    .map(|(id, positions)| (*id, logs.collect(Some(positions))))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn envelopes_of_kind(
        &self,
        project: &DiscoveryKey,
        kind: EntryKind,
    ) -> Result<Vec<Envelope>> {
        let inner = self.read()?;
        Ok(inner
            .projects
            .get(project)
            .map(|logs| {
                logs.logs
                    .values()
                    .flatten()
                    .filter(|envelope| envelope.entry.kind() == kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn subscribe(&self) -> broadcast::Receiver<Appended> {
        self.appended.subscribe()
    }
}
