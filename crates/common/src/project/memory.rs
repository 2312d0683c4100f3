use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Identity, Project, ProjectEvent, ProjectRegistry, RegistryError, PROJECT_CHANNEL_CAPACITY};
use crate::crypto::DiscoveryKey;

/// In-memory project registry
#[derive(Debug, Clone)]
pub struct MemoryProjectRegistry {
    inner: Arc<RwLock<MemoryProjectRegistryInner>>,
    events: broadcast::Sender<ProjectEvent>,
}

#[derive(Debug, Default)]
struct MemoryProjectRegistryInner {
    projects: BTreeMap<DiscoveryKey, Project>,
    identities: HashMap<DiscoveryKey, Vec<Identity>>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryProjectRegistryError {
    #[error("memory registry error: {0}")]
    Internal(String),
}

type Result<T> = std::result::Result<T, RegistryError<MemoryProjectRegistryError>>;

impl MemoryProjectRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(PROJECT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(MemoryProjectRegistryInner::default())),
            events,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryProjectRegistryInner>> {
        self.inner.read().map_err(|e| {
            RegistryError::Provider(MemoryProjectRegistryError::Internal(format!(
                "failed to acquire read lock: {}",
                e
            )))
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryProjectRegistryInner>> {
        self.inner.write().map_err(|e| {
            RegistryError::Provider(MemoryProjectRegistryError::Internal(format!(
                "failed to acquire write lock: {}",
                e
            )))
        })
    }

    fn update(&self, discovery_key: &DiscoveryKey, f: impl FnOnce(&mut Project)) -> Result<()> {
        let mut inner = self.write()?;
        let project = inner
            .projects
            .get_mut(discovery_key)
            .ok_or(RegistryError::NotFound(*discovery_key))?;
        f(project);
        Ok(())
    }
}

impl Default for MemoryProjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectRegistry for MemoryProjectRegistry {
    type Error = MemoryProjectRegistryError;

    async fn put_project(&self, project: Project) -> Result<()> {
        let discovery_key = project.discovery_key;
        {
            let mut inner = self.write()?;
            if inner.projects.contains_key(&discovery_key) {
                return Err(RegistryError::AlreadyExists(discovery_key));
            }
            inner.projects.insert(discovery_key, project);
        }
        let _ = self.events.send(ProjectEvent::Created(discovery_key));
        Ok(())
    }

    async fn get_project(&self, discovery_key: &DiscoveryKey) -> Result<Option<Project>> {
        Ok(self.read()?.projects.get(discovery_key).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.read()?.projects.values().cloned().collect())
    }

    async fn set_title(&self, discovery_key: &DiscoveryKey, title: &str) -> Result<()> {
        self.update(discovery_key, |project| project.title = title.to_string())
    }

    async fn set_persistent(&self, discovery_key: &DiscoveryKey, persistent: bool) -> Result<()> {
        self.update(discovery_key, |project| project.persistent = persistent)
    }

    async fn delete_project(&self, discovery_key: &DiscoveryKey) -> Result<()> {
        self.update(discovery_key, |project| project.deleted = true)?;
        let _ = self.events.send(ProjectEvent::Deleted(*discovery_key));
        Ok(())
    }

    async fn put_identity(&self, discovery_key: &DiscoveryKey, identity: Identity) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.projects.contains_key(discovery_key) {
            return Err(RegistryError::NotFound(*discovery_key));
        }
        let identities = inner.identities.entry(*discovery_key).or_default();
        if identity.is_default {
            for existing in identities.iter_mut() {
                existing.is_default = false;
            }
        }
        match identities.iter_mut().find(|i| i.key == identity.key) {
            Some(existing) => existing.is_default = identity.is_default,
            None => identities.push(identity),
        }
        Ok(())
    }

    async fn identities(&self, discovery_key: &DiscoveryKey) -> Result<Vec<Identity>> {
        Ok(self
            .read()?
            .identities
            .get(discovery_key)
            .cloned()
            .unwrap_or_default())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.events.subscribe()
    }
}
