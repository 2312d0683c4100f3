use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use futures::TryStreamExt;

use crate::crypto::{Digest, DiscoveryKey, PublicKey, SecretKey};
use crate::entry::Entry;
use crate::envelope::{Envelope, LogPosition};
use crate::log_store::{self, LogStore, MemoryLogStore};
use crate::peer::{PeerId, Swarm};
use crate::project::{
    default_identity_or_create, Invitation, MemoryProjectRegistry, Project, ProjectRegistry,
};

/// A test peer with convenience methods for integration testing
pub struct TestPeer {
    /// The name of this peer (for debugging)
    pub name: String,
    /// Node identity; the id other peers know this one by
    secret: SecretKey,
    store: MemoryLogStore,
    registry: MemoryProjectRegistry,
    swarm: Swarm<MemoryLogStore, MemoryProjectRegistry>,
}

impl TestPeer {
    /// Create a new test peer with an empty store and registry
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_max_peers(name, crate::peer::DEFAULT_MAX_PEERS)
    }

    pub fn with_max_peers(name: impl Into<String>, max_peers: usize) -> Self {
        let store = MemoryLogStore::new();
        let registry = MemoryProjectRegistry::new();
        let swarm = Swarm::with_discovery(
            store.clone(),
            registry.clone(),
            std::sync::Arc::new(crate::peer::NoDiscovery),
            max_peers,
        );
        Self {
            name: name.into(),
            secret: SecretKey::generate(),
            store,
            registry,
            swarm,
        }
    }

    pub fn id(&self) -> PeerId {
        self.secret.public()
    }

    pub fn store(&self) -> &MemoryLogStore {
        &self.store
    }

    pub fn registry(&self) -> &MemoryProjectRegistry {
        &self.registry
    }

    pub fn swarm(&self) -> &Swarm<MemoryLogStore, MemoryProjectRegistry> {
        &self.swarm
    }

    /// Create a project and return it
    pub async fn create_project(&self, title: impl Into<String>) -> Result<Project> {
        let project = Project::create(title);
        self.registry.put_project(project.clone()).await?;
        tracing::debug!("[{}] created project {}", self.name, project.discovery_key.short());
        Ok(project)
    }

    /// Join a project another peer created
    pub async fn join_project(&self, invitation: &Invitation) -> Result<Project> {
        let project = Project::join(invitation, format!("{}'s copy", self.name));
        self.registry.put_project(project.clone()).await?;
        Ok(project)
    }

    /// The key this peer writes with by default in `project`
    pub async fn author(&self, project: &DiscoveryKey) -> Result<SecretKey> {
        Ok(default_identity_or_create(&self.registry, project).await?.key)
    }

    /// Append an entry to this peer's default log in `project`
    pub async fn append(&self, project: &DiscoveryKey, entry: Entry) -> Result<Envelope> {
        let author = self.author(project).await?;
        self.append_as(&author, project, entry).await
    }

    pub async fn append_as(
        &self,
        author: &SecretKey,
        project: &DiscoveryKey,
        entry: Entry,
    ) -> Result<Envelope> {
        Ok(log_store::append(&self.store, project, author, entry).await?)
    }

    /// Append a plain draft and return its digest
    pub async fn write_draft(
        &self,
        project: &DiscoveryKey,
        parents: Vec<Digest>,
        text: &str,
    ) -> Result<Digest> {
        let envelope = self
            .append(project, Entry::draft(*project, parents, text))
            .await?;
        Ok(envelope.digest()?)
    }

    pub async fn head(&self, project: &DiscoveryKey, log: &PublicKey) -> Result<Option<u64>> {
        Ok(self.store.log_head(project, log).await?)
    }

    /// Every position this peer holds for `project`
    pub async fn positions(&self, project: &DiscoveryKey) -> Result<BTreeSet<LogPosition>> {
        Ok(self.store.list_offers(*project).try_collect().await?)
    }

    pub async fn envelope_by_digest(&self, project: &DiscoveryKey, digest: &Digest) -> Result<Envelope> {
        self.store
            .get_by_digest(project, digest)
            .await?
            .ok_or_else(|| anyhow!("[{}] has no envelope {}", self.name, digest.short()))
    }

    /// Tear down every session this peer is running
    pub async fn stop(&self) -> Result<()> {
        for project in self.registry.list_projects().await? {
            self.swarm.teardown(&project.discovery_key);
        }
        Ok(())
    }
}
