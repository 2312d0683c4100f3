use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use super::discovery::{Discovery, NoDiscovery};
use super::session::Session;
use super::{PeerEvent, PeerId};
use crate::crypto::DiscoveryKey;
use crate::log_store::LogStore;
use crate::project::{ProjectEvent, ProjectRegistry};

/// Sessions allowed per project unless configured otherwise
pub const DEFAULT_MAX_PEERS: usize = 3;
pub const PEER_EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("unknown project {0}")]
    UnknownProject(DiscoveryKey),
    #[error("project {0} is deleted")]
    Deleted(DiscoveryKey),
    #[error("already connected to {peer} for project {project}")]
    Duplicate {
        project: DiscoveryKey,
        peer: PeerId,
    },
    #[error("project {project} already has {max} peers")]
    Full { project: DiscoveryKey, max: usize },
    #[error("registry error: {0}")]
    Registry(String),
    #[error("discovery error: {0}")]
    Discovery(#[from] anyhow::Error),
}

struct SessionHandle {
    id: u64,
    abort: AbortHandle,
}

struct SwarmInner<L, R> {
    store: L,
    registry: R,
    discovery: Arc<dyn Discovery>,
    max_peers: usize,
    /// project -> peer -> running session
    sessions: Mutex<HashMap<DiscoveryKey, HashMap<PeerId, SessionHandle>>>,
    /// projects left since they were last joined; only touched while
    /// holding `sessions`
    departed: Mutex<HashSet<DiscoveryKey>>,
    joined: Mutex<HashSet<DiscoveryKey>>,
    events: broadcast::Sender<PeerEvent>,
    next_id: AtomicU64,
}

impl<L, R> SwarmInner<L, R> {
    /// Remove a finished session, unless it was already replaced or torn down.
    fn release(&self, project: &DiscoveryKey, peer: &PeerId, id: u64) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(peers) = sessions.get_mut(project) else {
            return false;
        };
        if peers.get(peer).map(|handle| handle.id) != Some(id) {
            return false;
        }
        peers.remove(peer);
        if peers.is_empty() {
            sessions.remove(project);
        }
        true
    }
}

/// Owns every peer session on this device, keyed by project.
///
/// The swarm is the only place sessions are created. It enforces the
/// per-project peer limit, refuses a second connection to a peer it is
/// already replicating with, and follows the project registry: projects
/// that appear are joined in discovery, projects that are deleted are
/// left and their sessions torn down.
pub struct Swarm<L, R> {
    inner: Arc<SwarmInner<L, R>>,
}

impl<L, R> Clone for Swarm<L, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L, R> std::fmt::Debug for Swarm<L, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sessions = self.inner.sessions.lock();
        f.debug_struct("Swarm")
            .field("max_peers", &self.inner.max_peers)
            .field("projects", &sessions.len())
            .finish()
    }
}

impl<L: LogStore, R: ProjectRegistry> Swarm<L, R> {
    pub fn new(store: L, registry: R) -> Self {
        Self::with_discovery(store, registry, Arc::new(NoDiscovery), DEFAULT_MAX_PEERS)
    }

    pub fn with_discovery(
        store: L,
        registry: R,
        discovery: Arc<dyn Discovery>,
        max_peers: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(PEER_EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SwarmInner {
                store,
                registry,
                discovery,
                max_peers,
                sessions: Mutex::new(HashMap::new()),
                departed: Mutex::new(HashSet::new()),
                joined: Mutex::new(HashSet::new()),
                events,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &L {
        &self.inner.store
    }

    pub fn registry(&self) -> &R {
        &self.inner.registry
    }

    pub fn max_peers(&self) -> usize {
        self.inner.max_peers
    }

    /// Peer events from every session: connects, disconnects and store
    ///  changes caused by replication.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.inner.events.subscribe()
    }

    pub fn count_peers(&self, project: &DiscoveryKey) -> usize {
        self.inner
            .sessions
            .lock()
            .get(project)
            .map_or(0, |peers| peers.len())
    }

    pub fn peers(&self, project: &DiscoveryKey) -> Vec<PeerId> {
        self.inner
            .sessions
            .lock()
            .get(project)
            .map(|peers| peers.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Start replicating `project` with `peer` over `stream`.
    ///
    /// The session runs in its own task and removes itself when the stream
    ///  closes. Returns once the session is registered, not when it ends.
    pub async fn connect<S>(&self, project: DiscoveryKey, peer: PeerId, stream: S) -> Result<(), SwarmError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let record = self
            .inner
            .registry
            .get_project(&project)
            .await
            .map_err(|e| SwarmError::Registry(e.to_string()))?
            .ok_or(SwarmError::UnknownProject(project))?;
        if record.deleted {
            return Err(SwarmError::Deleted(project));
        }

        let session = Session::new(
            record.replication_key,
            peer,
            self.inner.store.clone(),
            self.inner.events.clone(),
        );

        {
            let mut sessions = self.inner.sessions.lock();
            // a leave may have run since the registry said the project was live
            if self.inner.departed.lock().contains(&project) {
                tracing::debug!(project = %project.short(), %peer, "dropping connection, project left");
                return Err(SwarmError::Deleted(project));
            }
            let peers = sessions.entry(project).or_default();
            if peers.contains_key(&peer) {
                tracing::debug!(project = %project.short(), %peer, "dropping duplicate connection");
                return Err(SwarmError::Duplicate { project, peer });
            }
            if peers.len() >= self.inner.max_peers {
                tracing::debug!(project = %project.short(), %peer, "dropping connection, swarm full");
                return Err(SwarmError::Full {
                    project,
                    max: self.inner.max_peers,
                });
            }

            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let inner = self.inner.clone();
            // the spawned task cannot release its slot before the insert
            // below, both need this lock
            let task = tokio::spawn(async move {
                let (reader, writer) = tokio::io::split(stream);
                match session.run(reader, writer).await {
                    Ok(summary) => tracing::debug!(
                        project = %project.short(),
                        %peer,
                        received = summary.received,
                        "session ended"
                    ),
                    Err(e) => tracing::info!(project = %project.short(), %peer, "session failed: {}", e),
                }
                if inner.release(&project, &peer, id) {
                    let _ = inner
                        .events
                        .send(PeerEvent::Disconnected { project, peer });
                }
            });
            peers.insert(
                peer,
                SessionHandle {
                    id,
                    abort: task.abort_handle(),
                },
            );
        }

        tracing::info!(project = %project.short(), %peer, "peer connected");
        let _ = self
            .inner
            .events
            .send(PeerEvent::Connected { project, peer });
        Ok(())
    }

    /// Drop the session with `peer`, if any.
    pub fn disconnect(&self, project: &DiscoveryKey, peer: &PeerId) -> bool {
        let handle = {
            let mut sessions = self.inner.sessions.lock();
            let Some(peers) = sessions.get_mut(project) else {
                return false;
            };
            peers.remove(peer)
        };
        match handle {
            Some(handle) => {
                handle.abort.abort();
                let _ = self.inner.events.send(PeerEvent::Disconnected {
                    project: *project,
                    peer: *peer,
                });
                true
            }
            None => false,
        }
    }

    /// Abort every session for `project`.
    pub fn teardown(&self, project: &DiscoveryKey) -> usize {
        let peers = self.inner.sessions.lock().remove(project).unwrap_or_default();
        self.abort_all(project, peers)
    }

    /// Tear down `project` and refuse new sessions for it until it is
    /// joined again.
    fn retire(&self, project: &DiscoveryKey) -> usize {
        let peers = {
            let mut sessions = self.inner.sessions.lock();
            self.inner.departed.lock().insert(*project);
            sessions.remove(project).unwrap_or_default()
        };
        self.abort_all(project, peers)
    }

    fn abort_all(&self, project: &DiscoveryKey, peers: HashMap<PeerId, SessionHandle>) -> usize {
        let count = peers.len();
        for (peer, handle) in peers {
            handle.abort.abort();
            let _ = self.inner.events.send(PeerEvent::Disconnected {
                project: *project,
                peer,
            });
        }
        if count > 0 {
            tracing::info!(project = %project.short(), count, "tore down sessions");
        }
        count
    }

    /// Start looking for peers for `project`. Joining twice is a no-op.
    pub async fn join(&self, project: DiscoveryKey) -> Result<(), SwarmError> {
        {
            let _sessions = self.inner.sessions.lock();
            self.inner.departed.lock().remove(&project);
        }
        if !self.inner.joined.lock().insert(project) {
            return Ok(());
        }
        if let Err(e) = self.inner.discovery.join(project).await {
            self.inner.joined.lock().remove(&project);
            return Err(e.into());
        }
        tracing::info!(project = %project.short(), "joined swarm");
        Ok(())
    }

    /// Stop looking for peers for `project` and tear down its sessions.
    pub async fn leave(&self, project: DiscoveryKey) -> Result<(), SwarmError> {
        self.retire(&project);
        if !self.inner.joined.lock().remove(&project) {
            return Ok(());
        }
        self.inner.discovery.leave(project).await?;
        tracing::info!(project = %project.short(), "left swarm");
        Ok(())
    }

    pub fn is_joined(&self, project: &DiscoveryKey) -> bool {
        self.inner.joined.lock().contains(project)
    }

    /// Follow the registry: join every live project now, then join and
    ///  leave as projects are created and deleted. Runs until the registry
    ///  goes away.
    pub async fn run(&self) -> Result<(), SwarmError> {
        let mut events = self.inner.registry.subscribe();
        self.sync_with_registry().await?;

        loop {
            match events.recv().await {
                Ok(ProjectEvent::Created(project)) => {
                    if let Err(e) = self.join(project).await {
                        tracing::error!(project = %project.short(), "failed to join: {}", e);
                    }
                }
                Ok(ProjectEvent::Deleted(project)) => {
                    if let Err(e) = self.leave(project).await {
                        tracing::error!(project = %project.short(), "failed to leave: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => self.sync_with_registry().await?,
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    async fn sync_with_registry(&self) -> Result<(), SwarmError> {
        let projects = self
            .inner
            .registry
            .list_projects()
            .await
            .map_err(|e| SwarmError::Registry(e.to_string()))?;
        for project in projects {
            if project.deleted {
                self.leave(project.discovery_key).await?;
            } else {
                self.join(project.discovery_key).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::crypto::SecretKey;
    use crate::log_store::MemoryLogStore;
    use crate::project::{MemoryProjectRegistry, Project};

    async fn swarm_with_project() -> (Swarm<MemoryLogStore, MemoryProjectRegistry>, Project) {
        let registry = MemoryProjectRegistry::new();
        let project = Project::create("shared");
        registry.put_project(project.clone()).await.unwrap();
        (Swarm::new(MemoryLogStore::new(), registry), project)
    }

    #[tokio::test]
    async fn test_duplicate_peer_is_dropped() {
        let (swarm, project) = swarm_with_project().await;
        let peer = SecretKey::generate().public();
        let key = project.discovery_key;

        let (a, _a_remote) = tokio::io::duplex(1024);
        let (b, _b_remote) = tokio::io::duplex(1024);
        swarm.connect(key, peer, a).await.unwrap();
        assert!(matches!(
            swarm.connect(key, peer, b).await,
            Err(SwarmError::Duplicate { .. })
        ));
        assert_eq!(swarm.count_peers(&key), 1);
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let (swarm, project) = swarm_with_project().await;
        let key = project.discovery_key;
        let mut remotes = Vec::new();

        for _ in 0..DEFAULT_MAX_PEERS {
            let (local, remote) = tokio::io::duplex(1024);
            remotes.push(remote);
            swarm
                .connect(key, SecretKey::generate().public(), local)
                .await
                .unwrap();
        }
        let (extra, _remote) = tokio::io::duplex(1024);
        assert!(matches!(
            swarm.connect(key, SecretKey::generate().public(), extra).await,
            Err(SwarmError::Full { max: DEFAULT_MAX_PEERS, .. })
        ));
        assert_eq!(swarm.count_peers(&key), DEFAULT_MAX_PEERS);
    }

    #[tokio::test]
    async fn test_unknown_and_deleted_projects_refused() {
        let (swarm, project) = swarm_with_project().await;
        let (a, _ra) = tokio::io::duplex(64);
        let stranger = Project::create("other").discovery_key;
        assert!(matches!(
            swarm.connect(stranger, SecretKey::generate().public(), a).await,
            Err(SwarmError::UnknownProject(_))
        ));

        swarm.registry().delete_project(&project.discovery_key).await.unwrap();
        let (b, _rb) = tokio::io::duplex(64);
        assert!(matches!(
            swarm
                .connect(project.discovery_key, SecretKey::generate().public(), b)
                .await,
            Err(SwarmError::Deleted(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_stream_frees_slot() {
        let (swarm, project) = swarm_with_project().await;
        let key = project.discovery_key;
        let peer = SecretKey::generate().public();
        let mut events = swarm.subscribe();

        let (local, remote) = tokio::io::duplex(1024);
        swarm.connect(key, peer, local).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            PeerEvent::Connected { project: key, peer }
        );

        drop(remote);
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, PeerEvent::Disconnected { project: key, peer });
        assert_eq!(swarm.count_peers(&key), 0);
    }

    #[tokio::test]
    async fn test_connect_after_leave_is_refused() {
        let (swarm, project) = swarm_with_project().await;
        let key = project.discovery_key;

        let (a, _ra) = tokio::io::duplex(1024);
        swarm.connect(key, SecretKey::generate().public(), a).await.unwrap();
        swarm.leave(key).await.unwrap();
        assert_eq!(swarm.count_peers(&key), 0);

        // the registry still reports the project as live
        let (b, _rb) = tokio::io::duplex(1024);
        assert!(matches!(
            swarm.connect(key, SecretKey::generate().public(), b).await,
            Err(SwarmError::Deleted(_))
        ));
        assert_eq!(swarm.count_peers(&key), 0);

        swarm.join(key).await.unwrap();
        let (c, _rc) = tokio::io::duplex(1024);
        swarm.connect(key, SecretKey::generate().public(), c).await.unwrap();
        assert_eq!(swarm.count_peers(&key), 1);
        swarm.leave(key).await.unwrap();
    }

    #[tokio::test]
    async fn test_registry_events_drive_membership() {
        let registry = MemoryProjectRegistry::new();
        let swarm = Swarm::new(MemoryLogStore::new(), registry.clone());
        let runner = {
            let swarm = swarm.clone();
            tokio::spawn(async move { swarm.run().await })
        };
        tokio::task::yield_now().await;

        let project = Project::create("live");
        let key = project.discovery_key;
        registry.put_project(project).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !swarm.is_joined(&key) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let (local, _remote) = tokio::io::duplex(1024);
        swarm
            .connect(key, SecretKey::generate().public(), local)
            .await
            .unwrap();
        assert_eq!(swarm.count_peers(&key), 1);

        registry.delete_project(&key).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while swarm.is_joined(&key) || swarm.count_peers(&key) > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        runner.abort();
    }
}
