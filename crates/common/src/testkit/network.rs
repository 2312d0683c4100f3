use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};

use super::peer::TestPeer;
use crate::crypto::DiscoveryKey;
use crate::project::ProjectRegistry;

/// Buffer size of the in-memory pipes connecting peers
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// A coordinator for multiple test peers
///
/// TestNetwork manages the lifecycle of multiple peers, wires them together
/// over in-memory pipes and provides utilities for eventual consistency
/// testing.
pub struct TestNetwork {
    /// All peers in the network, indexed by name
    peers: HashMap<String, TestPeer>,
}

impl TestNetwork {
    /// Create a new test network
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Add a new peer to the network
    ///
    /// # Arguments
    /// * `name` - Unique name for this peer
    pub fn add_peer(&mut self, name: impl Into<String>) -> Result<&TestPeer> {
        self.insert(TestPeer::new(name))
    }

    /// Add a peer with a custom per-project peer limit
    pub fn add_peer_with_max_peers(
        &mut self,
        name: impl Into<String>,
        max_peers: usize,
    ) -> Result<&TestPeer> {
        self.insert(TestPeer::with_max_peers(name, max_peers))
    }

    fn insert(&mut self, peer: TestPeer) -> Result<&TestPeer> {
        let name = peer.name.clone();
        if self.peers.contains_key(&name) {
            return Err(anyhow!("Peer '{}' already exists", name));
        }
        Ok(self.peers.entry(name).or_insert(peer))
    }

    /// Get a peer by name
    pub fn peer(&self, name: &str) -> Result<&TestPeer> {
        self.peers
            .get(name)
            .ok_or_else(|| anyhow!("no peer named '{}'", name))
    }

    /// Get all peer names
    pub fn peer_names(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    /// Have `owner` create a project and every other named peer join it.
    /// Returns the project's discovery key.
    pub async fn share_project(&self, owner: &str, others: &[&str]) -> Result<DiscoveryKey> {
        let project = self.peer(owner)?.create_project("shared").await?;
        let invitation = project.invitation();
        for name in others {
            self.peer(name)?.join_project(&invitation).await?;
        }
        Ok(project.discovery_key)
    }

    /// Open a replication session for `project` between two peers
    ///
    /// Both sides are registered with their swarms, so peer limits and
    /// duplicate detection apply exactly as for real connections.
    pub async fn connect(&self, a: &str, b: &str, project: &DiscoveryKey) -> Result<()> {
        let peer_a = self.peer(a)?;
        let peer_b = self.peer(b)?;
        let (pipe_a, pipe_b) = tokio::io::duplex(PIPE_CAPACITY);

        peer_a.swarm().connect(*project, peer_b.id(), pipe_a).await?;
        peer_b.swarm().connect(*project, peer_a.id(), pipe_b).await?;
        tracing::debug!("connected {} <-> {} for {}", a, b, project.short());
        Ok(())
    }

    /// Drop the session between two peers, from `a`'s side
    pub fn disconnect(&self, a: &str, b: &str, project: &DiscoveryKey) -> Result<bool> {
        let peer_b = self.peer(b)?.id();
        Ok(self.peer(a)?.swarm().disconnect(project, &peer_b))
    }

    /// Whether every peer holding `project` has the same set of positions
    pub async fn converged(&self, project: &DiscoveryKey) -> Result<bool> {
        let mut expected = None;
        for peer in self.peers.values() {
            if peer.registry().get_project(project).await?.is_none() {
                continue;
            }
            let positions = peer.positions(project).await?;
            match &expected {
                None => expected = Some(positions),
                Some(expected) if *expected != positions => return Ok(false),
                Some(_) => {}
            }
        }
        Ok(true)
    }

    /// Wait until [`converged`](Self::converged) holds
    pub async fn wait_converged(&self, project: &DiscoveryKey, timeout: Duration) -> Result<()> {
        self.eventually(timeout, || self.converged(project)).await
    }

    /// Remove a peer from the network and stop it
    pub async fn remove_peer(&mut self, name: &str) -> Result<()> {
        if let Some(peer) = self.peers.remove(name) {
            peer.stop().await?;
        }
        Ok(())
    }

    /// Shutdown all peers in the network
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down test network with {} peers", self.peers.len());

        for (name, peer) in self.peers.iter() {
            tracing::debug!("Stopping peer: {}", name);
            if let Err(e) = peer.stop().await {
                tracing::error!("Error stopping peer {}: {}", name, e);
            }
        }

        self.peers.clear();
        Ok(())
    }

    /// Poll a condition until it succeeds or times out
    ///
    /// This is useful for testing eventual consistency across peers.
    ///
    /// # Arguments
    /// * `timeout` - Maximum time to wait
    /// * `condition` - Async function returning Ok(true) when the condition is met
    pub async fn eventually<F, Fut>(&self, timeout: Duration, condition: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<bool>>,
    {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(20);

        loop {
            match condition().await {
                Ok(true) => {
                    tracing::debug!("Eventual condition met after {:?}", start.elapsed());
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => {
                    // transient errors are expected while peers catch up
                    tracing::debug!("Eventual condition check error: {}", e);
                }
            }

            if start.elapsed() > timeout {
                return Err(anyhow!("Condition not met within timeout ({:?})", timeout));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}
