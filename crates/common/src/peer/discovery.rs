use async_trait::async_trait;

use crate::crypto::DiscoveryKey;

/// Rendezvous with other devices replicating the same project.
///
/// Implementations announce interest in a discovery key and hand any
/// connections they establish back to the swarm via
/// [`Swarm::connect`](super::Swarm::connect). The swarm only tells them
/// when to start and stop.
#[async_trait]
pub trait Discovery: Send + Sync + 'static {
    async fn join(&self, discovery_key: DiscoveryKey) -> anyhow::Result<()>;
    async fn leave(&self, discovery_key: DiscoveryKey) -> anyhow::Result<()>;
}

/// Discovery that does nothing. Connections are made by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiscovery;

#[async_trait]
impl Discovery for NoDiscovery {
    async fn join(&self, _discovery_key: DiscoveryKey) -> anyhow::Result<()> {
        Ok(())
    }

    async fn leave(&self, _discovery_key: DiscoveryKey) -> anyhow::Result<()> {
        Ok(())
    }
}
