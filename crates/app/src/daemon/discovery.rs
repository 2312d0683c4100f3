use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use common::crypto::DiscoveryKey;
use common::peer::Discovery;

pub const REDIAL_INTERVAL: Duration = Duration::from_secs(30);

/// Ask the dial loop to open a connection to `addr` for `project`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialRequest {
    pub addr: String,
    pub project: DiscoveryKey,
}

/// Discovery against a fixed list of configured addresses.
///
/// Every joined project periodically asks for a dial to each address;
/// leaving a project stops its requests.
pub struct BootstrapDiscovery {
    peers: Vec<String>,
    interval: Duration,
    dials: mpsc::UnboundedSender<DialRequest>,
    tasks: Mutex<HashMap<DiscoveryKey, AbortHandle>>,
}

impl BootstrapDiscovery {
    pub fn new(peers: Vec<String>) -> (Self, mpsc::UnboundedReceiver<DialRequest>) {
        Self::with_interval(peers, REDIAL_INTERVAL)
    }

    pub fn with_interval(
        peers: Vec<String>,
        interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<DialRequest>) {
        let (dials, requests) = mpsc::unbounded_channel();
        let discovery = Self {
            peers,
            interval,
            dials,
            tasks: Mutex::new(HashMap::new()),
        };
        (discovery, requests)
    }

    pub fn joined(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl Drop for BootstrapDiscovery {
    fn drop(&mut self) {
        for (_, task) in self.tasks.lock().drain() {
            task.abort();
        }
    }
}

#[async_trait]
impl Discovery for BootstrapDiscovery {
    async fn join(&self, project: DiscoveryKey) -> anyhow::Result<()> {
        if self.peers.is_empty() {
            return Ok(());
        }
        let peers = self.peers.clone();
        let dials = self.dials.clone();
        let mut ticker = tokio::time::interval(self.interval);
        let task = tokio::spawn(async move {
            loop {
                ticker.tick().await;
                for addr in &peers {
                    let request = DialRequest {
                        addr: addr.clone(),
                        project,
                    };
                    if dials.send(request).is_err() {
                        return;
                    }
                }
            }
        });
        if let Some(previous) = self.tasks.lock().insert(project, task.abort_handle()) {
            previous.abort();
        }
        Ok(())
    }

    async fn leave(&self, project: DiscoveryKey) -> anyhow::Result<()> {
        if let Some(task) = self.tasks.lock().remove(&project) {
            task.abort();
        }
        Ok(())
    }
}
