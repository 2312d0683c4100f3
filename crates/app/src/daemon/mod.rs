//! Long-running replication service.
//!
//! One process per device: it owns the swarm for every project in the
//! local database, accepts TCP connections, dials configured peers, and
//! follows writes the CLI makes to the same database file.

pub mod discovery;
pub mod transport;
pub mod utils;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;

use common::peer::{PeerEvent, PeerId, Swarm};
use common::project::ProjectRegistry;

use crate::database::{Database, DatabaseError, WATCH_INTERVAL};
use crate::state::{AppState, StateError};

use discovery::{BootstrapDiscovery, DialRequest};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const DIAL_TIMEOUT: Duration = Duration::from_secs(15);

type DaemonSwarm = Swarm<Database, Database>;

/// Settings for one daemon run, merged from config.toml and flags.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub listen_port: u16,
    pub max_peers: usize,
    pub connect: Vec<String>,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },
    #[error("failed to install signal handlers: {0}")]
    Signals(std::io::Error),
    #[error("registry error: {0}")]
    Registry(#[from] common::project::RegistryError<DatabaseError>),
}

/// Run until SIGINT or SIGTERM.
pub async fn run(state: AppState, config: DaemonConfig) -> Result<(), DaemonError> {
    let _guards = utils::init_logging(&config.log_level, config.log_dir.as_deref());

    let node = state.load_key()?.public();
    let db = state.database().await?;
    let (discovery, dials) = BootstrapDiscovery::new(config.connect.clone());
    let swarm = Swarm::with_discovery(db.clone(), db.clone(), Arc::new(discovery), config.max_peers);

    let listener = TcpListener::bind(("0.0.0.0", config.listen_port))
        .await
        .map_err(|source| DaemonError::Bind {
            port: config.listen_port,
            source,
        })?;
    let (graceful_waiter, _shutdown_tx, shutdown_rx) =
        utils::graceful_shutdown_blocker().map_err(DaemonError::Signals)?;

    tracing::info!(
        %node,
        port = config.listen_port,
        max_peers = config.max_peers,
        bootstrap = config.connect.len(),
        "replicating"
    );

    let mut handles = Vec::new();
    handles.push(tokio::spawn(log_events(swarm.subscribe(), shutdown_rx.clone())));
    handles.push(tokio::spawn(follow_registry(swarm.clone(), shutdown_rx.clone())));
    handles.push(tokio::spawn(transport::listen(
        listener,
        node,
        swarm.clone(),
        shutdown_rx.clone(),
    )));
    handles.push(tokio::spawn(dial_loop(dials, node, swarm.clone(), shutdown_rx.clone())));
    handles.push(tokio::spawn(db.clone().watch(WATCH_INTERVAL, shutdown_rx)));

    let _ = graceful_waiter.await;
    tracing::info!("shutting down");

    for project in db.list_projects().await? {
        let dropped = swarm.teardown(&project.discovery_key);
        if dropped > 0 {
            tracing::debug!(project = %project.discovery_key.short(), dropped, "closed sessions");
        }
    }

    if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles)).await.is_err() {
        tracing::error!(
            "failed to shut down within {} seconds",
            FINAL_SHUTDOWN_TIMEOUT.as_secs()
        );
    }
    Ok(())
}

async fn follow_registry(swarm: DaemonSwarm, mut shutdown: watch::Receiver<()>) {
    tokio::select! {
        _ = shutdown.changed() => {}
        result = swarm.run() => {
            if let Err(e) = result {
                tracing::error!("swarm stopped: {}", e);
            }
        }
    }
}

async fn log_events(mut events: broadcast::Receiver<PeerEvent>, mut shutdown: watch::Receiver<()>) {
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(PeerEvent::Connected { project, peer }) => {
                tracing::info!(project = %project.short(), %peer, "session started")
            }
            Ok(PeerEvent::Disconnected { project, peer }) => {
                tracing::info!(project = %project.short(), %peer, "session closed")
            }
            Ok(PeerEvent::Changed { project }) => {
                tracing::info!(project = %project.short(), "received entries, projections need a refresh")
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "peer event log lagged")
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Serve dial requests from discovery, one at a time.
///
/// Addresses are remembered with the node that answered, so a request
/// for a peer that already has a session in the project is skipped.
async fn dial_loop(
    mut requests: mpsc::UnboundedReceiver<DialRequest>,
    node: PeerId,
    swarm: DaemonSwarm,
    mut shutdown: watch::Receiver<()>,
) {
    let mut known: HashMap<String, PeerId> = HashMap::new();
    loop {
        let request = tokio::select! {
            _ = shutdown.changed() => return,
            request = requests.recv() => match request {
                Some(request) => request,
                None => return,
            },
        };
        if !should_dial(&swarm, &known, &request) {
            continue;
        }

        let dial = transport::dial(request.addr.as_str(), node, request.project, &swarm);
        match timeout(DIAL_TIMEOUT, dial).await {
            Ok(Ok(hello)) => {
                tracing::debug!(addr = %request.addr, peer = %hello.node, "dialed");
                known.insert(request.addr, hello.node);
            }
            Ok(Err(e)) => tracing::debug!(addr = %request.addr, "dial failed: {}", e),
            Err(_) => tracing::debug!(addr = %request.addr, "dial timed out"),
        }
    }
}

fn should_dial(swarm: &DaemonSwarm, known: &HashMap<String, PeerId>, request: &DialRequest) -> bool {
    if !swarm.is_joined(&request.project) {
        return false;
    }
    if swarm.count_peers(&request.project) >= swarm.max_peers() {
        return false;
    }
    match known.get(&request.addr) {
        Some(peer) => !swarm.peers(&request.project).contains(peer),
        None => true,
    }
}
