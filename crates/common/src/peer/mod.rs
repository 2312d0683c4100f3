//! Peer-to-peer replication.
//!
//! - [`protocol`]: wire messages and framing
//! - [`Session`]: the handshake/offer/request/envelope exchange with one
//!   peer for one project
//! - [`Swarm`]: the registry of running sessions, bounded per project and
//!   driven by project lifecycle events
//! - [`Discovery`]: the hook an external rendezvous service plugs into
//!
//! Transports are out of scope; anything that gives an ordered,
//! bidirectional byte stream (`AsyncRead + AsyncWrite`) can carry a
//! session.

mod discovery;
pub mod protocol;
mod session;
mod swarm;

pub use discovery::{Discovery, NoDiscovery};
pub use session::{Ledger, Session, SessionError, SessionState, SessionSummary};
pub use swarm::{Swarm, SwarmError, DEFAULT_MAX_PEERS};

use crate::crypto::{DiscoveryKey, PublicKey};

/// Peers are identified by the public key of their node identity.
pub type PeerId = PublicKey;

/// Notifications relayed up from running sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    Connected { project: DiscoveryKey, peer: PeerId },
    Disconnected { project: DiscoveryKey, peer: PeerId },
    /// A peer's envelope was stored; projections for `project` are stale
    Changed { project: DiscoveryKey },
}

impl PeerEvent {
    pub fn project(&self) -> &DiscoveryKey {
        match self {
            PeerEvent::Connected { project, .. }
            | PeerEvent::Disconnected { project, .. }
            | PeerEvent::Changed { project } => project,
        }
    }
}
