//! One replication session with one peer for one project.
//!
//! ```text
//!   Handshaking ──ok──▶ Ready ──stream closed──▶ Closed
//!        │                                          ▲
//!        └───────────── bad handshake ──────────────┘
//! ```
//!
//! While `Ready` three things run side by side:
//!
//! - the writer task, draining an unbounded queue onto the stream;
//! - the offer task, which offers every position the store holds once and
//!   then keeps offering new appends as they land;
//! - the reader loop on the calling task, which answers offers with
//!   requests, requests with envelopes, and stores envelopes.
//!
//! Pulls from the peer run one request at a time per log: an offer
//! raises that log's target, and the next index is only requested once
//! the peer has answered the previous one. Positions requested from, or
//! sent by, this peer are tracked in a per-session [`Ledger`] so they are
//! never offered straight back. Nothing in the ledger outlives the
//! session.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;

use super::protocol::{
    FramingError, Handshake, HandshakeError, Inbound, Message, MessageSink, MessageStream,
};
use super::{PeerEvent, PeerId};
use crate::crypto::{DiscoveryKey, PublicKey, Secret};
use crate::envelope::{Envelope, EnvelopeError, LogPosition};
use crate::log_store::{LogStore, LogStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Ready,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("stream closed during handshake")]
    ClosedDuringHandshake,
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("writer task failed: {0}")]
    Writer(String),
}

/// Counters reported when a session ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub offered: u64,
    pub requested: u64,
    pub served: u64,
    pub received: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Stats {
    offered: AtomicU64,
    requested: AtomicU64,
    served: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl Stats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            offered: self.offered.load(Ordering::Relaxed),
            requested: self.requested.load(Ordering::Relaxed),
            served: self.served.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Pull state for one of the peer's logs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Pull {
    /// highest index the peer has offered
    target: u64,
    /// the one request awaiting an answer
    in_flight: Option<u64>,
}

/// What this session has pulled from, or been handed by, the peer.
#[derive(Debug, Default)]
pub struct Ledger {
    pulls: HashMap<PublicKey, Pull>,
    /// sent to us by the peer
    received: HashSet<LogPosition>,
}

impl Ledger {
    /// Whether offering `position` to the peer would just echo it back.
    pub fn suppresses(&self, position: &LogPosition) -> bool {
        self.in_flight(position) || self.received.contains(position)
    }

    /// Requests awaiting an answer, at most one per log.
    pub fn pending(&self) -> usize {
        self.pulls
            .values()
            .filter(|pull| pull.in_flight.is_some())
            .count()
    }

    fn in_flight(&self, position: &LogPosition) -> bool {
        self.pulls
            .get(&position.log)
            .and_then(|pull| pull.in_flight)
            == Some(position.index)
    }

    /// Record an offer. `next` is the first index missing locally.
    ///
    /// Returns the index to request now, if any. An offer naming the
    /// index already in flight asks for it again.
    fn offered(&mut self, offer: LogPosition, next: u64) -> Option<u64> {
        let pull = self.pulls.entry(offer.log).or_default();
        pull.target = pull.target.max(offer.index);
        if pull.in_flight == Some(offer.index) && offer.index == next {
            return Some(next);
        }
        self.advance(offer.log, next)
    }

    /// The peer answered for `position`, whatever the store made of it.
    fn settled(&mut self, position: &LogPosition) {
        if let Some(pull) = self.pulls.get_mut(&position.log) {
            if pull.in_flight == Some(position.index) {
                pull.in_flight = None;
            }
        }
    }

    /// Claim `next` for a request unless one is already out or the log
    /// has caught up with the peer's offers.
    fn advance(&mut self, log: PublicKey, next: u64) -> Option<u64> {
        let pull = self.pulls.get_mut(&log)?;
        match pull.in_flight {
            // the log moved past it through another peer
            Some(index) if index < next => pull.in_flight = None,
            Some(_) => return None,
            None => {}
        }
        if next > pull.target {
            return None;
        }
        pull.in_flight = Some(next);
        Some(next)
    }
}

type SharedLedger = Arc<Mutex<Ledger>>;

pub struct Session<L: LogStore> {
    project: DiscoveryKey,
    replication_key: Secret,
    peer: PeerId,
    store: L,
    events: broadcast::Sender<PeerEvent>,
    state: watch::Sender<SessionState>,
}

impl<L: LogStore> Session<L> {
    pub fn new(
        replication_key: Secret,
        peer: PeerId,
        store: L,
        events: broadcast::Sender<PeerEvent>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Handshaking);
        Self {
            project: replication_key.discovery_key(),
            replication_key,
            peer,
            store,
            events,
            state,
        }
    }

    pub fn project(&self) -> &DiscoveryKey {
        &self.project
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Drive the session over a stream until either side closes it.
    pub async fn run<R, W>(self, reader: R, writer: W) -> Result<SessionSummary, SessionError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut stream = MessageStream::new(reader);
        let mut sink = MessageSink::new(writer);

        if let Err(e) = self.handshake(&mut sink, &mut stream).await {
            tracing::warn!(
                project = %self.project.short(),
                peer = %self.peer,
                "handshake failed: {}",
                e
            );
            self.state.send_replace(SessionState::Closed);
            return Err(e);
        }

        self.state.send_replace(SessionState::Ready);
        tracing::info!(project = %self.project.short(), peer = %self.peer, "session ready");

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let ledger: SharedLedger = Arc::default();
        let stats = Arc::new(Stats::default());

        // both sets abort their tasks when dropped, so cancelling the
        // session future also stops the writer and the offer feed
        let mut writer = JoinSet::new();
        writer.spawn(write_loop(sink, outbound_rx));
        let mut background = JoinSet::new();
        background.spawn(offer_loop(
            self.store.clone(),
            self.project,
            outbound.clone(),
            ledger.clone(),
            stats.clone(),
        ));

        let exchange = Exchange {
            project: self.project,
            peer: self.peer,
            store: self.store.clone(),
            outbound,
            ledger,
            stats: stats.clone(),
            events: self.events.clone(),
        };

        let result = tokio::select! {
            read = exchange.read_loop(&mut stream) => read,
            Some(written) = writer.join_next() => match written {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SessionError::Framing(e)),
                Err(e) => Err(SessionError::Writer(e.to_string())),
            },
        };

        background.abort_all();
        writer.abort_all();
        self.state.send_replace(SessionState::Closed);

        let summary = stats.summary();
        tracing::info!(
            project = %self.project.short(),
            peer = %self.peer,
            offered = summary.offered,
            requested = summary.requested,
            served = summary.served,
            received = summary.received,
            dropped = summary.dropped,
            "session closed"
        );
        result.map(|()| summary)
    }

    async fn handshake<R, W>(
        &self,
        sink: &mut MessageSink<W>,
        stream: &mut MessageStream<R>,
    ) -> Result<(), SessionError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        sink.send(&Message::Handshake(Handshake::new(&self.replication_key)))
            .await?;
        match stream.recv().await? {
            Some(Inbound::Message(Message::Handshake(theirs))) => {
                theirs.verify(&self.replication_key)?;
                Ok(())
            }
            Some(Inbound::Message(other)) => Err(HandshakeError::Unexpected(other.kind()).into()),
            Some(Inbound::Invalid(_)) => Err(HandshakeError::Unexpected("invalid frame").into()),
            None => Err(SessionError::ClosedDuringHandshake),
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut sink: MessageSink<W>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) -> Result<(), FramingError> {
    while let Some(msg) = outbound.recv().await {
        sink.send(&msg).await?;
    }
    sink.close().await
}

/// Offer everything once, then follow the store's appends.
async fn offer_loop<L: LogStore>(
    store: L,
    project: DiscoveryKey,
    outbound: mpsc::UnboundedSender<Message>,
    ledger: SharedLedger,
    stats: Arc<Stats>,
) {
    // subscribe before the sweep so nothing appended during it is missed
    let mut appended = store.subscribe();

    'sweep: loop {
        let mut offers = store.list_offers(project);
        while let Some(offer) = offers.next().await {
            let position = match offer {
                Ok(position) => position,
                Err(e) => {
                    tracing::error!(project = %project.short(), "failed to list offers: {}", e);
                    break;
                }
            };
            if !send_offer(&outbound, &ledger, &stats, position) {
                return;
            }
        }

        loop {
            match appended.recv().await {
                Ok(event) if event.project == project => {
                    if !send_offer(&outbound, &ledger, &stats, event.position) {
                        return;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(project = %project.short(), skipped, "offer feed lagged, resweeping");
                    continue 'sweep;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

/// Returns false once the writer is gone.
fn send_offer(
    outbound: &mpsc::UnboundedSender<Message>,
    ledger: &SharedLedger,
    stats: &Stats,
    position: LogPosition,
) -> bool {
    if ledger.lock().suppresses(&position) {
        return true;
    }
    Stats::bump(&stats.offered);
    outbound.send(Message::Offer(position)).is_ok()
}

struct Exchange<L: LogStore> {
    project: DiscoveryKey,
    peer: PeerId,
    store: L,
    outbound: mpsc::UnboundedSender<Message>,
    ledger: SharedLedger,
    stats: Arc<Stats>,
    events: broadcast::Sender<PeerEvent>,
}

impl<L: LogStore> Exchange<L> {
    async fn read_loop<R: AsyncRead + Unpin>(
        &self,
        stream: &mut MessageStream<R>,
    ) -> Result<(), SessionError> {
        while let Some(inbound) = stream.recv().await? {
            match inbound {
                Inbound::Message(Message::Offer(position)) => self.on_offer(position).await,
                Inbound::Message(Message::Request(position)) => self.on_request(position).await,
                Inbound::Message(Message::Envelope(envelope)) => self.on_envelope(envelope).await,
                Inbound::Message(Message::Handshake(_)) => {
                    tracing::warn!(peer = %self.peer, "ignoring repeated handshake");
                    Stats::bump(&self.stats.dropped);
                }
                Inbound::Invalid(raw) => {
                    tracing::warn!(peer = %self.peer, len = raw.len(), "invalid message");
                    Stats::bump(&self.stats.dropped);
                }
            }
        }
        Ok(())
    }

    /// Raise the log's target to the offered index and start pulling
    /// from the first index we are missing.
    async fn on_offer(&self, offer: LogPosition) {
        let Some(next) = self.next_index(&offer.log).await else {
            return;
        };
        let claimed = self.ledger.lock().offered(offer, next);
        if let Some(index) = claimed {
            self.request(LogPosition::new(offer.log, index));
        }
    }

    /// Request the log's next missing index if the peer offered it.
    async fn pull_next(&self, log: PublicKey) {
        let Some(next) = self.next_index(&log).await else {
            return;
        };
        let claimed = self.ledger.lock().advance(log, next);
        if let Some(index) = claimed {
            self.request(LogPosition::new(log, index));
        }
    }

    async fn next_index(&self, log: &PublicKey) -> Option<u64> {
        match self.store.log_head(&self.project, log).await {
            Ok(None) => Some(0),
            Ok(Some(head)) => head.checked_add(1),
            Err(e) => {
                tracing::error!(peer = %self.peer, %log, "failed to read log head: {}", e);
                None
            }
        }
    }

    fn request(&self, position: LogPosition) {
        tracing::debug!(peer = %self.peer, %position, "request");
        Stats::bump(&self.stats.requested);
        let _ = self.outbound.send(Message::Request(position));
    }

    async fn on_request(&self, position: LogPosition) {
        match self
            .store
            .get_envelope(&self.project, &position.log, position.index)
            .await
        {
            Ok(Some(envelope)) => {
                Stats::bump(&self.stats.served);
                let _ = self.outbound.send(Message::Envelope(envelope));
            }
            // the peer will get it elsewhere or ask again
            Ok(None) => tracing::debug!(peer = %self.peer, %position, "request for missing envelope"),
            Err(e) => tracing::error!(peer = %self.peer, %position, "failed to read envelope: {}", e),
        }
    }

    async fn on_envelope(&self, envelope: Envelope) {
        let position = envelope.position();
        {
            let mut ledger = self.ledger.lock();
            ledger.received.insert(position);
            ledger.settled(&position);
        }

        match self.store.put_envelope(&self.project, envelope).await {
            Ok(digest) => {
                Stats::bump(&self.stats.received);
                tracing::debug!(peer = %self.peer, %position, digest = %digest.short(), "stored");
                let _ = self.events.send(PeerEvent::Changed {
                    project: self.project,
                });
                self.pull_next(position.log).await;
            }
            // the head moved under us; carry on from wherever it is now
            Err(e @ LogStoreError::OutOfOrder { .. }) => {
                Stats::bump(&self.stats.dropped);
                self.log_rejection(position, e);
                self.pull_next(position.log).await;
            }
            // a bad envelope is only asked for again when the peer re-offers it
            Err(e) => {
                Stats::bump(&self.stats.dropped);
                self.log_rejection(position, e);
            }
        }
    }

    fn log_rejection(&self, position: LogPosition, error: LogStoreError<L::Error>) {
        match error {
            LogStoreError::Invalid(EnvelopeError::SignatureInvalid(_)) => tracing::warn!(
                peer = %self.peer,
                %position,
                "dropping envelope with bad signature, possible tampering"
            ),
            LogStoreError::OutOfOrder { expected, .. } => tracing::debug!(
                peer = %self.peer,
                %position,
                expected,
                "dropping out of order envelope"
            ),
            e @ (LogStoreError::Invalid(_) | LogStoreError::ProjectMismatch { .. }) => {
                tracing::warn!(peer = %self.peer, %position, "dropping envelope: {}", e)
            }
            LogStoreError::Provider(e) => {
                tracing::error!(peer = %self.peer, %position, "store failed: {}", e)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::task::JoinHandle;

    use super::*;
    use crate::crypto::SecretKey;
    use crate::entry::Entry;
    use crate::log_store::{append, MemoryLogStore};

    fn spawn_pair(
        key: &Secret,
        left: &MemoryLogStore,
        right: &MemoryLogStore,
    ) -> (
        JoinHandle<Result<SessionSummary, SessionError>>,
        JoinHandle<Result<SessionSummary, SessionError>>,
        broadcast::Receiver<PeerEvent>,
    ) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (events, events_rx) = broadcast::channel(64);
        let left = Session::new(key.clone(), SecretKey::generate().public(), left.clone(), events.clone());
        let right = Session::new(key.clone(), SecretKey::generate().public(), right.clone(), events);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        (
            tokio::spawn(left.run(ar, aw)),
            tokio::spawn(right.run(br, bw)),
            events_rx,
        )
    }

    #[tokio::test]
    async fn test_session_pulls_missing_log() {
        let key = Secret::generate();
        let project = key.discovery_key();
        let author = SecretKey::generate();
        let left = MemoryLogStore::new();
        let right = MemoryLogStore::new();

        for i in 0..5 {
            append(&left, &project, &author, Entry::draft(project, vec![], format!("{i}")))
                .await
                .unwrap();
        }

        let (l, r, mut events) = spawn_pair(&key, &left, &right);
        tokio::time::timeout(Duration::from_secs(5), async {
            while right.log_head(&project, &author.public()).await.unwrap() != Some(4) {
                let _ = events.recv().await;
            }
        })
        .await
        .unwrap();

        l.abort();
        let summary = r.await.unwrap().unwrap();
        assert_eq!(summary.received, 5);
        assert_eq!(summary.dropped, 0);
    }

    #[tokio::test]
    async fn test_wrong_key_fails_handshake() {
        let left_key = Secret::generate();
        let right_key = Secret::generate();
        let (a, b) = tokio::io::duplex(4096);
        let (events, _) = broadcast::channel(8);

        let left = Session::new(left_key, SecretKey::generate().public(), MemoryLogStore::new(), events.clone());
        let right = Session::new(right_key, SecretKey::generate().public(), MemoryLogStore::new(), events);
        let state = left.watch_state();
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);

        let (l, r) = tokio::join!(left.run(ar, aw), right.run(br, bw));
        assert!(matches!(l, Err(SessionError::Handshake(HandshakeError::WrongProject(_)))));
        assert!(matches!(r, Err(SessionError::Handshake(_))));
        assert_eq!(*state.borrow(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_offer_for_held_log_requests_nothing() {
        let key = Secret::generate();
        let project = key.discovery_key();
        let author = SecretKey::generate();
        let left = MemoryLogStore::new();
        let right = MemoryLogStore::new();

        let envelope = append(&left, &project, &author, Entry::draft(project, vec![], "same"))
            .await
            .unwrap();
        right.put_envelope(&project, envelope).await.unwrap();

        let (l, r, _events) = spawn_pair(&key, &left, &right);
        tokio::time::sleep(Duration::from_millis(200)).await;
        l.abort();
        let summary = r.await.unwrap().unwrap();
        assert_eq!(summary.requested, 0);
        assert_eq!(summary.received, 0);
    }

    #[test]
    fn test_ledger_suppresses_both_directions() {
        let mut ledger = Ledger::default();
        let a = LogPosition::new(SecretKey::generate().public(), 0);
        let b = LogPosition::new(SecretKey::generate().public(), 1);
        assert!(!ledger.suppresses(&a));
        assert_eq!(ledger.offered(a, 0), Some(0));
        ledger.received.insert(b);
        assert!(ledger.suppresses(&a));
        assert!(ledger.suppresses(&b));
        assert_eq!(ledger.pending(), 1);
    }

    #[test]
    fn test_ledger_pulls_one_index_at_a_time() {
        let mut ledger = Ledger::default();
        let log = SecretKey::generate().public();

        assert_eq!(ledger.offered(LogPosition::new(log, u64::MAX), 0), Some(0));
        // further offers only move the target while a request is out
        assert_eq!(ledger.offered(LogPosition::new(log, 3), 0), None);
        assert_eq!(ledger.pending(), 1);

        ledger.settled(&LogPosition::new(log, 0));
        assert_eq!(ledger.advance(log, 1), Some(1));
        assert_eq!(ledger.advance(log, 1), None);

        // stored through another peer meanwhile
        assert_eq!(ledger.advance(log, 5), Some(5));
        assert_eq!(ledger.pulls[&log].target, u64::MAX);
    }

    #[test]
    fn test_ledger_stops_at_the_offered_index() {
        let mut ledger = Ledger::default();
        let log = SecretKey::generate().public();

        assert_eq!(ledger.offered(LogPosition::new(log, 1), 0), Some(0));
        ledger.settled(&LogPosition::new(log, 0));
        assert_eq!(ledger.advance(log, 1), Some(1));
        ledger.settled(&LogPosition::new(log, 1));
        assert_eq!(ledger.advance(log, 2), None);
        assert_eq!(ledger.pending(), 0);
        // an offer we already hold requests nothing
        assert_eq!(ledger.offered(LogPosition::new(log, 1), 2), None);
    }

    /// Stand in for the remote end of a session: handshake, then hand
    /// back the raw message halves.
    async fn remote_peer(
        key: &Secret,
        store: &MemoryLogStore,
    ) -> (
        MessageSink<tokio::io::WriteHalf<tokio::io::DuplexStream>>,
        MessageStream<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
        JoinHandle<Result<SessionSummary, SessionError>>,
    ) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (events, _) = broadcast::channel(64);
        let session = Session::new(key.clone(), SecretKey::generate().public(), store.clone(), events);
        let (lr, lw) = tokio::io::split(local);
        let running = tokio::spawn(session.run(lr, lw));

        let (rr, rw) = tokio::io::split(remote);
        let mut sink = MessageSink::new(rw);
        let mut stream = MessageStream::new(rr);
        sink.send(&Message::Handshake(Handshake::new(key))).await.unwrap();
        match stream.recv().await.unwrap() {
            Some(Inbound::Message(Message::Handshake(_))) => {}
            other => panic!("expected a handshake, got {:?}", other),
        }
        (sink, stream, running)
    }

    async fn next_request<R: AsyncRead + Unpin>(
        stream: &mut MessageStream<R>,
        wait: Duration,
    ) -> Option<LogPosition> {
        tokio::time::timeout(wait, async {
            loop {
                match stream.recv().await.unwrap() {
                    Some(Inbound::Message(Message::Request(position))) => return position,
                    Some(_) => continue,
                    None => panic!("session closed"),
                }
            }
        })
        .await
        .ok()
    }

    #[tokio::test]
    async fn test_rejected_envelope_is_requested_again_on_reoffer() {
        let key = Secret::generate();
        let project = key.discovery_key();
        let author = SecretKey::generate();
        let store = MemoryLogStore::new();
        let (mut sink, mut stream, running) = remote_peer(&key, &store).await;

        let genuine = crate::envelope::seal(Entry::draft(project, vec![], "genuine"), &author, 0).unwrap();
        let position = genuine.position();
        let mut corrupted = genuine.clone();
        if let Entry::Draft(draft) = &mut corrupted.entry {
            draft.text = "corrupted".to_string();
        }

        sink.send(&Message::Offer(position)).await.unwrap();
        assert_eq!(next_request(&mut stream, Duration::from_secs(5)).await, Some(position));
        sink.send(&Message::Envelope(corrupted)).await.unwrap();

        sink.send(&Message::Offer(position)).await.unwrap();
        assert_eq!(next_request(&mut stream, Duration::from_secs(5)).await, Some(position));
        sink.send(&Message::Envelope(genuine)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.log_head(&project, &author.public()).await.unwrap() != Some(0) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        running.abort();
    }

    #[tokio::test]
    async fn test_huge_offer_requests_one_index_at_a_time() {
        let key = Secret::generate();
        let project = key.discovery_key();
        let author = SecretKey::generate();
        let store = MemoryLogStore::new();
        let (mut sink, mut stream, running) = remote_peer(&key, &store).await;

        let log = author.public();
        sink.send(&Message::Offer(LogPosition::new(log, u64::MAX))).await.unwrap();
        assert_eq!(
            next_request(&mut stream, Duration::from_secs(5)).await,
            Some(LogPosition::new(log, 0))
        );
        assert_eq!(next_request(&mut stream, Duration::from_millis(200)).await, None);

        // answering moves the pull on by exactly one
        let first = crate::envelope::seal(Entry::draft(project, vec![], "0"), &author, 0).unwrap();
        sink.send(&Message::Envelope(first)).await.unwrap();
        assert_eq!(
            next_request(&mut stream, Duration::from_secs(5)).await,
            Some(LogPosition::new(log, 1))
        );
        assert_eq!(next_request(&mut stream, Duration::from_millis(200)).await, None);
        running.abort();
    }
}
