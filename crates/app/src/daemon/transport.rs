//! TCP carriage for replication sessions.
//!
//! A connection opens with a single `Hello` in each direction naming
//! the sender's node and the project it wants. Everything after the two
//! hellos belongs to the session. The hello is read byte-exact (a u32
//! length, then the bincode body) so no session bytes are buffered away
//! before the stream is handed to the swarm.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;

use common::crypto::{DiscoveryKey, PublicKey};
use common::log_store::LogStore;
use common::peer::{PeerId, Swarm, SwarmError};
use common::project::ProjectRegistry;

pub const HELLO_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_HELLO_LENGTH: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub node: PublicKey,
    pub project: DiscoveryKey,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("hello encoding error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("hello of {0} bytes is too long")]
    TooLong(u32),
    #[error("timed out waiting for hello")]
    Timeout,
    #[error("peer answered for project {got}, expected {expected}")]
    WrongProject {
        expected: DiscoveryKey,
        got: DiscoveryKey,
    },
    #[error("connected to ourselves")]
    SelfConnect,
    #[error(transparent)]
    Swarm(#[from] SwarmError),
}

pub async fn write_hello<W: AsyncWrite + Unpin>(writer: &mut W, hello: &Hello) -> Result<(), TransportError> {
    let body = bincode::serialize(hello)?;
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_hello<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Hello, TransportError> {
    let read = async {
        let len = reader.read_u32().await?;
        if len > MAX_HELLO_LENGTH {
            return Err(TransportError::TooLong(len));
        }
        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body).await?;
        let hello: Hello = bincode::deserialize(&body)?;
        Ok::<_, TransportError>(hello)
    };
    tokio::time::timeout(HELLO_TIMEOUT, read)
        .await
        .map_err(|_| TransportError::Timeout)?
}

/// Exchange hellos as the accepting side and hand the stream to the swarm.
///
/// The accepting side answers with the project the dialer asked for;
/// the swarm refuses it if that project is unknown here.
pub async fn accept<S, L, R>(
    mut stream: S,
    node: PeerId,
    swarm: &Swarm<L, R>,
) -> Result<Hello, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    L: LogStore,
    R: ProjectRegistry,
{
    let theirs = read_hello(&mut stream).await?;
    if theirs.node == node {
        return Err(TransportError::SelfConnect);
    }
    write_hello(
        &mut stream,
        &Hello {
            node,
            project: theirs.project,
        },
    )
    .await?;
    swarm.connect(theirs.project, theirs.node, stream).await?;
    Ok(theirs)
}

/// Exchange hellos as the dialing side and hand the stream to the swarm.
pub async fn initiate<S, L, R>(
    mut stream: S,
    node: PeerId,
    project: DiscoveryKey,
    swarm: &Swarm<L, R>,
) -> Result<Hello, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    L: LogStore,
    R: ProjectRegistry,
{
    write_hello(&mut stream, &Hello { node, project }).await?;
    let theirs = read_hello(&mut stream).await?;
    if theirs.project != project {
        return Err(TransportError::WrongProject {
            expected: project,
            got: theirs.project,
        });
    }
    if theirs.node == node {
        return Err(TransportError::SelfConnect);
    }
    swarm.connect(project, theirs.node, stream).await?;
    Ok(theirs)
}

/// Open a TCP connection to `addr` and replicate `project` over it.
pub async fn dial<A, L, R>(
    addr: A,
    node: PeerId,
    project: DiscoveryKey,
    swarm: &Swarm<L, R>,
) -> Result<Hello, TransportError>
where
    A: ToSocketAddrs,
    L: LogStore,
    R: ProjectRegistry,
{
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    initiate(stream, node, project, swarm).await
}

/// Accept connections until shutdown, one task per handshake.
pub async fn listen<L, R>(
    listener: TcpListener,
    node: PeerId,
    swarm: Swarm<L, R>,
    mut shutdown: watch::Receiver<()>,
) where
    L: LogStore,
    R: ProjectRegistry,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                        continue;
                    }
                };
                let _ = stream.set_nodelay(true);
                let swarm = swarm.clone();
                tokio::spawn(async move {
                    match accept(stream, node, &swarm).await {
                        Ok(hello) => tracing::debug!(
                            %remote,
                            peer = %hello.node,
                            project = %hello.project.short(),
                            "accepted connection"
                        ),
                        Err(e) => tracing::debug!(%remote, "refused connection: {}", e),
                    }
                });
            }
        }
    }
    tracing::debug!("listener stopped");
}

#[cfg(test)]
mod test {
    use common::crypto::SecretKey;
    use common::log_store::MemoryLogStore;
    use common::project::{MemoryProjectRegistry, Project};

    use super::*;

    type TestSwarm = Swarm<MemoryLogStore, MemoryProjectRegistry>;

    async fn swarm_with(project: Option<&Project>) -> TestSwarm {
        let registry = MemoryProjectRegistry::new();
        if let Some(project) = project {
            registry.put_project(project.clone()).await.unwrap();
        }
        Swarm::new(MemoryLogStore::new(), registry)
    }

    #[tokio::test]
    async fn test_hello_exchange_registers_both_sides() {
        let project = Project::create("shared");
        let key = project.discovery_key;
        let (a_node, b_node) = (SecretKey::generate().public(), SecretKey::generate().public());
        let a = swarm_with(Some(&project)).await;
        let b = swarm_with(Some(&project)).await;

        let (a_stream, b_stream) = tokio::io::duplex(64 * 1024);
        let b_clone = b.clone();
        let accepting = tokio::spawn(async move { accept(b_stream, b_node, &b_clone).await });
        let theirs = initiate(a_stream, a_node, key, &a).await.unwrap();
        let ours = accepting.await.unwrap().unwrap();

        assert_eq!(theirs.node, b_node);
        assert_eq!(ours.node, a_node);
        assert_eq!(a.peers(&key), vec![b_node]);
        assert_eq!(b.peers(&key), vec![a_node]);
    }

    #[tokio::test]
    async fn test_unknown_project_is_refused_by_acceptor() {
        let project = Project::create("only on a");
        let a = swarm_with(Some(&project)).await;
        let b = swarm_with(None).await;
        let b_node = SecretKey::generate().public();

        let (a_stream, b_stream) = tokio::io::duplex(1024);
        let b_clone = b.clone();
        let accepting = tokio::spawn(async move { accept(b_stream, b_node, &b_clone).await });
        let _ = initiate(a_stream, SecretKey::generate().public(), project.discovery_key, &a).await;

        assert!(matches!(
            accepting.await.unwrap(),
            Err(TransportError::Swarm(SwarmError::UnknownProject(_)))
        ));
        assert_eq!(b.count_peers(&project.discovery_key), 0);
    }

    #[tokio::test]
    async fn test_oversized_hello_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_u32(MAX_HELLO_LENGTH + 1).await.unwrap();
        assert!(matches!(
            read_hello(&mut b).await,
            Err(TransportError::TooLong(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        let (_a, mut b) = tokio::io::duplex(1024);
        assert!(matches!(
            read_hello(&mut b).await,
            Err(TransportError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_tcp_dial_and_listen() {
        let project = Project::create("over tcp");
        let key = project.discovery_key;
        let a = swarm_with(Some(&project)).await;
        let b = swarm_with(Some(&project)).await;
        let (a_node, b_node) = (SecretKey::generate().public(), SecretKey::generate().public());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = watch::channel(());
        let server = tokio::spawn(listen(listener, b_node, b.clone(), stopped));

        let hello = dial(addr, a_node, key, &a).await.unwrap();
        assert_eq!(hello.node, b_node);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while b.count_peers(&key) == 0 {
            assert!(tokio::time::Instant::now() < deadline, "listener never registered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let _ = stop.send(());
        server.await.unwrap();
    }
}
