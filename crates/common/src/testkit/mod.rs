/// Lightweight test harness for multi-peer integration tests
///
/// This module provides a simple way to create several peers and replicate
/// projects between them in-process, over in-memory pipes, without any
/// network or disk.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::TestNetwork;
///
/// #[tokio::test]
/// async fn test_peer_sync() -> anyhow::Result<()> {
///     let mut net = TestNetwork::new();
///     net.add_peer("alice")?;
///     net.add_peer("bob")?;
///
///     // Alice creates a project, Bob joins it
///     let project = net.share_project("alice", &["bob"]).await?;
///     net.peer("alice")?.write_draft(&project, vec![], "hello").await?;
///
///     net.connect("alice", "bob", &project).await?;
///     net.wait_converged(&project, Duration::from_secs(5)).await?;
///
///     net.shutdown().await?;
///     Ok(())
/// }
/// ```
mod network;
mod peer;

pub use network::TestNetwork;
pub use peer::TestPeer;
