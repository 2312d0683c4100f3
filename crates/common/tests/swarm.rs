mod support;

use common::crypto::SecretKey;
use common::peer::SwarmError;
use common::project::ProjectRegistry;

use support::{network, SYNC_TIMEOUT};

#[tokio::test]
async fn test_second_connection_from_same_peer_is_refused() {
    let mut net = network(&["alice", "bob"]);
    let project = net.share_project("alice", &["bob"]).await.unwrap();
    net.connect("alice", "bob", &project).await.unwrap();

    let err = net.connect("alice", "bob", &project).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SwarmError>(),
        Some(SwarmError::Duplicate { .. })
    ));
    assert_eq!(net.peer("alice").unwrap().swarm().count_peers(&project), 1);

    net.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fourth_peer_is_turned_away() {
    let mut net = network(&["hub", "p1", "p2", "p3", "p4"]);
    let project = net
        .share_project("hub", &["p1", "p2", "p3", "p4"])
        .await
        .unwrap();
    for name in ["p1", "p2", "p3"] {
        net.connect("hub", name, &project).await.unwrap();
    }

    let err = net.connect("hub", "p4", &project).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SwarmError>(),
        Some(SwarmError::Full { max: 3, .. })
    ));
    let hub = net.peer("hub").unwrap();
    assert_eq!(hub.swarm().count_peers(&project), 3);

    // freeing a slot lets the next peer in
    assert!(net.disconnect("hub", "p1", &project).unwrap());
    net.eventually(SYNC_TIMEOUT, || async {
        Ok::<_, anyhow::Error>(net.peer("p1")?.swarm().count_peers(&project) == 0)
    })
    .await
    .unwrap();
    net.connect("hub", "p4", &project).await.unwrap();
    assert_eq!(hub.swarm().count_peers(&project), 3);

    net.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_custom_peer_limit() {
    let mut net = network(&["a", "b"]);
    net.add_peer_with_max_peers("solo", 1).unwrap();
    let project = net.share_project("solo", &["a", "b"]).await.unwrap();

    net.connect("solo", "a", &project).await.unwrap();
    assert!(net.connect("solo", "b", &project).await.is_err());

    net.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deleting_project_tears_down_sessions() {
    let mut net = network(&["alice", "bob", "carol"]);
    let project = net.share_project("alice", &["bob", "carol"]).await.unwrap();
    let alice = net.peer("alice").unwrap();
    let runner = {
        let swarm = alice.swarm().clone();
        tokio::spawn(async move { swarm.run().await })
    };

    net.connect("alice", "bob", &project).await.unwrap();
    net.connect("alice", "carol", &project).await.unwrap();
    assert_eq!(alice.swarm().count_peers(&project), 2);

    alice.registry().delete_project(&project).await.unwrap();
    net.eventually(SYNC_TIMEOUT, || async {
        Ok::<_, anyhow::Error>(alice.swarm().count_peers(&project) == 0)
    })
    .await
    .unwrap();

    // the remote ends see their streams close
    net.eventually(SYNC_TIMEOUT, || async {
        Ok::<_, anyhow::Error>(
            net.peer("bob")?.swarm().count_peers(&project) == 0
                && net.peer("carol")?.swarm().count_peers(&project) == 0,
        )
    })
    .await
    .unwrap();

    // and nothing new can start
    let (local, _remote) = tokio::io::duplex(1024);
    assert!(matches!(
        alice
            .swarm()
            .connect(project, SecretKey::generate().public(), local)
            .await,
        Err(SwarmError::Deleted(_))
    ));

    runner.abort();
    net.shutdown().await.unwrap();
}
