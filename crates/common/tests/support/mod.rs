//! Shared setup for replication integration tests
#![allow(dead_code)]

use std::time::Duration;

use common::testkit::TestNetwork;

/// Upper bound on how long any convergence in these tests may take
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// Route `tracing` output through the test harness. Safe to call from
/// every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A network with one peer per name
pub fn network(names: &[&str]) -> TestNetwork {
    init_tracing();
    let mut net = TestNetwork::new();
    for name in names {
        net.add_peer(*name).unwrap();
    }
    net
}
