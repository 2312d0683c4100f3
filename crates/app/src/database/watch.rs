//! Picks up rows written by other processes sharing the database file.
//!
//! The CLI writes straight to SQLite while the daemon runs, so the
//! daemon polls project rows and log heads and replays what it finds
//! onto its own broadcast channels. Changes this process made itself
//! may be announced a second time; subscribers treat both events as
//! idempotent.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::watch;

use common::crypto::{DiscoveryKey, PublicKey};
use common::log_store::{Appended, LogStore, LogStoreError};
use common::project::{ProjectEvent, ProjectRegistry, RegistryError};

use super::{Database, DatabaseError};

pub const WATCH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error(transparent)]
    Store(#[from] LogStoreError<DatabaseError>),
    #[error(transparent)]
    Registry(#[from] RegistryError<DatabaseError>),
    #[error("corrupt envelope in database: {0}")]
    Envelope(String),
}

/// What the watcher has already seen.
#[derive(Debug, Default)]
pub struct Watermarks {
    primed: bool,
    /// project -> deleted flag
    projects: HashMap<DiscoveryKey, bool>,
    heads: HashMap<(DiscoveryKey, PublicKey), u64>,
}

impl Database {
    /// Compare the database with `seen` and announce the difference.
    ///
    /// The first call only records the current state. Returns how many
    /// events were sent.
    pub async fn poll_external(&self, seen: &mut Watermarks) -> Result<usize, WatchError> {
        let mut sent = 0;
        for project in self.list_projects().await? {
            let key = project.discovery_key;
            let previous = seen.projects.insert(key, project.deleted);
            if seen.primed {
                let event = match (previous, project.deleted) {
                    (None, false) => Some(ProjectEvent::Created(key)),
                    (Some(false), true) | (None, true) => Some(ProjectEvent::Deleted(key)),
                    _ => None,
                };
                if let Some(event) = event {
                    let _ = self.projects.send(event);
                    sent += 1;
                }
            }
            if project.deleted {
                continue;
            }

            for (log, head) in self.list_logs(&key).await? {
                let from = match seen.heads.insert((key, log), head) {
                    Some(known) if known >= head => continue,
                    Some(known) => known + 1,
                    None => 0,
                };
                if !seen.primed {
                    continue;
                }
                for index in from..=head {
                    let Some(envelope) = self.get_envelope(&key, &log, index).await? else {
                        continue;
                    };
                    let digest = envelope
                        .digest()
                        .map_err(|e| WatchError::Envelope(e.to_string()))?;
                    let _ = self.appended.send(Appended {
                        project: key,
                        position: envelope.position(),
                        digest,
                    });
                    sent += 1;
                }
            }
        }
        seen.primed = true;
        Ok(sent)
    }

    /// Poll every `interval` until shutdown.
    pub async fn watch(self, interval: Duration, mut shutdown: watch::Receiver<()>) {
        let mut seen = Watermarks::default();
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    match self.poll_external(&mut seen).await {
                        Ok(0) => {}
                        Ok(sent) => tracing::debug!(sent, "picked up external writes"),
                        Err(e) => tracing::warn!("database watch failed: {}", e),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use common::crypto::SecretKey;
    use common::entry::Entry;
    use common::project::Project;

    use super::*;

    #[tokio::test]
    async fn test_writes_from_another_handle_are_announced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.sqlite");
        let daemon = Database::connect(&path).await.unwrap();
        let cli = Database::connect(&path).await.unwrap();

        let before = Project::create("before");
        cli.put_project(before.clone()).await.unwrap();
        let author = SecretKey::generate();
        common::log_store::append(
            &cli,
            &before.discovery_key,
            &author,
            Entry::draft(before.discovery_key, vec![], "first"),
        )
        .await
        .unwrap();

        let mut seen = Watermarks::default();
        let mut appended = LogStore::subscribe(&daemon);
        let mut projects = ProjectRegistry::subscribe(&daemon);
        assert_eq!(daemon.poll_external(&mut seen).await.unwrap(), 0);

        let after = Project::create("after");
        cli.put_project(after.clone()).await.unwrap();
        let second = common::log_store::append(
            &cli,
            &before.discovery_key,
            &author,
            Entry::draft(before.discovery_key, vec![], "second"),
        )
        .await
        .unwrap();

        assert_eq!(daemon.poll_external(&mut seen).await.unwrap(), 2);
        assert_eq!(
            projects.recv().await.unwrap(),
            ProjectEvent::Created(after.discovery_key)
        );
        let event = appended.recv().await.unwrap();
        assert_eq!(event.position, second.position());

        cli.delete_project(&before.discovery_key).await.unwrap();
        assert_eq!(daemon.poll_external(&mut seen).await.unwrap(), 1);
        assert_eq!(
            projects.recv().await.unwrap(),
            ProjectEvent::Deleted(before.discovery_key)
        );
        assert_eq!(daemon.poll_external(&mut seen).await.unwrap(), 0);
    }
}
