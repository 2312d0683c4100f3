pub mod daemon;
pub mod draft;
pub mod graph;
pub mod init;
pub mod intro;
pub mod mark;
pub mod marks;
pub mod note;
pub mod notes;
pub mod project;
pub mod version;

pub use daemon::Daemon;
pub use draft::Draft;
pub use graph::Graph;
pub use init::Init;
pub use intro::Intro;
pub use mark::Mark;
pub use marks::Marks;
pub use note::Note;
pub use notes::Notes;
pub use project::Project;
pub use version::Version;

use std::collections::BTreeMap;

use common::crypto::{Digest, DiscoveryKey, PublicKey};
use common::entry::{Entry, EntryKind};
use common::log_store::{LogStore, LogStoreError};
use common::project::{ProjectRegistry, RegistryError};
use common::projection::{load_intros, IntroRecord};

use crate::database::{Database, DatabaseError};
use crate::op::OpContext;
use crate::state::{AppState, StateError};

/// Error shared by the ops that read or write a project.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("store error: {0}")]
    Store(#[from] LogStoreError<DatabaseError>),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError<DatabaseError>),

    #[error("unknown project {0}")]
    UnknownProject(DiscoveryKey),

    #[error("project {0} is deleted")]
    Deleted(DiscoveryKey),

    #[error("no {kind} {digest} in this project")]
    NotFound { kind: EntryKind, digest: Digest },

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Open the state directory and its database.
pub async fn open(ctx: &OpContext) -> Result<Database, CommandError> {
    let state = AppState::load(ctx.config_path.clone())?;
    Ok(state.database().await?)
}

/// A project that exists and is not deleted.
pub async fn live_project(
    db: &Database,
    discovery_key: &DiscoveryKey,
) -> Result<common::project::Project, CommandError> {
    let project = db
        .get_project(discovery_key)
        .await?
        .ok_or(CommandError::UnknownProject(*discovery_key))?;
    if project.deleted {
        return Err(CommandError::Deleted(*discovery_key));
    }
    Ok(project)
}

/// Append `entry` to this device's default log in the project.
pub async fn write(db: &Database, discovery_key: &DiscoveryKey, entry: Entry) -> Result<Digest, CommandError> {
    let identity = common::project::default_identity_or_create(db, discovery_key).await?;
    let envelope = common::log_store::append(db, discovery_key, &identity.key, entry).await?;
    let digest = envelope
        .digest()
        .map_err(|e| CommandError::Invalid(e.to_string()))?;
    tracing::debug!(
        project = %discovery_key.short(),
        position = %envelope.position(),
        digest = %digest.short(),
        "wrote {}",
        envelope.entry.kind()
    );
    Ok(digest)
}

/// Fail unless `digest` names an entry of `kind` in the project.
pub async fn require(
    db: &Database,
    discovery_key: &DiscoveryKey,
    kind: EntryKind,
    digest: &Digest,
) -> Result<(), CommandError> {
    match db.get_by_digest(discovery_key, digest).await? {
        Some(envelope) if envelope.entry.kind() == kind => Ok(()),
        _ => Err(CommandError::NotFound {
            kind,
            digest: *digest,
        }),
    }
}

/// Author labels for display: the intro name when there is one, else
/// the short key.
pub struct Authors(BTreeMap<PublicKey, IntroRecord>);

impl Authors {
    pub async fn load(db: &Database, discovery_key: &DiscoveryKey) -> Result<Self, CommandError> {
        Ok(Authors(load_intros(db, discovery_key).await?))
    }

    pub fn label(&self, author: &PublicKey) -> String {
        let short = author.to_hex()[..8].to_string();
        match self.0.get(author) {
            Some(intro) => format!("{} ({}, {})", intro.name, intro.device, short),
            None => short,
        }
    }
}
