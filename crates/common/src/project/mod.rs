//! Projects and the identities a device writes with.
//!
//! A [`Project`] bundles the shared secrets every participating device
//! holds. The [`ProjectRegistry`] is the global (not per-project) store
//! of projects plus, for each project, the signing identities whose logs
//! this device controls. Registry changes are broadcast as
//! [`ProjectEvent`]s so the swarm can join and leave discovery groups.

mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::crypto::{DiscoveryKey, Secret, SecretKey, SECRET_SIZE};

pub use memory::{MemoryProjectRegistry, MemoryProjectRegistryError};

pub const PROJECT_CHANNEL_CAPACITY: usize = 64;

/// Everything a device needs to take part in one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub discovery_key: DiscoveryKey,
    pub replication_key: Secret,
    pub encryption_key: Secret,
    pub project_key_pair: SecretKey,
    pub title: String,
    pub persistent: bool,
    pub deleted: bool,
}

impl Project {
    /// Start a brand new project with fresh secrets.
    pub fn create(title: impl Into<String>) -> Self {
        Self::from_secrets(Secret::generate(), Secret::generate(), title)
    }

    /// Join an existing project from an invitation. The project key pair
    /// is local to this device.
    pub fn join(invitation: &Invitation, title: impl Into<String>) -> Self {
        Self::from_secrets(
            invitation.replication_key.clone(),
            invitation.encryption_key.clone(),
            title,
        )
    }

    fn from_secrets(replication_key: Secret, encryption_key: Secret, title: impl Into<String>) -> Self {
        Self {
            discovery_key: replication_key.discovery_key(),
            replication_key,
            encryption_key,
            project_key_pair: SecretKey::generate(),
            title: title.into(),
            persistent: true,
            deleted: false,
        }
    }

    pub fn invitation(&self) -> Invitation {
        Invitation {
            replication_key: self.replication_key.clone(),
            encryption_key: self.encryption_key.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvitationError {
    #[error("invitation must be {expected} hex characters, got {got}")]
    Length { expected: usize, got: usize },
    #[error("invitation is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// The shared secrets of a project, handed out of band to new devices.
///
/// Text form is the hex of `replication_key || encryption_key`.
#[derive(Clone, PartialEq, Eq)]
pub struct Invitation {
    pub replication_key: Secret,
    pub encryption_key: Secret,
}

impl fmt::Display for Invitation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.replication_key.bytes()))?;
        f.write_str(&hex::encode(self.encryption_key.bytes()))
    }
}

impl fmt::Debug for Invitation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invitation({})", self.replication_key.discovery_key().short())
    }
}

impl FromStr for Invitation {
    type Err = InvitationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.chars().count() != SECRET_SIZE * 4 {
            return Err(InvitationError::Length {
                expected: SECRET_SIZE * 4,
                got: s.chars().count(),
            });
        }
        if !s.is_ascii() {
            return Err(InvitationError::Hex(hex::FromHexError::InvalidStringLength));
        }
        let mut replication = [0u8; SECRET_SIZE];
        let mut encryption = [0u8; SECRET_SIZE];
        hex::decode_to_slice(&s[..SECRET_SIZE * 2], &mut replication)?;
        hex::decode_to_slice(&s[SECRET_SIZE * 2..], &mut encryption)?;
        Ok(Invitation {
            replication_key: Secret::from(replication),
            encryption_key: Secret::from(encryption),
        })
    }
}

/// A signing key this device writes one log with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub key: SecretKey,
    pub is_default: bool,
}

impl Identity {
    pub fn generate(is_default: bool) -> Self {
        Self {
            key: SecretKey::generate(),
            is_default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectEvent {
    Created(DiscoveryKey),
    Deleted(DiscoveryKey),
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError<T> {
    #[error("unhandled project registry provider error: {0}")]
    Provider(#[from] T),
    #[error("project not found: {0}")]
    NotFound(DiscoveryKey),
    #[error("project already exists: {0}")]
    AlreadyExists(DiscoveryKey),
}

#[async_trait]
pub trait ProjectRegistry: Send + Sync + std::fmt::Debug + Clone + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Record a new project and announce it with `ProjectEvent::Created`
    ///
    /// Fails with `AlreadyExists` if the discovery key is known, deleted
    ///  or not.
    async fn put_project(&self, project: Project) -> Result<(), RegistryError<Self::Error>>;

    async fn get_project(
        &self,
        discovery_key: &DiscoveryKey,
    ) -> Result<Option<Project>, RegistryError<Self::Error>>;

    /// Every project, deleted ones included
    async fn list_projects(&self) -> Result<Vec<Project>, RegistryError<Self::Error>>;

    async fn set_title(
        &self,
        discovery_key: &DiscoveryKey,
        title: &str,
    ) -> Result<(), RegistryError<Self::Error>>;

    async fn set_persistent(
        &self,
        discovery_key: &DiscoveryKey,
        persistent: bool,
    ) -> Result<(), RegistryError<Self::Error>>;

    /// Flag the project deleted and announce `ProjectEvent::Deleted`.
    ///  Logs are kept; only replication stops.
    async fn delete_project(&self, discovery_key: &DiscoveryKey) -> Result<(), RegistryError<Self::Error>>;

    /// Store an identity for a project. Storing a default identity clears
    ///  the flag on any previous default.
    async fn put_identity(
        &self,
        discovery_key: &DiscoveryKey,
        identity: Identity,
    ) -> Result<(), RegistryError<Self::Error>>;

    async fn identities(
        &self,
        discovery_key: &DiscoveryKey,
    ) -> Result<Vec<Identity>, RegistryError<Self::Error>>;

    fn subscribe(&self) -> broadcast::Receiver<ProjectEvent>;

    async fn default_identity(
        &self,
        discovery_key: &DiscoveryKey,
    ) -> Result<Option<Identity>, RegistryError<Self::Error>> {
        Ok(self
            .identities(discovery_key)
            .await?
            .into_iter()
            .find(|identity| identity.is_default))
    }

    /// Projects that should currently be replicated
    async fn active_projects(&self) -> Result<Vec<Project>, RegistryError<Self::Error>> {
        Ok(self
            .list_projects()
            .await?
            .into_iter()
            .filter(|project| !project.deleted)
            .collect())
    }
}

/// The project's default identity, creating one on first use.
pub async fn default_identity_or_create<R: ProjectRegistry>(
    registry: &R,
    discovery_key: &DiscoveryKey,
) -> Result<Identity, RegistryError<R::Error>> {
    if let Some(identity) = registry.default_identity(discovery_key).await? {
        return Ok(identity);
    }
    let identity = Identity::generate(true);
    registry.put_identity(discovery_key, identity.clone()).await?;
    tracing::info!(
        project = %discovery_key.short(),
        identity = %identity.key.public(),
        "created default identity"
    );
    Ok(identity)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_invitation_round_trip() {
        let project = Project::create("novel");
        let text = project.invitation().to_string();
        assert_eq!(text.len(), 128);

        let invitation: Invitation = text.parse().unwrap();
        let joined = Project::join(&invitation, "my copy");
        assert_eq!(joined.discovery_key, project.discovery_key);
        assert_eq!(joined.replication_key, project.replication_key);
        assert_eq!(joined.encryption_key, project.encryption_key);
        assert_ne!(joined.project_key_pair, project.project_key_pair);
    }

    #[test]
    fn test_invitation_rejects_garbage() {
        assert!(matches!(
            "abcd".parse::<Invitation>(),
            Err(InvitationError::Length { .. })
        ));
        assert!(matches!(
            "zz".repeat(64).parse::<Invitation>(),
            Err(InvitationError::Hex(_))
        ));
    }
}
