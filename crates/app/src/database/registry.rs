use async_trait::async_trait;
use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::Row;
use tokio::sync::broadcast;

use common::crypto::{DiscoveryKey, Secret, SecretKey, PRIVATE_KEY_SIZE};
use common::project::{Identity, Project, ProjectEvent, ProjectRegistry, RegistryError};

use super::{is_constraint_violation, Database, DatabaseError};

type Result<T> = std::result::Result<T, RegistryError<DatabaseError>>;

fn secret_key(bytes: &[u8]) -> std::result::Result<SecretKey, DatabaseError> {
    let bytes: [u8; PRIVATE_KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| DatabaseError::corrupt("secret key", format!("{} bytes", bytes.len())))?;
    Ok(SecretKey::from(bytes))
}

fn project_from_row(row: &SqliteRow) -> std::result::Result<Project, DatabaseError> {
    let discovery_key: String = row.try_get("discovery_key")?;
    let replication_key: Vec<u8> = row.try_get("replication_key")?;
    let encryption_key: Vec<u8> = row.try_get("encryption_key")?;
    let project_key_pair: Vec<u8> = row.try_get("project_key_pair")?;

    Ok(Project {
        discovery_key: discovery_key
            .parse()
            .map_err(|e| DatabaseError::corrupt("discovery key", e))?,
        replication_key: Secret::from_slice(&replication_key)
            .map_err(|e| DatabaseError::corrupt("replication key", e))?,
        encryption_key: Secret::from_slice(&encryption_key)
            .map_err(|e| DatabaseError::corrupt("encryption key", e))?,
        project_key_pair: secret_key(&project_key_pair)?,
        title: row.try_get("title")?,
        persistent: row.try_get("persistent")?,
        deleted: row.try_get("deleted")?,
    })
}

const PROJECT_COLUMNS: &str =
    "discovery_key, replication_key, encryption_key, project_key_pair, title, persistent, deleted";

/// `NotFound` when an UPDATE keyed by discovery key touched nothing.
fn ensure_updated(result: SqliteQueryResult, discovery_key: &DiscoveryKey) -> Result<()> {
    if result.rows_affected() == 0 {
        return Err(RegistryError::NotFound(*discovery_key));
    }
    Ok(())
}

#[async_trait]
impl ProjectRegistry for Database {
    type Error = DatabaseError;

    async fn put_project(&self, project: Project) -> Result<()> {
        let discovery_key = project.discovery_key;
        sqlx::query(
            r#"
            INSERT INTO projects (discovery_key, replication_key, encryption_key, project_key_pair, title, persistent, deleted)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(discovery_key.to_hex())
        .bind(project.replication_key.bytes().to_vec())
        .bind(project.encryption_key.bytes().to_vec())
        .bind(project.project_key_pair.to_bytes().to_vec())
        .bind(&project.title)
        .bind(project.persistent)
        .bind(project.deleted)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_constraint_violation(&e) {
                RegistryError::AlreadyExists(discovery_key)
            } else {
                RegistryError::Provider(DatabaseError::Sqlx(e))
            }
        })?;

        tracing::info!(project = %discovery_key.short(), title = %project.title, "project added");
        let _ = self.projects.send(ProjectEvent::Created(discovery_key));
        Ok(())
    }

    async fn get_project(&self, discovery_key: &DiscoveryKey) -> Result<Option<Project>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE discovery_key = ?1",
            PROJECT_COLUMNS
        ))
        .bind(discovery_key.to_hex())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;

        Ok(row.as_ref().map(project_from_row).transpose()?)
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM projects ORDER BY created_at, rowid",
            PROJECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;

        Ok(rows
            .iter()
            .map(project_from_row)
            .collect::<std::result::Result<_, _>>()?)
    }

    async fn set_title(&self, discovery_key: &DiscoveryKey, title: &str) -> Result<()> {
        let result = sqlx::query("UPDATE projects SET title = ?1 WHERE discovery_key = ?2")
            .bind(title)
            .bind(discovery_key.to_hex())
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Sqlx)?;
        ensure_updated(result, discovery_key)
    }

    async fn set_persistent(&self, discovery_key: &DiscoveryKey, persistent: bool) -> Result<()> {
        let result = sqlx::query("UPDATE projects SET persistent = ?1 WHERE discovery_key = ?2")
            .bind(persistent)
            .bind(discovery_key.to_hex())
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Sqlx)?;
        ensure_updated(result, discovery_key)
    }

    async fn delete_project(&self, discovery_key: &DiscoveryKey) -> Result<()> {
        let result = sqlx::query("UPDATE projects SET deleted = 1 WHERE discovery_key = ?1")
            .bind(discovery_key.to_hex())
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Sqlx)?;
        ensure_updated(result, discovery_key)?;
        tracing::info!(project = %discovery_key.short(), "project deleted");
        let _ = self.projects.send(ProjectEvent::Deleted(*discovery_key));
        Ok(())
    }

    async fn put_identity(&self, discovery_key: &DiscoveryKey, identity: Identity) -> Result<()> {
        let project = discovery_key.to_hex();
        let mut tx = self.pool.begin().await.map_err(DatabaseError::Sqlx)?;

        let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE discovery_key = ?1")
            .bind(&project)
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::Sqlx)?;
        if known == 0 {
            return Err(RegistryError::NotFound(*discovery_key));
        }

        if identity.is_default {
            sqlx::query("UPDATE identities SET is_default = 0 WHERE discovery_key = ?1")
                .bind(&project)
                .execute(&mut *tx)
                .await
                .map_err(DatabaseError::Sqlx)?;
        }
        sqlx::query(
            r#"
            INSERT INTO identities (discovery_key, public_key, secret_key, is_default)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (discovery_key, public_key) DO UPDATE SET is_default = excluded.is_default
            "#,
        )
        .bind(&project)
        .bind(identity.key.public().to_hex())
        .bind(identity.key.to_bytes().to_vec())
        .bind(identity.is_default)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::Sqlx)?;

        tx.commit().await.map_err(DatabaseError::Sqlx)?;
        Ok(())
    }

    async fn identities(&self, discovery_key: &DiscoveryKey) -> Result<Vec<Identity>> {
        let rows = sqlx::query(
            "SELECT secret_key, is_default FROM identities WHERE discovery_key = ?1 ORDER BY rowid",
        )
        .bind(discovery_key.to_hex())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;

        let mut identities = Vec::with_capacity(rows.len());
        for row in rows {
            let key: Vec<u8> = row.try_get("secret_key").map_err(DatabaseError::Sqlx)?;
            identities.push(Identity {
                key: secret_key(&key)?,
                is_default: row.try_get("is_default").map_err(DatabaseError::Sqlx)?,
            });
        }
        Ok(identities)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.projects.subscribe()
    }
}

#[cfg(test)]
mod test {
    use common::project::{default_identity_or_create, Invitation};

    use super::*;
    use crate::database::test_database;

    #[tokio::test]
    async fn test_project_round_trip_and_events() {
        let (db, _dir) = test_database().await;
        let mut events = db.subscribe();
        let project = Project::create("novel");
        let key = project.discovery_key;

        db.put_project(project.clone()).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), ProjectEvent::Created(key));
        assert_eq!(db.get_project(&key).await.unwrap(), Some(project.clone()));
        assert!(matches!(
            db.put_project(project).await,
            Err(RegistryError::AlreadyExists(_))
        ));

        db.set_title(&key, "renamed").await.unwrap();
        db.delete_project(&key).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), ProjectEvent::Deleted(key));

        let stored = db.get_project(&key).await.unwrap().unwrap();
        assert_eq!(stored.title, "renamed");
        assert!(stored.deleted);
        assert!(db.active_projects().await.unwrap().is_empty());
        assert_eq!(db.list_projects().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_joined_project_shares_discovery_key() {
        let (db, _dir) = test_database().await;
        let original = Project::create("shared");
        let invitation: Invitation = original.invitation().to_string().parse().unwrap();
        let joined = Project::join(&invitation, "mine");

        db.put_project(joined).await.unwrap();
        assert!(db
            .get_project(&original.discovery_key)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_single_default_identity() {
        let (db, _dir) = test_database().await;
        let project = Project::create("ids");
        let key = project.discovery_key;
        db.put_project(project).await.unwrap();

        let first = default_identity_or_create(&db, &key).await.unwrap();
        assert_eq!(default_identity_or_create(&db, &key).await.unwrap(), first);

        let second = Identity::generate(true);
        db.put_identity(&key, second.clone()).await.unwrap();
        let identities = db.identities(&key).await.unwrap();
        assert_eq!(identities.len(), 2);
        assert_eq!(identities.iter().filter(|i| i.is_default).count(), 1);
        assert_eq!(db.default_identity(&key).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_unknown_project_errors() {
        let (db, _dir) = test_database().await;
        let missing = Project::create("ghost").discovery_key;
        assert!(matches!(
            db.delete_project(&missing).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            db.put_identity(&missing, Identity::generate(true)).await,
            Err(RegistryError::NotFound(_))
        ));
    }
}
