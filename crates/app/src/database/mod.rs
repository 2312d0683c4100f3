mod log_store;
mod registry;
mod watch;

pub use watch::{Watermarks, WatchError, WATCH_INTERVAL};

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::{broadcast, Mutex};

use common::log_store::{Appended, APPEND_CHANNEL_CAPACITY};
use common::project::{ProjectEvent, PROJECT_CHANNEL_CAPACITY};

const MAX_CONNECTIONS: u32 = 5;

/// SQLite backed log store and project registry.
///
/// Change notifications are process local: two processes sharing one
///  database file do not see each other's appends.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
    appended: broadcast::Sender<Appended>,
    projects: broadcast::Sender<ProjectEvent>,
    /// serializes appends so the head check and insert are atomic
    writes: Arc<Mutex<()>>,
}

impl Database {
    pub async fn connect(path: &Path) -> Result<Self, DatabaseSetupError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(DatabaseSetupError::Unavailable)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DatabaseSetupError::MigrationFailed)?;

        tracing::debug!(path = %path.display(), "database ready");
        Ok(Database::new(pool))
    }

    pub fn new(pool: SqlitePool) -> Self {
        let (appended, _) = broadcast::channel(APPEND_CHANNEL_CAPACITY);
        let (projects, _) = broadcast::channel(PROJECT_CHANNEL_CAPACITY);
        Self {
            pool,
            appended,
            projects,
            writes: Arc::new(Mutex::new(())),
        }
    }
}

impl Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseSetupError {
    #[error("error occurred while attempting database migration: {0}")]
    MigrationFailed(sqlx::migrate::MigrateError),

    #[error("unable to perform initial connection and check of the database: {0}")]
    Unavailable(sqlx::Error),
}

/// Provider error for both store traits.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("corrupt {what} in database: {detail}")]
    Corrupt { what: &'static str, detail: String },
}

impl DatabaseError {
    fn corrupt(what: &'static str, detail: impl ToString) -> Self {
        DatabaseError::Corrupt {
            what,
            detail: detail.to_string(),
        }
    }
}

/// Whether a write failed on a PRIMARY KEY or UNIQUE constraint.
fn is_constraint_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if db_error.constraint().is_some()
        || db_error.is_unique_violation())
}

#[cfg(test)]
pub(crate) async fn test_database() -> (Database, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::connect(&dir.path().join("test.sqlite"))
        .await
        .unwrap();
    (db, dir)
}
