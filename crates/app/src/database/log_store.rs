use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{Row, Sqlite, Transaction};
use tokio::sync::broadcast;

use common::crypto::{Digest, DiscoveryKey, PublicKey};
use common::entry::{Entry, EntryKind, MarkId};
use common::envelope::{Envelope, LogPosition};
use common::log_store::{admit, Appended, LogStore, LogStoreError};

use super::{is_constraint_violation, Database, DatabaseError};

type Result<T> = std::result::Result<T, LogStoreError<DatabaseError>>;

fn decode(body: &[u8]) -> std::result::Result<Envelope, DatabaseError> {
    bincode::deserialize(body).map_err(|e| DatabaseError::corrupt("envelope", e))
}

fn decode_rows(rows: Vec<sqlx::sqlite::SqliteRow>) -> std::result::Result<Vec<Envelope>, DatabaseError> {
    rows.iter()
        .map(|row| decode(&row.try_get::<Vec<u8>, _>("body")?))
        .collect()
}

/// Secondary index rows for one envelope.
async fn index_entry(
    tx: &mut Transaction<'_, Sqlite>,
    project: &str,
    position: &LogPosition,
    entry: &Entry,
) -> std::result::Result<(), sqlx::Error> {
    let log = position.log.to_hex();
    let idx = position.index as i64;
    match entry {
        Entry::Draft(draft) => {
            for parent in &draft.parents {
                sqlx::query(
                    "INSERT OR IGNORE INTO draft_parents (project, parent, log, idx) VALUES (?1, ?2, ?3, ?4)",
                )
                .bind(project)
                .bind(parent.to_hex())
                .bind(&log)
                .bind(idx)
                .execute(&mut **tx)
                .await?;
            }
        }
        Entry::Mark(mark) => {
            sqlx::query("INSERT INTO entry_drafts (project, draft, log, idx) VALUES (?1, ?2, ?3, ?4)")
                .bind(project)
                .bind(mark.draft.to_hex())
                .bind(&log)
                .bind(idx)
                .execute(&mut **tx)
                .await?;
            sqlx::query("INSERT INTO marks (project, log, identifier, idx) VALUES (?1, ?2, ?3, ?4)")
                .bind(project)
                .bind(&log)
                .bind(mark.identifier.to_hex())
                .bind(idx)
                .execute(&mut **tx)
                .await?;
        }
        Entry::Note(note) => {
            sqlx::query("INSERT INTO entry_drafts (project, draft, log, idx) VALUES (?1, ?2, ?3, ?4)")
                .bind(project)
                .bind(note.draft.to_hex())
                .bind(&log)
                .bind(idx)
                .execute(&mut **tx)
                .await?;
        }
        Entry::Intro(_) => {}
    }
    Ok(())
}

#[async_trait]
impl LogStore for Database {
    type Error = DatabaseError;

    async fn put_envelope(&self, project: &DiscoveryKey, envelope: Envelope) -> Result<Digest> {
        let digest = admit(project, &envelope)?;
        let position = envelope.position();
        let body = bincode::serialize(&envelope).map_err(|e| DatabaseError::corrupt("envelope", e))?;
        let project_hex = project.to_hex();

        {
            let _write = self.writes.lock().await;
            let mut tx = self.pool.begin().await.map_err(DatabaseError::Sqlx)?;

            let head: Option<i64> =
                sqlx::query_scalar("SELECT MAX(idx) FROM envelopes WHERE project = ?1 AND log = ?2")
                    .bind(&project_hex)
                    .bind(position.log.to_hex())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(DatabaseError::Sqlx)?;
            let expected = head.map_or(0, |head| head as u64 + 1);
            if position.index != expected {
                return Err(LogStoreError::OutOfOrder {
                    log: position.log,
                    index: position.index,
                    expected,
                });
            }

            sqlx::query(
                r#"
                INSERT INTO envelopes (project, log, idx, digest, kind, body)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&project_hex)
            .bind(position.log.to_hex())
            .bind(position.index as i64)
            .bind(digest.to_hex())
            .bind(envelope.entry.kind().as_str())
            .bind(body)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    LogStoreError::OutOfOrder {
                        log: position.log,
                        index: position.index,
                        expected,
                    }
                } else {
                    LogStoreError::Provider(DatabaseError::Sqlx(e))
                }
            })?;

            index_entry(&mut tx, &project_hex, &position, &envelope.entry)
                .await
                .map_err(DatabaseError::Sqlx)?;
            tx.commit().await.map_err(DatabaseError::Sqlx)?;
        }

        tracing::trace!(project = %project.short(), %position, "appended");
        let _ = self.appended.send(Appended {
            project: *project,
            position,
            digest,
        });
        Ok(digest)
    }

    async fn get_envelope(
        &self,
        project: &DiscoveryKey,
        log: &PublicKey,
        index: u64,
    ) -> Result<Option<Envelope>> {
        let body: Option<Vec<u8>> = sqlx::query_scalar(
            "SELECT body FROM envelopes WHERE project = ?1 AND log = ?2 AND idx = ?3",
        )
        .bind(project.to_hex())
        .bind(log.to_hex())
        .bind(index as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;

        Ok(body.as_deref().map(decode).transpose()?)
    }

    async fn get_by_digest(&self, project: &DiscoveryKey, digest: &Digest) -> Result<Option<Envelope>> {
        let body: Option<Vec<u8>> = sqlx::query_scalar(
            r#"
            SELECT body FROM envelopes
            WHERE project = ?1 AND digest = ?2
            ORDER BY rowid
            LIMIT 1
            "#,
        )
        .bind(project.to_hex())
        .bind(digest.to_hex())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;

        Ok(body.as_deref().map(decode).transpose()?)
    }

    async fn log_head(&self, project: &DiscoveryKey, log: &PublicKey) -> Result<Option<u64>> {
        let head: Option<i64> =
            sqlx::query_scalar("SELECT MAX(idx) FROM envelopes WHERE project = ?1 AND log = ?2")
                .bind(project.to_hex())
                .bind(log.to_hex())
                .fetch_one(&self.pool)
                .await
                .map_err(DatabaseError::Sqlx)?;
        Ok(head.map(|head| head as u64))
    }

    async fn list_logs(&self, project: &DiscoveryKey) -> Result<Vec<(PublicKey, u64)>> {
        let rows = sqlx::query(
            r#"
            SELECT log, MAX(idx) AS head FROM envelopes
            WHERE project = ?1
            GROUP BY log
            ORDER BY log
            "#,
        )
        .bind(project.to_hex())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in rows {
            let log: String = row.try_get("log").map_err(DatabaseError::Sqlx)?;
            let head: i64 = row.try_get("head").map_err(DatabaseError::Sqlx)?;
            let log = PublicKey::from_hex(&log).map_err(|e| DatabaseError::corrupt("log key", e))?;
            logs.push((log, head as u64));
        }
        Ok(logs)
    }

    async fn children_of(&self, project: &DiscoveryKey, parent: &Digest) -> Result<Vec<Envelope>> {
        let rows = sqlx::query(
            r#"
            SELECT e.body FROM draft_parents p
            JOIN envelopes e ON e.project = p.project AND e.log = p.log AND e.idx = p.idx
            WHERE p.project = ?1 AND p.parent = ?2
            ORDER BY p.rowid
            "#,
        )
        .bind(project.to_hex())
        .bind(parent.to_hex())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;
        Ok(decode_rows(rows)?)
    }

    async fn referencing_draft(&self, project: &DiscoveryKey, draft: &Digest) -> Result<Vec<Envelope>> {
        let rows = sqlx::query(
            r#"
            SELECT e.body FROM entry_drafts d
            JOIN envelopes e ON e.project = d.project AND e.log = d.log AND e.idx = d.idx
            WHERE d.project = ?1 AND d.draft = ?2
            ORDER BY d.rowid
            "#,
        )
        .bind(project.to_hex())
        .bind(draft.to_hex())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;
        Ok(decode_rows(rows)?)
    }

    async fn marks_by_identifier(
        &self,
        project: &DiscoveryKey,
        author: &PublicKey,
    ) -> Result<BTreeMap<MarkId, Vec<Envelope>>> {
        let rows = sqlx::query(
            r#"
            SELECT m.identifier, e.body FROM marks m
            JOIN envelopes e ON e.project = m.project AND e.log = m.log AND e.idx = m.idx
            WHERE m.project = ?1 AND m.log = ?2
            ORDER BY m.identifier, m.idx
            "#,
        )
        .bind(project.to_hex())
        .bind(author.to_hex())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;

        let mut marks: BTreeMap<MarkId, Vec<Envelope>> = BTreeMap::new();
        for row in rows {
            let identifier: String = row.try_get("identifier").map_err(DatabaseError::Sqlx)?;
            let identifier = MarkId::from_str(&identifier)
                .map_err(|e| DatabaseError::corrupt("mark identifier", e))?;
            let body: Vec<u8> = row.try_get("body").map_err(DatabaseError::Sqlx)?;
            marks.entry(identifier).or_default().push(decode(&body)?);
        }
        Ok(marks)
    }

    async fn envelopes_of_kind(&self, project: &DiscoveryKey, kind: EntryKind) -> Result<Vec<Envelope>> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM envelopes
            WHERE project = ?1 AND kind = ?2
            ORDER BY log, idx
            "#,
        )
        .bind(project.to_hex())
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;
        Ok(decode_rows(rows)?)
    }

    fn subscribe(&self) -> broadcast::Receiver<Appended> {
        self.appended.subscribe()
    }
}
