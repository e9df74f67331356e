//! SQLite implementation of the entity repository
//!
//! Every operation runs on one held transaction. `checkpoint` commits it and the
//! next write opens a fresh one, so a crash loses at most the writes since the last
//! checkpoint. Writes since the last successful commit are kept; when a commit
//! fails they are re-applied to the next transaction and committed with it.

use std::collections::HashSet;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::entity::{DiscoveredEntity, StoredEntity, UpsertOutcome};
use crate::domain::repositories::EntityRepository;

/// A write applied since the last successful commit
#[derive(Debug, Clone)]
enum PendingWrite {
    Upsert(DiscoveredEntity),
    Description { identifier: String, text: String },
}

#[derive(Default)]
struct WriteState {
    tx: Option<Transaction<'static, Sqlite>>,
    pending: Vec<PendingWrite>,
    /// The last commit failed; the next transaction starts by re-applying `pending`
    replay: bool,
}

pub struct SqliteEntityRepository {
    pool: SqlitePool,
    writes: Mutex<WriteState>,
    source_tag: String,
    primary_city: String,
}

impl SqliteEntityRepository {
    pub fn new(pool: SqlitePool, source_tag: &str, primary_city: &str) -> Self {
        Self {
            pool,
            writes: Mutex::new(WriteState::default()),
            source_tag: source_tag.to_string(),
            primary_city: primary_city.to_string(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open transaction, beginning one (and replaying uncommitted writes) if needed
    async fn ensure_transaction<'s>(&self, state: &'s mut WriteState) -> Result<&'s mut Transaction<'static, Sqlite>> {
        if state.tx.is_none() {
            let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
            if state.replay {
                for write in &state.pending {
                    self.apply(&mut tx, write)
                        .await
                        .context("Failed to replay uncommitted writes")?;
                }
                debug!("Replayed {} uncommitted writes", state.pending.len());
                state.replay = false;
            }
            state.tx = Some(tx);
        }
        state.tx.as_mut().context("No open transaction")
    }

    async fn apply(&self, tx: &mut Transaction<'static, Sqlite>, write: &PendingWrite) -> Result<()> {
        match write {
            PendingWrite::Upsert(entity) => self.apply_upsert(tx, entity).await.map(|_| ()),
            PendingWrite::Description { identifier, text } => {
                Self::apply_description(tx, identifier, text).await.map(|_| ())
            }
        }
    }

    async fn apply_upsert(&self, tx: &mut Transaction<'static, Sqlite>, entity: &DiscoveredEntity) -> Result<UpsertOutcome> {
        let now = Utc::now().to_rfc3339();

        let existing = sqlx::query("SELECT id FROM tech_company WHERE nipt = $1")
            .bind(&entity.identifier)
            .fetch_optional(&mut **tx)
            .await?;

        if existing.is_some() {
            sqlx::query(
                r#"
                UPDATE tech_company SET
                    name = COALESCE(NULLIF(name, ''), $1),
                    city = COALESCE(NULLIF(city, ''), $2),
                    legal_form = COALESCE(NULLIF(legal_form, ''), $3),
                    registration_date = COALESCE(NULLIF(registration_date, ''), $4),
                    activity_description = COALESCE(NULLIF(activity_description, ''), $5),
                    matched_keyword = COALESCE(NULLIF(matched_keyword, ''), $6),
                    data_source = COALESCE(NULLIF(data_source, ''), $7),
                    is_tech = 1,
                    last_scraped = $8,
                    updated_at = $8
                WHERE nipt = $9
                "#,
            )
            .bind(&entity.display_name)
            .bind(&entity.city)
            .bind(&entity.legal_form)
            .bind(&entity.registration_date)
            .bind(&entity.activity_description)
            .bind(&entity.matched_keyword)
            .bind(&self.source_tag)
            .bind(&now)
            .bind(&entity.identifier)
            .execute(&mut **tx)
            .await?;

            debug!(identifier = %entity.identifier, "Updated existing entity");
            return Ok(UpsertOutcome::Updated);
        }

        let city = if entity.city.trim().is_empty() {
            self.primary_city.as_str()
        } else {
            entity.city.as_str()
        };

        sqlx::query(
            r#"
            INSERT INTO tech_company (
                nipt, name, city, legal_form, registration_date, activity_description,
                matched_keyword, is_tech, data_source, last_scraped, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10, $10)
            "#,
        )
        .bind(&entity.identifier)
        .bind(&entity.display_name)
        .bind(city)
        .bind(&entity.legal_form)
        .bind(&entity.registration_date)
        .bind(&entity.activity_description)
        .bind(&entity.matched_keyword)
        .bind(entity.is_tech)
        .bind(&self.source_tag)
        .bind(&now)
        .execute(&mut **tx)
        .await?;

        debug!(identifier = %entity.identifier, "Created entity");
        Ok(UpsertOutcome::Created)
    }

    async fn apply_description(tx: &mut Transaction<'static, Sqlite>, identifier: &str, text: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tech_company SET activity_description = $1, updated_at = $2 WHERE nipt = $3",
        )
        .bind(text)
        .bind(Utc::now().to_rfc3339())
        .bind(identifier)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| anyhow!("Failed to parse {}: {}", column, e))
    }

    fn row_to_stored(row: &sqlx::sqlite::SqliteRow) -> Result<StoredEntity> {
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        let last_scraped: Option<String> = row.try_get("last_scraped")?;

        let entity = DiscoveredEntity {
            identifier: row.try_get("nipt")?,
            display_name: row.try_get("name")?,
            city: row.try_get("city")?,
            legal_form: row.try_get("legal_form")?,
            registration_date: row.try_get("registration_date")?,
            activity_description: row.try_get("activity_description")?,
            matched_keyword: row.try_get("matched_keyword")?,
            is_tech: row.try_get("is_tech")?,
        };

        Ok(StoredEntity {
            entity,
            data_source: row.try_get("data_source")?,
            last_scraped: last_scraped
                .as_deref()
                .map(|value| Self::parse_timestamp(value, "last_scraped"))
                .transpose()?,
            created_at: Self::parse_timestamp(&created_at, "created_at")?,
            updated_at: Self::parse_timestamp(&updated_at, "updated_at")?,
        })
    }
}

#[async_trait]
impl EntityRepository for SqliteEntityRepository {
    async fn load_known_identifiers(&self) -> Result<HashSet<String>> {
        let mut state = self.writes.lock().await;
        let tx = self.ensure_transaction(&mut state).await?;

        let rows = sqlx::query("SELECT nipt FROM tech_company WHERE nipt <> ''")
            .fetch_all(&mut **tx)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("nipt").map_err(Into::into))
            .collect()
    }

    async fn upsert(&self, entity: &DiscoveredEntity) -> Result<UpsertOutcome> {
        if !entity.is_persistable() {
            return Err(anyhow!(
                "Refusing to store entity without identifier or name: {:?}",
                entity.identifier
            ));
        }

        let mut state = self.writes.lock().await;
        let tx = self.ensure_transaction(&mut state).await?;
        let outcome = self.apply_upsert(tx, entity).await?;
        state.pending.push(PendingWrite::Upsert(entity.clone()));
        Ok(outcome)
    }

    async fn update_description(&self, identifier: &str, text: &str) -> Result<bool> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }

        let mut state = self.writes.lock().await;
        let tx = self.ensure_transaction(&mut state).await?;
        let changed = Self::apply_description(tx, identifier, text).await?;
        if changed {
            state.pending.push(PendingWrite::Description {
                identifier: identifier.to_string(),
                text: text.to_string(),
            });
        }
        Ok(changed)
    }

    async fn checkpoint(&self) -> Result<()> {
        let mut state = self.writes.lock().await;
        if state.tx.is_none() && state.replay {
            self.ensure_transaction(&mut state).await?;
        }
        let Some(tx) = state.tx.take() else {
            return Ok(());
        };

        match tx.commit().await {
            Ok(()) => {
                debug!("Checkpoint committed {} writes", state.pending.len());
                state.pending.clear();
                Ok(())
            }
            Err(e) => {
                // The failed transaction rolls back on drop; its writes are replayed next time
                state.replay = true;
                warn!("Checkpoint commit failed, {} writes kept for the next one: {}", state.pending.len(), e);
                Err(anyhow!("Checkpoint commit failed: {}", e))
            }
        }
    }

    async fn find(&self, identifier: &str) -> Result<Option<StoredEntity>> {
        let mut state = self.writes.lock().await;
        let tx = self.ensure_transaction(&mut state).await?;

        let row = sqlx::query(
            r#"
            SELECT nipt, name, city, legal_form, registration_date, activity_description,
                   matched_keyword, is_tech, data_source, last_scraped, created_at, updated_at
            FROM tech_company WHERE nipt = $1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&mut **tx)
        .await?;

        row.as_ref().map(Self::row_to_stored).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use tempfile::TempDir;

    async fn repository() -> (TempDir, DatabaseConnection, SqliteEntityRepository) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("harvest.db").display());
        let db = DatabaseConnection::new(&url).await.unwrap();
        db.migrate().await.unwrap();
        let repo = SqliteEntityRepository::new(db.pool().clone(), "qkb", "tirane");
        (dir, db, repo)
    }

    fn alpha() -> DiscoveredEntity {
        DiscoveredEntity::new("L91234567A", "Alpha Soft")
            .with_city("tirane")
            .with_legal_form("Shoqeri me pergjegjesi te kufizuar")
            .with_matched_keyword("software")
    }

    #[tokio::test]
    async fn create_then_update() {
        let (_dir, _db, repo) = repository().await;

        assert_eq!(repo.upsert(&alpha()).await.unwrap(), UpsertOutcome::Created);
        assert_eq!(repo.upsert(&alpha()).await.unwrap(), UpsertOutcome::Updated);
        repo.checkpoint().await.unwrap();

        let stored = repo.find("L91234567A").await.unwrap().unwrap();
        assert_eq!(stored.data_source, "qkb");
        assert!(stored.entity.is_tech);
        assert!(stored.last_scraped.is_some());
        assert_eq!(repo.load_known_identifiers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn populated_fields_survive_blank_updates() {
        let (_dir, _db, repo) = repository().await;
        repo.upsert(&alpha().with_registration_date("01/02/2020")).await.unwrap();

        let sparse = DiscoveredEntity::new("L91234567A", "Alpha Soft SHPK")
            .with_city("durres")
            .with_legal_form("");
        repo.upsert(&sparse).await.unwrap();

        let stored = repo.find("L91234567A").await.unwrap().unwrap().entity;
        assert_eq!(stored.display_name, "Alpha Soft");
        assert_eq!(stored.city, "tirane");
        assert_eq!(stored.legal_form, "Shoqeri me pergjegjesi te kufizuar");
        assert_eq!(stored.registration_date, "01/02/2020");
    }

    #[tokio::test]
    async fn blank_fields_are_filled_by_later_writes() {
        let (_dir, _db, repo) = repository().await;
        repo.upsert(&DiscoveredEntity::new("L1", "Beta")).await.unwrap();
        repo.upsert(&DiscoveredEntity::new("L1", "Beta").with_legal_form("Shoqeri aksionare"))
            .await
            .unwrap();

        let stored = repo.find("L1").await.unwrap().unwrap().entity;
        assert_eq!(stored.legal_form, "Shoqeri aksionare");
        assert_eq!(stored.city, "tirane");
    }

    #[tokio::test]
    async fn blank_description_never_clears_existing_text() {
        let (_dir, _db, repo) = repository().await;
        repo.upsert(&alpha()).await.unwrap();

        assert!(repo.update_description("L91234567A", "Zhvillim software").await.unwrap());
        assert!(!repo.update_description("L91234567A", "   ").await.unwrap());
        assert!(!repo.update_description("UNKNOWN", "Cloud").await.unwrap());

        let stored = repo.find("L91234567A").await.unwrap().unwrap().entity;
        assert_eq!(stored.activity_description, "Zhvillim software");
    }

    #[tokio::test]
    async fn unpersistable_entities_are_refused() {
        let (_dir, _db, repo) = repository().await;
        assert!(repo.upsert(&DiscoveredEntity::new("", "Nameless")).await.is_err());
        assert!(repo.load_known_identifiers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible_to_other_connections() {
        let (_dir, db, repo) = repository().await;
        repo.upsert(&alpha()).await.unwrap();

        let count = |pool: SqlitePool| async move {
            sqlx::query("SELECT COUNT(*) AS n FROM tech_company")
                .fetch_one(&pool)
                .await
                .unwrap()
                .get::<i64, _>("n")
        };
        assert_eq!(count(db.pool().clone()).await, 0);

        repo.checkpoint().await.unwrap();
        assert_eq!(count(db.pool().clone()).await, 1);
    }

    async fn committed(pool: &SqlitePool) -> Vec<String> {
        sqlx::query("SELECT nipt FROM tech_company ORDER BY nipt")
            .fetch_all(pool)
            .await
            .unwrap()
            .iter()
            .map(|row| row.get::<String, _>("nipt"))
            .collect()
    }

    /// Inserting a `B…` row links it to an office through a deferred foreign key, so
    /// the commit fails until that office exists
    async fn link_branches_to_offices(pool: &SqlitePool) {
        for ddl in [
            "CREATE TABLE registry_office (nipt TEXT PRIMARY KEY)",
            "CREATE TABLE office_link (nipt TEXT REFERENCES registry_office (nipt) DEFERRABLE INITIALLY DEFERRED)",
            "CREATE TRIGGER link_branch AFTER INSERT ON tech_company WHEN NEW.nipt LIKE 'B%' \
             BEGIN INSERT INTO office_link (nipt) VALUES (NEW.nipt); END",
        ] {
            sqlx::query(ddl).execute(pool).await.unwrap();
        }
    }

    #[tokio::test]
    async fn failed_checkpoint_is_retried_with_its_writes() {
        let (_dir, db, repo) = repository().await;
        link_branches_to_offices(db.pool()).await;

        repo.upsert(&alpha()).await.unwrap();
        repo.upsert(&DiscoveredEntity::new("B81234567B", "Branch Co")).await.unwrap();
        assert!(repo.update_description("L91234567A", "Zhvillim software").await.unwrap());

        assert!(repo.checkpoint().await.is_err());
        assert!(committed(db.pool()).await.is_empty());

        sqlx::query("INSERT INTO registry_office (nipt) VALUES ('B81234567B')")
            .execute(db.pool())
            .await
            .unwrap();
        repo.checkpoint().await.unwrap();

        assert_eq!(committed(db.pool()).await, vec!["B81234567B", "L91234567A"]);
        let stored = repo.find("L91234567A").await.unwrap().unwrap().entity;
        assert_eq!(stored.activity_description, "Zhvillim software");

        // Nothing is carried past a successful commit
        repo.checkpoint().await.unwrap();
        assert_eq!(committed(db.pool()).await.len(), 2);
    }

    #[tokio::test]
    async fn writes_after_a_failed_checkpoint_see_the_replayed_rows() {
        let (_dir, db, repo) = repository().await;
        link_branches_to_offices(db.pool()).await;
        repo.upsert(&DiscoveredEntity::new("B81234567B", "Branch Co")).await.unwrap();
        assert!(repo.checkpoint().await.is_err());

        // The earlier insert is re-applied first, so this is a merge, not a create
        assert_eq!(
            repo.upsert(&DiscoveredEntity::new("B81234567B", "Branch Co").with_city("durres"))
                .await
                .unwrap(),
            UpsertOutcome::Updated
        );
        assert!(repo.load_known_identifiers().await.unwrap().contains("B81234567B"));
    }
}
