// Database connection and pool management
// SQLite in WAL mode so the host can read committed checkpoints while a run writes

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::info;

/// Columns added after the first schema; each carries the default existing rows get
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("city", "TEXT NOT NULL DEFAULT ''"),
    ("legal_form", "TEXT NOT NULL DEFAULT ''"),
    ("registration_date", "TEXT NOT NULL DEFAULT ''"),
    ("activity_description", "TEXT NOT NULL DEFAULT ''"),
    ("matched_keyword", "TEXT NOT NULL DEFAULT ''"),
    ("is_tech", "BOOLEAN NOT NULL DEFAULT 0"),
    ("data_source", "TEXT NOT NULL DEFAULT ''"),
    ("last_scraped", "TEXT"),
];

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 4).await
    }

    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create database directory {parent:?}"))?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL {database_url}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {database_url}"))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_tech_company_sql = r#"
            CREATE TABLE IF NOT EXISTS tech_company (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nipt TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                city TEXT NOT NULL DEFAULT '',
                legal_form TEXT NOT NULL DEFAULT '',
                registration_date TEXT NOT NULL DEFAULT '',
                activity_description TEXT NOT NULL DEFAULT '',
                matched_keyword TEXT NOT NULL DEFAULT '',
                is_tech BOOLEAN NOT NULL DEFAULT 0,
                data_source TEXT NOT NULL DEFAULT '',
                last_scraped TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
        "#;

        sqlx::query(create_tech_company_sql).execute(&self.pool).await?;
        let added = self.ensure_columns().await?;
        if !added.is_empty() {
            info!("Added columns to tech_company: {}", added.join(", "));
        }
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tech_company_is_tech ON tech_company (is_tech)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Adds any missing additive column; never alters or drops existing ones
    pub async fn ensure_columns(&self) -> Result<Vec<String>> {
        let existing: Vec<String> = sqlx::query("PRAGMA table_info(tech_company)")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()?;

        let mut added = Vec::new();
        for (column, definition) in ADDITIVE_COLUMNS {
            if existing.iter().any(|c| c == column) {
                continue;
            }
            sqlx::query(&format!("ALTER TABLE tech_company ADD COLUMN {column} {definition}"))
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to add column {column}"))?;
            added.push((*column).to_string());
        }
        Ok(added)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
