#![allow(dead_code)]

use std::sync::Arc;

use qkb_harvester::domain::search_grid::DateRange;
use qkb_harvester::infrastructure::browser::ReplayBrowser;
use qkb_harvester::infrastructure::{AppConfig, DatabaseConnection, SqliteEntityRepository};
use sqlx::Row;
use tempfile::TempDir;

/// Config for a `keywords × legal_forms × ranges` grid with every pause disabled
pub fn config(keywords: &[&str], legal_forms: &[&str], ranges: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.grid.keywords = keywords.iter().map(|k| (*k).to_string()).collect();
    config.grid.legal_forms = legal_forms.iter().map(|f| (*f).to_string()).collect();
    config.grid.date_ranges = (0..ranges)
        .map(|i| {
            let year = 2015 + i32::try_from(i / 12).unwrap();
            let month = u32::try_from(i % 12).unwrap() + 1;
            DateRange::months(year, month, year, month).unwrap()
        })
        .collect();
    config.timing.inter_page_delay_ms = 0;
    config.timing.inter_cell_delay_ms = 0;
    config.timing.settle_delay_ms = 0;
    config.timing.section_toggle_delay_ms = 0;
    config.timing.inter_entity_delay_ms = 0;
    config.run.enrich = false;
    config
}

/// Replay browser whose dropdowns list exactly what `config` selects
pub fn browser(config: &AppConfig) -> ReplayBrowser {
    ReplayBrowser::for_config(config)
}

pub struct TestStore {
    pub dir: TempDir,
    pub url: String,
    pub db: DatabaseConnection,
    pub repository: Arc<SqliteEntityRepository>,
}

pub async fn store() -> TestStore {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("harvest.db").display());
    let db = DatabaseConnection::new(&url).await.unwrap();
    db.migrate().await.unwrap();
    let repository = Arc::new(SqliteEntityRepository::new(db.pool().clone(), "qkb", "tirane"));
    TestStore {
        dir,
        url,
        db,
        repository,
    }
}

impl TestStore {
    /// Row count as seen by a separate connection, i.e. only committed rows
    pub async fn committed_rows(&self) -> i64 {
        let reader = DatabaseConnection::new(&self.url).await.unwrap();
        let count = sqlx::query("SELECT COUNT(*) AS n FROM tech_company")
            .fetch_one(reader.pool())
            .await
            .unwrap()
            .get::<i64, _>("n");
        reader.close().await;
        count
    }

    pub async fn committed_description(&self, nipt: &str) -> Option<String> {
        let reader = DatabaseConnection::new(&self.url).await.unwrap();
        let description = sqlx::query("SELECT activity_description FROM tech_company WHERE nipt = $1")
            .bind(nipt)
            .fetch_optional(reader.pool())
            .await
            .unwrap()
            .map(|row| row.get::<String, _>("activity_description"));
        reader.close().await;
        description
    }
}
