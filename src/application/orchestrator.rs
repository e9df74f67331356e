//! Run orchestration
//!
//! Drives one harvest: load known identifiers, search every grid cell and upsert
//! what it surfaces, then enrich the entities found in this run. Writes are
//! committed in batches and cancellation is honoured between cells and entities.

#![allow(clippy::uninlined_format_args)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::detail_enricher::DetailEnricher;
use crate::application::grid_crawler::{CellStatus, CrawlError, SearchGridCrawler};
use crate::domain::entity::DiscoveredEntity;
use crate::domain::repositories::EntityRepository;
use crate::domain::run_state::{RunOutcome, RunPhase, RunState, RunSummary};
use crate::domain::search_grid::SearchGrid;
use crate::infrastructure::browser::{BrowserError, BrowserSession, WaitCondition};
use crate::infrastructure::config::{AppConfig, ConfigError};
use crate::infrastructure::parsing::ParsingError;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load known identifiers: {0:#}")]
    Init(anyhow::Error),

    #[error("Grid crawler setup failed: {0}")]
    Setup(#[from] CrawlError),

    #[error("Detail enricher setup failed: {0}")]
    EnricherSetup(#[from] ParsingError),

    #[error("Browser session could not be opened: {0}")]
    Browser(#[from] BrowserError),

    #[error("Run lock unavailable: {0}")]
    Lock(#[from] std::io::Error),

    #[error("Harvest task failed: {0}")]
    Task(String),
}

/// Why a phase stopped before reaching its end
enum Halt {
    Interrupted(String),
    Failed(String),
}

pub struct RunOrchestrator {
    config: AppConfig,
    grid: SearchGrid,
    repository: Arc<dyn EntityRepository>,
    crawler: SearchGridCrawler,
    enricher: DetailEnricher,
    cancel: CancellationToken,
}

impl RunOrchestrator {
    pub fn new(config: AppConfig, repository: Arc<dyn EntityRepository>) -> Result<Self, HarvestError> {
        config.validate()?;
        let crawler = SearchGridCrawler::new(&config)?;
        let enricher = DetailEnricher::new(&config)?;
        let grid = config.grid.to_grid();

        Ok(Self {
            config,
            grid,
            repository,
            crawler,
            enricher,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the run at the next cell or entity boundary
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn grid(&self) -> &SearchGrid {
        &self.grid
    }

    /// Runs one harvest to completion, interruption or failure. A failed run still
    /// yields its summary; `Err` is reserved for runs that never got going.
    pub async fn run(&self, session: &mut dyn BrowserSession) -> Result<RunSummary, HarvestError> {
        let started = Instant::now();
        let deadline = self
            .config
            .run
            .run_timeout_secs
            .map(|secs| started + Duration::from_secs(secs));
        let mut state = RunState::new();

        info!(
            "🚀 Harvest started: {} searches ({} keywords × {} legal forms × {} date ranges)",
            self.grid.len(),
            self.grid.keywords().len(),
            self.grid.legal_forms().len(),
            self.grid.date_ranges().len()
        );

        let known = self.repository.load_known_identifiers().await.map_err(HarvestError::Init)?;
        state.known_identifiers = known.len();
        info!("📚 {} identifiers already stored", known.len());
        state.advance(RunPhase::GridSearch);

        let mut halt = self.grid_search(session, &known, &mut state, deadline).await.err();

        if halt.is_none() && self.config.run.enrich && state.discovered() > 0 {
            state.advance(RunPhase::Enrichment);
            halt = self.enrichment(session, &mut state, deadline).await.err();
        }

        let outcome = match halt {
            None => {
                state.advance(RunPhase::Done);
                RunOutcome::Completed
            }
            Some(Halt::Interrupted(reason)) => {
                state.advance(RunPhase::Interrupted);
                self.checkpoint().await;
                RunOutcome::Interrupted { reason }
            }
            Some(Halt::Failed(reason)) => {
                state.advance(RunPhase::Failed);
                self.checkpoint().await;
                RunOutcome::Failed { reason }
            }
        };

        let summary = state.summarize(outcome, self.grid.len(), started.elapsed());
        if summary.is_success() {
            info!("📊 Harvest finished: {}", summary);
        } else {
            error!("❌ Harvest failed: {}", summary);
        }
        Ok(summary)
    }

    async fn grid_search(
        &self,
        session: &mut dyn BrowserSession,
        known: &HashSet<String>,
        state: &mut RunState,
        deadline: Option<Instant>,
    ) -> Result<(), Halt> {
        let every = usize::try_from(self.config.run.checkpoint_every_n_cells.max(1)).unwrap_or(1);
        let mut crawl = self.crawler.crawl(session, &self.grid, known);
        let total = crawl.cells_total();

        loop {
            if let Some(reason) = self.stop_reason(deadline) {
                info!("🛑 Grid search stopped after {} of {} searches: {}", crawl.position(), total, reason);
                return Err(Halt::Interrupted(reason));
            }

            let outcome = match crawl.next_cell().await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => break,
                Err(e) => {
                    error!("Grid search aborted: {}", e);
                    return Err(Halt::Failed(e.to_string()));
                }
            };

            match &outcome.status {
                CellStatus::Completed => state.cells_completed += 1,
                CellStatus::Skipped { .. } => state.cells_skipped += 1,
            }

            let found = outcome.discovered.len();
            for entity in outcome.discovered {
                self.persist(state, entity).await;
            }

            if found > 0 {
                info!(
                    "[{}/{}] {}: +{} (total: {}, saved: {})",
                    outcome.index + 1,
                    total,
                    outcome.cell,
                    found,
                    state.discovered(),
                    state.created + state.updated
                );
            }
            if outcome.closes_keyword {
                info!(
                    keyword = %outcome.cell.keyword,
                    "[KEYWORD DONE] '{}' (total: {})",
                    outcome.cell.keyword,
                    state.discovered()
                );
            }
            if (outcome.index + 1) % every == 0 {
                self.checkpoint().await;
            }
        }

        self.checkpoint().await;
        info!(
            "✅ Grid search complete: {} searches, {} skipped, {} new entities",
            state.cells_completed,
            state.cells_skipped,
            state.discovered()
        );
        Ok(())
    }

    async fn enrichment(
        &self,
        session: &mut dyn BrowserSession,
        state: &mut RunState,
        deadline: Option<Instant>,
    ) -> Result<(), Halt> {
        let targets: Vec<(String, String)> = state
            .found_this_run
            .iter()
            .map(|e| (e.identifier.clone(), e.display_name.clone()))
            .collect();
        let total = targets.len();
        let every = usize::try_from(self.config.run.checkpoint_every_n_entities.max(1)).unwrap_or(1);
        let delay = Duration::from_millis(self.config.timing.inter_entity_delay_ms);

        info!("🔎 Enriching {} entities", total);
        for (i, (identifier, name)) in targets.iter().enumerate() {
            if let Some(reason) = self.stop_reason(deadline) {
                info!("🛑 Enrichment stopped after {} of {} entities: {}", i, total, reason);
                return Err(Halt::Interrupted(reason));
            }

            let text = match self.enricher.enrich(session, identifier).await {
                Ok(text) => text,
                Err(e) => {
                    error!(identifier = %identifier, "Enrichment aborted: {}", e);
                    return Err(Halt::Failed(e.to_string()));
                }
            };
            if !text.is_empty() {
                match self.repository.update_description(identifier, &text).await {
                    Ok(true) => state.enriched += 1,
                    Ok(false) => debug!(identifier = %identifier, "Description unchanged"),
                    Err(e) => {
                        state.write_failures += 1;
                        warn!(identifier = %identifier, "Description write failed: {:#}", e);
                    }
                }
            }

            let done = i + 1;
            if done % every == 0 {
                self.checkpoint().await;
                info!("[ENRICH {}/{}] {} (enriched: {})", done, total, name, state.enriched);
            }
            if done < total && !delay.is_zero() {
                if let Err(e) = session.wait_for(WaitCondition::Delay(delay)).await {
                    if e.is_fatal() {
                        return Err(Halt::Failed(e.to_string()));
                    }
                }
            }
        }

        self.checkpoint().await;
        info!("✅ Enrichment complete: {}/{} descriptions stored", state.enriched, total);
        Ok(())
    }

    /// Upserts once; a failed write is counted and not retried
    async fn persist(&self, state: &mut RunState, entity: DiscoveredEntity) {
        match self.repository.upsert(&entity).await {
            Ok(outcome) => state.record_write(outcome),
            Err(e) => {
                state.write_failures += 1;
                warn!(identifier = %entity.identifier, "Upsert failed: {:#}", e);
            }
        }
        state.record_found(entity);
    }

    async fn checkpoint(&self) {
        if let Err(e) = self.repository.checkpoint().await {
            warn!("Checkpoint failed, writes carried to the next one: {:#}", e);
        }
    }

    fn stop_reason(&self, deadline: Option<Instant>) -> Option<String> {
        if self.cancel.is_cancelled() {
            return Some("cancelled".to_string());
        }
        match deadline {
            Some(deadline) if Instant::now() >= deadline => Some(format!(
                "run timeout of {}s reached",
                self.config.run.run_timeout_secs.unwrap_or_default()
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::{StoredEntity, UpsertOutcome};
    use crate::domain::search_grid::DateRange;
    use crate::infrastructure::browser::ReplayBrowser;
    use crate::infrastructure::browser::replay::{result_card, result_page};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory store that can be told to reject writes
    #[derive(Default)]
    struct MemoryRepository {
        known: HashSet<String>,
        upserts: Mutex<Vec<String>>,
        descriptions: Mutex<Vec<(String, String)>>,
        checkpoints: Mutex<usize>,
        reject_upserts: bool,
    }

    #[async_trait]
    impl EntityRepository for MemoryRepository {
        async fn load_known_identifiers(&self) -> anyhow::Result<HashSet<String>> {
            Ok(self.known.clone())
        }

        async fn upsert(&self, entity: &DiscoveredEntity) -> anyhow::Result<UpsertOutcome> {
            if self.reject_upserts {
                anyhow::bail!("disk full");
            }
            self.upserts.lock().unwrap().push(entity.identifier.clone());
            Ok(UpsertOutcome::Created)
        }

        async fn update_description(&self, identifier: &str, text: &str) -> anyhow::Result<bool> {
            self.descriptions
                .lock()
                .unwrap()
                .push((identifier.to_string(), text.to_string()));
            Ok(true)
        }

        async fn checkpoint(&self) -> anyhow::Result<()> {
            *self.checkpoints.lock().unwrap() += 1;
            Ok(())
        }

        async fn find(&self, _identifier: &str) -> anyhow::Result<Option<StoredEntity>> {
            Ok(None)
        }
    }

    fn config(keywords: &[&str]) -> AppConfig {
        let mut config = AppConfig::default();
        config.grid.keywords = keywords.iter().map(|k| (*k).to_string()).collect();
        config.grid.legal_forms = vec!["Shoqeri me pergjegjesi te kufizuar".into()];
        config.grid.date_ranges = vec![DateRange::months(2024, 1, 2024, 6).unwrap()];
        config.timing.inter_page_delay_ms = 0;
        config.timing.inter_cell_delay_ms = 0;
        config.timing.settle_delay_ms = 0;
        config.timing.section_toggle_delay_ms = 0;
        config.timing.inter_entity_delay_ms = 0;
        config.run.enrich = false;
        config
    }

    fn browser(config: &AppConfig) -> ReplayBrowser {
        ReplayBrowser::for_config(config).with_results(
            "software",
            vec![result_page(
                &[
                    result_card("A1", "Alpha", "Tiranë", "SHPK", "01.02.2024"),
                    result_card("B2", "Beta", "Durrës", "SHPK", "03.04.2024"),
                ],
                &[],
            )],
        )
    }

    #[tokio::test]
    async fn completed_run_counts_every_write() {
        let config = config(&["software", "cloud"]);
        let repository = Arc::new(MemoryRepository::default());
        let orchestrator = RunOrchestrator::new(config.clone(), repository.clone()).unwrap();

        let summary = orchestrator.run(&mut browser(&config)).await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.searches_planned, 2);
        assert_eq!(summary.searches_completed, 2);
        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.created, 2);
        assert_eq!(*repository.upserts.lock().unwrap(), vec!["A1", "B2"]);
        assert!(*repository.checkpoints.lock().unwrap() >= 1);
    }

    #[tokio::test]
    async fn failed_writes_are_counted_not_retried() {
        let config = config(&["software"]);
        let repository = Arc::new(MemoryRepository {
            reject_upserts: true,
            ..MemoryRepository::default()
        });
        let orchestrator = RunOrchestrator::new(config.clone(), repository).unwrap();

        let summary = orchestrator.run(&mut browser(&config)).await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.write_failures, 2);
        assert_eq!(summary.created, 0);
        assert_eq!(summary.discovered, 2);
    }

    #[tokio::test]
    async fn cancelled_before_start_searches_nothing() {
        let config = config(&["software"]);
        let repository = Arc::new(MemoryRepository::default());
        let orchestrator = RunOrchestrator::new(config.clone(), repository.clone()).unwrap();
        orchestrator.cancellation_token().cancel();

        let summary = orchestrator.run(&mut browser(&config)).await.unwrap();

        assert!(matches!(summary.outcome, RunOutcome::Interrupted { .. }));
        assert_eq!(summary.searches_completed, 0);
        assert!(repository.upserts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkpoints_every_n_cells_and_at_the_end() {
        let mut config = config(&["software", "cloud", "data"]);
        config.run.checkpoint_every_n_cells = 2;
        let repository = Arc::new(MemoryRepository::default());
        let orchestrator = RunOrchestrator::new(config.clone(), repository.clone()).unwrap();

        let summary = orchestrator.run(&mut browser(&config)).await.unwrap();

        assert_eq!(summary.searches_completed, 3);
        // After cell 2, then once when the grid is exhausted
        assert_eq!(*repository.checkpoints.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn elapsed_deadline_interrupts_before_the_first_search() {
        let mut config = config(&["software", "cloud"]);
        config.run.run_timeout_secs = Some(0);
        let repository = Arc::new(MemoryRepository::default());
        let orchestrator = RunOrchestrator::new(config.clone(), repository.clone()).unwrap();
        let mut browser = browser(&config);
        let log = browser.action_log();

        let summary = orchestrator.run(&mut browser).await.unwrap();

        let RunOutcome::Interrupted { reason } = &summary.outcome else {
            panic!("expected an interrupted run, got {:?}", summary.outcome);
        };
        assert!(reason.contains("run timeout"));
        assert_eq!(summary.searches_completed, 0);
        assert_eq!(log.clicks_on(&config.registry.selectors.submit), 0);
        assert!(repository.upserts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lost_session_fails_the_run_with_a_summary() {
        let config = config(&["software"]);
        let repository = Arc::new(MemoryRepository::default());
        let orchestrator = RunOrchestrator::new(config.clone(), repository).unwrap();
        let mut browser = browser(&config).failing(
            &config.registry.selectors.submit,
            BrowserError::SessionLost { message: "target crashed".into() },
        );

        let summary = orchestrator.run(&mut browser).await.unwrap();

        assert!(!summary.is_success());
        assert_eq!(summary.searches_completed, 0);
    }

    #[tokio::test]
    async fn enrichment_updates_descriptions_of_new_entities() {
        let mut config = config(&["software"]);
        config.run.enrich = true;
        let repository = Arc::new(MemoryRepository::default());
        let orchestrator = RunOrchestrator::new(config.clone(), repository.clone()).unwrap();
        let modal = "Objekti i aktivitetit\nProgramim kompjuterik\nQyteti\nTiranë";
        let mut browser = browser(&config)
            .with_results("A1", vec![result_page(&[result_card("A1", "Alpha", "Tiranë", "SHPK", "")], &[])])
            .with_detail("A1", modal);

        let summary = orchestrator.run(&mut browser).await.unwrap();

        assert_eq!(summary.enriched, 1);
        assert_eq!(
            *repository.descriptions.lock().unwrap(),
            vec![("A1".to_string(), "Programim kompjuterik".to_string())]
        );
    }

    #[test]
    fn invalid_configuration_is_refused() {
        let mut config = config(&["software"]);
        config.grid.keywords.clear();
        let repository = Arc::new(MemoryRepository::default());

        assert!(matches!(
            RunOrchestrator::new(config, repository),
            Err(HarvestError::Config(_))
        ));
    }
}
