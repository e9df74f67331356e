//! Application layer
//!
//! Grid crawling, detail enrichment, run orchestration and run triggering on top
//! of the domain types and infrastructure adapters.

pub mod detail_enricher;
pub mod grid_crawler;
pub mod orchestrator;
pub mod run_control;

pub use detail_enricher::DetailEnricher;
pub use grid_crawler::{CellOutcome, CellStatus, CrawlError, GridCrawl, SearchGridCrawler};
pub use orchestrator::{HarvestError, RunOrchestrator};
pub use run_control::{LockInfo, RunHandle, RunLock, TriggerOutcome, trigger};
