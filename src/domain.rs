//! Domain layer for the registry harvester
//!
//! Search grid, harvested entities, per-run state and the repository seam.

pub mod entity;
pub mod repositories;
pub mod run_state;
pub mod search_grid;

pub use entity::{DiscoveredEntity, StoredEntity, UpsertOutcome};
pub use repositories::EntityRepository;
pub use run_state::{RunOutcome, RunPhase, RunState, RunSummary};
pub use search_grid::{DateRange, GridError, SearchCell, SearchGrid, YearMonth};
