//! Per-run bookkeeping for one harvest
//!
//! A `RunState` lives for exactly one orchestrator run and is handed back as a
//! `RunSummary`; nothing here is process-global.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::entity::{DiscoveredEntity, UpsertOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Init,
    GridSearch,
    Enrichment,
    Done,
    Interrupted,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Interrupted | Self::Failed)
    }

    /// Allowed transitions of the run state machine
    pub fn can_transition_to(self, next: Self) -> bool {
        use RunPhase::{Done, Enrichment, Failed, GridSearch, Init, Interrupted};
        matches!(
            (self, next),
            (Init, GridSearch)
                | (Init, Failed)
                | (GridSearch, Enrichment)
                | (GridSearch, Done)
                | (GridSearch, Interrupted)
                | (GridSearch, Failed)
                | (Enrichment, Done)
                | (Enrichment, Interrupted)
                | (Enrichment, Failed)
        )
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed,
    Interrupted { reason: String },
    Failed { reason: String },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Interrupted { reason } => write!(f, "interrupted ({reason})"),
            Self::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}

#[derive(Debug)]
pub struct RunState {
    phase: RunPhase,
    pub known_identifiers: usize,
    pub found_this_run: Vec<DiscoveredEntity>,
    pub cells_completed: usize,
    pub cells_skipped: usize,
    pub created: usize,
    pub updated: usize,
    pub enriched: usize,
    pub write_failures: usize,
    seen: HashSet<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Init,
            known_identifiers: 0,
            found_this_run: Vec::new(),
            cells_completed: 0,
            cells_skipped: 0,
            created: 0,
            updated: 0,
            enriched: 0,
            write_failures: 0,
            seen: HashSet::new(),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Moves to `next`; illegal transitions are ignored and reported as `false`
    pub fn advance(&mut self, next: RunPhase) -> bool {
        if self.phase.can_transition_to(next) {
            self.phase = next;
            true
        } else {
            false
        }
    }

    /// Records an entity found in this run; a repeated identifier is rejected
    pub fn record_found(&mut self, entity: DiscoveredEntity) -> bool {
        if !self.seen.insert(entity.identifier.clone()) {
            return false;
        }
        self.found_this_run.push(entity);
        true
    }

    pub fn record_write(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
    }

    pub fn discovered(&self) -> usize {
        self.found_this_run.len()
    }

    pub fn summarize(&self, outcome: RunOutcome, searches_planned: usize, elapsed: Duration) -> RunSummary {
        RunSummary {
            outcome,
            searches_planned,
            searches_completed: self.cells_completed,
            cells_skipped: self.cells_skipped,
            discovered: self.discovered(),
            created: self.created,
            updated: self.updated,
            enriched: self.enriched,
            write_failures: self.write_failures,
            elapsed,
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts reported at the end of every run, whatever its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub searches_planned: usize,
    pub searches_completed: usize,
    pub cells_skipped: usize,
    pub discovered: usize,
    pub created: usize,
    pub updated: usize,
    pub enriched: usize,
    pub write_failures: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed.as_secs()
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, RunOutcome::Failed { .. })
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "outcome={} searches={}/{} skipped={} discovered={} created={} updated={} enriched={} write_failures={} elapsed={}s",
            self.outcome,
            self.searches_completed,
            self.searches_planned,
            self.cells_skipped,
            self.discovered,
            self.created,
            self.updated,
            self.enriched,
            self.write_failures,
            self.elapsed_seconds(),
        )
    }
}
