//! Repository interfaces for harvested registry entities
//!
//! The pipeline only needs a store keyed by identifier: a snapshot of what is already
//! known, idempotent upserts, description updates and explicit checkpoint commits.

use async_trait::async_trait;
use anyhow::Result;
use std::collections::HashSet;
use crate::domain::entity::{DiscoveredEntity, StoredEntity, UpsertOutcome};

#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Identifiers already present in storage
    async fn load_known_identifiers(&self) -> Result<HashSet<String>>;

    /// Insert a new entity or merge into the existing row, keeping populated fields
    async fn upsert(&self, entity: &DiscoveredEntity) -> Result<UpsertOutcome>;

    /// Replace the activity description. Blank text and unknown identifiers are no-ops;
    /// returns whether a row was changed.
    async fn update_description(&self, identifier: &str, text: &str) -> Result<bool>;

    /// Make every write since the previous checkpoint durable
    async fn checkpoint(&self) -> Result<()>;

    async fn find(&self, identifier: &str) -> Result<Option<StoredEntity>>;
}
