use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A legal entity surfaced by an activity-keyword search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredEntity {
    /// NIPT, the registry's unique tax identifier
    pub identifier: String,
    pub display_name: String,
    /// Canonical city key (`tirane`, `durres`, ...)
    pub city: String,
    pub legal_form: String,
    pub registration_date: String,
    /// Full "Objekti i aktivitetit" text, empty until enrichment
    pub activity_description: String,
    /// Grid keyword whose search first returned this entity
    pub matched_keyword: String,
    pub is_tech: bool,
}

impl DiscoveredEntity {
    pub fn new(identifier: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            city: String::new(),
            legal_form: String::new(),
            registration_date: String::new(),
            activity_description: String::new(),
            matched_keyword: String::new(),
            is_tech: true,
        }
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = city.into();
        self
    }

    pub fn with_legal_form(mut self, legal_form: impl Into<String>) -> Self {
        self.legal_form = legal_form.into();
        self
    }

    pub fn with_registration_date(mut self, date: impl Into<String>) -> Self {
        self.registration_date = date.into();
        self
    }

    pub fn with_activity_description(mut self, text: impl Into<String>) -> Self {
        self.activity_description = text.into();
        self
    }

    pub fn with_matched_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.matched_keyword = keyword.into();
        self
    }

    /// Rows without an identifier or a name are registry noise and never persisted
    pub fn is_persistable(&self) -> bool {
        !self.identifier.trim().is_empty() && !self.display_name.trim().is_empty()
    }
}

/// Result of writing one entity through the persistence gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Stored row as read back from the `tech_company` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub entity: DiscoveredEntity,
    pub data_source: String,
    pub last_scraped: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistable_requires_identifier_and_name() {
        assert!(DiscoveredEntity::new("K12345678A", "Alpha Soft").is_persistable());
        assert!(!DiscoveredEntity::new("", "Alpha Soft").is_persistable());
        assert!(!DiscoveredEntity::new("K12345678A", "   ").is_persistable());
    }

    #[test]
    fn new_entities_are_flagged_tech() {
        let entity = DiscoveredEntity::new("L01", "Beta").with_city("durres");
        assert!(entity.is_tech);
        assert_eq!(entity.city, "durres");
        assert!(entity.activity_description.is_empty());
    }
}
