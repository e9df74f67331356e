//! Result page parser for the registry's activity search
//!
//! Reads the result cards rendered in the live session, drops natural persons and
//! incomplete rows, and locates the link to the following page.

#![allow(clippy::uninlined_format_args)]

use scraper::{Html, Selector};
use tracing::{debug, warn};

use super::{ParsingError, ParsingResult};
use crate::domain::entity::DiscoveredEntity;
use crate::infrastructure::browser::{BrowserSession, ElementHandle, collapse_whitespace};
use crate::infrastructure::config::RegistrySelectors;
use crate::infrastructure::parsing::city::normalize_city;

/// One result card as rendered by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub identifier: String,
    pub display_name: String,
    pub city_text: String,
    pub legal_form_text: String,
    pub registration_date_text: String,
}

impl ResultRow {
    pub fn into_entity(self, keyword: &str, primary_city: &str) -> DiscoveredEntity {
        let city = normalize_city(&self.city_text, primary_city);
        DiscoveredEntity::new(self.identifier, self.display_name)
            .with_city(city)
            .with_legal_form(self.legal_form_text)
            .with_registration_date(self.registration_date_text)
            .with_matched_keyword(keyword)
    }
}

/// Link to the page after the one just parsed
#[derive(Debug, Clone)]
pub struct PageTurn {
    pub page: u32,
    link: ElementHandle,
}

impl PageTurn {
    pub fn link(&self) -> &ElementHandle {
        &self.link
    }
}

#[derive(Debug, Clone)]
pub struct ResultPage {
    pub page: u32,
    pub rows: Vec<ResultRow>,
    /// Cards rejected as incomplete or natural persons
    pub dropped: usize,
    pub next: Option<PageTurn>,
}

pub struct ResultPageParser {
    card_selector: String,
    pagination_selector: String,
    identifier: Selector,
    name: Selector,
    city: Selector,
    legal_form: Selector,
    registration_date: Selector,
    natural_person_marker: String,
}

impl ResultPageParser {
    pub fn new(selectors: &RegistrySelectors, natural_person_marker: &str) -> ParsingResult<Self> {
        // Compiled up front so a bad override fails at startup, not mid-run
        compile(&selectors.result_card)?;
        compile(&selectors.pagination_link)?;

        Ok(Self {
            card_selector: selectors.result_card.clone(),
            pagination_selector: selectors.pagination_link.clone(),
            identifier: compile(&selectors.card_identifier)?,
            name: compile(&selectors.card_name)?,
            city: compile(&selectors.card_city)?,
            legal_form: compile(&selectors.card_legal_form)?,
            registration_date: compile(&selectors.card_registration_date)?,
            natural_person_marker: natural_person_marker.to_lowercase(),
        })
    }

    /// Parses the page the session is showing. No next page is offered once
    /// `page` reaches `page_cap`.
    pub async fn parse_page(
        &self,
        session: &mut dyn BrowserSession,
        page: u32,
        page_cap: u32,
    ) -> ParsingResult<ResultPage> {
        let unreadable = |source| ParsingError::PageUnreadable { page, source };

        let cards = session.read_all(&self.card_selector).await.map_err(unreadable)?;
        let total = cards.len();
        let rows: Vec<ResultRow> = cards.iter().filter_map(|card| self.extract_row(card)).collect();

        let next = if page < page_cap {
            match session.read_all(&self.pagination_selector).await {
                Ok(links) => {
                    let wanted = (page + 1).to_string();
                    links
                        .into_iter()
                        .find(|link| link.text() == wanted)
                        .map(|link| PageTurn { page: page + 1, link })
                }
                Err(e) if e.is_fatal() => return Err(unreadable(e)),
                // The cards are already read; only the walk ends here
                Err(e) => {
                    warn!("Pagination on page {} unreadable: {}", page, e);
                    None
                }
            }
        } else {
            None
        };

        debug!(
            "Page {}: {} cards, {} kept, next page: {}",
            page,
            total,
            rows.len(),
            next.is_some()
        );

        Ok(ResultPage {
            page,
            dropped: total - rows.len(),
            rows,
            next,
        })
    }

    /// Row for a single card, or `None` when it must not be persisted
    pub fn extract_row(&self, card: &ElementHandle) -> Option<ResultRow> {
        let fragment = Html::parse_fragment(card.outer_html());
        let text_of = |selector: &Selector| {
            fragment
                .select(selector)
                .next()
                .map(|e| collapse_whitespace(&e.text().collect::<String>()))
                .unwrap_or_default()
        };

        let row = ResultRow {
            identifier: text_of(&self.identifier),
            display_name: text_of(&self.name),
            city_text: text_of(&self.city),
            legal_form_text: text_of(&self.legal_form),
            registration_date_text: text_of(&self.registration_date),
        };

        if row.identifier.is_empty() || row.display_name.is_empty() {
            return None;
        }
        if self.is_natural_person(&row.legal_form_text) {
            return None;
        }
        Some(row)
    }

    fn is_natural_person(&self, legal_form: &str) -> bool {
        !self.natural_person_marker.is_empty()
            && legal_form.to_lowercase().contains(&self.natural_person_marker)
    }
}

fn compile(selector: &str) -> ParsingResult<Selector> {
    Selector::parse(selector).map_err(|e| ParsingError::invalid_selector(selector, e))
}
