//! Detail enrichment
//!
//! Re-queries the registry by identifier, opens the detail modal of the matching
//! result card and extracts the full activity description.

use std::time::Duration;

use scraper::Selector;
use tracing::{debug, warn};

use crate::infrastructure::browser::{BrowserError, BrowserResult, BrowserSession, WaitCondition};
use crate::infrastructure::config::{AppConfig, RegistrySelectors, TimingConfig, qkb};
use crate::infrastructure::parsing::{ParsingError, extract_activity};

pub struct DetailEnricher {
    selectors: RegistrySelectors,
    card_identifier: Selector,
    card_detail_button: String,
    base_url: String,
    detail_url_template: Option<String>,
    timing: TimingConfig,
}

impl DetailEnricher {
    pub fn new(config: &AppConfig) -> Result<Self, ParsingError> {
        let selectors = config.registry.selectors.clone();
        let card_identifier = Selector::parse(&selectors.card_identifier)
            .map_err(|e| ParsingError::invalid_selector(&selectors.card_identifier, e))?;
        // Scoped to cards so button positions line up with card positions
        let card_detail_button = format!("{} {}", selectors.result_card, selectors.detail_button);

        Ok(Self {
            card_identifier,
            card_detail_button,
            base_url: config.registry.base_url.clone(),
            detail_url_template: config.registry.detail_url_template.clone(),
            timing: config.timing.clone(),
            selectors,
        })
    }

    /// Activity description for `identifier`, or "" when it could not be read.
    /// Only a lost session is an error.
    pub async fn enrich(&self, session: &mut dyn BrowserSession, identifier: &str) -> BrowserResult<String> {
        let modal_text = match &self.detail_url_template {
            Some(template) => self.read_linked_detail(session, template, identifier).await,
            None => self.read_detail_modal(session, identifier).await,
        };

        match modal_text {
            Ok(text) => {
                let activity = extract_activity(&text);
                if activity.is_empty() {
                    debug!(identifier = %identifier, "No activity field in detail view");
                }
                Ok(activity)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(identifier = %identifier, "Detail lookup failed: {}", e);
                Ok(String::new())
            }
        }
    }

    async fn read_detail_modal(&self, session: &mut dyn BrowserSession, identifier: &str) -> BrowserResult<String> {
        let s = &self.selectors;

        session.navigate(&self.base_url).await?;
        pause(session, self.timing.settle_delay_ms).await?;
        session.set_field(&s.nipt_input, identifier).await?;
        session.click(&s.submit).await?;
        session
            .wait_for(WaitCondition::selector(
                &s.result_list,
                Duration::from_millis(self.timing.results_render_timeout_ms),
            ))
            .await?;
        pause(session, self.timing.inter_cell_delay_ms).await?;

        let cards = session.read_all(&s.result_card).await?;
        let position = cards
            .iter()
            .position(|card| card.child_text(&self.card_identifier).as_deref() == Some(identifier))
            .ok_or_else(|| BrowserError::not_found(&format!("{} for {}", s.result_card, identifier)))?;

        let buttons = session.read_all(&self.card_detail_button).await?;
        let button = buttons
            .get(position)
            .ok_or_else(|| BrowserError::not_found(&self.card_detail_button))?;
        session.click_element(button).await?;

        let text = self.read_detail(session, &s.detail_modal_open).await?;

        if let Err(e) = session.click(&s.modal_close).await {
            if e.is_fatal() {
                return Err(e);
            }
            debug!("Detail modal not closed: {}", e);
        }
        Ok(text)
    }

    async fn read_linked_detail(
        &self,
        session: &mut dyn BrowserSession,
        template: &str,
        identifier: &str,
    ) -> BrowserResult<String> {
        let url = template.replace("{identifier}", identifier);
        session.navigate(&url).await?;
        self.read_detail(session, &self.selectors.detail_modal).await
    }

    /// Text of `container` once its activity field has rendered. The modal is in
    /// the page, hidden and empty, before it opens.
    async fn read_detail(&self, session: &mut dyn BrowserSession, container: &str) -> BrowserResult<String> {
        session
            .wait_for(WaitCondition::text(
                container,
                qkb::ACTIVITY_LABEL,
                Duration::from_millis(self.timing.detail_render_timeout_ms),
            ))
            .await?;
        Ok(session.read_text(container).await?.unwrap_or_default())
    }
}

async fn pause(session: &mut dyn BrowserSession, ms: u64) -> BrowserResult<()> {
    if ms == 0 {
        return Ok(());
    }
    session.wait_for(WaitCondition::Delay(Duration::from_millis(ms))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::browser::ReplayBrowser;
    use crate::infrastructure::browser::replay::{BrowserAction, result_card, result_page};

    const MODAL: &str = "Emri\nALPHA SOFT\nObjekti i aktivitetit\nZhvillim software\nQyteti\nTiranë";

    fn listing(id: &str) -> Vec<String> {
        vec![result_page(
            &[
                result_card("L0", "Other", "Tiranë", "SHPK", ""),
                result_card(id, "Alpha", "Tiranë", "SHPK", ""),
            ],
            &[],
        )]
    }

    #[tokio::test]
    async fn reads_activity_of_matching_card() {
        let config = AppConfig::default();
        let mut browser = ReplayBrowser::new(config.registry.selectors.clone())
            .with_results("L1", listing("L1"))
            .with_detail("L1", MODAL);
        let log = browser.action_log();
        let enricher = DetailEnricher::new(&config).unwrap();

        let activity = enricher.enrich(&mut browser, "L1").await.unwrap();

        assert_eq!(activity, "Zhvillim software");
        assert_eq!(log.typed_into(&config.registry.selectors.nipt_input), vec!["L1"]);
        assert_eq!(log.clicks_on(&config.registry.selectors.modal_close), 1);
    }

    #[tokio::test]
    async fn missing_card_yields_empty_text() {
        let config = AppConfig::default();
        let mut browser = ReplayBrowser::new(config.registry.selectors.clone()).with_results("L9", listing("L1"));
        let enricher = DetailEnricher::new(&config).unwrap();

        assert_eq!(enricher.enrich(&mut browser, "L9").await.unwrap(), "");
    }

    #[tokio::test]
    async fn modal_that_never_renders_yields_empty_text() {
        let config = AppConfig::default();
        let mut browser = ReplayBrowser::new(config.registry.selectors.clone()).with_results("L1", listing("L1"));
        let enricher = DetailEnricher::new(&config).unwrap();

        assert_eq!(enricher.enrich(&mut browser, "L1").await.unwrap(), "");
    }

    #[tokio::test]
    async fn waits_for_the_shown_modal_to_carry_the_activity() {
        let config = AppConfig::default();
        let selectors = config.registry.selectors.clone();
        let mut browser = ReplayBrowser::new(selectors.clone())
            .with_results("L1", listing("L1"))
            .with_detail("L1", MODAL);
        let log = browser.action_log();
        let enricher = DetailEnricher::new(&config).unwrap();

        enricher.enrich(&mut browser, "L1").await.unwrap();

        let expected = WaitCondition::text(
            &selectors.detail_modal_open,
            qkb::ACTIVITY_LABEL,
            Duration::from_millis(config.timing.detail_render_timeout_ms),
        );
        assert!(log.snapshot().contains(&BrowserAction::Wait(expected)));
        assert!(log.snapshot().contains(&BrowserAction::ReadText(selectors.detail_modal_open.clone())));
    }

    #[tokio::test]
    async fn modal_without_activity_field_yields_empty_text() {
        let config = AppConfig::default();
        let mut browser = ReplayBrowser::new(config.registry.selectors.clone())
            .with_results("L1", listing("L1"))
            .with_detail("L1", "Emri\nALPHA SOFT\nQyteti\nTiranë");
        let enricher = DetailEnricher::new(&config).unwrap();

        assert_eq!(enricher.enrich(&mut browser, "L1").await.unwrap(), "");
    }

    #[tokio::test]
    async fn lost_session_propagates() {
        let config = AppConfig::default();
        let mut browser = ReplayBrowser::new(config.registry.selectors.clone()).failing(
            &config.registry.selectors.nipt_input,
            BrowserError::SessionLost { message: "ws closed".into() },
        );
        let enricher = DetailEnricher::new(&config).unwrap();

        assert!(enricher.enrich(&mut browser, "L1").await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn deep_link_skips_the_search_form() {
        let mut config = AppConfig::default();
        config.registry.detail_url_template = Some("https://registry.test/subjekt/{identifier}".into());
        let mut browser = ReplayBrowser::new(config.registry.selectors.clone())
            .with_page(
                "https://registry.test/subjekt/L1",
                &format!("<div id=\"detailModal\">{MODAL}</div>"),
            );
        let log = browser.action_log();
        let enricher = DetailEnricher::new(&config).unwrap();

        assert_eq!(enricher.enrich(&mut browser, "L1").await.unwrap(), "Zhvillim software");
        assert!(log.typed_into(&config.registry.selectors.nipt_input).is_empty());
    }
}
