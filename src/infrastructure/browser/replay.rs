//! Scripted browser that replays canned registry screens
//!
//! The document is assembled from the search form, the current results page (keyed
//! by the last value typed into any field) and the detail modal, which stays in the
//! DOM hidden until a detail button opens it. Selectors are resolved with `scraper`
//! against that document, so the crawler and the enricher run unchanged against it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use scraper::{Html, Selector};

use super::{BrowserError, BrowserResult, BrowserSession, ElementHandle, WaitCondition};
use crate::infrastructure::config::{AppConfig, RegistrySelectors, defaults, qkb};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserAction {
    Navigate(String),
    SetField { selector: String, value: String },
    SelectOption { selector: String, value: String },
    Click(String),
    ClickElement { selector: String, index: usize, text: String },
    Wait(WaitCondition),
    ReadText(String),
    ReadAll(String),
    Script(String),
    Close,
}

/// Shared view of every action a `ReplayBrowser` performed
#[derive(Debug, Clone, Default)]
pub struct ActionLog {
    actions: Arc<Mutex<Vec<BrowserAction>>>,
}

impl ActionLog {
    fn lock(&self) -> MutexGuard<'_, Vec<BrowserAction>> {
        self.actions.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn push(&self, action: BrowserAction) {
        self.lock().push(action);
    }

    pub fn snapshot(&self) -> Vec<BrowserAction> {
        self.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&BrowserAction) -> bool) -> usize {
        self.lock().iter().filter(|a| predicate(a)).count()
    }

    pub fn clicks_on(&self, selector: &str) -> usize {
        self.count(|a| matches!(a, BrowserAction::Click(s) if s == selector))
    }

    /// Values typed into `selector`, in order
    pub fn typed_into(&self, selector: &str) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|a| match a {
                BrowserAction::SetField { selector: s, value } if s == selector => Some(value.clone()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Screen {
    Blank,
    Form,
    Results { key: String, page: usize },
    Page(String),
}

pub struct ReplayBrowser {
    selectors: RegistrySelectors,
    form_html: String,
    results: HashMap<String, Vec<String>>,
    details: HashMap<String, String>,
    pages: HashMap<String, String>,
    failures: HashMap<String, BrowserError>,
    click_failures: HashMap<String, BrowserError>,
    raw_result: serde_json::Value,
    screen: Screen,
    last_typed: String,
    modal: Option<String>,
    generation: u64,
    closed: bool,
    log: ActionLog,
}

impl ReplayBrowser {
    /// Form offering the default region and legal forms
    pub fn new(selectors: RegistrySelectors) -> Self {
        let legal_forms: Vec<String> = defaults::LEGAL_FORMS.iter().map(|f| (*f).to_string()).collect();
        let form_html = search_form_html(&selectors, &[qkb::REGION.to_string()], &legal_forms);
        Self::from_form(selectors, form_html)
    }

    /// Form offering exactly the region and legal forms `config` searches with
    pub fn for_config(config: &AppConfig) -> Self {
        let selectors = config.registry.selectors.clone();
        let form_html = search_form_html(&selectors, &[config.registry.region.clone()], &config.grid.legal_forms);
        Self::from_form(selectors, form_html)
    }

    fn from_form(selectors: RegistrySelectors, form_html: String) -> Self {
        Self {
            selectors,
            form_html,
            results: HashMap::new(),
            details: HashMap::new(),
            pages: HashMap::new(),
            failures: HashMap::new(),
            click_failures: HashMap::new(),
            raw_result: serde_json::Value::Bool(true),
            screen: Screen::Blank,
            last_typed: String::new(),
            modal: None,
            generation: 0,
            closed: false,
            log: ActionLog::default(),
        }
    }

    /// Result pages shown after submitting with `key` as the last typed value
    pub fn with_results(mut self, key: &str, pages: Vec<String>) -> Self {
        self.results.insert(key.to_string(), pages);
        self
    }

    /// Modal body shown when the detail button is clicked for `identifier`.
    /// Without one the modal opens empty.
    pub fn with_detail(mut self, identifier: &str, modal_html: &str) -> Self {
        self.details.insert(identifier.to_string(), modal_html.to_string());
        self
    }

    /// Document served when navigating to exactly `url`
    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn with_form_html(mut self, html: &str) -> Self {
        self.form_html = html.to_string();
        self
    }

    /// Every interaction with `selector` fails with `error`
    pub fn failing(mut self, selector: &str, error: BrowserError) -> Self {
        self.failures.insert(selector.to_string(), error);
        self
    }

    /// Clicks on `selector` fail with `error`; reading it still works
    pub fn failing_click(mut self, selector: &str, error: BrowserError) -> Self {
        self.click_failures.insert(selector.to_string(), error);
        self
    }

    pub fn with_raw_result(mut self, value: serde_json::Value) -> Self {
        self.raw_result = value;
        self
    }

    pub fn action_log(&self) -> ActionLog {
        self.log.clone()
    }

    fn document(&self) -> String {
        let body = match &self.screen {
            Screen::Blank => String::new(),
            Screen::Form => format!("{}{}", self.form_html, self.modal_html()),
            Screen::Results { key, page } => {
                // Searches with nothing scripted render an empty list, as the registry does
                let listing = self
                    .results
                    .get(key)
                    .and_then(|pages| pages.get(page.saturating_sub(1)))
                    .cloned()
                    .unwrap_or_else(|| result_page(&[], &[]));
                format!("{}{}{}", self.form_html, listing, self.modal_html())
            }
            Screen::Page(html) => html.clone(),
        };
        format!("<html><body>{body}</body></html>")
    }

    fn modal_html(&self) -> String {
        let id = strip_hash(&self.selectors.detail_modal);
        match &self.modal {
            Some(body) => format!(
                r#"<div id="{id}" class="modal show"><button type="button" class="btn-close"></button>{body}</div>"#
            ),
            None => format!(r#"<div id="{id}" class="modal"><button type="button" class="btn-close"></button></div>"#),
        }
    }

    /// Whether the first `select` matching `selector` lists `value`. An option
    /// without a `value` attribute is matched on its text.
    fn has_option(&self, selector: &str, value: &str) -> BrowserResult<bool> {
        let parsed = Selector::parse(selector).map_err(|e| BrowserError::script(format!("bad selector {selector}: {e}")))?;
        let option = Selector::parse("option").map_err(|e| BrowserError::script(e.to_string()))?;
        let document = Html::parse_document(&self.document());
        let Some(select) = document.select(&parsed).next() else {
            return Ok(false);
        };
        Ok(select.select(&option).any(|o| match o.value().attr("value") {
            Some(v) => v == value,
            None => o.text().collect::<String>().trim() == value,
        }))
    }

    fn query(&self, selector: &str) -> BrowserResult<Vec<ElementHandle>> {
        let parsed = Selector::parse(selector).map_err(|e| BrowserError::script(format!("bad selector {selector}: {e}")))?;
        let document = Html::parse_document(&self.document());
        Ok(document
            .select(&parsed)
            .enumerate()
            .map(|(index, element)| {
                ElementHandle::new(
                    self.generation,
                    index,
                    selector,
                    element.text().collect::<String>(),
                    element.html(),
                )
            })
            .collect())
    }

    fn check(&self, selector: &str) -> BrowserResult<()> {
        if self.closed {
            return Err(BrowserError::SessionLost {
                message: "replay browser closed".into(),
            });
        }
        if let Some(error) = self.failures.get(selector) {
            return Err(error.clone());
        }
        Ok(())
    }

    fn require(&self, selector: &str) -> BrowserResult<()> {
        self.check(selector)?;
        if self.query(selector)?.is_empty() {
            return Err(BrowserError::not_found(selector));
        }
        Ok(())
    }

    fn show(&mut self, screen: Screen) {
        self.screen = screen;
        self.modal = None;
        self.generation += 1;
    }

    fn open_detail(&mut self) {
        let modal = self
            .details
            .get(&self.last_typed)
            .cloned()
            .unwrap_or_default();
        self.modal = Some(modal);
    }
}

#[async_trait]
impl BrowserSession for ReplayBrowser {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.log.push(BrowserAction::Navigate(url.to_string()));
        self.check(url)?;
        let screen = match self.pages.get(url) {
            Some(html) => Screen::Page(html.clone()),
            None => Screen::Form,
        };
        self.show(screen);
        Ok(())
    }

    async fn set_field(&mut self, selector: &str, value: &str) -> BrowserResult<()> {
        self.log.push(BrowserAction::SetField {
            selector: selector.to_string(),
            value: value.to_string(),
        });
        self.require(selector)?;
        self.last_typed = value.to_string();
        Ok(())
    }

    async fn select_option(&mut self, selector: &str, value: &str) -> BrowserResult<()> {
        self.log.push(BrowserAction::SelectOption {
            selector: selector.to_string(),
            value: value.to_string(),
        });
        self.require(selector)?;
        if !self.has_option(selector, value)? {
            return Err(BrowserError::OptionNotFound {
                selector: selector.to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> BrowserResult<()> {
        self.log.push(BrowserAction::Click(selector.to_string()));
        self.require(selector)?;
        if let Some(error) = self.click_failures.get(selector) {
            return Err(error.clone());
        }
        if selector == self.selectors.submit {
            let key = self.last_typed.clone();
            self.show(Screen::Results { key, page: 1 });
        } else if selector == self.selectors.detail_button {
            self.open_detail();
        } else if selector == self.selectors.modal_close {
            self.modal = None;
        }
        Ok(())
    }

    async fn click_element(&mut self, handle: &ElementHandle) -> BrowserResult<()> {
        self.log.push(BrowserAction::ClickElement {
            selector: handle.source_selector.clone(),
            index: handle.index,
            text: handle.text(),
        });
        self.check(&handle.source_selector)?;
        if let Some(error) = self.click_failures.get(&handle.source_selector) {
            return Err(error.clone());
        }
        if handle.generation != self.generation {
            return Err(BrowserError::StaleElement {
                reason: format!("generation {} is gone", handle.generation),
            });
        }
        if handle.source_selector == self.selectors.pagination_link {
            if let (Screen::Results { key, .. }, Ok(page)) = (&self.screen, handle.text().parse::<usize>()) {
                let key = key.clone();
                self.show(Screen::Results { key, page });
            }
        } else if handle.source_selector.ends_with(&self.selectors.detail_button) {
            self.open_detail();
        }
        Ok(())
    }

    async fn wait_for(&mut self, condition: WaitCondition) -> BrowserResult<()> {
        self.log.push(BrowserAction::Wait(condition.clone()));
        match condition {
            WaitCondition::Delay(_) => Ok(()),
            WaitCondition::Selector { selector, timeout } => {
                self.check(&selector)?;
                if self.query(&selector)?.is_empty() {
                    return Err(BrowserError::Timeout {
                        what: selector,
                        waited_ms: timeout.as_millis() as u64,
                    });
                }
                Ok(())
            }
            WaitCondition::Text {
                selector,
                contains,
                timeout,
            } => {
                self.check(&selector)?;
                if !self.query(&selector)?.iter().any(|e| e.text().contains(&contains)) {
                    return Err(BrowserError::Timeout {
                        what: format!("{contains:?} in {selector}"),
                        waited_ms: timeout.as_millis() as u64,
                    });
                }
                Ok(())
            }
        }
    }

    async fn read_text(&mut self, selector: &str) -> BrowserResult<Option<String>> {
        self.log.push(BrowserAction::ReadText(selector.to_string()));
        self.check(selector)?;
        let parsed = Selector::parse(selector).map_err(|e| BrowserError::script(format!("bad selector {selector}: {e}")))?;
        let document = Html::parse_document(&self.document());
        Ok(document
            .select(&parsed)
            .next()
            .map(|e| e.text().collect::<String>()))
    }

    async fn read_all(&mut self, selector: &str) -> BrowserResult<Vec<ElementHandle>> {
        self.log.push(BrowserAction::ReadAll(selector.to_string()));
        self.check(selector)?;
        self.query(selector)
    }

    async fn execute_raw_action(&mut self, script: &str) -> BrowserResult<serde_json::Value> {
        self.log.push(BrowserAction::Script(script.to_string()));
        self.check(script)?;
        Ok(self.raw_result.clone())
    }

    async fn close(&mut self) -> BrowserResult<()> {
        self.log.push(BrowserAction::Close);
        self.closed = true;
        Ok(())
    }
}

/// Minimal search form carrying every control the crawler and enricher touch
pub fn search_form_html(selectors: &RegistrySelectors, regions: &[String], legal_forms: &[String]) -> String {
    let options = |values: &[String]| -> String {
        values
            .iter()
            .map(|v| format!(r#"<option value="{v}">{v}</option>"#))
            .collect()
    };
    format!(
        r##"<form>
<input id="{date_from}" class="flatpickr"><input id="{date_to}" class="flatpickr">
<div data-bs-target="#locationCollapse" aria-expanded="false">Vendndodhja</div>
<select id="{region}">{region_options}</select>
<select id="{legal_form}">{legal_form_options}</select>
<div data-bs-target="#sectorCollapse" aria-expanded="false">Sektori</div>
<input id="{activity}"><input id="{nipt}">
<button type="submit">Kërko</button>
</form>"##,
        date_from = strip_hash(&selectors.date_from),
        date_to = strip_hash(&selectors.date_to),
        region = strip_id(&selectors.region_select),
        legal_form = strip_id(&selectors.legal_form_select),
        activity = strip_hash(&selectors.activity_input),
        nipt = strip_hash(&selectors.nipt_input),
        region_options = options(regions),
        legal_form_options = options(legal_forms),
    )
}

fn strip_hash(selector: &str) -> &str {
    selector.trim_start_matches('#')
}

fn strip_id(selector: &str) -> &str {
    selector.rsplit('#').next().unwrap_or(selector)
}

/// One registry result card in the markup the live site renders
pub fn result_card(identifier: &str, name: &str, city: &str, legal_form: &str, date: &str) -> String {
    format!(
        r#"<li><div class="card responsive-card-text">
<span class="nipti">{identifier}</span>
<span class="emriISubjektit">{name}</span>
<span class="qyteti">{city}</span>
<span class="formaLigjore">{legal_form}</span>
<span class="dataERegjistrimit">{date}</span>
<button class="btn-info-local">Info</button>
</div></li>"#
    )
}

/// Results page wrapping `cards`, with pagination links for `pages`
pub fn result_page(cards: &[String], pages: &[usize]) -> String {
    let links: String = pages
        .iter()
        .map(|p| format!(r##"<li class="page-item"><a class="page-link" href="#">{p}</a></li>"##))
        .collect();
    format!(
        r#"<ul class="list">{}</ul><ul class="pagination">{links}</ul>"#,
        cards.concat()
    )
}
