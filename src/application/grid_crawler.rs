//! Search grid crawler
//!
//! Walks the keyword × legal form × date range grid one cell at a time. Each cell
//! fills the registry search form, submits it and pages through the results,
//! emitting only identifiers not seen before.

#![allow(clippy::uninlined_format_args)]

use std::collections::HashSet;
use std::time::Duration;

use chrono::Datelike;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::entity::DiscoveredEntity;
use crate::domain::search_grid::{SearchCell, SearchGrid};
use crate::infrastructure::browser::{BrowserError, BrowserResult, BrowserSession, WaitCondition, js_string};
use crate::infrastructure::config::{AppConfig, RegistrySelectors, TimingConfig};
use crate::infrastructure::parsing::{ParsingError, ResultPageParser};

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Browser session lost during grid search: {0}")]
    SessionLost(BrowserError),

    #[error("{failures} consecutive search cells failed, last: {last}")]
    TooManyFailures { failures: u32, last: String },

    #[error("Crawler setup failed: {0}")]
    Setup(#[from] ParsingError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellStatus {
    Completed,
    Skipped { reason: String },
}

/// Result of searching one grid cell
#[derive(Debug, Clone)]
pub struct CellOutcome {
    /// Position in enumeration order, zero-based
    pub index: usize,
    pub cell: SearchCell,
    pub status: CellStatus,
    pub pages_read: u32,
    pub rows_seen: usize,
    /// Entities first seen in this cell, in page order
    pub discovered: Vec<DiscoveredEntity>,
    /// Last cell of its keyword
    pub closes_keyword: bool,
}

pub struct SearchGridCrawler {
    selectors: RegistrySelectors,
    parser: ResultPageParser,
    base_url: String,
    region: String,
    primary_city: String,
    page_cap: u32,
    max_consecutive_failures: u32,
    timing: TimingConfig,
}

impl SearchGridCrawler {
    pub fn new(config: &AppConfig) -> Result<Self, CrawlError> {
        let registry = &config.registry;
        Ok(Self {
            selectors: registry.selectors.clone(),
            parser: ResultPageParser::new(&registry.selectors, &registry.natural_person_marker)?,
            base_url: registry.base_url.clone(),
            region: registry.region.clone(),
            primary_city: registry.primary_city.clone(),
            page_cap: config.run.page_cap.max(1),
            max_consecutive_failures: config.run.max_consecutive_cell_failures.max(1),
            timing: config.timing.clone(),
        })
    }

    /// Starts a crawl over `grid` from its first cell. Identifiers in `known`
    /// are never emitted.
    pub fn crawl<'a>(
        &'a self,
        session: &'a mut dyn BrowserSession,
        grid: &'a SearchGrid,
        known: &'a HashSet<String>,
    ) -> GridCrawl<'a> {
        GridCrawl {
            crawler: self,
            session,
            grid,
            known,
            emitted: HashSet::new(),
            next_index: 0,
            consecutive_failures: 0,
            finished: false,
        }
    }

    async fn pause(&self, session: &mut dyn BrowserSession, ms: u64) -> BrowserResult<()> {
        if ms == 0 {
            return Ok(());
        }
        session.wait_for(WaitCondition::Delay(Duration::from_millis(ms))).await
    }

    /// Fills and submits the search form for `cell`
    async fn submit_search(&self, session: &mut dyn BrowserSession, cell: &SearchCell) -> BrowserResult<()> {
        let s = &self.selectors;

        session.navigate(&self.base_url).await?;
        self.pause(session, self.timing.settle_delay_ms).await?;

        self.set_date_range(session, cell).await?;

        self.expand_section(session, &s.location_toggle).await?;
        session.select_option(&s.region_select, &self.region).await?;

        session.select_option(&s.legal_form_select, &cell.legal_form).await?;

        self.expand_section(session, &s.sector_toggle).await?;
        session.set_field(&s.activity_input, &cell.keyword).await?;

        session.click(&s.submit).await?;
        // A search matching nothing still renders an empty list
        session
            .wait_for(WaitCondition::selector(
                &s.result_list,
                Duration::from_millis(self.timing.results_render_timeout_ms),
            ))
            .await?;
        self.pause(session, self.timing.inter_cell_delay_ms).await
    }

    /// The date pickers ignore typed input, so both are set through their widget API
    async fn set_date_range(&self, session: &mut dyn BrowserSession, cell: &SearchCell) -> BrowserResult<()> {
        let from = cell.date_range.from.first_day();
        let to = cell.date_range.to.last_day();
        let script = format!(
            "(() => {{ const a = document.querySelector({from_sel}); const b = document.querySelector({to_sel}); \
             if (!a || !b || !a._flatpickr || !b._flatpickr) return false; \
             a._flatpickr.setDate(new Date({}, {}, {}), true); \
             b._flatpickr.setDate(new Date({}, {}, {}), true); return true; }})()",
            from.year(),
            from.month0(),
            from.day(),
            to.year(),
            to.month0(),
            to.day(),
            from_sel = js_string(&self.selectors.date_from),
            to_sel = js_string(&self.selectors.date_to),
        );

        match session.execute_raw_action(&script).await? {
            serde_json::Value::Bool(false) => Err(BrowserError::not_found(&self.selectors.date_from)),
            _ => Ok(()),
        }
    }

    /// Clicks a collapsible section header unless it is already expanded
    async fn expand_section(&self, session: &mut dyn BrowserSession, toggle: &str) -> BrowserResult<()> {
        let headers = session.read_all(toggle).await?;
        let Some(header) = headers.first() else {
            debug!("Section toggle {} not present", toggle);
            return Ok(());
        };
        if header.attr("aria-expanded").as_deref() == Some("true") {
            return Ok(());
        }
        session.click_element(header).await?;
        self.pause(session, self.timing.section_toggle_delay_ms).await
    }
}

/// Cursor over one crawl of the grid. Finite and not restartable.
pub struct GridCrawl<'a> {
    crawler: &'a SearchGridCrawler,
    session: &'a mut dyn BrowserSession,
    grid: &'a SearchGrid,
    known: &'a HashSet<String>,
    emitted: HashSet<String>,
    next_index: usize,
    consecutive_failures: u32,
    finished: bool,
}

impl GridCrawl<'_> {
    pub fn cells_total(&self) -> usize {
        self.grid.len()
    }

    /// Cells processed so far
    pub fn position(&self) -> usize {
        self.next_index
    }

    pub fn emitted(&self) -> usize {
        self.emitted.len()
    }

    /// Searches the next cell. `Ok(None)` once the grid is exhausted; an error
    /// ends the crawl.
    pub async fn next_cell(&mut self) -> Result<Option<CellOutcome>, CrawlError> {
        if self.finished {
            return Ok(None);
        }
        let index = self.next_index;
        let Some(cell) = self.grid.cell(index) else {
            self.finished = true;
            return Ok(None);
        };
        self.next_index += 1;
        let closes_keyword = self.grid.closes_keyword(index);

        if let Err(e) = self.crawler.submit_search(&mut *self.session, &cell).await {
            if e.is_fatal() {
                self.finished = true;
                return Err(CrawlError::SessionLost(e));
            }

            self.consecutive_failures += 1;
            warn!("Skipping search {}: {}", cell, e);
            if self.consecutive_failures >= self.crawler.max_consecutive_failures {
                self.finished = true;
                return Err(CrawlError::TooManyFailures {
                    failures: self.consecutive_failures,
                    last: e.to_string(),
                });
            }
            return Ok(Some(CellOutcome {
                index,
                cell,
                status: CellStatus::Skipped { reason: e.to_string() },
                pages_read: 0,
                rows_seen: 0,
                discovered: Vec::new(),
                closes_keyword,
            }));
        }
        self.consecutive_failures = 0;

        let mut outcome = CellOutcome {
            index,
            cell,
            status: CellStatus::Completed,
            pages_read: 0,
            rows_seen: 0,
            discovered: Vec::new(),
            closes_keyword,
        };

        let crawler = self.crawler;
        let mut page = 1;
        loop {
            let result = match crawler.parser.parse_page(&mut *self.session, page, crawler.page_cap).await {
                Ok(result) => result,
                Err(e) if e.is_fatal() => {
                    self.finished = true;
                    return Err(CrawlError::SessionLost(e.browser_error().cloned().unwrap_or(
                        BrowserError::SessionLost {
                            message: e.to_string(),
                        },
                    )));
                }
                Err(e) => {
                    warn!("Stopped paging {} at page {}: {}", outcome.cell, page, e);
                    break;
                }
            };

            outcome.pages_read = page;
            outcome.rows_seen += result.rows.len();
            for row in result.rows {
                if self.known.contains(&row.identifier) || !self.emitted.insert(row.identifier.clone()) {
                    continue;
                }
                outcome
                    .discovered
                    .push(row.into_entity(&outcome.cell.keyword, &crawler.primary_city));
            }

            let Some(turn) = result.next else {
                break;
            };
            if let Err(e) = self.session.click_element(turn.link()).await {
                if e.is_fatal() {
                    self.finished = true;
                    return Err(CrawlError::SessionLost(e));
                }
                warn!("Could not open page {} of {}: {}", turn.page, outcome.cell, e);
                break;
            }
            if let Err(e) = crawler.pause(&mut *self.session, crawler.timing.inter_page_delay_ms).await {
                if e.is_fatal() {
                    self.finished = true;
                    return Err(CrawlError::SessionLost(e));
                }
            }
            page = turn.page;
        }

        debug!(
            "Search {} read {} pages, {} rows, {} new",
            outcome.cell,
            outcome.pages_read,
            outcome.rows_seen,
            outcome.discovered.len()
        );
        Ok(Some(outcome))
    }
}
