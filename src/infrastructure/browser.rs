//! Controllable browser capability
//!
//! The crawler and the enricher only talk to `BrowserSession`. Production runs use a
//! headless Chromium over CDP; tests use `ReplayBrowser`, which serves canned HTML.

pub mod chromium;
pub mod replay;

use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use thiserror::Error;

pub use chromium::ChromiumSession;
pub use replay::{ActionLog, BrowserAction, ReplayBrowser};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrowserError {
    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Script failed: {message}")]
    Script { message: String },

    #[error("No option {value:?} in {selector}")]
    OptionNotFound { selector: String, value: String },

    #[error("Element handle is stale: {reason}")]
    StaleElement { reason: String },

    #[error("Browser session lost: {message}")]
    SessionLost { message: String },
}

impl BrowserError {
    pub fn not_found(selector: &str) -> Self {
        Self::ElementNotFound {
            selector: selector.to_string(),
        }
    }

    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    /// A lost session makes every following step fail, so it ends the run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionLost { .. })
    }
}

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// Fixed pause for UI transitions that expose no signal
    Delay(Duration),
    /// Poll until the selector matches, failing with `Timeout` after `timeout`
    Selector { selector: String, timeout: Duration },
    /// Poll until an element matching the selector renders text containing `contains`
    Text {
        selector: String,
        contains: String,
        timeout: Duration,
    },
}

impl WaitCondition {
    pub fn millis(ms: u64) -> Self {
        Self::Delay(Duration::from_millis(ms))
    }

    pub fn selector(selector: &str, timeout: Duration) -> Self {
        Self::Selector {
            selector: selector.to_string(),
            timeout,
        }
    }

    pub fn text(selector: &str, contains: &str, timeout: Duration) -> Self {
        Self::Text {
            selector: selector.to_string(),
            contains: contains.to_string(),
            timeout,
        }
    }
}

/// Snapshot of one element returned by `read_all`
///
/// `index` and `generation` let the session that produced the handle click the live
/// element later; any navigation invalidates older generations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub(crate) generation: u64,
    pub(crate) index: usize,
    pub(crate) source_selector: String,
    text: String,
    html: String,
}

impl ElementHandle {
    pub(crate) fn new(generation: u64, index: usize, source_selector: &str, text: String, html: String) -> Self {
        Self {
            generation,
            index,
            source_selector: source_selector.to_string(),
            text,
            html,
        }
    }

    /// Rendered text, whitespace-collapsed
    pub fn text(&self) -> String {
        collapse_whitespace(&self.text)
    }

    pub fn outer_html(&self) -> &str {
        &self.html
    }

    /// Attribute of the element itself
    pub fn attr(&self, name: &str) -> Option<String> {
        let fragment = Html::parse_fragment(&self.html);
        let root = fragment
            .root_element()
            .children()
            .filter_map(scraper::ElementRef::wrap)
            .next()?;
        root.value().attr(name).map(str::to_string)
    }

    /// Text of the first descendant matching `selector`; `None` when absent or blank
    pub fn child_text(&self, selector: &Selector) -> Option<String> {
        let fragment = Html::parse_fragment(&self.html);
        fragment
            .select(selector)
            .next()
            .map(|e| collapse_whitespace(&e.text().collect::<String>()))
            .filter(|text| !text.is_empty())
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;

    /// Clears the input and types `value`
    async fn set_field(&mut self, selector: &str, value: &str) -> BrowserResult<()>;

    /// Selects the option whose value is `value`; `OptionNotFound` when the list lacks it
    async fn select_option(&mut self, selector: &str, value: &str) -> BrowserResult<()>;

    async fn click(&mut self, selector: &str) -> BrowserResult<()>;

    async fn click_element(&mut self, handle: &ElementHandle) -> BrowserResult<()>;

    async fn wait_for(&mut self, condition: WaitCondition) -> BrowserResult<()>;

    /// Rendered text of the first match; absence is not an error
    async fn read_text(&mut self, selector: &str) -> BrowserResult<Option<String>>;

    /// All matches in document order; no match yields an empty list
    async fn read_all(&mut self, selector: &str) -> BrowserResult<Vec<ElementHandle>>;

    /// Runs a script in the page and returns its JSON result
    async fn execute_raw_action(&mut self, script: &str) -> BrowserResult<serde_json::Value>;

    async fn close(&mut self) -> BrowserResult<()>;
}

/// Quotes a value for interpolation into a script
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_reads_attributes_and_children() {
        let handle = ElementHandle::new(
            1,
            0,
            "li.card",
            "  K123  Alpha ".into(),
            r#"<li class="card" aria-expanded="false"><span class="nipti"> K123 </span><b class="name">Alpha
               Soft</b></li>"#
                .into(),
        );
        let nipt = Selector::parse(".nipti").unwrap();
        let name = Selector::parse(".name").unwrap();
        let missing = Selector::parse(".qyteti").unwrap();

        assert_eq!(handle.attr("aria-expanded").as_deref(), Some("false"));
        assert_eq!(handle.attr("class").as_deref(), Some("card"));
        assert_eq!(handle.child_text(&nipt).as_deref(), Some("K123"));
        assert_eq!(handle.child_text(&name).as_deref(), Some("Alpha Soft"));
        assert_eq!(handle.child_text(&missing), None);
        assert_eq!(handle.text(), "K123 Alpha");
    }

    #[test]
    fn fatal_only_for_lost_session() {
        assert!(BrowserError::SessionLost { message: "ws closed".into() }.is_fatal());
        assert!(!BrowserError::not_found("#qarku").is_fatal());
        assert!(!BrowserError::Timeout { what: "#detailModal".into(), waited_ms: 10 }.is_fatal());
    }

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a"b"#), r#""a\"b""#);
    }
}
