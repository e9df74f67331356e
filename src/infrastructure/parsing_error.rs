//! Parsing error types for registry result pages

use thiserror::Error;

use crate::infrastructure::browser::BrowserError;

#[derive(Error, Debug, Clone)]
pub enum ParsingError {
    #[error("Invalid CSS selector: {selector} - {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Page {page} could not be read: {source}")]
    PageUnreadable {
        page: u32,
        #[source]
        source: BrowserError,
    },
}

impl ParsingError {
    pub fn invalid_selector(selector: &str, reason: impl ToString) -> Self {
        Self::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.to_string(),
        }
    }

    /// The browser error behind a failed page read, if any
    pub fn browser_error(&self) -> Option<&BrowserError> {
        match self {
            Self::PageUnreadable { source, .. } => Some(source),
            Self::InvalidSelector { .. } => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.browser_error().is_some_and(BrowserError::is_fatal)
    }
}

pub type ParsingResult<T> = Result<T, ParsingError>;
