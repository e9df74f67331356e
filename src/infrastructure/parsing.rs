//! Registry page parsing
//!
//! Result cards are read through the live browser session; the detail modal is
//! reduced to plain text and scanned by a pure function.

pub mod city;
pub mod detail_text;
pub mod result_page_parser;

pub use crate::infrastructure::parsing_error::{ParsingError, ParsingResult};
pub use city::normalize_city;
pub use detail_text::extract_activity;
pub use result_page_parser::{PageTurn, ResultPage, ResultPageParser, ResultRow};
