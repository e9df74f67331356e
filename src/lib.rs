//! QKB tech-company harvester
//!
//! Enumerates the Albanian business registry (QKB) search form over a grid of
//! activity keywords, legal forms and registration date ranges, stores every
//! company it surfaces in SQLite and enriches new entries with their full
//! activity description from the registry's detail view.

pub mod application;
pub mod domain;
pub mod infrastructure;
