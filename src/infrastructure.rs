//! Infrastructure layer for browser automation, parsing, storage, configuration and logging

pub mod browser;
pub mod config;
pub mod database_connection;
pub mod entity_repository;
pub mod logging;
pub mod parsing;
pub mod parsing_error;

pub use browser::{BrowserError, BrowserSession, ChromiumSession, ElementHandle, ReplayBrowser, WaitCondition};
pub use config::{AppConfig, ConfigError, ConfigManager, RegistrySelectors};
pub use database_connection::DatabaseConnection;
pub use entity_repository::SqliteEntityRepository;
pub use logging::init_logging_with_config;
pub use parsing::{ResultPageParser, extract_activity};
