//! Configuration infrastructure
//!
//! Settings are layered in this order:
//! 1. Built-in defaults (the production search grid and registry selectors)
//! 2. An optional TOML/JSON file
//! 3. `QKB_HARVEST__SECTION__KEY` environment variables

#![allow(clippy::derivable_impls)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::search_grid::{DateRange, SearchGrid};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Browser executable not found: {0}")]
    BrowserMissing(String),

    #[error("No local data directory available on this platform")]
    NoDataDir,
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Complete harvester configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub registry: RegistryConfig,
    pub grid: GridConfig,
    pub timing: TimingConfig,
    pub run: RunConfig,
    pub database: DatabaseConfig,
    pub browser: BrowserSettings,
    pub logging: LoggingConfig,
}

/// Registry endpoint and the markup it renders
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Search form URL
    pub base_url: String,

    /// Value selected in the region dropdown for every search
    pub region: String,

    /// Legal-form substring identifying natural persons, compared case-insensitively
    pub natural_person_marker: String,

    /// City key used when the registry text matches no known city
    pub primary_city: String,

    /// Direct detail URL with an `{identifier}` placeholder; when unset the
    /// enricher re-runs an identifier search instead
    pub detail_url_template: Option<String>,

    pub selectors: RegistrySelectors,
}

/// CSS selectors for the registry search form, result cards and detail modal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySelectors {
    pub date_from: String,
    pub date_to: String,
    pub location_toggle: String,
    pub region_select: String,
    pub legal_form_select: String,
    pub sector_toggle: String,
    pub activity_input: String,
    pub submit: String,
    /// Results container rendered after a submission, empty when nothing matched
    pub result_list: String,
    pub result_card: String,
    pub card_identifier: String,
    pub card_name: String,
    pub card_city: String,
    pub card_legal_form: String,
    pub card_registration_date: String,
    pub pagination_link: String,
    pub nipt_input: String,
    pub detail_button: String,
    pub detail_modal: String,
    /// The detail modal once shown
    pub detail_modal_open: String,
    pub modal_close: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub keywords: Vec<String>,
    pub legal_forms: Vec<String>,
    /// `[year_from, month_from, year_to, month_to]`
    pub date_ranges: Vec<DateRange>,
}

impl GridConfig {
    pub fn to_grid(&self) -> SearchGrid {
        SearchGrid::new(
            self.keywords.clone(),
            self.legal_forms.clone(),
            self.date_ranges.clone(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Pause after each page turn
    pub inter_page_delay_ms: u64,

    /// Pause after each search submission
    pub inter_cell_delay_ms: u64,

    /// Upper bound for the results list to render after a submission
    pub results_render_timeout_ms: u64,

    /// Pause after loading the search form
    pub settle_delay_ms: u64,

    /// Pause after expanding a collapsed form section
    pub section_toggle_delay_ms: u64,

    /// Upper bound for the detail modal to render
    pub detail_render_timeout_ms: u64,

    /// Pause between enrichment lookups
    pub inter_entity_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum result pages read per search cell
    pub page_cap: u32,
    pub checkpoint_every_n_cells: u32,
    pub checkpoint_every_n_entities: u32,

    /// Consecutive skipped cells tolerated before the run is failed
    pub max_consecutive_cell_failures: u32,

    /// Whole-run deadline, checked between cells and entities
    pub run_timeout_secs: Option<u64>,

    /// Sentinel file refusing concurrent runs; defaults to the data directory
    pub lock_path: Option<PathBuf>,

    /// Value written to `data_source` for created rows
    pub source_tag: String,

    /// Run the detail enrichment pass after the grid search
    pub enrich: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite URL; defaults to `harvest.db` in the data directory
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Chromium binary; auto-detected when unset
    pub executable: Option<PathBuf>,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    pub console_output: bool,
    pub file_output: bool,

    /// Log directory; defaults to `logs` under the data directory
    pub directory: Option<PathBuf>,

    pub file_name: String,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: qkb::SEARCH_URL.to_string(),
            region: qkb::REGION.to_string(),
            natural_person_marker: qkb::NATURAL_PERSON_MARKER.to_string(),
            primary_city: qkb::PRIMARY_CITY.to_string(),
            detail_url_template: None,
            selectors: RegistrySelectors::default(),
        }
    }
}

impl Default for RegistrySelectors {
    fn default() -> Self {
        use qkb::selectors as s;
        Self {
            date_from: s::DATE_FROM.to_string(),
            date_to: s::DATE_TO.to_string(),
            location_toggle: s::LOCATION_TOGGLE.to_string(),
            region_select: s::REGION_SELECT.to_string(),
            legal_form_select: s::LEGAL_FORM_SELECT.to_string(),
            sector_toggle: s::SECTOR_TOGGLE.to_string(),
            activity_input: s::ACTIVITY_INPUT.to_string(),
            submit: s::SUBMIT.to_string(),
            result_list: s::RESULT_LIST.to_string(),
            result_card: s::RESULT_CARD.to_string(),
            card_identifier: s::CARD_IDENTIFIER.to_string(),
            card_name: s::CARD_NAME.to_string(),
            card_city: s::CARD_CITY.to_string(),
            card_legal_form: s::CARD_LEGAL_FORM.to_string(),
            card_registration_date: s::CARD_REGISTRATION_DATE.to_string(),
            pagination_link: s::PAGINATION_LINK.to_string(),
            nipt_input: s::NIPT_INPUT.to_string(),
            detail_button: s::DETAIL_BUTTON.to_string(),
            detail_modal: s::DETAIL_MODAL.to_string(),
            detail_modal_open: s::DETAIL_MODAL_OPEN.to_string(),
            modal_close: s::MODAL_CLOSE.to_string(),
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            keywords: defaults::KEYWORDS.iter().map(|k| (*k).to_string()).collect(),
            legal_forms: defaults::LEGAL_FORMS.iter().map(|f| (*f).to_string()).collect(),
            date_ranges: defaults::date_ranges(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            inter_page_delay_ms: defaults::INTER_PAGE_DELAY_MS,
            inter_cell_delay_ms: defaults::INTER_CELL_DELAY_MS,
            results_render_timeout_ms: defaults::RESULTS_RENDER_TIMEOUT_MS,
            settle_delay_ms: defaults::SETTLE_DELAY_MS,
            section_toggle_delay_ms: defaults::SECTION_TOGGLE_DELAY_MS,
            detail_render_timeout_ms: defaults::DETAIL_RENDER_TIMEOUT_MS,
            inter_entity_delay_ms: defaults::INTER_ENTITY_DELAY_MS,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            page_cap: defaults::PAGE_CAP,
            checkpoint_every_n_cells: defaults::CHECKPOINT_EVERY_N_CELLS,
            checkpoint_every_n_entities: defaults::CHECKPOINT_EVERY_N_ENTITIES,
            max_consecutive_cell_failures: defaults::MAX_CONSECUTIVE_CELL_FAILURES,
            run_timeout_secs: None,
            lock_path: None,
            source_tag: qkb::SOURCE_TAG.to_string(),
            enrich: true,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: defaults::DB_MAX_CONNECTIONS,
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            window_width: 1920,
            window_height: 1080,
            user_agent: qkb::USER_AGENT.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECONDS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            directory: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: true,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("sqlx".to_string(), "warn".to_string());
                filters.insert("chromiumoxide".to_string(), "warn".to_string());
                filters.insert("tungstenite".to_string(), "warn".to_string());
                filters.insert("html5ever".to_string(), "warn".to_string());
                filters
            },
        }
    }
}

impl AppConfig {
    /// Rejects settings that would make a run meaningless or unbounded
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.keywords.is_empty() {
            return Err(ConfigError::invalid("grid.keywords", "at least one keyword is required"));
        }
        if self.grid.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::invalid("grid.keywords", "keywords must not be blank"));
        }
        if self.grid.legal_forms.is_empty() {
            return Err(ConfigError::invalid("grid.legal_forms", "at least one legal form is required"));
        }
        if self.grid.legal_forms.iter().any(|f| f.trim().is_empty()) {
            return Err(ConfigError::invalid("grid.legal_forms", "legal forms must not be blank"));
        }
        if self.grid.date_ranges.is_empty() {
            return Err(ConfigError::invalid("grid.date_ranges", "at least one date range is required"));
        }
        if self.run.page_cap == 0 {
            return Err(ConfigError::invalid("run.page_cap", "must be at least 1"));
        }
        if self.run.checkpoint_every_n_cells == 0 {
            return Err(ConfigError::invalid("run.checkpoint_every_n_cells", "must be at least 1"));
        }
        if self.run.checkpoint_every_n_entities == 0 {
            return Err(ConfigError::invalid("run.checkpoint_every_n_entities", "must be at least 1"));
        }
        if self.run.max_consecutive_cell_failures == 0 {
            return Err(ConfigError::invalid("run.max_consecutive_cell_failures", "must be at least 1"));
        }
        url::Url::parse(&self.registry.base_url)
            .map_err(|e| ConfigError::invalid("registry.base_url", e.to_string()))?;
        if let Some(template) = &self.registry.detail_url_template {
            if !template.contains("{identifier}") {
                return Err(ConfigError::invalid(
                    "registry.detail_url_template",
                    "must contain the {identifier} placeholder",
                ));
            }
        }
        Ok(())
    }

    /// SQLite URL for the harvest store
    pub fn database_url(&self) -> Result<String, ConfigError> {
        match &self.database.url {
            Some(url) => Ok(url.clone()),
            None => {
                let path = ConfigManager::get_app_data_dir()?.join(defaults::DB_FILE_NAME);
                Ok(format!("sqlite://{}", path.display()))
            }
        }
    }

    pub fn lock_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.run.lock_path {
            Some(path) => Ok(path.clone()),
            None => Ok(ConfigManager::get_app_data_dir()?.join(defaults::LOCK_FILE_NAME)),
        }
    }

    pub fn log_directory(&self) -> Result<PathBuf, ConfigError> {
        match &self.logging.directory {
            Some(path) => Ok(path.clone()),
            None => Ok(ConfigManager::get_app_data_dir()?.join("logs")),
        }
    }
}

/// Loads `AppConfig` from its layered sources
pub struct ConfigManager {
    pub config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// `<config_dir>/qkb-harvester`
    pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(defaults::APP_DIR_NAME))
            .ok_or(ConfigError::NoDataDir)
    }

    /// `<data_local_dir>/qkb-harvester`
    pub fn get_app_data_dir() -> Result<PathBuf, ConfigError> {
        dirs::data_local_dir()
            .map(|dir| dir.join(defaults::APP_DIR_NAME))
            .ok_or(ConfigError::NoDataDir)
    }

    /// An explicit path wins over `$QKB_HARVEST_CONFIG`; without either the
    /// default `harvest.{toml,json}` in the config directory is used if present
    pub fn new(explicit: Option<PathBuf>) -> Self {
        let config_path = explicit.or_else(|| std::env::var_os(defaults::CONFIG_PATH_ENV).map(PathBuf::from));
        Self { config_path }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut builder = config::Config::builder();

        builder = match &self.config_path {
            Some(path) => {
                info!("Loading configuration from {:?}", path);
                builder.add_source(config::File::from(path.as_path()).required(true))
            }
            None => match Self::get_config_dir() {
                Ok(dir) => builder.add_source(
                    config::File::with_name(&dir.join(defaults::CONFIG_FILE_STEM).to_string_lossy())
                        .required(false),
                ),
                Err(_) => builder,
            },
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("grid.keywords")
                    .with_list_parse_key("grid.legal_forms"),
            )
            .build()?;

        let app_config: AppConfig = settings.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Loads a single file on top of the defaults, ignoring the environment
    pub fn load_file(path: &Path) -> Result<AppConfig, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .build()?;
        let app_config: AppConfig = settings.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

/// Albanian business registry (QKB) endpoints and markup
pub mod qkb {
    /// "Kërko për subjekt" search form
    pub const SEARCH_URL: &str = "https://format.qkb.gov.al/kerko-per-subjekt/";

    pub const REGION: &str = "tirane";
    pub const PRIMARY_CITY: &str = "tirane";
    pub const SOURCE_TAG: &str = "qkb";

    /// Appears in "Person fizik" legal forms
    pub const NATURAL_PERSON_MARKER: &str = "fizik";

    pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

    /// Label of the activity field in the detail modal
    pub const ACTIVITY_LABEL: &str = "Objekti i aktivitetit";

    /// Labels that follow the activity field in the detail modal
    pub const DETAIL_BOUNDARY_LABELS: &[&str] = &[
        "Administrator/ Ortak/ Aksionar",
        "Qyteti",
        "Pronësia",
        "Ekstrakt RPP",
        "Ekstrakt i thjeshtë",
        "Ekstrakt historik",
    ];

    pub mod selectors {
        pub const DATE_FROM: &str = "#dataNga";
        pub const DATE_TO: &str = "#dataNe";
        pub const LOCATION_TOGGLE: &str = r##"div[data-bs-target="#locationCollapse"]"##;
        pub const REGION_SELECT: &str = "select#qarku";
        pub const LEGAL_FORM_SELECT: &str = "select#formeLigjore";
        pub const SECTOR_TOGGLE: &str = r##"div[data-bs-target="#sectorCollapse"]"##;
        pub const ACTIVITY_INPUT: &str = "#sektoriIVeprimtarise";
        pub const SUBMIT: &str = r#"button[type="submit"]"#;
        pub const RESULT_LIST: &str = "ul.list";
        pub const RESULT_CARD: &str = "ul.list li .card.responsive-card-text";
        pub const CARD_IDENTIFIER: &str = ".nipti";
        pub const CARD_NAME: &str = ".emriISubjektit";
        pub const CARD_CITY: &str = ".qyteti";
        pub const CARD_LEGAL_FORM: &str = ".formaLigjore";
        pub const CARD_REGISTRATION_DATE: &str = ".dataERegjistrimit";
        pub const PAGINATION_LINK: &str = "ul.pagination li a";
        pub const NIPT_INPUT: &str = "#nipt";
        pub const DETAIL_BUTTON: &str = ".btn-info-local";
        pub const DETAIL_MODAL: &str = "#detailModal";
        pub const DETAIL_MODAL_OPEN: &str = "#detailModal.show";
        pub const MODAL_CLOSE: &str = r#"#detailModal button.btn-close, #detailModal [data-bs-dismiss="modal"]"#;
    }
}

/// Default harvest configuration values
pub mod defaults {
    use crate::domain::search_grid::DateRange;

    pub const APP_DIR_NAME: &str = "qkb-harvester";
    pub const CONFIG_FILE_STEM: &str = "harvest";
    pub const CONFIG_PATH_ENV: &str = "QKB_HARVEST_CONFIG";
    pub const ENV_PREFIX: &str = "QKB_HARVEST";
    pub const DB_FILE_NAME: &str = "harvest.db";
    pub const LOCK_FILE_NAME: &str = "harvest.lock";
    pub const DB_MAX_CONNECTIONS: u32 = 4;

    pub const PAGE_CAP: u32 = 10;
    pub const CHECKPOINT_EVERY_N_CELLS: u32 = 10;
    pub const CHECKPOINT_EVERY_N_ENTITIES: u32 = 10;
    pub const MAX_CONSECUTIVE_CELL_FAILURES: u32 = 25;

    pub const INTER_PAGE_DELAY_MS: u64 = 3000;
    pub const INTER_CELL_DELAY_MS: u64 = 1500;
    pub const SETTLE_DELAY_MS: u64 = 3000;
    pub const SECTION_TOGGLE_DELAY_MS: u64 = 1000;
    pub const RESULTS_RENDER_TIMEOUT_MS: u64 = 15000;
    pub const DETAIL_RENDER_TIMEOUT_MS: u64 = 4000;
    pub const INTER_ENTITY_DELAY_MS: u64 = 1000;
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_NAME: &str = "harvest.log";
    pub const LOG_MAX_FILES: u32 = 10;

    /// Activity keywords; the registry matches them against "Objekti i aktivitetit"
    pub const KEYWORDS: &[&str] = &[
        "software", "programim", "kodim", "IT", "informatik",
        "web", "internet", "hosting", "server", "cloud",
        "aplikacion", "app", "mobile", "android", "ios",
        "kompjuter", "computer", "teknologji informacion",
        "dixhital", "cyber", "siguri kibernetik",
        "databaz", "database", "e-commerce",
        "zhvillim software", "development",
        "ERP", "CRM", "SaaS",
        "artificial intelligence", "inteligjenc artificiale",
        "machine learning", "blockchain",
        "sistem informacion", "information technology",
        "telekomunikacion", "automatizim", "automation",
        "perpunim te dhenash", "data processing",
    ];

    pub const LEGAL_FORMS: &[&str] = &[
        "Shoqeri me pergjegjesi te kufizuar",
        "Shoqeri aksionare",
        "Dege e Shoqerise se huaj",
    ];

    /// Registration windows, newest first; narrower where registrations are dense
    const DATE_RANGES: &[(i32, u32, i32, u32)] = &[
        (2026, 1, 2026, 12),
        (2025, 10, 2025, 12), (2025, 7, 2025, 9), (2025, 4, 2025, 6), (2025, 1, 2025, 3),
        (2024, 10, 2024, 12), (2024, 7, 2024, 9), (2024, 4, 2024, 6), (2024, 1, 2024, 3),
        (2023, 10, 2023, 12), (2023, 7, 2023, 9), (2023, 4, 2023, 6), (2023, 1, 2023, 3),
        (2022, 10, 2022, 12), (2022, 7, 2022, 9), (2022, 4, 2022, 6), (2022, 1, 2022, 3),
        (2021, 10, 2021, 12), (2021, 7, 2021, 9), (2021, 4, 2021, 6), (2021, 1, 2021, 3),
        (2020, 10, 2020, 12), (2020, 7, 2020, 9), (2020, 4, 2020, 6), (2020, 1, 2020, 3),
        (2019, 10, 2019, 12), (2019, 7, 2019, 9), (2019, 4, 2019, 6), (2019, 1, 2019, 3),
        (2018, 7, 2018, 12), (2018, 1, 2018, 6),
        (2017, 7, 2017, 12), (2017, 1, 2017, 6),
        (2016, 1, 2016, 12), (2015, 1, 2015, 12),
        (2013, 1, 2014, 12), (2010, 1, 2012, 12),
        (2000, 1, 2009, 12),
    ];

    pub fn date_ranges() -> Vec<DateRange> {
        DATE_RANGES
            .iter()
            .filter_map(|&(y1, m1, y2, m2)| DateRange::months(y1, m1, y2, m2).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_reproduce_production_grid() {
        let config = AppConfig::default();
        assert_eq!(config.grid.keywords.len(), 40);
        assert_eq!(config.grid.legal_forms.len(), 3);
        assert_eq!(config.grid.date_ranges.len(), 38);
        assert_eq!(config.grid.to_grid().len(), 40 * 3 * 38);
        assert_eq!(config.registry.region, "tirane");
        assert_eq!(config.run.page_cap, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_degenerate_settings() {
        let mut config = AppConfig::default();
        config.run.page_cap = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "run.page_cap"));

        let mut config = AppConfig::default();
        config.grid.keywords.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.registry.base_url = "not a url".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.registry.detail_url_template = Some("https://example.test/detail".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn blank_grid_entries_are_rejected() {
        let mut config = AppConfig::default();
        config.grid.keywords.push("  ".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "grid.keywords"));

        let mut config = AppConfig::default();
        config.grid.legal_forms = vec!["Shoqeri aksionare".into(), String::new()];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "grid.legal_forms"));
    }

    #[test]
    fn file_overrides_keep_other_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[grid]
keywords = ["software"]
legal_forms = ["Shoqeri aksionare"]
date_ranges = [[2025, 1, 2025, 3]]

[run]
page_cap = 2
"#
        )
        .unwrap();

        let config = ConfigManager::load_file(file.path()).unwrap();
        assert_eq!(config.grid.to_grid().len(), 1);
        assert_eq!(config.run.page_cap, 2);
        assert_eq!(config.run.checkpoint_every_n_cells, defaults::CHECKPOINT_EVERY_N_CELLS);
        assert_eq!(config.registry.selectors, RegistrySelectors::default());
    }

    #[test]
    fn file_with_inverted_range_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[grid]\ndate_ranges = [[2025, 6, 2025, 1]]").unwrap();
        assert!(ConfigManager::load_file(file.path()).is_err());
    }
}
