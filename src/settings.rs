use std::path::PathBuf;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment};
use serde::Deserialize;

use crate::db::DbConfig;

pub const ENV_PREFIX: &str = "CARE";

/// Runtime settings. Defaults are set in code; every key can be
/// overridden with a `CARE_`-prefixed environment variable
/// (e.g. `CARE_DB_PATH`, `CARE_REQUEST_DELAY_MS`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub db_ready_attempts: u32,
    pub db_ready_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub request_delay_ms: u64,
    pub kvwl_search_url: String,
    pub kvwl_detail_url: String,
    pub kvwl_page_size: usize,
    pub kvwl_latitude: f64,
    pub kvwl_longitude: f64,
    pub gesundheitskarte_url: String,
}

impl Settings {
    pub fn load() -> Result<Settings, ConfigError> {
        defaults()?
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn db_config(&self) -> DbConfig {
        DbConfig {
            path: self.db_path.clone(),
            ready_attempts: self.db_ready_attempts,
            ready_interval: Duration::from_millis(self.db_ready_interval_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("db_path", "data/care.sqlite")?
        .set_default("db_ready_attempts", 30)?
        .set_default("db_ready_interval_ms", 1000)?
        .set_default("request_timeout_secs", 30)?
        .set_default("request_delay_ms", 200)?
        .set_default(
            "kvwl_search_url",
            "https://www.kvwl.de/DocSearchService/DocSearchService/searchDocs",
        )?
        .set_default(
            "kvwl_detail_url",
            "https://www.kvwl.de/DocSearchService/DocSearchService/getDoctor",
        )?
        .set_default("kvwl_page_size", 20)?
        .set_default("kvwl_latitude", 51.5285024259591)?
        .set_default("kvwl_longitude", 7.07863180952606)?
        .set_default(
            "gesundheitskarte_url",
            "https://www.gelsenkirchen.de/de/soziales/gesundheit/gesundheitskarte.aspx",
        )
}
