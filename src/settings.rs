//! Runtime settings
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "SETTLEMENT";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Directory of the sled database.
    pub storage_path: String,
    /// Accept nine-part instruction keys without a type field.
    pub accept_legacy_keys: bool,
    /// Ask the balance ledger for the transferer position before matching.
    pub check_positions: bool,
    /// Depositary code written into settlement orders.
    pub depositary_code: String,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_path: "data/ledger".into(),
            accept_legacy_keys: false,
            check_positions: true,
            depositary_code: "NDC000000000".into(),
            log_filter: "info".into(),
        }
    }
}

/// Defaults, then `path` if given, then `SETTLEMENT_*` environment variables.
pub fn load_settings(path: Option<&str>) -> Result<Settings, ConfigError> {
    let defaults = Settings::default();

    let mut builder = Config::builder()
        .set_default("storage_path", defaults.storage_path)?
        .set_default("accept_legacy_keys", defaults.accept_legacy_keys)?
        .set_default("check_positions", defaults.check_positions)?
        .set_default("depositary_code", defaults.depositary_code)?
        .set_default("log_filter", defaults.log_filter)?;

    if let Some(path) = path {
        builder = builder.add_source(File::with_name(path));
    }

    builder
        .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()?
        .try_deserialize()
}
