use crate::identifiers::MIN_CREDENTIAL_LENGTH;
use crate::tariff::TariffSchedule;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

pub const CONFIG_ENV: &str = "CONNECTION_DESK_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "connection-desk.toml";
/// Upper bound for every due-date offset, about ten years.
pub const MAX_DUE_DAYS: i64 = 3650;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("connection-desk.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentifierConfig {
    pub account_prefix: String,
    pub meter_prefix: String,
    pub application_prefix: String,
    pub bill_prefix: String,
    pub credential_length: usize,
    /// Upper bound on skipped meter numbers before allocation fails.
    pub meter_allocation_attempts: u32,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            account_prefix: "ELX".to_string(),
            meter_prefix: "MTR".to_string(),
            application_prefix: "APP".to_string(),
            bill_prefix: "BILL".to_string(),
            credential_length: 16,
            meter_allocation_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    pub connection_fee_due_days: i64,
    pub consumption_due_days: i64,
    pub work_order_due_days: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            connection_fee_due_days: 14,
            consumption_due_days: 15,
            work_order_due_days: 7,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub identifiers: IdentifierConfig,
    pub billing: BillingConfig,
    pub tariff: Option<TariffSchedule>,
}

impl AppConfig {
    /// Reads the file named by `CONNECTION_DESK_CONFIG`, falling back to
    /// `connection-desk.toml`. A missing default file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(path),
            Err(_) if fs::metadata(DEFAULT_CONFIG_PATH).is_ok() => {
                Self::from_file(DEFAULT_CONFIG_PATH)
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let display = path.display().to_string();
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let cfg: AppConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ids = &self.identifiers;
        if ids.credential_length < MIN_CREDENTIAL_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "identifiers.credential_length must be at least {MIN_CREDENTIAL_LENGTH}"
            )));
        }
        if ids.meter_allocation_attempts == 0 {
            return Err(ConfigError::Invalid(
                "identifiers.meter_allocation_attempts must be positive".into(),
            ));
        }
        for (name, prefix) in [
            ("account_prefix", &ids.account_prefix),
            ("meter_prefix", &ids.meter_prefix),
            ("application_prefix", &ids.application_prefix),
            ("bill_prefix", &ids.bill_prefix),
        ] {
            if prefix.is_empty() || prefix.contains('-') {
                return Err(ConfigError::Invalid(format!(
                    "identifiers.{name} must be non-empty and contain no '-'"
                )));
            }
        }
        let billing = &self.billing;
        for (name, days) in [
            ("connection_fee_due_days", billing.connection_fee_due_days),
            ("consumption_due_days", billing.consumption_due_days),
            ("work_order_due_days", billing.work_order_due_days),
        ] {
            if !(0..=MAX_DUE_DAYS).contains(&days) {
                return Err(ConfigError::Invalid(format!(
                    "billing.{name} must be between 0 and {MAX_DUE_DAYS}"
                )));
            }
        }
        if let Some(tariff) = &self.tariff {
            tariff
                .validate()
                .map_err(|err| ConfigError::Invalid(format!("tariff: {err}")))?;
        }
        Ok(())
    }
}
