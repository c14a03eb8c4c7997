//! Process settings from the environment, with a `.env` file filling in unset variables.

use crate::error::ConfigError;
use std::path::PathBuf;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_API_PREFIX: &str = "/api";
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct AppSettings {
    /// PostgreSQL URL; without it the in-memory repository is used.
    pub database_url: Option<String>,
    pub config_path: PathBuf,
    pub bind_addr: String,
    pub api_prefix: String,
    pub body_limit: usize,
    /// Overrides `normalize_db_names` from the JSON config when set.
    pub normalize_db_names: Option<bool>,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            database_url: None,
            config_path: PathBuf::from("config/app.json"),
            bind_addr: DEFAULT_BIND_ADDR.into(),
            api_prefix: DEFAULT_API_PREFIX.into(),
            body_limit: DEFAULT_BODY_LIMIT,
            normalize_db_names: None,
        }
    }
}

impl AppSettings {
    /// Read `DATABASE_URL`, `DITO_CONFIG_PATH`, `DITO_BIND_ADDR`, `DITO_API_PREFIX`,
    /// `DITO_BODY_LIMIT` and `DITO_NORMALIZE_DB_NAMES`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(ConfigError::Load(format!(".env: {}", e)));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = AppSettings::default();
        let body_limit = match lookup("DITO_BODY_LIMIT") {
            Some(v) => v
                .parse()
                .map_err(|_| ConfigError::Validation(format!("DITO_BODY_LIMIT must be a byte count, got '{}'", v)))?,
            None => defaults.body_limit,
        };
        let normalize_db_names = match lookup("DITO_NORMALIZE_DB_NAMES") {
            Some(v) => Some(matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")),
            None => None,
        };
        Ok(AppSettings {
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            config_path: lookup("DITO_CONFIG_PATH").map(PathBuf::from).unwrap_or(defaults.config_path),
            bind_addr: lookup("DITO_BIND_ADDR").unwrap_or(defaults.bind_addr),
            api_prefix: lookup("DITO_API_PREFIX").unwrap_or(defaults.api_prefix),
            body_limit,
            normalize_db_names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn reads_overrides_and_defaults() {
        let env: HashMap<&str, &str> = [("DITO_BODY_LIMIT", "2048"), ("DITO_NORMALIZE_DB_NAMES", "true")].into();
        let s = AppSettings::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(s.body_limit, 2048);
        assert_eq!(s.normalize_db_names, Some(true));
        assert_eq!(s.api_prefix, DEFAULT_API_PREFIX);
        assert!(s.database_url.is_none());
    }

    #[test]
    fn rejects_bad_body_limit() {
        let r = AppSettings::from_lookup(|k| (k == "DITO_BODY_LIMIT").then(|| "lots".to_string()));
        assert!(r.is_err());
    }
}
