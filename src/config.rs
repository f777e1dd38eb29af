use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cases::OnConflictStrategy;

pub const DEFAULT_GEOCODER_ENDPOINT: &str = "https://api.opencagedata.com/geocode/v1/json";
const DEFAULT_DATABASE_PATH: &str = "covid-data.db";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub geocoder_endpoint: String,
    pub geocoder_api_key: Option<SecretString>,
    pub geocoder_rate_limit_qps: u32,
    pub geocoder_timeout_secs: u64,
    pub database_path: String,
    pub case_conflict_strategy: OnConflictStrategy,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub geocoder_endpoint: String,
    pub geocoder_rate_limit_qps: u32,
    pub geocoder_timeout_secs: u64,
    pub database_path: String,
    pub case_conflict_strategy: OnConflictStrategy,
    pub has_geocoder_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            geocoder_endpoint: env::var("GEOCODER_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GEOCODER_ENDPOINT.to_string()),
            geocoder_api_key: env::var("CAGEDATA_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            geocoder_rate_limit_qps: parse_u32("GEOCODER_RATE_LIMIT_QPS", 1).max(1),
            geocoder_timeout_secs: parse_u64("GEOCODER_TIMEOUT_SECS", 10),
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string()),
            case_conflict_strategy: parse_strategy("CASE_CONFLICT_STRATEGY"),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            geocoder_endpoint: self.geocoder_endpoint.clone(),
            geocoder_rate_limit_qps: self.geocoder_rate_limit_qps,
            geocoder_timeout_secs: self.geocoder_timeout_secs,
            database_path: self.database_path.clone(),
            case_conflict_strategy: self.case_conflict_strategy,
            has_geocoder_key: self.geocoder_api_key.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_strategy(key: &str) -> OnConflictStrategy {
    match env::var(key) {
        Ok(value) => OnConflictStrategy::parse(&value).unwrap_or_else(|err| {
            warn!(%err, "ignoring invalid conflict strategy; using replace");
            OnConflictStrategy::Replace
        }),
        Err(_) => OnConflictStrategy::Replace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("CAGEDATA_API_KEY", "secret");
        env::set_var("DATABASE_PATH", "custom.db");
        env::set_var("GEOCODER_RATE_LIMIT_QPS", "0");
        env::set_var("CASE_CONFLICT_STRATEGY", "add");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.database_path, "custom.db");
        assert!(public.has_geocoder_key);
        assert!(config.geocoder_api_key.is_some());
        assert_eq!(public.geocoder_rate_limit_qps, 1);
        assert_eq!(public.case_conflict_strategy, OnConflictStrategy::Add);
        assert_eq!(public.geocoder_endpoint, DEFAULT_GEOCODER_ENDPOINT);

        let serialized = serde_json::to_string(&public).unwrap();
        assert!(!serialized.contains("secret"));
    }
}
