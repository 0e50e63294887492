//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Credentials and endpoints for the WhatsApp Cloud API.
#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    pub token: String,
    pub phone_number_id: String,
    pub verify_token: String,
    pub app_secret: Option<String>,
    pub api_base: String,
}

/// Credentials and endpoints for Kopo Kopo.
#[derive(Clone, Debug)]
pub struct KopoKopoConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub till_number: String,
    pub callback_url: String,
    pub webhook_secret: Option<String>,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub log_level: Level,
    pub cors_allowed_origin: Option<String>,
    pub bar_name: String,
    pub bar_staff_phones: Vec<String>,
    pub whatsapp: WhatsAppConfig,
    pub kopokopo: KopoKopoConfig,
    pub dispatch_interval: Duration,
    pub payment_queue_capacity: usize,
    pub dedup_window: Duration,
    pub follow_up_delay: Duration,
    pub session_ttl: Duration,
    pub http_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server, Database and Session Store Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = required("DATABASE_URL")?;
        let redis_url = optional("REDIS_URL");

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_allowed_origin = optional("CORS_ALLOWED_ORIGIN");

        // --- Load Bar Settings ---
        let bar_name =
            optional("BAR_NAME").unwrap_or_else(|| "Destination Cocktails".to_string());
        let bar_staff_phones = parse_phone_list(&std::env::var("BAR_STAFF_PHONES").unwrap_or_default());

        // --- Load Provider Credentials ---
        let whatsapp = WhatsAppConfig {
            token: required("WHATSAPP_TOKEN")?,
            phone_number_id: required("WHATSAPP_PHONE_NUMBER_ID")?,
            verify_token: required("WHATSAPP_VERIFY_TOKEN")?,
            app_secret: optional("WHATSAPP_APP_SECRET"),
            api_base: optional("WHATSAPP_API_BASE")
                .unwrap_or_else(|| "https://graph.facebook.com/v19.0".to_string()),
        };

        let kopokopo = KopoKopoConfig {
            base_url: optional("KOPOKOPO_BASE_URL")
                .unwrap_or_else(|| "https://api.kopokopo.com".to_string()),
            access_token: optional("KOPOKOPO_ACCESS_TOKEN"),
            client_id: optional("KOPOKOPO_CLIENT_ID"),
            client_secret: optional("KOPOKOPO_CLIENT_SECRET"),
            till_number: required("KOPOKOPO_TILL_NUMBER")?,
            callback_url: required("KOPOKOPO_CALLBACK_URL")?,
            webhook_secret: optional("KOPOKOPO_WEBHOOK_SECRET"),
        };
        if kopokopo.access_token.is_none()
            && (kopokopo.client_id.is_none() || kopokopo.client_secret.is_none())
        {
            return Err(ConfigError::MissingVar(
                "KOPOKOPO_ACCESS_TOKEN or KOPOKOPO_CLIENT_ID/KOPOKOPO_CLIENT_SECRET".to_string(),
            ));
        }

        // --- Load Payment and Session Tuning ---
        let dispatch_interval =
            Duration::from_millis(number_or("PAYMENT_DISPATCH_INTERVAL_MS", 2100)?);
        let payment_queue_capacity: usize = number_or("PAYMENT_QUEUE_CAPACITY", 100)?;
        if payment_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_QUEUE_CAPACITY".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let dedup_window = Duration::from_secs(number_or("PAYMENT_DEDUP_WINDOW_SECS", 60)?);
        let follow_up_delay = Duration::from_secs(number_or("PAYMENT_FOLLOW_UP_SECS", 45)?);
        let session_ttl = Duration::from_secs(number_or("SESSION_TTL_SECS", 7200)?);
        let http_timeout = Duration::from_secs(number_or("HTTP_TIMEOUT_SECS", 30)?);

        Ok(Self {
            bind_address,
            database_url,
            redis_url,
            log_level,
            cors_allowed_origin,
            bar_name,
            bar_staff_phones,
            whatsapp,
            kopokopo,
            dispatch_interval,
            payment_queue_capacity,
            dedup_window,
            follow_up_delay,
            session_ttl,
            http_timeout,
        })
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    optional(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

/// Reads a variable, treating an empty value as unset.
fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn number_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => parse_number(name, &raw),
        None => Ok(default),
    }
}

fn parse_number<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{raw}': {e}")))
}

/// Splits a comma-separated list of phones, dropping blanks.
fn parse_phone_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_phone_list_ignores_blanks() {
        assert_eq!(
            parse_phone_list(" 254700000001, ,254700000002,"),
            vec!["254700000001".to_string(), "254700000002".to_string()]
        );
        assert!(parse_phone_list("").is_empty());
    }

    #[test]
    fn numbers_report_the_offending_variable() {
        let ok: u64 = parse_number("PAYMENT_FOLLOW_UP_SECS", "45").unwrap();
        assert_eq!(ok, 45);

        let err = parse_number::<u64>("PAYMENT_FOLLOW_UP_SECS", "soon").unwrap_err();
        match err {
            ConfigError::InvalidValue(name, msg) => {
                assert_eq!(name, "PAYMENT_FOLLOW_UP_SECS");
                assert!(msg.contains("soon"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
