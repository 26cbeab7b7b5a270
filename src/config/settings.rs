//! Application settings loaded from `config.toml` and the environment.
//!
//! The TOML file carries the non-secret shape of the deployment (URLs,
//! timeouts, scheduler cadence); credentials are taken from environment
//! variables and override anything in the file, so a committed config.toml
//! never needs to contain a secret.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Top-level application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Address the HTTP API listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Payment gateway credentials and endpoints
    #[serde(default)]
    pub gateway: GatewaySettings,
    /// SMS delivery settings
    #[serde(default)]
    pub sms: SmsSettings,
    /// Penalty and reminder scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

/// Settings for the mobile-money gateway client.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    /// Gateway API base URL
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,
    /// OAuth consumer key
    #[serde(default)]
    pub consumer_key: String,
    /// OAuth consumer secret
    #[serde(default)]
    pub consumer_secret: String,
    /// Business short code
    #[serde(default)]
    pub short_code: String,
    /// Pass key used to sign push and query requests
    #[serde(default)]
    pub pass_key: String,
    /// Public URL the gateway delivers callbacks to
    #[serde(default)]
    pub callback_url: String,
    /// Timeout for gateway HTTP calls, in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

/// Settings for the outbound SMS transport.
#[derive(Debug, Clone, Deserialize)]
pub struct SmsSettings {
    /// Bulk-SMS provider endpoint
    #[serde(default)]
    pub api_url: String,
    /// Provider API key
    #[serde(default)]
    pub api_key: String,
    /// Provider partner identifier
    #[serde(default)]
    pub partner_id: String,
    /// Sender short code
    #[serde(default)]
    pub shortcode: String,
    /// Whether SMS delivery is enabled; when false, messages are logged only
    #[serde(default)]
    pub enabled: bool,
}

/// Settings for the penalty and reminder scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// Seconds between scheduler passes (default: one day)
    #[serde(default = "default_scheduler_interval_secs")]
    pub interval_secs: u64,
    /// Whether the background scheduler task runs at all
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_database_url() -> String {
    "sqlite://data/mikopo.sqlite?mode=rwc".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_gateway_base_url() -> String {
    "https://sandbox.safaricom.co.ke".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    30
}

fn default_scheduler_interval_secs() -> u64 {
    86_400
}

fn default_true() -> bool {
    true
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            short_code: String::new(),
            pass_key: String::new(),
            callback_url: String::new(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

impl Default for SmsSettings {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            partner_id: String::new(),
            shortcode: String::new(),
            enabled: false,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_scheduler_interval_secs(),
            enabled: true,
        }
    }
}

impl Settings {
    /// Loads settings from the default location (`./config.toml`), falling
    /// back to defaults when the file does not exist, then applies
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut settings = if Path::new("config.toml").exists() {
            Self::from_file("config.toml")?
        } else {
            Self::from_str("")?
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Loads settings from a TOML file at the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
            message: format!("Failed to read config file: {e}"),
        })?;
        Self::from_str(&contents)
    }

    fn from_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config {
            message: format!("Failed to parse config.toml: {e}"),
        })
    }

    /// Applies environment variable overrides for deployment-specific values
    /// and credentials.
    fn apply_env_overrides(&mut self) {
        override_from_env(&mut self.database_url, "DATABASE_URL");
        override_from_env(&mut self.listen_addr, "LISTEN_ADDR");
        override_from_env(&mut self.gateway.base_url, "MPESA_BASE_URL");
        override_from_env(&mut self.gateway.consumer_key, "MPESA_CONSUMER_KEY");
        override_from_env(&mut self.gateway.consumer_secret, "MPESA_CONSUMER_SECRET");
        override_from_env(&mut self.gateway.short_code, "MPESA_SHORT_CODE");
        override_from_env(&mut self.gateway.pass_key, "MPESA_PASS_KEY");
        override_from_env(&mut self.gateway.callback_url, "MPESA_CALLBACK_URL");
        override_from_env(&mut self.sms.api_url, "SMS_API_URL");
        override_from_env(&mut self.sms.api_key, "SMS_API_KEY");
        override_from_env(&mut self.sms.partner_id, "SMS_PARTNER_ID");
        override_from_env(&mut self.sms.shortcode, "SMS_SHORT_CODE");
        if std::env::var("SMS_API_KEY").is_ok() {
            self.sms.enabled = true;
        }
    }
}

fn override_from_env(target: &mut String, var: &str) {
    if let Ok(value) = std::env::var(var) {
        *target = value;
    }
}
