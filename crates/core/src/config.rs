use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ValidationError};
use crate::retry::BackoffConfig;
use crate::risk::{parse_event_time, validate_currency_code, RiskParameters};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub risk: RiskParameters,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub base_url: String,
    pub api_key: String,
    pub identifier: String,
    pub password: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: BackoffConfig,
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("identifier", &self.identifier)
            .field("password", &"[REDACTED]")
            .field("account_id", &self.account_id)
            .field("currency", &self.currency)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .finish()
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://demo-api.ig.com/gateway/deal".to_string(),
            api_key: String::new(),
            identifier: String::new(),
            password: String::new(),
            account_id: None,
            currency: default_currency(),
            timeout_secs: default_timeout_secs(),
            retry: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Navigation node holding the day's option chain.
    pub option_node_id: String,
    /// Search term resolving the underlying index quotes.
    pub underlying_search_term: String,
    /// How deep to descend below `option_node_id` looking for instruments.
    #[serde(default = "default_navigation_depth")]
    pub max_navigation_depth: u32,
    /// Consecutive position refreshes a confirmed leg may be missing from
    /// before it is treated as closed.
    #[serde(default = "default_missing_position_refreshes")]
    pub missing_position_refreshes: u32,
}

const fn default_navigation_depth() -> u32 {
    3
}

const fn default_missing_position_refreshes() -> u32 {
    3
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            option_node_id: String::new(),
            underlying_search_term: "US 500".to_string(),
            max_navigation_depth: default_navigation_depth(),
            missing_position_refreshes: default_missing_position_refreshes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// RFC 3339 timestamp of the next macro event.
    #[serde(default)]
    pub event_time: Option<String>,
}

/// True when a credential is blank or still holds a template value.
fn is_placeholder(value: &str) -> bool {
    let v = value.trim().to_ascii_lowercase();
    v.is_empty()
        || v.starts_with("your")
        || v.starts_with("changeme")
        || v.starts_with("change-me")
        || v.starts_with('<')
        || v.contains("placeholder")
        || v.chars().all(|c| c == 'x' || c == '*')
}

impl AppConfig {
    /// Validates startup configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for missing or placeholder values and for any
    /// risk parameter or schedule outside its safe range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("broker.base_url".to_string()));
        }
        if !self.broker.base_url.starts_with("https://")
            && !self.broker.base_url.starts_with("http://")
        {
            return Err(ConfigError::Invalid(ValidationError::new(
                "broker.base_url",
                format!("not an http(s) URL: {}", self.broker.base_url),
            )));
        }
        for (name, value) in [
            ("broker.api_key", &self.broker.api_key),
            ("broker.identifier", &self.broker.identifier),
            ("broker.password", &self.broker.password),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name.to_string()));
            }
            if is_placeholder(value) {
                return Err(ConfigError::Placeholder(name.to_string()));
            }
        }
        validate_currency_code(&self.broker.currency)?;
        self.broker.retry.validate()?;

        if self.market.option_node_id.trim().is_empty() {
            return Err(ConfigError::Missing("market.option_node_id".to_string()));
        }
        if self.market.underlying_search_term.trim().is_empty() {
            return Err(ConfigError::Missing(
                "market.underlying_search_term".to_string(),
            ));
        }

        if self.market.missing_position_refreshes == 0 {
            return Err(ConfigError::Invalid(ValidationError::new(
                "market.missing_position_refreshes",
                "must be at least 1",
            )));
        }

        self.risk.validate()?;

        if let Some(raw) = &self.schedule.event_time {
            parse_event_time(raw, chrono::Utc::now())?;
        }

        Ok(())
    }
}
