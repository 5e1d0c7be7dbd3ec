//! Shared building blocks for the event strangle trader.
//!
//! - [`risk`]: risk parameters with validated setters
//! - [`retry`]: exponential backoff executor
//! - [`config`] / [`config_loader`]: layered startup configuration

pub mod config;
pub mod config_loader;
pub mod error;
pub mod retry;
pub mod risk;

pub use config::{AppConfig, BrokerConfig, MarketConfig, ScheduleConfig};
pub use config_loader::{ConfigLoader, ENV_PREFIX};
pub use error::{ConfigError, RetryError, ValidationError};
pub use retry::BackoffConfig;
pub use risk::{parse_event_time, validate_event_time, RiskParameters};
