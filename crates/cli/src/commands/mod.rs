//! CLI commands for the event strangle trader.

pub mod accounts;
pub mod check_config;
pub mod run;
pub mod select;
pub mod state;

pub use accounts::AccountsArgs;
pub use check_config::CheckConfigArgs;
pub use run::RunArgs;
pub use select::SelectArgs;
pub use state::StateArgs;

use anyhow::{Context, Result};
use strangle_core::AppConfig;
use strangle_ig::{IgClient, IgClientConfig};
use tracing::info;

/// Opens an authenticated broker session from the `[broker]` section.
pub async fn connect(config: &AppConfig) -> Result<IgClient> {
    let client = IgClient::new(IgClientConfig::from_broker(&config.broker))?;
    client
        .create_session()
        .await
        .with_context(|| format!("failed to log in to {}", config.broker.base_url))?;
    info!(
        base_url = %client.base_url(),
        account = ?client.account_id(),
        "Broker session established"
    );
    Ok(client)
}
