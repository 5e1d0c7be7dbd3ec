//! Long-running trader: opens a session, resumes any saved cycle and ticks
//! the lifecycle until SIGINT or SIGTERM.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use strangle_core::{parse_event_time, AppConfig};
use strangle_options_manager::{LifecycleService, StatePersistence, TradeLifecycle};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use super::connect;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Event time (RFC 3339); overrides `schedule.event_time`
    #[arg(long)]
    pub event_time: Option<String>,
}

pub async fn run(args: &RunArgs, config: AppConfig) -> Result<()> {
    // Reject a bad schedule before touching the broker.
    let raw_event = args
        .event_time
        .as_deref()
        .or(config.schedule.event_time.as_deref());
    let event_time = raw_event
        .map(|raw| parse_event_time(raw, Utc::now()))
        .transpose()?;

    let client = Arc::new(connect(&config).await?);

    let mut lifecycle = TradeLifecycle::new(
        client,
        config.market.clone(),
        config.broker.currency.clone(),
        config.risk.clone(),
    )?;
    if let Some(path) = &config.state_file {
        lifecycle = lifecycle.with_persistence(StatePersistence::new(path.clone()))?;
        info!(path = %path.display(), "Trade cycle persistence enabled");
    } else {
        warn!("No state_file configured; an open position will not survive a restart");
    }
    lifecycle.set_event_time(event_time)?;

    let lifecycle = Arc::new(lifecycle);
    info!(status = %lifecycle.status(), "Lifecycle ready");
    println!("{}", lifecycle.explain());

    let mut service = LifecycleService::new(lifecycle.clone());
    service.start();

    shutdown_signal().await?;

    info!("Stopping lifecycle service");
    service.stop().await?;
    println!("{}", lifecycle.explain());
    info!("Trader stopped");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
    }
    Ok(())
}
