//! Dry-run contract selection.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use rust_decimal::Decimal;
use strangle_core::AppConfig;
use strangle_options_manager::{EntryPlan, LegKind, TradeLifecycle};

use super::connect;

#[derive(Args, Debug)]
pub struct SelectArgs {
    /// Override `risk.delta` (distance from the underlying to each strike)
    #[arg(long)]
    pub delta: Option<Decimal>,

    /// Override `risk.budget`
    #[arg(long)]
    pub budget: Option<Decimal>,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: &SelectArgs, config: AppConfig) -> Result<()> {
    let client = Arc::new(connect(&config).await?);
    let lifecycle = TradeLifecycle::new(
        client.clone(),
        config.market.clone(),
        config.broker.currency.clone(),
        config.risk.clone(),
    )?;
    lifecycle.update_risk(|risk| {
        if let Some(delta) = args.delta {
            risk.set_delta(delta)?;
        }
        if let Some(budget) = args.budget {
            risk.set_budget(budget)?;
        }
        Ok(())
    })?;

    let result = lifecycle.preview_entry().await;
    client.logout().await?;
    let plan = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan, &config.broker.currency);
    }
    Ok(())
}

fn print_plan(plan: &EntryPlan, currency: &str) {
    println!();
    println!("Underlying mid: {}", plan.underlying_price);
    println!("Size per leg:   {}", plan.size);
    println!();
    println!(
        "{:<5} {:<24} {:>10} {:>10} {:>10} {:>10}  {}",
        "LEG", "EPIC", "STRIKE", "BID", "OFFER", "LIMIT", "EXPIRY"
    );
    let mut premium = Decimal::ZERO;
    for kind in LegKind::BOTH {
        let leg = plan.leg(kind);
        let contract = &leg.contract;
        let offer = contract.offer.unwrap_or_default();
        premium += offer;
        println!(
            "{:<5} {:<24} {:>10} {:>10} {:>10} {:>10}  {}",
            kind.to_string(),
            contract.epic,
            contract.strike,
            contract.bid.map_or_else(|| "-".to_string(), |b| b.to_string()),
            offer,
            leg.limit_level,
            contract.expiry
        );
    }
    println!();
    println!(
        "Estimated cost: {} {} ({} premium x {})",
        (premium * plan.size).round_dp(2),
        currency,
        premium,
        plan.size
    );
}
