//! Configuration check. Loading has already validated everything by the time
//! this runs; it only prints the effective values.

use clap::Args;
use strangle_core::AppConfig;

#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    /// Also print the risk parameters
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn run(args: &CheckConfigArgs, config: &AppConfig) {
    let broker = &config.broker;
    println!("Configuration OK");
    println!("  broker:   {} ({})", broker.base_url, broker.currency);
    println!(
        "  account:  {}",
        broker.account_id.as_deref().unwrap_or("session default")
    );
    println!(
        "  retry:    {} retries, {}ms..{}ms x{}",
        broker.retry.max_retries,
        broker.retry.base_delay_ms,
        broker.retry.max_delay_ms,
        broker.retry.backoff_multiplier
    );
    println!(
        "  market:   node {} / underlying \"{}\" / flat after {} missing refreshes",
        config.market.option_node_id,
        config.market.underlying_search_term,
        config.market.missing_position_refreshes
    );
    println!(
        "  event:    {}",
        config.schedule.event_time.as_deref().unwrap_or("none")
    );
    println!(
        "  state:    {}",
        config
            .state_file
            .as_ref()
            .map_or_else(|| "not persisted".to_string(), |p| p.display().to_string())
    );

    if args.verbose {
        let risk = &config.risk;
        println!("  risk:");
        println!("    budget {} / delta {}", risk.budget, risk.delta);
        println!(
            "    stop at -{} (sell {}), trailing {}",
            risk.stop_fraction, risk.stop_exit_fraction, risk.trailing_fraction
        );
        println!(
            "    tier2 {}x (sell {}, unwind {})",
            risk.tier2_multiple,
            risk.tier2_exit_fraction,
            risk.tier2_unwind_fraction
                .map_or_else(|| "off".to_string(), |f| f.to_string())
        );
        println!(
            "    tier3 {}x (sell {}, close opposite {})",
            risk.tier3_multiple, risk.tier3_exit_fraction, risk.tier3_close_opposite
        );
        println!(
            "    sampling {}s, entry offset {}s, granularity {}",
            risk.sampling_interval_secs, risk.entry_offset_secs, risk.size_granularity
        );
    }
}
