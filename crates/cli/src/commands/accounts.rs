//! Account listing.

use anyhow::Result;
use clap::Args;
use strangle_core::AppConfig;
use strangle_ig::Account;

use super::connect;

#[derive(Args, Debug)]
pub struct AccountsArgs {
    /// Only show the account the session is using
    #[arg(long)]
    pub current: bool,
}

pub async fn run(args: &AccountsArgs, config: AppConfig) -> Result<()> {
    let client = connect(&config).await?;
    let active = client.account_id();
    let result = client.get_accounts().await;
    client.logout().await?;

    let accounts: Vec<Account> = result?
        .into_iter()
        .filter(|a| !args.current || active.as_deref() == Some(a.account_id.as_str()))
        .collect();

    if accounts.is_empty() {
        println!("No accounts found");
        return Ok(());
    }

    println!(
        "  {:<12} {:<24} {:<10} {:<4} {:>14} {:>14} {:>14}",
        "ID", "NAME", "TYPE", "CCY", "BALANCE", "AVAILABLE", "P&L"
    );
    for account in &accounts {
        let marker = if active.as_deref() == Some(account.account_id.as_str()) {
            '*'
        } else {
            ' '
        };
        println!(
            "{} {:<12} {:<24} {:<10} {:<4} {:>14} {:>14} {:>14}",
            marker,
            account.account_id,
            account.account_name,
            account.account_type.as_deref().unwrap_or("-"),
            account.currency,
            account.balance.balance,
            account.balance.available,
            account.balance.profit_loss
        );
    }
    Ok(())
}
