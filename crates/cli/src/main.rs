use clap::{Parser, Subcommand};
use strangle_core::{AppConfig, ConfigLoader};

mod commands;

use commands::{AccountsArgs, CheckConfigArgs, RunArgs, SelectArgs, StateArgs};

#[derive(Parser, Debug)]
#[command(name = "strangle-bot")]
#[command(about = "Event strangle trader for IG listed options", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = "config/Config.toml")]
    config: String,

    /// Profile overlay, merged from `<config stem>.<profile>.toml`
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the strangle lifecycle until interrupted
    Run(RunArgs),
    /// Show the contracts and size that would be entered now, without trading
    Select(SelectArgs),
    /// List broker accounts and balances
    Accounts(AccountsArgs),
    /// Inspect or clear the saved trade cycle
    State(StateArgs),
    /// Load and validate the configuration, then exit
    CheckConfig(CheckConfigArgs),
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        let config = ConfigLoader::load_with_profile(&self.config, self.profile.as_deref())?;
        tracing::debug!(config = %self.config, profile = ?self.profile, "Configuration loaded");
        Ok(config)
    }
}

fn init_logging(log_file: Option<&str>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    match &cli.command {
        Commands::Run(args) => {
            let config = cli.load_config()?;
            commands::run::run(args, config).await?;
        }
        Commands::Select(args) => {
            let config = cli.load_config()?;
            commands::select::run(args, config).await?;
        }
        Commands::Accounts(args) => {
            let config = cli.load_config()?;
            commands::accounts::run(args, config).await?;
        }
        Commands::State(args) => {
            // An explicit file skips config loading so the state can be
            // inspected without live credentials.
            let path = match &args.file {
                Some(path) => path.clone(),
                None => cli
                    .load_config()?
                    .state_file
                    .ok_or_else(|| anyhow::anyhow!("state_file is not set in {}", cli.config))?,
            };
            commands::state::run(args, &path)?;
        }
        Commands::CheckConfig(args) => {
            let config = cli.load_config()?;
            commands::check_config::run(args, &config);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["strangle-bot", "run"]).unwrap();
        assert_eq!(cli.config, "config/Config.toml");
        assert!(cli.profile.is_none());
        assert!(cli.log_file.is_none());
        match cli.command {
            Commands::Run(args) => assert!(args.event_time.is_none()),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "strangle-bot",
            "run",
            "--event-time",
            "2030-01-01T13:30:00Z",
            "--config",
            "/etc/strangle.toml",
            "--profile",
            "live",
            "--log-file",
            "bot.log",
        ])
        .unwrap();
        assert_eq!(cli.config, "/etc/strangle.toml");
        assert_eq!(cli.profile.as_deref(), Some("live"));
        assert_eq!(cli.log_file.as_deref(), Some("bot.log"));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.event_time.as_deref(), Some("2030-01-01T13:30:00Z"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_state_flags() {
        let cli =
            Cli::try_parse_from(["strangle-bot", "state", "--file", "cycle.json", "--json"])
                .unwrap();
        match cli.command {
            Commands::State(args) => {
                assert_eq!(args.file.as_deref(), Some(std::path::Path::new("cycle.json")));
                assert!(args.json);
                assert!(!args.reset);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_state_json_and_reset_conflict() {
        assert!(Cli::try_parse_from(["strangle-bot", "state", "--json", "--reset"]).is_err());
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["strangle-bot"]).is_err());
        assert!(Cli::try_parse_from(["strangle-bot", "backtest"]).is_err());
    }
}
