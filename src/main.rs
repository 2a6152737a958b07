use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use ratewatch::cli::setup::setup;
use ratewatch::core::log::{LogMode, init_logging};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for ratewatch::AppCommand {
    fn from(cmd: Commands) -> ratewatch::AppCommand {
        match cmd {
            Commands::Serve => ratewatch::AppCommand::Serve,
            Commands::Fetch => ratewatch::AppCommand::Fetch,
            Commands::Rates { currency } => ratewatch::AppCommand::Rates { currency },
            Commands::History {
                currency,
                source,
                since,
            } => ratewatch::AppCommand::History {
                currency,
                source,
                since,
            },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Serve the dashboard and refresh rates in the background
    Serve,
    /// Fetch current rates from every enabled source once
    Fetch,
    /// Display the latest rates per bank
    Rates {
        /// Currency to compare banks by
        #[arg(long, default_value = "USD")]
        currency: String,
    },
    /// Display the stored history for one currency at one source
    History {
        #[arg(long)]
        currency: String,
        #[arg(long)]
        source: String,
        /// Only show rows observed at or after this RFC 3339 time
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mode = match cli.command {
        Some(Commands::Serve) => LogMode::Server {
            verbose: cli.verbose,
        },
        _ => LogMode::Cli {
            verbose: cli.verbose,
        },
    };
    init_logging(mode);

    let result = match cli.command {
        Some(Commands::Setup) => setup(),
        Some(cmd) => ratewatch::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
