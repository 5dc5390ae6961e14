//! 🚀 esfeed-cli: the front door, the bouncer, the maitre d' of esfeed.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Loads config, sets up logging, picks a subcommand, and lets the library
//! do the heavy lifting. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use esfeed::{Command, CommandOutput};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 📡 Pull threat indicators out of Elasticsearch.
#[derive(Debug, Parser)]
#[command(name = "esfeed", version, about)]
struct Cli {
    /// Path to the TOML config. Environment variables (ESFEED_*) fill in whatever it leaves out.
    #[arg(short, long, default_value = "esfeed.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Validate the configuration and ping the server.
    TestConnection,
    /// Show the indicators a fetch would pull right now, without moving the watermark.
    ListIndicators {
        /// Maximum number of indicators (insight feeds only).
        #[arg(short, long)]
        limit: Option<usize>,
        /// Print the raw indicators as JSON instead of tables.
        #[arg(long)]
        json: bool,
    },
    /// Run one scheduled fetch cycle.
    FetchCycle,
}

/// 🚀 main(): where it all begins.
///
/// 1. Init tracing
/// 2. Parse args
/// 3. Load config
/// 4. Run the command
/// 5. On failure, print the error chain and exit 1
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // 🔒 A missing file is fine, env vars may carry everything. An unreadable path is not.
    let config_file = cli.config.try_exists().with_context(|| {
        format!(
            "💀 Couldn't check whether the configuration file exists. If it's a relative path, \
             try an absolute one. Was checking here: '{}'",
            cli.config.display()
        )
    })?;
    let config_file = config_file.then_some(cli.config.as_path());

    let app_config = esfeed::app_config::load_config(config_file)
        .context("💀 In esfeed-cli, main, we couldn't load the config. Take a look at the file and the ESFEED_* variables.")?;

    let (command, json_output) = match cli.command {
        CliCommand::TestConnection => (Command::TestConnection, false),
        CliCommand::ListIndicators { limit, json } => (Command::ListIndicators { limit }, json),
        CliCommand::FetchCycle => (Command::FetchCycle, false),
    };

    match esfeed::run(app_config, command).await {
        Ok(CommandOutput::ConnectionOk) => println!("ok"),
        Ok(CommandOutput::Listing(listing)) if json_output => {
            println!(
                "{}",
                serde_json::to_string_pretty(&listing.indicators).context("💀 The listing refused to become JSON.")?
            );
        }
        Ok(CommandOutput::Listing(listing)) => println!("{}", listing.table),
        Ok(CommandOutput::Cycle(result)) => {
            info!(
                "✅ {} indicators and {} enrichment entries submitted, watermark now {}",
                result.indicators, result.enrichment_entries, result.new_watermark
            );
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("Connection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }
            if matches!(err.downcast_ref::<esfeed::errors::FeedError>(), Some(esfeed::errors::FeedError::Connectivity { .. })) {
                the_vibes_are_giving_connection_issues = true;
            }

            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like Elasticsearch isn't reachable. Double-check the [backend] url, \
                     the port, and whether the cluster is actually up. If it runs in Docker, `docker ps` \
                     is a good first stop. ☕"
                );
            }
            // 🖨️ the one line an operator (or a scheduler's log scraper) reads
            eprintln!("{err}");
            std::process::exit(1);
        }
    }

    Ok(())
}
