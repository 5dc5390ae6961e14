//! 📡 esfeed: pulls threat indicators out of Elasticsearch on a schedule.
//!
//! 🧠 Knowledge graph:
//! - `run(config, command)`: the front door. Validates everything, builds the backends,
//!   dispatches to the orchestrator, persists the watermark after a successful cycle.
//! - `execute(...)`: the same thing with the collaborators handed in, for tests
//!   and for anyone embedding the feed somewhere other than the CLI.
//! - Data flows `ScanExecutor → translate → split → rebatch → IndicatorSink`. 🦆

pub mod app_config;
pub mod backends;
pub mod common;
pub mod enrichment;
pub mod errors;
pub mod feed;
pub mod orchestrator;
pub mod query;
pub mod render;
pub mod translate;
pub mod watermark;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::app_config::AppConfig;
use crate::backends::{ElasticsearchScanExecutor, ScanBackend, ScanExecutor, SinkBackend};
use crate::orchestrator::{CycleInput, CycleResult, CycleStage, FetchOrchestrator, IndicatorListing, enter};
use crate::watermark::{FileWatermarkStore, StateBackend, WatermarkStore};

/// 🎛️ The three things this feed knows how to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// 🏓 Validate the config and ping the backend.
    TestConnection,
    /// 📋 Show what the feed would pull right now. Touches no state.
    ListIndicators { limit: Option<usize> },
    /// 🔁 Pull, submit, move the watermark.
    FetchCycle,
}

/// 📤 What a command produced.
#[derive(Debug, Clone)]
pub enum CommandOutput {
    ConnectionOk,
    Listing(IndicatorListing),
    Cycle(CycleResult),
}

/// 🚀 Run one command against the configured backend, sink and state file.
pub async fn run(config: AppConfig, command: Command) -> Result<CommandOutput> {
    config.validate()?;
    let executor = ScanBackend::Elasticsearch(ElasticsearchScanExecutor::new(config.backend.clone())?);
    let state = StateBackend::File(FileWatermarkStore::new(config.state.watermark_file.clone()));
    execute(&config, &executor, &state, command).await
}

/// 🎯 Run one command with the collaborators supplied by the caller.
///
/// The sink is built from `config.sink` for fetch cycles only. The watermark is
/// read once before the cycle and written once after it, never on failure.
pub async fn execute<E, W>(config: &AppConfig, executor: &E, state: &W, command: Command) -> Result<CommandOutput>
where
    E: ScanExecutor,
    W: WatermarkStore,
{
    config.validate()?;
    let orchestrator = FetchOrchestrator::new(&config.feed, executor);
    let now = Utc::now();

    match command {
        Command::TestConnection => {
            orchestrator.test_connection(now).await?;
            Ok(CommandOutput::ConnectionOk)
        }
        Command::ListIndicators { limit } => {
            let listing = orchestrator.list_indicators(limit, now).await?;
            Ok(CommandOutput::Listing(listing))
        }
        Command::FetchCycle => {
            let persisted = state
                .load()
                .await
                .context("💀 Couldn't read the last watermark. Not guessing, not fetching.")?;
            match &persisted {
                Some(mark) => info!("🔖 resuming from watermark {}", mark),
                None => info!("🆕 no watermark yet, reaching back '{}'", config.feed.fetch_time),
            }

            let mut sink = SinkBackend::open(&config.sink).await?;
            let result = orchestrator
                .fetch_cycle(CycleInput { persisted, started_at: now }, &mut sink)
                .await?;

            state.store(&result.new_watermark).await.context(
                "💀 Every batch was delivered, but the new watermark could not be saved. \
                 The next cycle will re-send them.",
            )?;
            enter(CycleStage::WatermarkPersisted);
            Ok(CommandOutput::Cycle(result))
        }
    }
}
