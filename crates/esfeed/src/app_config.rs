//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment: `ESFEED_*` environment variables, optionally layered
//! under a TOML file. Nested keys use a double underscore, so
//! `ESFEED_BACKEND__URL` lands in `[backend] url`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{ElasticsearchConfig, FileSinkConfig, HttpSinkConfig};
use crate::errors::FeedError;
use crate::feed::FeedConfig;

/// 🕳️ Where indicators go. Externally tagged: `[sink.file]`, `[sink.http]`, or `sink = "in_memory"`.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub enum SinkConfig {
    File(FileSinkConfig),
    Http(HttpSinkConfig),
    /// 🧠 Keep everything in RAM and throw it away at exit. Dry runs.
    InMemory,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::File(FileSinkConfig {
            file_name: "esfeed_indicators.ndjson".to_string(),
        })
    }
}

/// 💾 `[state]`: where the watermark sleeps between cycles.
#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_watermark_file")]
    pub watermark_file: PathBuf,
}

fn default_watermark_file() -> PathBuf {
    PathBuf::from("esfeed_state.json")
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            watermark_file: default_watermark_file(),
        }
    }
}

/// 📦 The AppConfig: one struct to rule them all.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: ElasticsearchConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub state: StateConfig,
}

impl AppConfig {
    /// ✅ Every configuration problem, backend and feed together. Nothing is sent anywhere.
    pub fn validate(&self) -> Result<(), FeedError> {
        let mut errors = self.backend.validate();
        errors.extend(self.feed.validate());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(FeedError::Configuration(errors))
        }
    }
}

/// 🚀 Load the config from `ESFEED_*` env vars and, if given, a TOML file. The file wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("ESFEED_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (ESFEED_*). \
             The file exists in our hearts, but apparently not in a shape serde recognizes.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (ESFEED_*). \
                 No file was provided, this one's all on the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}
