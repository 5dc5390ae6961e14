use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::backends::IndicatorSink;
use crate::common::FeedRecord;

/// 🌐 `[sink.http]`: an ingestion endpoint that takes a JSON array per call.
#[derive(Debug, Deserialize, Clone)]
pub struct HttpSinkConfig {
    pub url: String,
    /// 🔒 Sent as `Authorization: Bearer <token>` when set.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// 📡 POSTs each batch as one JSON array. No buffering, no retries.
#[derive(Debug)]
pub struct HttpSink {
    client: reqwest::Client,
    config: HttpSinkConfig,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("💀 The sink's HTTP client refused to be born.")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl IndicatorSink for HttpSink {
    async fn submit(&mut self, batch: &[FeedRecord]) -> Result<()> {
        let body = serde_json::to_string(batch).context("💀 A batch refused to become JSON.")?;
        let mut request = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .body(body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        debug!("📡 submitting {} records to '{}'", batch.len(), self.config.url);
        let response = request
            .send()
            .await
            .with_context(|| format!("💀 The sink at '{}' never picked up.", self.config.url))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!(
                "💀 The sink at '{}' rejected a batch of {} with {}: {}",
                self.config.url,
                batch.len(),
                status,
                detail
            );
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        debug!("🗑️ http sink closing, nothing buffered");
        Ok(())
    }
}
