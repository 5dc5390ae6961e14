use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    fs::File,
    io::{self, AsyncWriteExt},
};
use tracing::trace;

use crate::backends::IndicatorSink;
use crate::common::FeedRecord;

/// 📁 `[sink.file]`: where the NDJSON lands.
#[derive(Debug, Deserialize, Clone)]
pub struct FileSinkConfig {
    pub file_name: String,
}

/// 🚰 FileSink: one JSON document per line, indicators and enrichments alike.
///
/// ⚠️ `File::create` truncates. Every run starts with a fresh file.
#[derive(Debug)]
pub struct FileSink {
    file_buf: io::BufWriter<File>,
    config: FileSinkConfig,
}

impl FileSink {
    pub async fn new(config: FileSinkConfig) -> Result<Self> {
        let file_handle = File::create(&config.file_name).await.with_context(|| {
            format!(
                "💀 The sink file '{}' could not be conjured into existence. \
                 Does the parent directory exist? Do we have permission to write there?",
                config.file_name
            )
        })?;
        Ok(Self {
            file_buf: io::BufWriter::new(file_handle),
            config,
        })
    }
}

#[async_trait]
impl IndicatorSink for FileSink {
    async fn submit(&mut self, batch: &[FeedRecord]) -> Result<()> {
        trace!("📬 {} records walked into '{}'", batch.len(), self.config.file_name);
        let mut payload = String::new();
        for record in batch {
            payload.push_str(
                &serde_json::to_string(record).context("💀 A record refused to become JSON.")?,
            );
            payload.push('\n');
        }
        self.file_buf
            .write_all(payload.as_bytes())
            .await
            .with_context(|| format!("💀 Writing to '{}' failed mid-batch.", self.config.file_name))
    }

    /// 🗑️ Flush the BufWriter. Without this the last batch may never reach the disk.
    async fn close(&mut self) -> Result<()> {
        self.file_buf.flush().await.with_context(|| {
            format!(
                "💀 Error flushing '{}'. The bytes are still in memory, the disk remains unwritten.",
                self.config.file_name
            )
        })
    }
}
