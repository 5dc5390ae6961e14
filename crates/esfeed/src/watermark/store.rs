//! 💾 Watermark stores: the one piece of durable state, and where it sleeps at night.
//!
//! 🧠 Knowledge graph:
//! - `WatermarkStore`: `load()` once at cycle start, `store()` once after a successful cycle
//! - `FileWatermarkStore`: `{"time": <value>, "unit": "seconds"}` in a JSON file
//! - `InMemoryWatermarkStore`: an `Arc<Mutex<...>>` for tests and dry runs
//! - `StateBackend`: enum dispatch, same pattern as the scan and sink backends
//!
//! ⚠️ Nothing here coordinates two overlapping cycles. Run one at a time.
//! The scheduler is the adult in the room for that.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{TimeUnit, Watermark};

/// 🔖 Somewhere a watermark can be read from and written to.
#[async_trait]
pub trait WatermarkStore: std::fmt::Debug + Send + Sync {
    /// 📖 The last committed watermark, or `None` when this is the first cycle.
    async fn load(&self) -> Result<Option<Watermark>>;
    /// ✍️ Commit a new watermark. Only called after a cycle fully succeeded.
    async fn store(&self, watermark: &Watermark) -> Result<()>;
}

/// 📄 On-disk shape of the state file.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    time: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unit: Option<TimeUnit>,
}

/// 📁 Keeps the watermark in a small JSON file.
#[derive(Debug, Clone)]
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn load(&self) -> Result<Option<Watermark>> {
        let exists = tokio::fs::try_exists(&self.path).await.with_context(|| {
            format!("💀 Couldn't even check whether the state file '{}' exists.", self.path.display())
        })?;
        if !exists {
            debug!("🆕 no state file at '{}', first cycle it is", self.path.display());
            return Ok(None);
        }

        let raw = tokio::fs::read_to_string(&self.path).await.with_context(|| {
            format!("💀 The state file '{}' exists but refused to be read.", self.path.display())
        })?;

        // -- 🤷 a mangled state file is treated like no state file: we re-fetch the lookback window
        let state: PersistedState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    "⚠️ state file '{}' is not valid JSON ({}), falling back to the lookback window",
                    self.path.display(),
                    err
                );
                return Ok(None);
            }
        };
        let watermark = Watermark::from_persisted(&state.time, state.unit);
        if watermark.is_none() {
            warn!(
                "⚠️ state file '{}' holds a watermark we can't read ({}), falling back to the lookback window",
                self.path.display(),
                state.time
            );
        }
        Ok(watermark)
    }

    async fn store(&self, watermark: &Watermark) -> Result<()> {
        let (time, unit) = watermark.to_persisted();
        let body = serde_json::to_string(&PersistedState { time, unit })
            .context("💀 Failed to serialize the watermark. It was one number. ONE.")?;

        // -- 🔄 write-then-rename so a crash mid-write leaves the previous watermark intact
        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, body).await.with_context(|| {
            format!("💀 Couldn't write the staged state file '{}'.", staging.display())
        })?;
        tokio::fs::rename(&staging, &self.path).await.with_context(|| {
            format!(
                "💀 Couldn't move '{}' over '{}'. The old watermark is still in place.",
                staging.display(),
                self.path.display()
            )
        })?;
        debug!("💾 watermark {} committed to '{}'", watermark, self.path.display());
        Ok(())
    }
}

/// 🧠 A watermark that lives exactly as long as the process. Clone it, hand one copy
/// to the pipeline, keep one for your assertions.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWatermarkStore {
    inner: Arc<Mutex<Option<Watermark>>>,
}

impl InMemoryWatermarkStore {
    pub fn with_watermark(watermark: Watermark) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(watermark))),
        }
    }

    pub async fn current(&self) -> Option<Watermark> {
        *self.inner.lock().await
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn load(&self) -> Result<Option<Watermark>> {
        Ok(*self.inner.lock().await)
    }

    async fn store(&self, watermark: &Watermark) -> Result<()> {
        *self.inner.lock().await = Some(*watermark);
        Ok(())
    }
}

/// 🎭 The many homes of a watermark.
#[derive(Debug, Clone)]
pub enum StateBackend {
    File(FileWatermarkStore),
    InMemory(InMemoryWatermarkStore),
}

#[async_trait]
impl WatermarkStore for StateBackend {
    async fn load(&self) -> Result<Option<Watermark>> {
        match self {
            StateBackend::File(store) => store.load().await,
            StateBackend::InMemory(store) => store.load().await,
        }
    }

    async fn store(&self, watermark: &Watermark) -> Result<()> {
        match self {
            StateBackend::File(store) => store.store(watermark).await,
            StateBackend::InMemory(store) => store.store(watermark).await,
        }
    }
}
