//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 Scan executors pour hits out of a search cluster, sinks swallow indicators.
//! Everything between them is pure functions and a bit of bookkeeping.
//!
//! 🧠 Knowledge graph:
//! - `ScanExecutor`: `open_scan(spec)` → a `HitCursor`, plus the lightweight `probe()`
//! - `ScanCursor`: `next_hit()` → `Some(hit)` until the backend runs dry, then `None`.
//!   No rewinding, no total count up front. `close()` lets go early.
//! - `IndicatorSink`: `submit(batch)` and `close()`. Callers keep batches at or under 2000.
//! - `ScanBackend`, `HitCursor`, `SinkBackend`: enum dispatch, so nothing upstream cares
//!   whether the hits come from a cluster or a `Vec`.
//!
//! 🦆 The duck is here because every file must have one.

use anyhow::Result;
use async_trait::async_trait;

use crate::app_config::SinkConfig;
use crate::common::{FeedRecord, RawHit};
use crate::query::ScanSpec;

pub mod elasticsearch;
pub mod file;
pub mod http;
pub mod in_mem;

pub use elasticsearch::{ElasticsearchConfig, ElasticsearchCursor, ElasticsearchScanExecutor};
pub use file::{FileSink, FileSinkConfig};
pub use http::{HttpSink, HttpSinkConfig};
pub use in_mem::{InMemoryCursor, InMemoryScanExecutor, InMemorySink};

// ===== Scan side =====

/// 📡 What a reachability probe came back with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: u16,
    /// The HTTP layer's own description of a failing status. `None` on success.
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 🔎 Something that can run a `ScanSpec` and answer a ping.
///
/// # Contract
/// - `open_scan` issues the first request and fails fast on connectivity or status errors
/// - each call to `open_scan` starts a fresh scan from the top
/// - `probe` reports a status; only an unreachable backend is an `Err`
#[async_trait]
pub trait ScanExecutor: std::fmt::Debug + Send + Sync {
    async fn open_scan(&self, spec: &ScanSpec) -> Result<HitCursor>;
    async fn probe(&self) -> Result<ProbeOutcome>;
}

/// 🚰 A lazy, forward-only stream of hits.
#[async_trait]
pub trait ScanCursor: std::fmt::Debug + Send {
    /// 📦 The next hit, or `None` once the backend reports no more matches.
    async fn next_hit(&mut self) -> Result<Option<RawHit>>;

    /// 🗑️ Release whatever the backend holds for this scan. Best effort, safe to call twice.
    async fn close(&mut self);
}

/// 🎭 The scan executors we know how to build.
#[derive(Debug)]
pub enum ScanBackend {
    Elasticsearch(ElasticsearchScanExecutor),
    InMemory(InMemoryScanExecutor),
}

#[async_trait]
impl ScanExecutor for ScanBackend {
    async fn open_scan(&self, spec: &ScanSpec) -> Result<HitCursor> {
        match self {
            ScanBackend::Elasticsearch(es) => es.open_scan(spec).await,
            ScanBackend::InMemory(mem) => mem.open_scan(spec).await,
        }
    }

    async fn probe(&self) -> Result<ProbeOutcome> {
        match self {
            ScanBackend::Elasticsearch(es) => es.probe().await,
            ScanBackend::InMemory(mem) => mem.probe().await,
        }
    }
}

/// 🎭 Cursor dispatch, mirrors `ScanBackend`.
#[derive(Debug)]
pub enum HitCursor {
    Elasticsearch(ElasticsearchCursor),
    InMemory(InMemoryCursor),
}

#[async_trait]
impl ScanCursor for HitCursor {
    async fn next_hit(&mut self) -> Result<Option<RawHit>> {
        match self {
            HitCursor::Elasticsearch(es) => es.next_hit().await,
            HitCursor::InMemory(mem) => mem.next_hit().await,
        }
    }

    async fn close(&mut self) {
        match self {
            HitCursor::Elasticsearch(es) => es.close().await,
            HitCursor::InMemory(mem) => mem.close().await,
        }
    }
}

// ===== Sink side =====

/// 🕳️ Where indicators and enrichment entries end up.
///
/// # Contract
/// - `submit` gets at most 2000 records per call and either takes all of them or fails
/// - `close` flushes whatever is buffered. MUST be called. Skipping it is a bug.
#[async_trait]
pub trait IndicatorSink: std::fmt::Debug + Send {
    async fn submit(&mut self, batch: &[FeedRecord]) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// 🎭 The sinks we know how to build.
#[derive(Debug)]
pub enum SinkBackend {
    File(FileSink),
    Http(HttpSink),
    InMemory(InMemorySink),
}

impl SinkBackend {
    /// 🚀 Build the configured sink. The file sink creates (and truncates) its file here.
    pub async fn open(config: &SinkConfig) -> Result<Self> {
        Ok(match config {
            SinkConfig::File(file) => SinkBackend::File(FileSink::new(file.clone()).await?),
            SinkConfig::Http(http) => SinkBackend::Http(HttpSink::new(http.clone())?),
            SinkConfig::InMemory => SinkBackend::InMemory(InMemorySink::default()),
        })
    }
}

#[async_trait]
impl IndicatorSink for SinkBackend {
    async fn submit(&mut self, batch: &[FeedRecord]) -> Result<()> {
        match self {
            SinkBackend::File(f) => f.submit(batch).await,
            SinkBackend::Http(h) => h.submit(batch).await,
            SinkBackend::InMemory(m) => m.submit(batch).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            SinkBackend::File(f) => f.close().await,
            SinkBackend::Http(h) => h.close().await,
            SinkBackend::InMemory(m) => m.close().await,
        }
    }
}
