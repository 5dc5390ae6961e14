//! 🧠 In-memory backends: a cluster and a sink that both fit in a `Vec`.
//!
//! The scan executor evaluates a `ScanSpec` locally with the same semantics the
//! rendered Elasticsearch query has, so pipeline tests exercise real filtering.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use crate::backends::{HitCursor, IndicatorSink, ProbeOutcome, ScanCursor, ScanExecutor};
use crate::common::{FeedRecord, RawHit};
use crate::errors::FeedError;
use crate::query::ScanSpec;

/// 📦 A pretend cluster: documents keyed by index name.
#[derive(Debug, Clone)]
pub struct InMemoryScanExecutor {
    documents: Vec<(String, RawHit)>,
    probe_status: u16,
    reachable: bool,
    /// 🔍 Every spec this executor was asked to run, for assertions.
    pub opened: Arc<Mutex<Vec<ScanSpec>>>,
}

impl Default for InMemoryScanExecutor {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            probe_status: 200,
            reachable: true,
            opened: Arc::default(),
        }
    }
}

impl InMemoryScanExecutor {
    pub fn new(documents: impl IntoIterator<Item = (String, RawHit)>) -> Self {
        Self {
            documents: documents.into_iter().collect(),
            ..Self::default()
        }
    }

    /// 🏓 Make the probe answer with this status.
    pub fn with_probe_status(mut self, status: u16) -> Self {
        self.probe_status = status;
        self
    }

    /// 🔌 Pull the network cable. Every call fails as if the host were down.
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(FeedError::connectivity("in-memory backend is unplugged").into())
        }
    }
}

#[async_trait]
impl ScanExecutor for InMemoryScanExecutor {
    async fn open_scan(&self, spec: &ScanSpec) -> Result<HitCursor> {
        self.check_reachable()?;
        self.opened.lock().await.push(spec.clone());
        let hits: VecDeque<RawHit> = self
            .documents
            .iter()
            .filter(|(index, hit)| spec.index_pattern.matches(index) && spec.matches(hit))
            .map(|(_, hit)| hit.clone())
            .collect();
        trace!("🧠 in-memory scan matched {} of {} documents", hits.len(), self.documents.len());
        Ok(HitCursor::InMemory(InMemoryCursor { hits }))
    }

    async fn probe(&self) -> Result<ProbeOutcome> {
        self.check_reachable()?;
        let status = self.probe_status;
        let error = (!(200..300).contains(&status)).then(|| format!("HTTP status {status}"));
        Ok(ProbeOutcome { status, error })
    }
}

/// 🚰 Hands out the matched hits one at a time.
#[derive(Debug, Default)]
pub struct InMemoryCursor {
    hits: VecDeque<RawHit>,
}

#[async_trait]
impl ScanCursor for InMemoryCursor {
    async fn next_hit(&mut self) -> Result<Option<RawHit>> {
        Ok(self.hits.pop_front())
    }

    async fn close(&mut self) {
        self.hits.clear();
    }
}

/// 📦 A sink that never forgets.
///
/// Each entry of `received` is one `submit` call, so tests can check batch sizes
/// as well as contents. Clone it before handing it off; the clones share storage.
#[derive(Debug, Default, Clone)]
pub struct InMemorySink {
    pub received: Arc<Mutex<Vec<Vec<FeedRecord>>>>,
    closed: Arc<AtomicBool>,
}

impl InMemorySink {
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.received.lock().await.iter().map(Vec::len).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndicatorSink for InMemorySink {
    async fn submit(&mut self, batch: &[FeedRecord]) -> Result<()> {
        self.received.lock().await.push(batch.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
