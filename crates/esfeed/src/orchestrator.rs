//! 🎼 The fetch orchestrator: one scan, start to finish, per invocation.
//!
//! 🎬 *[the scheduler knocks. the orchestrator opens one eye.]*
//! *["what time is it?" it asks. "and where did I leave off?"]*
//!
//! 🧠 Knowledge graph:
//! - `test_connection`: validate, build the `ScanSpec`, probe. Never scans.
//! - `list_indicators`: everything up to now, no lower bound, no watermark, truncated in insight mode
//! - `fetch_cycle`: `CycleInput` in, `CycleResult` out. The new watermark is part of the
//!   result; persisting it is the caller's job, and only after this returns `Ok`.
//! - Stages walk `Idle → QueryBuilt → Scanning → Translating → Splitting → Batching →
//!   Submitted`, and the caller finishes with `WatermarkPersisted`. Each step logs at debug.
//! - Any error aborts. No retries, no partial credit. 🦆

use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::backends::{IndicatorSink, ScanCursor, ScanExecutor};
use crate::common::{EnrichmentGroup, FeedRecord, IndicatorRecord, RawDocument};
use crate::enrichment::{chunks, rebatch};
use crate::errors::FeedError;
use crate::feed::{FeedConfig, non_blank};
use crate::query::{QueryBuilder, ScanSpec};
use crate::render::{enrichment_tables, indicators_table};
use crate::translate::{split, translate};
use crate::watermark::{Timestamp, Watermark, resolve};

/// 🚦 Where a cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Idle,
    QueryBuilt,
    Scanning,
    Translating,
    Splitting,
    Batching,
    Submitted,
    WatermarkPersisted,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub(crate) fn enter(stage: CycleStage) {
    debug!("🚦 stage → {}", stage);
}

/// 📥 Everything a fetch cycle needs from outside.
#[derive(Debug, Clone, Copy)]
pub struct CycleInput {
    /// The last committed watermark, if any.
    pub persisted: Option<Watermark>,
    /// Invocation time. Becomes the upper bound and the new watermark.
    pub started_at: DateTime<Utc>,
}

/// 📤 What a successful cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleResult {
    pub lower_bound: Timestamp,
    pub indicators: usize,
    pub enrichment_entries: usize,
    pub enrichment_batches: usize,
    /// Number of `submit` calls made, indicators and enrichments together.
    pub sink_calls: usize,
    pub new_watermark: Watermark,
}

/// 📋 Result of an interactive listing.
#[derive(Debug, Clone)]
pub struct IndicatorListing {
    pub indicators: Vec<IndicatorRecord>,
    pub enrichment_groups: Vec<EnrichmentGroup>,
    /// Markdown tables, ready to print.
    pub table: String,
}

/// 🧺 Output of scan + translate + split.
#[derive(Debug, Default)]
struct Collected {
    indicators: Vec<IndicatorRecord>,
    enrichment_groups: Vec<EnrichmentGroup>,
}

/// 🎼 Runs the three commands for one feed against one scan executor.
#[derive(Debug)]
pub struct FetchOrchestrator<'a, E> {
    feed: &'a FeedConfig,
    executor: &'a E,
}

impl<'a, E: ScanExecutor> FetchOrchestrator<'a, E> {
    pub fn new(feed: &'a FeedConfig, executor: &'a E) -> Self {
        Self { feed, executor }
    }

    fn validate(&self) -> Result<()> {
        let errors = self.feed.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(FeedError::Configuration(errors).into())
        }
    }

    /// 📜 Spec for `(lower, now]`, where `lower` comes from the watermark or the lookback.
    fn spec_for(&self, persisted: Option<&Watermark>, now: DateTime<Utc>) -> (Timestamp, ScanSpec) {
        let unit = self.feed.effective_time_method().unit();
        let lower = resolve(persisted, unit, &self.feed.lookback(), now);
        let spec = QueryBuilder::new(self.feed).build(Some(lower), Timestamp::from_datetime(now, unit));
        enter(CycleStage::QueryBuilt);
        (lower, spec)
    }

    /// 🏓 Config check plus a reachability probe.
    pub async fn test_connection(&self, now: DateTime<Utc>) -> Result<()> {
        self.validate()?;
        let (_, spec) = self.spec_for(None, now);
        debug!("🔎 would scan '{}' with {}", spec.index_pattern.as_str(), spec.to_query());

        let outcome = self.executor.probe().await?;
        if outcome.is_success() {
            info!("✅ backend answered {}", outcome.status);
            return Ok(());
        }
        let raw = outcome
            .error
            .unwrap_or_else(|| format!("HTTP status {}", outcome.status));
        Err(FeedError::from_status(outcome.status, raw).into())
    }

    /// 🚰 Pull hits until the cursor runs dry, or until `limit` indicators were kept.
    async fn collect(&self, spec: &ScanSpec, limit: Option<usize>) -> Result<Collected> {
        let insight = self.feed.feed_type.is_insight();
        let rules = self.feed.translate_rules();
        let mut cursor = self.executor.open_scan(spec).await?;
        enter(CycleStage::Scanning);

        let mut collected = Collected::default();
        let mut hits = 0usize;
        let mut splitting = false;
        while let Some(hit) = cursor.next_hit().await? {
            hits += 1;
            if hits == 1 {
                enter(CycleStage::Translating);
            }
            let doc = if insight {
                RawDocument::Insight(hit)
            } else {
                RawDocument::Generic(hit)
            };
            let Some(record) = translate(doc, &rules) else {
                continue;
            };
            if insight && !splitting {
                splitting = true;
                enter(CycleStage::Splitting);
            }
            let (record, enrichments) = split(record);
            if !enrichments.is_empty() {
                collected.enrichment_groups.push(enrichments);
            }
            collected.indicators.push(record);
            if limit.is_some_and(|limit| collected.indicators.len() >= limit) {
                debug!("✂️ limit of {} indicators reached", collected.indicators.len());
                break;
            }
        }
        cursor.close().await;
        debug!(
            "📦 {} hits → {} indicators, {} enrichment groups",
            hits,
            collected.indicators.len(),
            collected.enrichment_groups.len()
        );
        Ok(collected)
    }

    /// 📋 Interactive listing. Never reads or writes the watermark, and has no lower bound.
    ///
    /// `limit` (default: the feed's configured limit) only applies to insight feeds.
    pub async fn list_indicators(&self, limit: Option<usize>, now: DateTime<Utc>) -> Result<IndicatorListing> {
        self.validate()?;
        let unit = self.feed.effective_time_method().unit();
        let spec = QueryBuilder::new(self.feed).build(None, Timestamp::from_datetime(now, unit));
        enter(CycleStage::QueryBuilt);
        let insight = self.feed.feed_type.is_insight();
        let limit = insight.then(|| limit.unwrap_or(self.feed.limit));
        let collected = self.collect(&spec, limit).await?;

        let table = if insight {
            let mut table = indicators_table(&collected.indicators, "Name", true);
            let enrichments = enrichment_tables(&collected.enrichment_groups);
            if !enrichments.is_empty() {
                table.push('\n');
                table.push_str(&enrichments);
            }
            table
        } else {
            let header = non_blank(&self.feed.src_val).unwrap_or("value");
            indicators_table(&collected.indicators, header, false)
        };

        Ok(IndicatorListing {
            indicators: collected.indicators,
            enrichment_groups: collected.enrichment_groups,
            table,
        })
    }

    /// 🔁 One scheduled cycle. The sink is closed before this returns, success or not.
    pub async fn fetch_cycle<K>(&self, input: CycleInput, sink: &mut K) -> Result<CycleResult>
    where
        K: IndicatorSink + ?Sized,
    {
        enter(CycleStage::Idle);
        self.validate()?;
        let (lower_bound, spec) = self.spec_for(input.persisted.as_ref(), input.started_at);
        info!(
            "🔁 fetch cycle on '{}' from {} (exclusive) to {}",
            spec.index_pattern.as_str(),
            lower_bound.value(),
            input.started_at.to_rfc3339()
        );

        let submitted = self.collect_and_submit(&spec, sink).await;
        let closed = sink.close().await.context("💀 The sink refused to close cleanly.");
        let (indicators, enrichment_entries, enrichment_batches, sink_calls) = submitted?;
        closed?;
        enter(CycleStage::Submitted);

        let unit = self.feed.effective_time_method().unit();
        let result = CycleResult {
            lower_bound,
            indicators,
            enrichment_entries,
            enrichment_batches,
            sink_calls,
            new_watermark: Watermark::Epoch(Timestamp::from_datetime(input.started_at, unit)),
        };
        info!(
            "✅ cycle done: {} indicators, {} enrichment entries in {} batches, {} sink calls",
            result.indicators, result.enrichment_entries, result.enrichment_batches, result.sink_calls
        );
        Ok(result)
    }

    async fn collect_and_submit<K>(&self, spec: &ScanSpec, sink: &mut K) -> Result<(usize, usize, usize, usize)>
    where
        K: IndicatorSink + ?Sized,
    {
        let collected = self.collect(spec, None).await?;
        enter(CycleStage::Batching);

        let mut sink_calls = 0usize;
        let indicators: Vec<FeedRecord> = collected.indicators.into_iter().map(FeedRecord::from).collect();
        for chunk in chunks(&indicators) {
            sink.submit(chunk)
                .await
                .with_context(|| format!("💀 The sink rejected a batch of {} indicators.", chunk.len()))?;
            sink_calls += 1;
        }

        let batches = rebatch(&collected.enrichment_groups);
        let mut enrichment_entries = 0usize;
        for batch in &batches {
            let records: Vec<FeedRecord> = batch.iter().cloned().map(FeedRecord::from).collect();
            enrichment_entries += records.len();
            for chunk in chunks(&records) {
                sink.submit(chunk)
                    .await
                    .with_context(|| format!("💀 The sink rejected a batch of {} enrichments.", chunk.len()))?;
                sink_calls += 1;
            }
        }
        Ok((indicators.len(), enrichment_entries, batches.len(), sink_calls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryScanExecutor, InMemorySink, ScanBackend};
    use crate::common::RawHit;
    use crate::feed::{FeedType, TimeMethod};
    use crate::watermark::TimeUnit;
    use chrono::TimeZone;
    use serde_json::json;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid date")
    }

    fn generic_feed() -> FeedConfig {
        FeedConfig {
            feed_type: FeedType::Generic,
            time_field: Some("seen".into()),
            time_method: Some(TimeMethod::TimestampSeconds),
            src_val: Some("ip".into()),
            default_type: Some("IP".into()),
            ..FeedConfig::default()
        }
    }

    fn generic_hits(count: usize, seen: i64) -> Vec<(String, RawHit)> {
        (0..count)
            .map(|i| {
                let hit = RawHit::from_value(json!({ "ip": format!("10.0.{}.{}", i / 256, i % 256), "seen": seen }));
                ("threats".to_string(), hit)
            })
            .collect()
    }

    fn insight_hit(name: &str, enrichments: usize) -> (String, RawHit) {
        let mut modules = serde_json::Map::new();
        modules.insert("Feed.f".into(), json!({ "isEnrichment": false }));
        for i in 0..enrichments {
            modules.insert(
                format!("Enricher{i}.e"),
                json!({ "isEnrichment": true, "value": name, "sourceBrand": format!("Enricher{i}"), "score": i }),
            );
        }
        let hit = RawHit::from_value(json!({
            "name": name,
            "calculatedTime": "2024-05-01T11:00:00Z",
            "moduleToFeedMap": modules,
        }));
        ("tenant-shared-1".to_string(), hit)
    }

    #[tokio::test]
    async fn the_one_where_4500_indicators_take_three_sink_calls() -> Result<()> {
        let now = noon();
        let executor = InMemoryScanExecutor::new(generic_hits(4500, now.timestamp() - 60));
        let feed = generic_feed();
        let sink = InMemorySink::default();
        let mut handed_off = sink.clone();

        let result = FetchOrchestrator::new(&feed, &executor)
            .fetch_cycle(CycleInput { persisted: None, started_at: now }, &mut handed_off)
            .await?;

        assert_eq!(sink.batch_sizes().await, vec![2000, 2000, 500]);
        assert!(sink.is_closed());
        assert_eq!(result.indicators, 4500);
        assert_eq!(result.sink_calls, 3);
        assert_eq!(
            result.new_watermark,
            Watermark::Epoch(Timestamp::new(now.timestamp(), TimeUnit::Seconds))
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_watermark_keeps_old_hits_out() -> Result<()> {
        let now = noon();
        let mut docs = generic_hits(2, now.timestamp() - 10);
        docs.extend(generic_hits(3, now.timestamp() - 1000));
        let executor = InMemoryScanExecutor::new(docs);
        let feed = generic_feed();
        let mut sink = InMemorySink::default();

        let persisted = Watermark::Epoch(Timestamp::new(now.timestamp() - 100, TimeUnit::Seconds));
        let result = FetchOrchestrator::new(&feed, &executor)
            .fetch_cycle(CycleInput { persisted: Some(persisted), started_at: now }, &mut sink)
            .await?;
        assert_eq!(result.indicators, 2);
        assert_eq!(result.lower_bound.value(), now.timestamp() - 100);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_enrichments_are_dealt_without_collisions() -> Result<()> {
        let executor = InMemoryScanExecutor::new([insight_hit("a", 3), insight_hit("b", 1), insight_hit("c", 2), insight_hit("d", 0)]);
        let feed = FeedConfig {
            feed_type: FeedType::Insight,
            ..FeedConfig::default()
        };
        let sink = InMemorySink::default();
        let mut handed_off = sink.clone();

        let result = FetchOrchestrator::new(&feed, &executor)
            .fetch_cycle(CycleInput { persisted: None, started_at: noon() }, &mut handed_off)
            .await?;

        assert_eq!(result.indicators, 4);
        assert_eq!(result.enrichment_entries, 6);
        assert_eq!(result.enrichment_batches, 3);
        assert_eq!(sink.batch_sizes().await, vec![4, 3, 2, 1]);

        let received = sink.received.lock().await;
        for record in &received[0] {
            let FeedRecord::Indicator(indicator) = record else {
                panic!("💀 first batch should be indicators only");
            };
            let modules = indicator.module_to_feed_map.as_ref().expect("insight map survives");
            assert!(modules.values().all(|entry| !entry.is_enrichment()));
        }
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_scan_failure_still_closes_the_sink() -> Result<()> {
        let executor = InMemoryScanExecutor::default().unreachable();
        let feed = generic_feed();
        let sink = InMemorySink::default();
        let mut handed_off = sink.clone();

        let err = FetchOrchestrator::new(&feed, &executor)
            .fetch_cycle(CycleInput { persisted: None, started_at: noon() }, &mut handed_off)
            .await
            .expect_err("unreachable backend must fail the cycle");
        assert!(matches!(err.downcast_ref::<FeedError>(), Some(FeedError::Connectivity { .. })));
        assert!(sink.is_closed());
        assert!(sink.received.lock().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_bad_config_never_touches_the_network() -> Result<()> {
        let executor = InMemoryScanExecutor::default();
        let feed = FeedConfig::default();
        let err = FetchOrchestrator::new(&feed, &executor)
            .test_connection(noon())
            .await
            .expect_err("generic feed without fields is invalid");
        assert!(matches!(err.downcast_ref::<FeedError>(), Some(FeedError::Configuration(_))));
        assert!(executor.opened.lock().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_probe_status_decides_the_verdict() -> Result<()> {
        let feed = generic_feed();

        let ok = InMemoryScanExecutor::default();
        FetchOrchestrator::new(&feed, &ok).test_connection(noon()).await?;

        let denied = InMemoryScanExecutor::default().with_probe_status(401);
        let err = FetchOrchestrator::new(&feed, &denied)
            .test_connection(noon())
            .await
            .expect_err("401 is a failure");
        assert_eq!(
            err.to_string(),
            "Failed to connect. The following error occurred: 401 Unauthorized - Incorrect or invalid username or password"
        );

        let teapot = InMemoryScanExecutor::default().with_probe_status(418);
        let err = FetchOrchestrator::new(&feed, &teapot)
            .test_connection(noon())
            .await
            .expect_err("418 is a failure");
        assert_eq!(err.to_string(), "Failed to connect. The following error occurred: HTTP status 418");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_listing_stops_at_the_limit_in_insight_mode() -> Result<()> {
        let hits: Vec<_> = (0..10).map(|i| insight_hit(&format!("host{i}.example"), 1)).collect();
        let executor = InMemoryScanExecutor::new(hits);
        let feed = FeedConfig {
            feed_type: FeedType::Insight,
            ..FeedConfig::default()
        };

        let listing = FetchOrchestrator::new(&feed, &executor)
            .list_indicators(Some(4), noon())
            .await?;
        assert_eq!(listing.indicators.len(), 4);
        assert_eq!(listing.enrichment_groups.len(), 4);
        assert!(listing.table.contains("### Indicators"));
        assert!(listing.table.contains("### Enrichment"));
        assert!(listing.table.contains("host3.example"));
        assert!(!listing.table.contains("host4.example"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_generic_listings_ignore_the_limit() -> Result<()> {
        let executor = InMemoryScanExecutor::new(generic_hits(7, noon().timestamp() - 60));
        let feed = generic_feed();
        let listing = FetchOrchestrator::new(&feed, &executor)
            .list_indicators(Some(2), noon())
            .await?;
        assert_eq!(listing.indicators.len(), 7);
        assert!(listing.table.contains("ip"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_listing_reaches_past_the_lookback() -> Result<()> {
        let ancient = RawHit::from_value(json!({ "name": "old.example", "calculatedTime": "2024-01-01T00:00:00Z" }));
        let executor = InMemoryScanExecutor::new([("tenant-shared-1".to_string(), ancient)]);
        let feed = FeedConfig {
            feed_type: FeedType::Insight,
            ..FeedConfig::default()
        };

        let listing = FetchOrchestrator::new(&feed, &executor)
            .list_indicators(None, noon())
            .await?;
        assert_eq!(listing.indicators.len(), 1);
        assert!(listing.table.contains("old.example"));

        let opened = executor.opened.lock().await;
        let range = opened[0].time_range.as_ref().expect("insight feeds always filter on time");
        assert_eq!(range.gt, None);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_unlimited_listing_falls_back_to_the_feed_limit() -> Result<()> {
        let hits: Vec<_> = (0..60).map(|i| insight_hit(&format!("host{i}.example"), 0)).collect();
        let executor = ScanBackend::InMemory(InMemoryScanExecutor::new(hits));
        let feed = FeedConfig {
            feed_type: FeedType::Insight,
            ..FeedConfig::default()
        };

        let listing = FetchOrchestrator::new(&feed, &executor)
            .list_indicators(None, noon())
            .await?;
        assert_eq!(listing.indicators.len(), 50);

        let tighter = FeedConfig { limit: 7, ..feed };
        let listing = FetchOrchestrator::new(&tighter, &executor)
            .list_indicators(None, noon())
            .await?;
        assert_eq!(listing.indicators.len(), 7);
        Ok(())
    }
}
