//! 🔎 Query builder: turns feed settings plus a time window into a `ScanSpec`.
//!
//! 🧠 Knowledge graph:
//! - `ScanSpec`: index pattern + optional time range + text query. Backend-agnostic.
//! - `TimeRange`: `(gt, lte]`. Exclusive lower bound, inclusive upper bound. Always.
//! - `to_query()`: the Elasticsearch rendering of a spec
//! - `matches()` / `IndexPattern::matches()`: the same semantics evaluated locally,
//!   for the in-memory scan executor
//! - No size limit lives here. The scan is unbounded and callers truncate. 🦆

use chrono::SecondsFormat;
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::common::RawHit;
use crate::feed::{FeedConfig, FeedType, TimeMethod, non_blank};
use crate::watermark::{Timestamp, parse_datetime};

/// 🌍 "Every index", in Elasticsearch speak.
pub const ALL_INDICES: &str = "_all";

/// 🏢 Every shared index across tenants.
const SHARED_INDICES: &str = "*-shared*";

/// ⏱️ The `(gt, lte]` window on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRange {
    pub field: String,
    /// `None` only when the caller has no lower bound at all.
    pub gt: Option<Timestamp>,
    pub lte: Timestamp,
    pub method: TimeMethod,
}

impl TimeRange {
    /// 🖨️ A bound as it goes over the wire: a number for epoch methods,
    /// an ISO-8601 UTC string for `simple_date`.
    pub fn render_bound(&self, bound: Timestamp) -> Value {
        match self.method {
            TimeMethod::TimestampSeconds | TimeMethod::TimestampMilliseconds => {
                Value::from(bound.to_unit(self.method.unit()).value())
            }
            TimeMethod::SimpleDate => match bound.to_datetime() {
                Some(at) => Value::from(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
                None => Value::from(bound.as_millis()),
            },
        }
    }

    /// 🎯 Does a raw field value fall inside the window?
    pub fn contains(&self, raw: &Value) -> bool {
        let Some(millis) = self.value_as_millis(raw) else {
            return false;
        };
        let above_lower = self.gt.is_none_or(|gt| millis > gt.as_millis());
        above_lower && millis <= self.lte.as_millis()
    }

    fn value_as_millis(&self, raw: &Value) -> Option<i64> {
        let unit = self.method.unit();
        match raw {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.floor() as i64))
                .map(|v| Timestamp::new(v, unit).as_millis()),
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(v) => Some(Timestamp::new(v, unit).as_millis()),
                Err(_) => parse_datetime(s.trim()).map(|at| at.timestamp_millis()),
            },
            _ => None,
        }
    }
}

/// 📝 The free-text half of the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextQuery {
    MatchAll,
    /// The named field has to be present (`field:*`).
    FieldExists(String),
}

impl TextQuery {
    pub fn query_string(&self) -> String {
        match self {
            TextQuery::MatchAll => "*".to_string(),
            TextQuery::FieldExists(field) => format!("{field}:*"),
        }
    }

    pub fn matches(&self, hit: &RawHit) -> bool {
        match self {
            TextQuery::MatchAll => true,
            TextQuery::FieldExists(field) => hit.get(field).is_some_and(|v| !v.is_null()),
        }
    }
}

/// 🗂️ A comma-separated list of index globs. A leading `-` excludes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPattern(String);

impl IndexPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 🎯 Would Elasticsearch route a search on this pattern to `index`?
    pub fn matches(&self, index: &str) -> bool {
        let mut included = false;
        for part in self.0.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.strip_prefix('-') {
                Some(excluded) if glob_matches(excluded, index) => return false,
                Some(_) => {}
                None if part == ALL_INDICES || glob_matches(part, index) => included = true,
                None => {}
            }
        }
        included
    }
}

fn glob_matches(pattern: &str, candidate: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == candidate,
        Some((prefix, rest)) => {
            let Some(tail) = candidate.strip_prefix(prefix) else {
                return false;
            };
            if rest.is_empty() {
                return true;
            }
            // -- 🔁 try every split point for the remaining glob
            tail.char_indices()
                .map(|(i, _)| i)
                .chain(std::iter::once(tail.len()))
                .any(|i| glob_matches(rest, &tail[i..]))
        }
    }
}

/// 📜 Everything a scan executor needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSpec {
    pub index_pattern: IndexPattern,
    pub time_range: Option<TimeRange>,
    pub text_query: TextQuery,
}

impl ScanSpec {
    /// 📡 The `query` part of an Elasticsearch search body.
    pub fn to_query(&self) -> Value {
        let query_string = json!({ "query_string": { "query": self.text_query.query_string() } });
        match &self.time_range {
            None => query_string,
            Some(range) => {
                let mut bounds = Map::new();
                if let Some(gt) = range.gt {
                    bounds.insert("gt".into(), range.render_bound(gt));
                }
                bounds.insert("lte".into(), range.render_bound(range.lte));
                let mut on_field = Map::new();
                on_field.insert(range.field.clone(), Value::Object(bounds));
                json!({
                    "bool": {
                        "must": [query_string],
                        "filter": [{ "range": on_field }],
                    }
                })
            }
        }
    }

    /// 🎯 Local evaluation of the query, same semantics as the rendered one.
    pub fn matches(&self, hit: &RawHit) -> bool {
        if !self.text_query.matches(hit) {
            return false;
        }
        match &self.time_range {
            None => true,
            Some(range) => hit.get(&range.field).is_some_and(|raw| range.contains(raw)),
        }
    }
}

/// 🏗️ Builds scan specs for one feed configuration.
#[derive(Debug, Clone)]
pub struct QueryBuilder<'a> {
    feed: &'a FeedConfig,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(feed: &'a FeedConfig) -> Self {
        Self { feed }
    }

    /// 🗂️ The configured pattern, or the mode's default.
    pub fn index_pattern(&self) -> IndexPattern {
        if let Some(index) = non_blank(&self.feed.fetch_index) {
            return IndexPattern::new(index);
        }
        match (self.feed.feed_type, non_blank(&self.feed.tenant_hash)) {
            (FeedType::InsightMultiTenant, Some(hash)) => {
                IndexPattern::new(format!("{SHARED_INDICES},-*{hash}*{SHARED_INDICES}"))
            }
            (FeedType::InsightMultiTenant, None) => {
                warn!("🏢 no tenant_hash configured, scanning every shared index including our own");
                IndexPattern::new(SHARED_INDICES)
            }
            _ => IndexPattern::new(ALL_INDICES),
        }
    }

    /// 📜 A spec for the window `(lower, now]`.
    ///
    /// Without a time field (generic mode only) the window is ignored and every document matches.
    pub fn build(&self, lower: Option<Timestamp>, now: Timestamp) -> ScanSpec {
        let method = self.feed.effective_time_method();
        let (time_range, text_query) = match self.feed.effective_time_field() {
            Some(field) => (
                Some(TimeRange {
                    field: field.to_string(),
                    gt: lower,
                    lte: now,
                    method,
                }),
                TextQuery::FieldExists(field.to_string()),
            ),
            None => (None, TextQuery::MatchAll),
        };
        ScanSpec {
            index_pattern: self.index_pattern(),
            time_range,
            text_query,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watermark::TimeUnit;

    fn generic(time_field: Option<&str>, method: TimeMethod) -> FeedConfig {
        FeedConfig {
            feed_type: FeedType::Generic,
            time_field: time_field.map(str::to_string),
            time_method: Some(method),
            src_val: Some("indicator".into()),
            default_type: Some("IP".into()),
            ..FeedConfig::default()
        }
    }

    fn secs(v: i64) -> Timestamp {
        Timestamp::new(v, TimeUnit::Seconds)
    }

    #[test]
    fn the_one_where_the_lower_bound_is_out_and_now_is_in() {
        let feed = generic(Some("seen"), TimeMethod::TimestampSeconds);
        let spec = QueryBuilder::new(&feed).build(Some(secs(100)), secs(200));
        let at = |v: i64| RawHit::from_value(json!({ "seen": v }));

        assert!(!spec.matches(&at(100)), "exactly at the lower bound is excluded");
        assert!(spec.matches(&at(101)));
        assert!(spec.matches(&at(200)), "exactly at now is included");
        assert!(!spec.matches(&at(201)));
        assert!(!spec.matches(&RawHit::from_value(json!({ "other": 150 }))));
    }

    #[test]
    fn the_one_where_the_range_goes_over_the_wire() {
        let feed = generic(Some("@timestamp"), TimeMethod::TimestampMilliseconds);
        let spec = QueryBuilder::new(&feed).build(Some(secs(100)), secs(200));
        assert_eq!(
            spec.to_query(),
            json!({
                "bool": {
                    "must": [{ "query_string": { "query": "@timestamp:*" } }],
                    "filter": [{ "range": { "@timestamp": { "gt": 100_000, "lte": 200_000 } } }],
                }
            })
        );
        assert_eq!(spec.index_pattern.as_str(), ALL_INDICES);
    }

    #[test]
    fn the_one_where_no_time_field_means_everything() {
        let feed = generic(None, TimeMethod::TimestampSeconds);
        let spec = QueryBuilder::new(&feed).build(Some(secs(100)), secs(200));
        assert_eq!(spec.time_range, None);
        assert_eq!(spec.to_query(), json!({ "query_string": { "query": "*" } }));
        assert!(spec.matches(&RawHit::from_value(json!({ "whatever": 1 }))));
    }

    #[test]
    fn the_one_where_insight_dates_are_compared_as_dates() {
        let feed = FeedConfig {
            feed_type: FeedType::Insight,
            ..FeedConfig::default()
        };
        let lower = Timestamp::new(1_714_564_800_000, TimeUnit::Milliseconds); // 2024-05-01T12:00:00Z
        let now = Timestamp::new(1_714_568_400_000, TimeUnit::Milliseconds); // 13:00:00Z
        let spec = QueryBuilder::new(&feed).build(Some(lower), now);

        let range = spec.time_range.clone().expect("insight feeds always filter on time");
        assert_eq!(range.field, "calculatedTime");
        assert_eq!(range.render_bound(lower), json!("2024-05-01T12:00:00.000Z"));

        let at = |s: &str| RawHit::from_value(json!({ "calculatedTime": s, "name": "x" }));
        assert!(!spec.matches(&at("2024-05-01T12:00:00Z")));
        assert!(spec.matches(&at("2024-05-01T12:30:00.123456")));
        assert!(spec.matches(&at("2024-05-01T13:00:00+00:00")));
        assert!(!spec.matches(&at("2024-05-01T13:00:01Z")));
    }

    #[test]
    fn the_one_where_a_tenant_skips_its_own_shared_index() {
        let feed = FeedConfig {
            feed_type: FeedType::InsightMultiTenant,
            tenant_hash: Some("a1b2c3".into()),
            ..FeedConfig::default()
        };
        let pattern = QueryBuilder::new(&feed).index_pattern();
        assert_eq!(pattern.as_str(), "*-shared*,-*a1b2c3*-shared*");
        assert!(pattern.matches("tenant-ffee99-shared-indicators"));
        assert!(!pattern.matches("tenant-a1b2c3-shared-indicators"));
        assert!(!pattern.matches("tenant-ffee99-private"));
    }

    #[test]
    fn the_one_where_an_unknown_tenant_still_stays_in_the_shared_indices() {
        let feed = FeedConfig {
            feed_type: FeedType::InsightMultiTenant,
            ..FeedConfig::default()
        };
        let pattern = QueryBuilder::new(&feed).index_pattern();
        assert_eq!(pattern.as_str(), "*-shared*");
        assert!(pattern.matches("tenant-a1b2c3-shared-indicators"));
        assert!(!pattern.matches("tenant-a1b2c3-private"));
    }

    #[test]
    fn the_one_where_an_explicit_index_wins_over_every_default() {
        let feed = FeedConfig {
            feed_type: FeedType::InsightMultiTenant,
            tenant_hash: Some("a1b2c3".into()),
            fetch_index: Some("threats-*".into()),
            ..FeedConfig::default()
        };
        let pattern = QueryBuilder::new(&feed).index_pattern();
        assert_eq!(pattern.as_str(), "threats-*");
        assert!(pattern.matches("threats-2024"));
        assert!(!pattern.matches("logs-2024"));
        assert!(IndexPattern::new(ALL_INDICES).matches("anything-at-all"));
    }
}
