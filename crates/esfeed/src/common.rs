//! 📦 Common data structures: the building blocks of esfeed.
//!
//! 🎬 COLD OPEN: INT. SEARCH CLUSTER, 3:47 AM
//!
//! A document sits in an index. It does not know it is a threat indicator.
//! It thinks it is just some JSON with a `name` and a `calculatedTime`.
//! Then the scroll cursor finds it. Its life is about to get a lot more structured.
//!
//! 🧠 Knowledge graph:
//! - `RawHit`: the `_source` of one backend document, read-only, shape unknown
//! - `RawDocument`: a `RawHit` tagged with the feed format it came from
//! - `IndicatorRecord`: the normalized output unit, what the sink actually eats
//! - `ModuleEntry`: one value of an insight hit's `moduleToFeedMap`, opaque except for `isEnrichment`
//! - `FeedRecord`: what a sink batch is made of (indicators, or enrichment entries)
//!
//! 🦆

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 🗺️ The key an insight hit keeps its per-module data under.
pub const MODULE_TO_FEED_MAP_KEY: &str = "moduleToFeedMap";

/// 🎯 One document as the backend handed it to us. Free-form. Unjudged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawHit {
    fields: Map<String, Value>,
}

impl RawHit {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// 🔧 Build a hit out of a `json!({...})` literal. Anything that isn't an object
    /// becomes an empty hit, which the translator will then politely discard.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self { fields },
            _ => Self::default(),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

/// 🎭 A hit, tagged with the format it is supposed to follow.
///
/// Generic hits have whatever field names the operator configured. Insight hits
/// follow the fixed schema and may carry a `moduleToFeedMap`.
#[derive(Debug, Clone, PartialEq)]
pub enum RawDocument {
    Generic(RawHit),
    Insight(RawHit),
}

impl RawDocument {
    pub fn hit(&self) -> &RawHit {
        match self {
            RawDocument::Generic(hit) | RawDocument::Insight(hit) => hit,
        }
    }

    pub fn into_hit(self) -> RawHit {
        match self {
            RawDocument::Generic(hit) | RawDocument::Insight(hit) => hit,
        }
    }

    /// 📝 Read a field as indicator text. Non-empty strings and numbers count,
    /// everything else (null, "", bools, arrays, objects) is "not there".
    pub fn text(&self, field: &str) -> Option<String> {
        match self.hit().get(field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// 🗺️ The per-module map, insight hits only. Generic hits never have one,
    /// even if a field happens to share the name.
    pub fn module_to_feed_map(&self) -> Option<BTreeMap<String, ModuleEntry>> {
        match self {
            RawDocument::Generic(_) => None,
            RawDocument::Insight(hit) => match hit.get(MODULE_TO_FEED_MAP_KEY)? {
                Value::Object(modules) => Some(
                    modules
                        .iter()
                        .map(|(key, entry)| (key.clone(), ModuleEntry::new(entry.clone())))
                        .collect(),
                ),
                _ => None,
            },
        }
    }
}

/// 🧩 One module's contribution to an insight indicator.
///
/// Opaque: the only thing we ever look at is `isEnrichment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleEntry(Value);

impl ModuleEntry {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn is_enrichment(&self) -> bool {
        matches!(self.0.get("isEnrichment"), Some(Value::Bool(true)))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// 📦 All enrichment entries pulled out of one hit. Never empty.
pub type EnrichmentGroup = Vec<ModuleEntry>;

/// 📦 One structural enrichment batch: at most one entry per source hit.
pub type EnrichmentBatch = Vec<ModuleEntry>;

/// 🎯 The normalized indicator. One per surviving hit.
///
/// Serializes to the shape the ingestion side expects: the original hit fields
/// at the top level, plus `value`, `type`, `rawJSON` and (insight only) the
/// rebuilt `moduleToFeedMap`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorRecord {
    pub value: String,
    #[serde(rename = "type")]
    pub indicator_type: String,
    #[serde(rename = "rawJSON")]
    pub raw_json: Map<String, Value>,
    #[serde(rename = "moduleToFeedMap", skip_serializing_if = "Option::is_none")]
    pub module_to_feed_map: Option<BTreeMap<String, ModuleEntry>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 📬 What a sink batch is made of.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeedRecord {
    Indicator(IndicatorRecord),
    Enrichment(ModuleEntry),
}

impl From<IndicatorRecord> for FeedRecord {
    fn from(record: IndicatorRecord) -> Self {
        FeedRecord::Indicator(record)
    }
}

impl From<ModuleEntry> for FeedRecord {
    fn from(entry: ModuleEntry) -> Self {
        FeedRecord::Enrichment(entry)
    }
}
