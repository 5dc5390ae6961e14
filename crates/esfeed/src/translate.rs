//! 🔄 Hit translation and the insight splitter.
//!
//! 🎬 *[a raw hit enters. an indicator leaves. sometimes, nothing leaves.]*
//!
//! 🧠 Knowledge graph:
//! - `translate()`: `RawDocument` → `IndicatorRecord`, or `None` when the value field is empty.
//!   Dropping is a filtering rule, not an error.
//! - `rawJSON` is the hit's own fields plus `value`, taken before `type` is assigned
//! - `split()`: pulls `isEnrichment: true` entries out of an insight record's `moduleToFeedMap`.
//!   Everything else stays under its original key.

use std::collections::BTreeMap;

use tracing::trace;

use crate::common::{IndicatorRecord, MODULE_TO_FEED_MAP_KEY, ModuleEntry, RawDocument};
use crate::feed::{INSIGHT_TYPE_FIELD, INSIGHT_VALUE_FIELD};

/// 🏷️ Which hit fields become `value` and `type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateRules {
    pub value_field: String,
    pub type_field: Option<String>,
    pub default_type: Option<String>,
}

impl TranslateRules {
    /// 📦 Fixed-schema rules: the value lives in `name`, the type in the document's own `type`.
    pub fn insight() -> Self {
        Self {
            value_field: INSIGHT_VALUE_FIELD.to_string(),
            type_field: Some(INSIGHT_TYPE_FIELD.to_string()),
            default_type: None,
        }
    }
}

/// 🎯 One hit in, at most one indicator out.
///
/// `type` falls back from `type_field` to `default_type` to the empty string. A typeless
/// indicator is still an indicator.
pub fn translate(doc: RawDocument, rules: &TranslateRules) -> Option<IndicatorRecord> {
    let Some(value) = doc.text(&rules.value_field) else {
        trace!("🗑️ hit without a usable '{}' dropped", rules.value_field);
        return None;
    };
    let indicator_type = rules
        .type_field
        .as_deref()
        .and_then(|field| doc.text(field))
        .or_else(|| rules.default_type.clone())
        .unwrap_or_default();
    let module_to_feed_map = doc.module_to_feed_map();

    let mut fields = doc.into_hit().into_fields();
    fields.insert("value".into(), value.clone().into());
    let raw_json = fields.clone();

    // -- 🧹 keys the record owns outright must not also ride along in the flattened extras
    fields.remove("value");
    fields.remove("type");
    fields.remove("rawJSON");
    if module_to_feed_map.is_some() {
        fields.remove(MODULE_TO_FEED_MAP_KEY);
    }

    Some(IndicatorRecord {
        value,
        indicator_type,
        raw_json,
        module_to_feed_map,
        extra: fields,
    })
}

/// ✂️ Move enrichment entries out of the record's module map.
///
/// The returned list is empty when the record has no map or no enrichments. The kept
/// record always gets a rebuilt map when it had one.
pub fn split(mut record: IndicatorRecord) -> (IndicatorRecord, Vec<ModuleEntry>) {
    let Some(modules) = record.module_to_feed_map.take() else {
        return (record, Vec::new());
    };

    let mut kept = BTreeMap::new();
    let mut enrichments = Vec::new();
    for (key, entry) in modules {
        if entry.is_enrichment() {
            enrichments.push(entry);
        } else {
            kept.insert(key, entry);
        }
    }
    record.module_to_feed_map = Some(kept);
    (record, enrichments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::RawHit;
    use serde_json::json;

    fn generic_rules() -> TranslateRules {
        TranslateRules {
            value_field: "ip".into(),
            type_field: Some("kind".into()),
            default_type: Some("IP".into()),
        }
    }

    #[test]
    fn the_one_where_a_hit_without_a_value_vanishes_quietly() {
        for fields in [json!({ "kind": "IP" }), json!({ "ip": "" }), json!({ "ip": null })] {
            let doc = RawDocument::Generic(RawHit::from_value(fields));
            assert_eq!(translate(doc, &generic_rules()), None);
        }
    }

    #[test]
    fn the_one_where_raw_json_is_taken_before_the_type_shows_up() {
        let doc = RawDocument::Generic(RawHit::from_value(json!({ "ip": "10.0.0.1", "seen": 5 })));
        let record = translate(doc, &generic_rules()).expect("hit has a value");
        assert_eq!(record.value, "10.0.0.1");
        assert_eq!(record.indicator_type, "IP");
        assert_eq!(
            serde_json::Value::Object(record.raw_json.clone()),
            json!({ "ip": "10.0.0.1", "seen": 5, "value": "10.0.0.1" })
        );
        assert!(!record.raw_json.contains_key("type"));
        assert_eq!(record.extra.get("seen"), Some(&json!(5)));
    }

    #[test]
    fn the_one_where_the_type_field_beats_the_default() {
        let doc = RawDocument::Generic(RawHit::from_value(json!({ "ip": "evil.example", "kind": "Domain" })));
        let record = translate(doc, &generic_rules()).expect("hit has a value");
        assert_eq!(record.indicator_type, "Domain");
    }

    #[test]
    fn the_one_where_nobody_knows_the_type_and_that_is_fine() {
        let rules = TranslateRules {
            value_field: "ip".into(),
            type_field: None,
            default_type: None,
        };
        let doc = RawDocument::Generic(RawHit::from_value(json!({ "ip": "10.0.0.1" })));
        let record = translate(doc, &rules).expect("typeless indicators still count");
        assert_eq!(record.indicator_type, "");
    }

    #[test]
    fn the_one_where_an_insight_hit_keeps_its_own_type() {
        let doc = RawDocument::Insight(RawHit::from_value(json!({ "name": "8.8.8.8", "type": "IP" })));
        let record = translate(doc, &TranslateRules::insight()).expect("hit has a name");
        assert_eq!(record.indicator_type, "IP");
        assert_eq!(record.raw_json.get("type"), Some(&json!("IP")));

        let untyped = RawDocument::Insight(RawHit::from_value(json!({ "name": "example.org", "type": "" })));
        let record = translate(untyped, &TranslateRules::insight()).expect("hit has a name");
        assert_eq!(record.indicator_type, "");
    }

    #[test]
    fn the_one_where_enrichments_move_out_and_the_rest_stay_home() {
        let doc = RawDocument::Insight(RawHit::from_value(json!({
            "name": "8.8.8.8",
            "calculatedTime": "2024-05-01T12:00:00Z",
            "moduleToFeedMap": {
                "VirusTotal.vt": { "isEnrichment": true, "sourceBrand": "VirusTotal", "score": 1 },
                "Feed.f": { "isEnrichment": false, "sourceBrand": "Feed" },
                "Whois.w": { "isEnrichment": true, "sourceBrand": "Whois", "score": 0 },
            },
        })));
        let record = translate(doc, &TranslateRules::insight()).expect("hit has a name");
        assert!(!record.extra.contains_key(MODULE_TO_FEED_MAP_KEY));

        let (kept, enrichments) = split(record);
        let kept_map = kept.module_to_feed_map.expect("insight record keeps a rebuilt map");
        assert_eq!(kept_map.keys().collect::<Vec<_>>(), vec!["Feed.f"]);
        assert_eq!(enrichments.len(), 2);
        assert!(enrichments.iter().all(ModuleEntry::is_enrichment));
    }

    #[test]
    fn the_one_where_no_enrichment_means_no_group() {
        let doc = RawDocument::Insight(RawHit::from_value(json!({
            "name": "x",
            "moduleToFeedMap": { "Feed.f": { "isEnrichment": false } },
        })));
        let record = translate(doc, &TranslateRules::insight()).expect("hit has a name");
        let (kept, enrichments) = split(record);
        assert!(enrichments.is_empty());
        assert_eq!(kept.module_to_feed_map.map(|m| m.len()), Some(1));

        let plain = translate(
            RawDocument::Generic(RawHit::from_value(json!({ "ip": "1.1.1.1" }))),
            &generic_rules(),
        )
        .expect("hit has a value");
        let (kept, enrichments) = split(plain);
        assert!(enrichments.is_empty());
        assert!(kept.module_to_feed_map.is_none());
    }
}
