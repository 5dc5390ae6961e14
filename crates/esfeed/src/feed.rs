//! 🎛️ Feed settings: which documents, which fields, which clock.
//!
//! 🧠 Knowledge graph:
//! - `FeedType`: generic (operator-defined schema) vs insight (fixed schema),
//!   single- or multi-tenant
//! - `TimeMethod`: how the time field is stored in the index
//! - `FeedConfig`: the `[feed]` section of the config, plus `validate()` which
//!   returns every problem at once instead of dying on the first one
//! - Insight feeds ignore `time_field`/`src_val`: they always use `calculatedTime` and `name`

use serde::Deserialize;

use crate::errors::ConfigurationError;
use crate::translate::TranslateRules;
use crate::watermark::{LookbackWindow, TimeUnit};

/// 🕰️ Time field every insight document carries.
pub const INSIGHT_TIME_FIELD: &str = "calculatedTime";

/// 🏷️ Field holding an insight indicator's value.
pub const INSIGHT_VALUE_FIELD: &str = "name";

/// 🏷️ Field holding an insight indicator's type.
pub const INSIGHT_TYPE_FIELD: &str = "type";

/// 🎭 The two document shapes, with the multi-tenant flavour of the fixed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedType {
    /// 🔧 Any index, any field names. The operator fills in the blanks.
    #[default]
    Generic,
    /// 📦 Fixed schema, all indices (or the configured ones).
    Insight,
    /// 🏢 Fixed schema, all shared indices except this tenant's own.
    InsightMultiTenant,
}

impl FeedType {
    pub fn is_insight(&self) -> bool {
        matches!(self, FeedType::Insight | FeedType::InsightMultiTenant)
    }
}

/// 📏 How the time field is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeMethod {
    #[serde(alias = "Timestamp-Seconds")]
    TimestampSeconds,
    #[serde(alias = "Timestamp-Milliseconds")]
    TimestampMilliseconds,
    /// 📅 An ISO-8601 date string. Watermarks are kept in milliseconds.
    #[serde(alias = "Simple-Date")]
    SimpleDate,
}

impl TimeMethod {
    pub fn unit(&self) -> TimeUnit {
        match self {
            TimeMethod::TimestampSeconds => TimeUnit::Seconds,
            TimeMethod::TimestampMilliseconds | TimeMethod::SimpleDate => TimeUnit::Milliseconds,
        }
    }
}

/// 📋 The `[feed]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub feed_type: FeedType,
    /// 🕰️ Generic feeds only. Without it there is no time filter at all.
    #[serde(default)]
    pub time_field: Option<String>,
    #[serde(default)]
    pub time_method: Option<TimeMethod>,
    /// 🔎 Index pattern. Unset means "everything" (or "every shared index but ours" in multi-tenant mode).
    #[serde(default)]
    pub fetch_index: Option<String>,
    /// 🔙 Lookback for the first fetch, e.g. "3 days".
    #[serde(default = "default_fetch_time")]
    pub fetch_time: String,
    /// 🏷️ Field holding the indicator value (generic feeds).
    #[serde(default)]
    pub src_val: Option<String>,
    /// 🏷️ Field holding the indicator type (generic feeds).
    #[serde(default)]
    pub src_type: Option<String>,
    #[serde(default)]
    pub default_type: Option<String>,
    /// 🏢 This tenant's shared-index hash (multi-tenant insight feeds).
    #[serde(default)]
    pub tenant_hash: Option<String>,
    /// 📄 How many indicators `list-indicators` shows in insight mode.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_fetch_time() -> String {
    "3 days".to_string()
}

fn default_limit() -> usize {
    50
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            feed_type: FeedType::default(),
            time_field: None,
            time_method: None,
            fetch_index: None,
            fetch_time: default_fetch_time(),
            src_val: None,
            src_type: None,
            default_type: None,
            tenant_hash: None,
            limit: default_limit(),
        }
    }
}

/// 🧹 `Some("")` and `Some("   ")` are just `None` in a trench coat.
pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl FeedConfig {
    /// 🕰️ The field the time filter applies to, if any.
    pub fn effective_time_field(&self) -> Option<&str> {
        if self.feed_type.is_insight() {
            Some(INSIGHT_TIME_FIELD)
        } else {
            non_blank(&self.time_field)
        }
    }

    /// 📏 Configured time method. Insight feeds fall back to `simple_date`,
    /// generic feeds fall back to seconds (validation already complained if unset).
    pub fn effective_time_method(&self) -> TimeMethod {
        match (self.time_method, self.feed_type.is_insight()) {
            (Some(method), _) => method,
            (None, true) => TimeMethod::SimpleDate,
            (None, false) => TimeMethod::TimestampSeconds,
        }
    }

    /// 🔙 The parsed lookback window. Falls back to 3 days when unparsable,
    /// which `validate()` reports before anything gets this far.
    pub fn lookback(&self) -> LookbackWindow {
        self.fetch_time.parse().unwrap_or_default()
    }

    /// 🏷️ Which fields the translator reads.
    pub fn translate_rules(&self) -> TranslateRules {
        if self.feed_type.is_insight() {
            TranslateRules::insight()
        } else {
            TranslateRules {
                value_field: non_blank(&self.src_val).unwrap_or_default().to_string(),
                type_field: non_blank(&self.src_type).map(str::to_string),
                default_type: non_blank(&self.default_type).map(str::to_string),
            }
        }
    }

    /// ✅ Every configuration problem for the selected feed type. Empty means good to go.
    ///
    /// Pure: no network, no disk. Call it before anything side-effecting.
    pub fn validate(&self) -> Vec<ConfigurationError> {
        let mut errors = Vec::new();
        let fetch_time = self.fetch_time.trim();

        if self.feed_type == FeedType::Generic {
            if non_blank(&self.src_val).is_none() {
                errors.push(ConfigurationError::MissingSourceValue);
            }
            if non_blank(&self.src_type).is_none() && non_blank(&self.default_type).is_none() {
                errors.push(ConfigurationError::MissingIndicatorType);
            }
            if self.time_method.is_none() {
                errors.push(ConfigurationError::MissingTimeMethod);
            }
            if non_blank(&self.time_field).is_some() && fetch_time.is_empty() {
                errors.push(ConfigurationError::MissingFirstFetchTime);
            }
        }

        if !fetch_time.is_empty() {
            if let Err(err) = fetch_time.parse::<LookbackWindow>() {
                errors.push(ConfigurationError::InvalidFirstFetchTime {
                    value: self.fetch_time.clone(),
                    reason: err.to_string(),
                });
            }
        }

        errors
    }
}
