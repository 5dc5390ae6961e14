//! 🕰️ Watermark: "where did we leave off?", asked once per cycle, forever.
//!
//! 🎬 *[a fetch cycle wakes up. it has no memory of its past life.]*
//! *[it checks the state file. a number stares back.]*
//! *["ah," it says. "I was here before. I will start from there."]*
//!
//! 🧠 Knowledge graph:
//! - `Watermark`: the persisted marker. An epoch (with its unit) or a date/time.
//! - `LookbackWindow`: "3 days", "12 hours"... used when there is no watermark yet
//! - `Timestamp`: an epoch value that remembers whether it is seconds or millis
//! - `resolve(...)`: watermark + unit + lookback → the lower bound for the next query.
//!   Never fails. Bad lookback strings are rejected during config validation.
//! - Persistence lives in `watermark::store`, at the edge. The orchestrator only
//!   receives a watermark and returns a new one. 🦆

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod store;

pub use store::{FileWatermarkStore, InMemoryWatermarkStore, StateBackend, WatermarkStore};

/// 📏 The resolution an epoch value is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
}

/// ⏱️ An epoch value that knows its own unit. Mixing seconds and millis is how
/// you end up querying for documents from the year 55,000.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    value: i64,
    unit: TimeUnit,
}

impl Timestamp {
    pub fn new(value: i64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub fn from_datetime(at: DateTime<Utc>, unit: TimeUnit) -> Self {
        let value = match unit {
            TimeUnit::Seconds => at.timestamp(),
            TimeUnit::Milliseconds => at.timestamp_millis(),
        };
        Self { value, unit }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn as_millis(&self) -> i64 {
        match self.unit {
            TimeUnit::Seconds => self.value.saturating_mul(1000),
            TimeUnit::Milliseconds => self.value,
        }
    }

    /// 🔄 Same instant, different ruler. Millis → seconds floors.
    pub fn to_unit(self, unit: TimeUnit) -> Self {
        let value = match (self.unit, unit) {
            (from, to) if from == to => self.value,
            (TimeUnit::Seconds, TimeUnit::Milliseconds) => self.value.saturating_mul(1000),
            (TimeUnit::Milliseconds, TimeUnit::Seconds) => self.value.div_euclid(1000),
            _ => self.value,
        };
        Self { value, unit }
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.as_millis())
    }
}

/// 💀 "3 fortnights" is not a thing we support. Sorry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected '<number> <unit>' with unit one of minutes, hours, days, weeks, months, years; {0}")]
pub struct LookbackParseError(String);

/// 🔙 How far back the very first fetch reaches. Default: 3 days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookbackWindow(TimeDelta);

impl LookbackWindow {
    pub fn new(window: TimeDelta) -> Self {
        Self(window)
    }

    pub fn duration(&self) -> TimeDelta {
        self.0
    }

    /// 📍 The instant `window` before `now`. Absurdly large windows clamp to the epoch.
    pub fn anchored_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.0).unwrap_or_default()
    }
}

impl Default for LookbackWindow {
    fn default() -> Self {
        Self(TimeDelta::days(3))
    }
}

impl FromStr for LookbackWindow {
    type Err = LookbackParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.split_whitespace();
        let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(LookbackParseError(format!("got '{raw}'")));
        };
        let amount: i64 = amount
            .parse()
            .map_err(|_| LookbackParseError(format!("'{amount}' is not a whole number")))?;
        if amount < 0 {
            return Err(LookbackParseError(format!("'{amount}' is negative")));
        }

        // -- 📅 months and years are calendar-ish, we go with 30 and 365 days and move on
        let window = match unit.to_ascii_lowercase().as_str() {
            "minute" | "minutes" | "min" | "mins" => TimeDelta::try_minutes(amount),
            "hour" | "hours" => TimeDelta::try_hours(amount),
            "day" | "days" => TimeDelta::try_days(amount),
            "week" | "weeks" => TimeDelta::try_weeks(amount),
            "month" | "months" => amount.checked_mul(30).and_then(TimeDelta::try_days),
            "year" | "years" => amount.checked_mul(365).and_then(TimeDelta::try_days),
            other => return Err(LookbackParseError(format!("unknown unit '{other}'"))),
        };
        window
            .map(Self)
            .ok_or_else(|| LookbackParseError(format!("'{raw}' is too far back, even for us")))
    }
}

/// 🔖 The persisted "last fetch" marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    /// An epoch value. Legacy markers without a unit are seconds.
    Epoch(Timestamp),
    /// A date/time, converted to the configured unit on resolve.
    DateTime(DateTime<Utc>),
}

impl Watermark {
    /// 🔎 Read a persisted marker. Returns `None` for anything we cannot make sense of,
    /// and the caller falls back to the lookback window.
    pub fn from_persisted(time: &Value, unit: Option<TimeUnit>) -> Option<Self> {
        let unit = unit.unwrap_or(TimeUnit::Seconds);
        match time {
            Value::Number(n) => epoch_from_f64_or_i64(n.as_i64(), n.as_f64(), unit),
            Value::String(s) => {
                let s = s.trim();
                if let Ok(n) = s.parse::<i64>() {
                    return Some(Watermark::Epoch(Timestamp::new(n, unit)));
                }
                if let Ok(f) = s.parse::<f64>() {
                    return epoch_from_f64_or_i64(None, Some(f), unit);
                }
                parse_datetime(s).map(Watermark::DateTime)
            }
            _ => None,
        }
    }

    /// 💾 The `(time, unit)` pair that goes into the state file.
    pub fn to_persisted(&self) -> (Value, Option<TimeUnit>) {
        match self {
            Watermark::Epoch(ts) => (Value::from(ts.value()), Some(ts.unit())),
            Watermark::DateTime(at) => (Value::from(at.to_rfc3339()), None),
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Epoch(ts) => write!(f, "{} ({:?})", ts.value(), ts.unit()),
            Watermark::DateTime(at) => write!(f, "{}", at.to_rfc3339()),
        }
    }
}

fn epoch_from_f64_or_i64(int: Option<i64>, float: Option<f64>, unit: TimeUnit) -> Option<Watermark> {
    let value = match (int, float) {
        (Some(n), _) => n,
        (None, Some(f)) if f.is_finite() => f.floor() as i64,
        _ => return None,
    };
    Some(Watermark::Epoch(Timestamp::new(value, unit)))
}

/// 📅 RFC 3339 first, then a naive ISO date-time taken as UTC.
pub(crate) fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// 🎯 Turn "where we left off" into the lower bound of the next query.
///
/// - epoch watermark → used as-is (converted into `unit` when it was stored in another one)
/// - date/time watermark → converted into `unit`
/// - no watermark → `now - lookback`, in `unit`
pub fn resolve(
    persisted: Option<&Watermark>,
    unit: TimeUnit,
    lookback: &LookbackWindow,
    now: DateTime<Utc>,
) -> Timestamp {
    match persisted {
        Some(Watermark::Epoch(ts)) => ts.to_unit(unit),
        Some(Watermark::DateTime(at)) => Timestamp::from_datetime(*at, unit),
        None => Timestamp::from_datetime(lookback.anchored_at(now), unit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid date")
    }

    #[test]
    fn the_one_where_lookback_strings_become_durations() -> anyhow::Result<()> {
        assert_eq!("3 days".parse::<LookbackWindow>()?.duration(), TimeDelta::days(3));
        assert_eq!("12 Hours".parse::<LookbackWindow>()?.duration(), TimeDelta::hours(12));
        assert_eq!("1 week".parse::<LookbackWindow>()?.duration(), TimeDelta::weeks(1));
        assert_eq!("2 months".parse::<LookbackWindow>()?.duration(), TimeDelta::days(60));
        assert_eq!("1 year".parse::<LookbackWindow>()?.duration(), TimeDelta::days(365));
        assert_eq!(LookbackWindow::default().duration(), TimeDelta::days(3));
        Ok(())
    }

    #[test]
    fn the_one_where_lookback_gibberish_is_turned_away_at_the_door() {
        assert!("".parse::<LookbackWindow>().is_err());
        assert!("three days".parse::<LookbackWindow>().is_err());
        assert!("3 fortnights".parse::<LookbackWindow>().is_err());
        assert!("3 days ago please".parse::<LookbackWindow>().is_err());
        assert!("-3 days".parse::<LookbackWindow>().is_err());
    }

    #[test]
    fn the_one_where_no_watermark_means_three_days_ago() {
        let lower = resolve(None, TimeUnit::Seconds, &LookbackWindow::default(), noon());
        assert_eq!(lower.value(), noon().timestamp() - 3 * 24 * 3600);

        let lower_ms = resolve(None, TimeUnit::Milliseconds, &LookbackWindow::default(), noon());
        assert_eq!(lower_ms.value(), (noon().timestamp() - 3 * 24 * 3600) * 1000);
    }

    #[test]
    fn the_one_where_an_epoch_watermark_is_taken_at_its_word() {
        let mark = Watermark::Epoch(Timestamp::new(1_700_000_000, TimeUnit::Seconds));
        let lower = resolve(Some(&mark), TimeUnit::Seconds, &LookbackWindow::default(), noon());
        assert_eq!(lower, Timestamp::new(1_700_000_000, TimeUnit::Seconds));

        let lower_ms = resolve(Some(&mark), TimeUnit::Milliseconds, &LookbackWindow::default(), noon());
        assert_eq!(lower_ms, Timestamp::new(1_700_000_000_000, TimeUnit::Milliseconds));
    }

    #[test]
    fn the_one_where_a_datetime_watermark_gets_converted() {
        let mark = Watermark::DateTime(noon());
        let lower = resolve(Some(&mark), TimeUnit::Milliseconds, &LookbackWindow::default(), noon());
        assert_eq!(lower.value(), noon().timestamp_millis());
    }

    #[test]
    fn the_one_where_resolving_last_cycles_output_gives_it_right_back() {
        // -- 🔁 a cycle writes "now" as the new watermark; with no new data, the next
        // -- cycle must start exactly there
        for unit in [TimeUnit::Seconds, TimeUnit::Milliseconds] {
            let written = Watermark::Epoch(Timestamp::from_datetime(noon(), unit));
            let (time, stored_unit) = written.to_persisted();
            let read_back = Watermark::from_persisted(&time, stored_unit).expect("round trip");
            let lower = resolve(Some(&read_back), unit, &LookbackWindow::default(), noon());
            assert_eq!(lower, Timestamp::from_datetime(noon(), unit));
        }
    }

    #[test]
    fn the_one_where_legacy_markers_are_still_understood() {
        assert_eq!(
            Watermark::from_persisted(&json!("1700000000"), None),
            Some(Watermark::Epoch(Timestamp::new(1_700_000_000, TimeUnit::Seconds)))
        );
        assert_eq!(
            Watermark::from_persisted(&json!("1700000000.987654"), None),
            Some(Watermark::Epoch(Timestamp::new(1_700_000_000, TimeUnit::Seconds)))
        );
        assert_eq!(
            Watermark::from_persisted(&json!("2024-05-01T12:00:00Z"), None),
            Some(Watermark::DateTime(noon()))
        );
        assert_eq!(Watermark::from_persisted(&json!("whenever"), None), None);
        assert_eq!(Watermark::from_persisted(&json!(null), None), None);
    }

    #[test]
    fn the_one_where_millis_floor_into_seconds() {
        let ts = Timestamp::new(1_999, TimeUnit::Milliseconds);
        assert_eq!(ts.to_unit(TimeUnit::Seconds), Timestamp::new(1, TimeUnit::Seconds));
        assert_eq!(ts.as_millis(), 1_999);
    }
}
