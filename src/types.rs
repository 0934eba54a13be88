//! Core types for the Healthflux worker engine
//!
//! This module defines the data structures that flow between the process loop,
//! the workers and their function units: feature samples, result entries,
//! health tables and published results.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Earliest representable timestamp, used as the "nothing seen yet" marker.
pub const MIN_TIME: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

/// Truncate a timestamp to whole-second granularity.
pub fn quantize(time: DateTime<Utc>) -> DateTime<Utc> {
    time.trunc_subsecs(0)
}

/// Category a function unit belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionCategory {
    Decision,
    Evaluation,
    Other,
}

impl FunctionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionCategory::Decision => "decision",
            FunctionCategory::Evaluation => "evaluation",
            FunctionCategory::Other => "other",
        }
    }
}

impl fmt::Display for FunctionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunctionCategory {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision" => Ok(FunctionCategory::Decision),
            "evaluation" => Ok(FunctionCategory::Evaluation),
            "other" => Ok(FunctionCategory::Other),
            other => Err(ConfigError::MissingCategory(other.to_string())),
        }
    }
}

/// Health status of a device at one instant, ordered by severity
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Unknown,
    Normal,
    Attention,
    Warning,
    Alarm,
}

/// One feature sample reported by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSample {
    /// Sample time (UTC)
    pub time: DateTime<Utc>,
    /// Feature values keyed by column name
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

impl FeatureSample {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time,
            values: BTreeMap::new(),
        }
    }

    /// Builder-style helper to attach one column value
    pub fn with(mut self, column: &str, value: f64) -> Self {
        self.values.insert(column.to_string(), value);
        self
    }

    pub fn value(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied()
    }
}

/// One entry of a device's result stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub time: DateTime<Utc>,
    pub status: Status,
    /// Scores, one per health define of the device
    pub scores: Vec<f64>,
    /// Free-form events raised by function units
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

impl ResultEntry {
    /// Escalate the status; never lowers it.
    pub fn raise_status(&mut self, status: Status) {
        if status > self.status {
            self.status = status;
        }
    }

    pub fn push_event(&mut self, event: impl Into<String>) {
        self.events.push(event.into());
    }
}

/// Per-device health table of a bound worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthInfo {
    pub column: BTreeSet<String>,
    pub health_define: Vec<String>,
    pub default_score: Vec<f64>,
    pub score_limit: Vec<bool>,
    pub score_reverse: Vec<bool>,
}

/// A result entry handed to the process loop by `flush()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedResult {
    /// Primary tag of the worker that produced the entry
    pub worker: String,
    pub device: String,
    #[serde(flatten)]
    pub entry: ResultEntry,
}

#[cfg(test)]
pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
    use chrono::TimeZone;
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_quantize_drops_subseconds() {
        let t = ts(5) + Duration::milliseconds(750);
        assert_eq!(quantize(t), ts(5));
        assert_eq!(quantize(ts(5)), ts(5));
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(
            "evaluation".parse::<FunctionCategory>().unwrap(),
            FunctionCategory::Evaluation
        );
        assert_eq!(
            "summary".parse::<FunctionCategory>(),
            Err(ConfigError::MissingCategory("summary".to_string()))
        );
    }

    #[test]
    fn test_raise_status_is_monotonic() {
        let mut entry = ResultEntry {
            time: ts(0),
            status: Status::Normal,
            scores: vec![],
            events: vec![],
        };
        entry.raise_status(Status::Warning);
        entry.raise_status(Status::Attention);
        assert_eq!(entry.status, Status::Warning);
    }

    #[test]
    fn test_published_result_serialization() {
        let published = PublishedResult {
            worker: "pump-1".to_string(),
            device: "pump-1".to_string(),
            entry: ResultEntry {
                time: ts(0),
                status: Status::Alarm,
                scores: vec![40.0],
                events: vec![],
            },
        };
        let value = serde_json::to_value(&published).unwrap();
        assert_eq!(value["status"], "alarm");
        assert_eq!(value["scores"][0], 40.0);
        assert!(value.get("events").is_none());
    }
}
