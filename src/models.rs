//! Data models for PI metrics.
//!
//! This module contains the raw issue records handed over by an issue
//! source, the typed projections derived from them (features, stories),
//! and the value objects produced by the aggregation engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Workstream sentinel for stories with no usable workstream value.
pub const UNKNOWN_WORKSTREAM: &str = "Unknown";

/// Assignee sentinel for unassigned stories.
pub const UNASSIGNED: &str = "Unassigned";

/// Prefix that marks a label as a PI label (e.g. `PI-4_PlatformART`).
pub const PI_LABEL_PREFIX: &str = "PI-";

/// Statuses that count as completed.
///
/// Membership is an exact, case-sensitive string match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusSet(Vec<String>);

impl StatusSet {
    /// Build a status set from any list of status names.
    pub fn new<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values: Vec<String> = Vec::new();
        for status in statuses.into_iter().map(Into::into) {
            if !values.contains(&status) {
                values.push(status);
            }
        }
        Self(values)
    }

    /// Returns true if `status` is a member of the set.
    pub fn contains(&self, status: &str) -> bool {
        self.0.iter().any(|s| s == status)
    }

    /// Returns the statuses in declaration order.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for StatusSet {
    fn default() -> Self {
        Self::new(["Done", "Closed"])
    }
}

/// A single field change taken from an issue's change history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Key of the issue the change belongs to.
    pub issue_key: String,
    /// Name of the changed field (e.g. `status`).
    pub field: String,
    /// Value before the change.
    #[serde(default)]
    pub from: Option<String>,
    /// Value after the change.
    #[serde(default)]
    pub to: Option<String>,
    /// When the change happened.
    pub timestamp: DateTime<Utc>,
}

/// A raw issue record as returned by an issue source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Unique issue key (e.g. `ART-42`).
    pub key: String,
    /// Issue type name (e.g. `Feature`, `Story`).
    #[serde(rename = "type")]
    pub issue_type: String,
    #[serde(default)]
    pub summary: String,
    pub status: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Custom fields keyed by field id. Values may be null or absent.
    #[serde(default)]
    pub fields: HashMap<String, Value>,
    /// Field-change history, present only when the query expanded it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryEvent>>,
}

impl Issue {
    /// Returns the raw custom field value, treating JSON null as absent.
    pub fn field(&self, id: &str) -> Option<&Value> {
        self.fields.get(id).filter(|v| !v.is_null())
    }

    /// Returns the change history, or an empty slice when it was not expanded.
    pub fn history(&self) -> &[HistoryEvent] {
        self.history.as_deref().unwrap_or(&[])
    }
}

/// Project a scalar-ish JSON value onto its text form.
///
/// Strings are used as-is, numbers and booleans use their display form,
/// and objects contribute their `value`, `name` or `key` member (the shapes
/// Jira uses for select lists, users and issue links). Arrays and null
/// have no single text form.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => ["value", "name", "key"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(String::from),
        Value::Array(_) | Value::Null => None,
    }
}

/// A feature, derived from an issue of type `Feature`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub key: String,
    pub summary: String,
    pub status: String,
    /// ART name, taken from the second segment of the PI label.
    pub art: Option<String>,
    /// PI label segment (e.g. `PI-4`).
    pub pi: Option<String>,
    pub business_benefit: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// A story, derived from an issue linked to a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub key: String,
    pub summary: String,
    pub status: String,
    pub story_points: u64,
    /// Never empty; `Unknown` when the source had no usable value.
    pub workstream: String,
    pub sprint: Option<String>,
    /// Key of the owning feature.
    pub feature_link: Option<String>,
    pub assignee: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Percentage of `completed` over `total`, or 0 when `total` is 0.
pub fn completion_rate(completed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (completed as f64 / total as f64) * 100.0
    }
}

/// Counts and point sums for one group of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rollup {
    pub total_count: u64,
    pub completed_count: u64,
    pub total_points: u64,
    pub completed_points: u64,
    /// Completed over total count, as a percentage.
    pub completion_rate: f64,
    /// Completed over total points, as a percentage.
    pub points_completion_rate: f64,
}

impl Rollup {
    /// Add one record to the rollup.
    pub fn record(&mut self, points: u64, completed: bool) {
        self.total_count = self.total_count.saturating_add(1);
        self.total_points = self.total_points.saturating_add(points);
        if completed {
            self.completed_count = self.completed_count.saturating_add(1);
            self.completed_points = self.completed_points.saturating_add(points);
        }
        self.refresh_rates();
    }

    /// Fold another rollup into this one.
    pub fn merge(&mut self, other: &Rollup) {
        self.total_count = self.total_count.saturating_add(other.total_count);
        self.completed_count = self.completed_count.saturating_add(other.completed_count);
        self.total_points = self.total_points.saturating_add(other.total_points);
        self.completed_points = self.completed_points.saturating_add(other.completed_points);
        self.refresh_rates();
    }

    fn refresh_rates(&mut self) {
        self.completion_rate = completion_rate(self.completed_count, self.total_count);
        self.points_completion_rate = completion_rate(self.completed_points, self.total_points);
    }
}

/// PI-level totals across features and their stories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiMetrics {
    pub pi_label: String,
    /// Workstream filter applied to stories, if any.
    pub workstream: Option<String>,
    pub features: Rollup,
    pub stories: Rollup,
}

impl PiMetrics {
    pub fn feature_completion_rate(&self) -> f64 {
        self.features.completion_rate
    }

    pub fn story_completion_rate(&self) -> f64 {
        self.stories.completion_rate
    }

    pub fn story_points_completion_rate(&self) -> f64 {
        self.stories.points_completion_rate
    }
}

/// Commitment versus delivery for one ART in a PI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtObjectives {
    pub art: String,
    pub committed_features: u64,
    pub delivered_features: u64,
    pub committed_points: u64,
    pub delivered_points: u64,
    pub feature_predictability: f64,
    pub points_predictability: f64,
}

/// Scorecard row for one ART. Percentages are rounded to one decimal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtScore {
    pub art: String,
    pub committed_features: u64,
    pub delivered_features: u64,
    pub committed_points: u64,
    pub delivered_points: u64,
    pub feature_predictability: f64,
    pub points_predictability: f64,
    pub predictability_score: f64,
    pub quality_score: f64,
    pub overall_score: f64,
}

/// PI-wide health figures across all ARTs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PiHealth {
    pub committed_features: u64,
    pub delivered_features: u64,
    pub committed_points: u64,
    pub delivered_points: u64,
    /// Delivered over committed features across every ART.
    pub overall_feature_predictability: f64,
    pub avg_feature_predictability: f64,
    pub avg_points_predictability: f64,
}

/// Velocity for one sprint of one workstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityPoint {
    pub sprint: String,
    pub workstream: String,
    /// Completed points in the sprint.
    pub velocity: u64,
    pub planned_points: u64,
    pub completion_rate: f64,
}

/// Trend figures over a velocity series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocitySummary {
    pub average_velocity: f64,
    /// Last sprint's velocity minus the average.
    pub last_delta: f64,
    pub average_completion_rate: f64,
    /// Sample standard deviation of completion rates. Lower is more predictable.
    pub completion_rate_std_dev: f64,
    /// Rolling three-sprint velocity average, aligned with the series.
    pub rolling_average: Vec<Option<f64>>,
}

/// Time from creation to first completion for one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleTimeRecord {
    pub issue_key: String,
    pub created: DateTime<Utc>,
    pub completed: DateTime<Utc>,
    pub cycle_time_days: i64,
    pub story_points: u64,
}

/// One story of a PI timeline, tagged with its feature and ART.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineRow {
    pub feature_key: String,
    pub story_key: String,
    pub workstream: String,
    pub art: Option<String>,
    pub status: String,
    pub story_points: u64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// One day of a sprint burndown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurndownPoint {
    /// Offset from the window start.
    pub day: u32,
    pub date: NaiveDate,
    pub remaining_points: u64,
    pub ideal_remaining: f64,
}

/// Dimension that records can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Art,
    Workstream,
    Pi,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Art => write!(f, "ART"),
            Dimension::Workstream => write!(f, "Workstream"),
            Dimension::Pi => write!(f, "PI"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_set_is_case_sensitive() {
        let done = StatusSet::default();
        assert!(done.contains("Done"));
        assert!(done.contains("Closed"));
        assert!(!done.contains("done"));
        assert!(!done.contains("In Progress"));
    }

    #[test]
    fn test_completion_rate_zero_guard() {
        assert_eq!(completion_rate(0, 0), 0.0);
        assert_eq!(completion_rate(5, 0), 0.0);
        assert_eq!(completion_rate(7, 10), 70.0);
        assert_eq!(completion_rate(10, 10), 100.0);
    }

    #[test]
    fn test_rollup_record_and_merge() {
        let mut a = Rollup::default();
        a.record(5, true);
        a.record(3, false);
        assert_eq!(a.total_count, 2);
        assert_eq!(a.completed_points, 5);
        assert_eq!(a.completion_rate, 50.0);
        assert_eq!(a.points_completion_rate, 62.5);

        let mut b = Rollup::default();
        b.record(0, false);
        a.merge(&b);
        assert_eq!(a.total_count, 3);
        assert!((a.completion_rate - 33.333).abs() < 0.01);

        let empty = Rollup::default();
        assert_eq!(empty.completion_rate, 0.0);
    }

    #[test]
    fn test_rollup_saturates_on_huge_points() {
        let mut a = Rollup::default();
        a.record(u64::MAX, true);
        a.record(u64::MAX, false);
        assert_eq!(a.total_points, u64::MAX);
        assert_eq!(a.completed_points, u64::MAX);

        let copy = a.clone();
        a.merge(&copy);
        assert_eq!(a.total_count, 4);
        assert_eq!(a.total_points, u64::MAX);
        assert_eq!(a.points_completion_rate, 100.0);
    }

    #[test]
    fn test_value_text_shapes() {
        assert_eq!(value_text(&json!("Alpha")), Some("Alpha".to_string()));
        assert_eq!(value_text(&json!(3)), Some("3".to_string()));
        assert_eq!(value_text(&json!({"value": "Beta"})), Some("Beta".to_string()));
        assert_eq!(value_text(&json!({"key": "ART-1"})), Some("ART-1".to_string()));
        assert_eq!(value_text(&json!(["a"])), None);
        assert_eq!(value_text(&Value::Null), None);
    }

    #[test]
    fn test_issue_field_treats_null_as_absent() {
        let issue: Issue = serde_json::from_value(json!({
            "key": "S-1",
            "type": "Story",
            "status": "Open",
            "created": "2024-01-01T00:00:00Z",
            "updated": "2024-01-02T00:00:00Z",
            "fields": {"customfield_1": null, "customfield_2": "x"}
        }))
        .unwrap();

        assert!(issue.field("customfield_1").is_none());
        assert!(issue.field("customfield_2").is_some());
        assert!(issue.history().is_empty());
    }
}
