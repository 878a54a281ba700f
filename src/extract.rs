//! Field extraction.
//!
//! Turns raw issue records into typed [`Feature`] and [`Story`] values.
//! Every custom field is read through a [`FieldSpec`] that pairs the
//! field id with a parser and a declared default, so a missing or
//! malformed value never fails the whole issue.

use crate::config::FieldsConfig;
use crate::models::{
    value_text, Feature, Issue, Story, PI_LABEL_PREFIX, UNASSIGNED, UNKNOWN_WORKSTREAM,
};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Problems found while validating the field schema at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("field id for '{0}' is blank")]
    BlankId(&'static str),

    #[error("field id '{id}' is used for both '{first}' and '{second}'")]
    DuplicateId {
        id: String,
        first: &'static str,
        second: &'static str,
    },
}

/// One custom field: where to find it, how to read it, what to use when
/// it is missing.
#[derive(Debug, Clone)]
pub struct FieldSpec<T> {
    pub id: String,
    parse: fn(&Value) -> Option<T>,
    default: T,
}

impl<T: Clone> FieldSpec<T> {
    fn new(id: &str, parse: fn(&Value) -> Option<T>, default: T) -> Self {
        Self {
            id: id.to_string(),
            parse,
            default,
        }
    }

    /// Read the field from `issue`, falling back to the declared default.
    pub fn read(&self, issue: &Issue) -> T {
        match issue.field(&self.id) {
            None => self.default.clone(),
            Some(raw) => (self.parse)(raw).unwrap_or_else(|| {
                debug!(
                    "{}: unusable value for {} ({}), using default",
                    issue.key, self.id, raw
                );
                self.default.clone()
            }),
        }
    }
}

/// Typed mapping from the custom fields this tool reads to their ids.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub story_points: FieldSpec<u64>,
    pub workstream: FieldSpec<String>,
    pub sprint: FieldSpec<Option<String>>,
    pub feature_link: FieldSpec<Option<String>>,
    pub epic_link: FieldSpec<Option<String>>,
    pub business_benefit: FieldSpec<Option<String>>,
}

impl FieldSchema {
    /// Build and validate the schema from configuration.
    pub fn new(config: &FieldsConfig) -> Result<Self, SchemaError> {
        let ids: [(&'static str, &str); 6] = [
            ("story_points", &config.story_points),
            ("workstream", &config.workstream),
            ("sprint", &config.sprint),
            ("feature_link", &config.feature_link),
            ("epic_link", &config.epic_link),
            ("business_benefit", &config.business_benefit),
        ];

        for (i, (role, id)) in ids.iter().enumerate() {
            if id.trim().is_empty() {
                return Err(SchemaError::BlankId(*role));
            }
            if let Some((other, _)) = ids[..i].iter().find(|(_, other_id)| other_id == id) {
                return Err(SchemaError::DuplicateId {
                    id: id.to_string(),
                    first: *other,
                    second: *role,
                });
            }
        }

        Ok(Self {
            story_points: FieldSpec::new(&config.story_points, parse_points, 0),
            workstream: FieldSpec::new(
                &config.workstream,
                parse_workstream,
                UNKNOWN_WORKSTREAM.to_string(),
            ),
            sprint: FieldSpec::new(&config.sprint, |v| parse_sprint(v).map(Some), None),
            feature_link: FieldSpec::new(&config.feature_link, |v| parse_text(v).map(Some), None),
            epic_link: FieldSpec::new(&config.epic_link, |v| parse_text(v).map(Some), None),
            business_benefit: FieldSpec::new(
                &config.business_benefit,
                |v| parse_text(v).map(Some),
                None,
            ),
        })
    }

    /// Project a feature issue onto a [`Feature`].
    pub fn extract_feature(&self, issue: &Issue) -> Feature {
        let (pi, art) = pi_and_art(&issue.labels);
        Feature {
            key: issue.key.clone(),
            summary: issue.summary.clone(),
            status: issue.status.clone(),
            art,
            pi,
            business_benefit: self.business_benefit.read(issue),
            created: issue.created,
            updated: issue.updated,
        }
    }

    /// Project a story issue onto a [`Story`].
    ///
    /// The feature link comes from the link field, then the epic-link
    /// field, then `context_feature` (the feature the query was run for).
    pub fn extract_story(&self, issue: &Issue, context_feature: Option<&str>) -> Story {
        let feature_link = self
            .feature_link
            .read(issue)
            .or_else(|| self.epic_link.read(issue))
            .or_else(|| context_feature.map(String::from));

        Story {
            key: issue.key.clone(),
            summary: issue.summary.clone(),
            status: issue.status.clone(),
            story_points: self.story_points.read(issue),
            workstream: self.workstream.read(issue),
            sprint: self.sprint.read(issue),
            feature_link,
            assignee: issue
                .assignee
                .as_deref()
                .filter(|a| !a.trim().is_empty())
                .unwrap_or(UNASSIGNED)
                .to_string(),
            created: issue.created,
            updated: issue.updated,
        }
    }
}

/// Split a PI label into its PI and ART segments.
///
/// `PI-4_PlatformART` gives `("PI-4", Some("PlatformART"))`, `PI-4` gives
/// `("PI-4", None)`. Labels without the `PI-` prefix give `None`.
pub fn parse_pi_label(label: &str) -> Option<(String, Option<String>)> {
    if !label.starts_with(PI_LABEL_PREFIX) {
        return None;
    }
    let mut parts = label.split('_');
    let pi = parts.next().unwrap_or(label).to_string();
    let art = parts.next().filter(|s| !s.is_empty()).map(String::from);
    Some((pi, art))
}

/// PI and ART from the first PI label in `labels`.
pub fn pi_and_art(labels: &[String]) -> (Option<String>, Option<String>) {
    match labels.iter().find_map(|l| parse_pi_label(l)) {
        Some((pi, art)) => (Some(pi), art),
        None => (None, None),
    }
}

fn parse_text(value: &Value) -> Option<String> {
    value_text(value).filter(|s| !s.trim().is_empty())
}

fn parse_workstream(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items.iter().find_map(parse_text),
        v => parse_text(v),
    }
}

/// Largest story-point estimate accepted; anything above reads as malformed.
pub const MAX_STORY_POINTS: u64 = 10_000;

fn parse_points(value: &Value) -> Option<u64> {
    let in_range = |f: f64| f.is_finite() && (0.0..=MAX_STORY_POINTS as f64).contains(&f);
    let points = match value {
        Value::Number(n) => match n.as_u64() {
            Some(points) => Some(points),
            None => n.as_f64().filter(|f| in_range(*f)).map(|f| f as u64),
        },
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| in_range(*f)).map(|f| f as u64),
        _ => None,
    };
    points.filter(|p| *p <= MAX_STORY_POINTS)
}

/// Sprint name from the shapes Jira uses for the sprint field.
///
/// Arrays resolve to their last sprint. GreenHopper strings
/// (`...Sprint@1f[id=1,state=ACTIVE,name=Sprint 3,...]`) resolve to the
/// `name=` member.
fn parse_sprint(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items.iter().rev().find_map(parse_sprint),
        Value::String(s) => match s.find("name=") {
            Some(start) if s.contains('[') => {
                let rest = &s[start + "name=".len()..];
                let end = rest.find([',', ']']).unwrap_or(rest.len());
                Some(rest[..end].to_string()).filter(|n| !n.trim().is_empty())
            }
            _ => parse_text(value),
        },
        v => parse_text(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;

    fn schema() -> FieldSchema {
        FieldSchema::new(&FieldsConfig::default()).unwrap()
    }

    fn issue(labels: &[&str], fields: Value, assignee: Option<&str>) -> Issue {
        let fields: HashMap<String, Value> = serde_json::from_value(fields).unwrap();
        Issue {
            key: "S-1".to_string(),
            issue_type: "Story".to_string(),
            summary: "Summary".to_string(),
            status: "In Progress".to_string(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            assignee: assignee.map(String::from),
            created: Utc::now(),
            updated: Utc::now(),
            fields,
            history: None,
        }
    }

    #[test]
    fn test_parse_pi_label() {
        assert_eq!(
            parse_pi_label("PI-4_PlatformART"),
            Some(("PI-4".to_string(), Some("PlatformART".to_string())))
        );
        assert_eq!(parse_pi_label("PI-4"), Some(("PI-4".to_string(), None)));
        assert_eq!(parse_pi_label("PI-4_"), Some(("PI-4".to_string(), None)));
        assert_eq!(parse_pi_label("team-alpha"), None);
    }

    #[test]
    fn test_first_pi_label_wins() {
        let labels = vec![
            "backend".to_string(),
            "PI-5".to_string(),
            "PI-4_PlatformART".to_string(),
        ];
        assert_eq!(pi_and_art(&labels), (Some("PI-5".to_string()), None));
        assert_eq!(pi_and_art(&["other".to_string()]), (None, None));
    }

    #[test]
    fn test_extract_feature() {
        let i = issue(
            &["PI-4_PlatformART"],
            json!({"customfield_11800": "High value"}),
            None,
        );
        let feature = schema().extract_feature(&i);
        assert_eq!(feature.pi.as_deref(), Some("PI-4"));
        assert_eq!(feature.art.as_deref(), Some("PlatformART"));
        assert_eq!(feature.business_benefit.as_deref(), Some("High value"));
    }

    #[test]
    fn test_story_defaults() {
        let story = schema().extract_story(&issue(&[], json!({}), None), None);
        assert_eq!(story.workstream, UNKNOWN_WORKSTREAM);
        assert_eq!(story.assignee, UNASSIGNED);
        assert_eq!(story.story_points, 0);
        assert_eq!(story.sprint, None);
        assert_eq!(story.feature_link, None);
    }

    #[test]
    fn test_blank_or_malformed_values_default() {
        let i = issue(
            &[],
            json!({"customfield_20403": "   ", "customfield_10003": -2}),
            Some(""),
        );
        let story = schema().extract_story(&i, None);
        assert_eq!(story.workstream, UNKNOWN_WORKSTREAM);
        assert_eq!(story.story_points, 0);
        assert_eq!(story.assignee, UNASSIGNED);

        let i = issue(&[], json!({"customfield_20403": {"id": 7}}), None);
        assert_eq!(schema().extract_story(&i, None).workstream, UNKNOWN_WORKSTREAM);
    }

    #[test]
    fn test_out_of_range_points_default() {
        for raw in [json!("inf"), json!("NaN"), json!(1e30), json!(u64::MAX), json!("20000")] {
            let i = issue(&[], json!({ "customfield_10003": raw }), None);
            assert_eq!(schema().extract_story(&i, None).story_points, 0, "{}", raw);
        }

        let i = issue(&[], json!({"customfield_10003": MAX_STORY_POINTS}), None);
        assert_eq!(schema().extract_story(&i, None).story_points, MAX_STORY_POINTS);
    }

    #[test]
    fn test_story_values() {
        let i = issue(
            &[],
            json!({
                "customfield_10003": 5.0,
                "customfield_20403": {"value": "Payments"},
                "customfield_11701": ["Sprint 1", "Sprint 2"]
            }),
            Some("Dana"),
        );
        let story = schema().extract_story(&i, Some("F-9"));
        assert_eq!(story.story_points, 5);
        assert_eq!(story.workstream, "Payments");
        assert_eq!(story.sprint.as_deref(), Some("Sprint 2"));
        assert_eq!(story.assignee, "Dana");
        assert_eq!(story.feature_link.as_deref(), Some("F-9"));
    }

    #[test]
    fn test_feature_link_resolution_order() {
        let s = schema();

        let both = issue(
            &[],
            json!({"customfield_11702": "F-1", "customfield_10008": "F-2"}),
            None,
        );
        assert_eq!(s.extract_story(&both, Some("F-3")).feature_link.as_deref(), Some("F-1"));

        let epic = issue(&[], json!({"customfield_10008": "F-2"}), None);
        assert_eq!(s.extract_story(&epic, Some("F-3")).feature_link.as_deref(), Some("F-2"));
    }

    #[test]
    fn test_greenhopper_sprint_string() {
        let raw = json!([
            "com.atlassian.greenhopper.service.sprint.Sprint@1f[id=12,rapidViewId=3,state=CLOSED,name=Sprint 7,startDate=2024-01-01]"
        ]);
        assert_eq!(parse_sprint(&raw), Some("Sprint 7".to_string()));
        assert_eq!(parse_sprint(&json!({"name": "Sprint 8"})), Some("Sprint 8".to_string()));
    }

    #[test]
    fn test_schema_validation() {
        let mut config = FieldsConfig::default();
        config.sprint = " ".to_string();
        assert_eq!(
            FieldSchema::new(&config).unwrap_err(),
            SchemaError::BlankId("sprint")
        );

        let mut config = FieldsConfig::default();
        config.epic_link = config.feature_link.clone();
        assert!(matches!(
            FieldSchema::new(&config),
            Err(SchemaError::DuplicateId {
                first: "feature_link",
                second: "epic_link",
                ..
            })
        ));
    }
}
