//! Filter expressions understood by issue sources.
//!
//! A [`Query`] can be evaluated client-side against an [`Issue`] or
//! rendered as JQL for a Jira server.

use crate::models::{value_text, Issue};
use serde_json::Value;
use std::fmt;

/// Reserved field names for the built-in issue attributes.
pub const FIELD_ISSUE_TYPE: &str = "issuetype";
pub const FIELD_LABELS: &str = "labels";
pub const FIELD_STATUS: &str = "status";

/// A filter over issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    IssueType(String),
    Label(String),
    LabelIn(Vec<String>),
    Status(String),
    StatusIn(Vec<String>),
    FieldEquals { field: String, value: String },
    FieldNotEmpty(String),
    And(Vec<Query>),
    Or(Vec<Query>),
}

impl Query {
    pub fn issue_type(name: impl Into<String>) -> Self {
        Query::IssueType(name.into())
    }

    pub fn field_equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Combine with AND, flattening nested conjunctions.
    pub fn and(self, other: Query) -> Self {
        let mut parts = match self {
            Query::And(parts) => parts,
            q => vec![q],
        };
        match other {
            Query::And(more) => parts.extend(more),
            q => parts.push(q),
        }
        Query::And(parts)
    }

    /// Combine with OR, flattening nested disjunctions.
    pub fn or(self, other: Query) -> Self {
        let mut parts = match self {
            Query::Or(parts) => parts,
            q => vec![q],
        };
        match other {
            Query::Or(more) => parts.extend(more),
            q => parts.push(q),
        }
        Query::Or(parts)
    }

    /// Evaluate the filter against a single issue.
    pub fn matches(&self, issue: &Issue) -> bool {
        match self {
            Query::IssueType(t) => issue.issue_type == *t,
            Query::Label(l) => issue.labels.iter().any(|x| x == l),
            Query::LabelIn(ls) => issue.labels.iter().any(|x| ls.contains(x)),
            Query::Status(s) => issue.status == *s,
            Query::StatusIn(ss) => ss.contains(&issue.status),
            Query::FieldEquals { field, value } => issue
                .field(field)
                .is_some_and(|v| value_matches(v, value)),
            Query::FieldNotEmpty(field) => issue.field(field).is_some_and(value_is_present),
            Query::And(parts) => parts.iter().all(|q| q.matches(issue)),
            Query::Or(parts) => parts.iter().any(|q| q.matches(issue)),
        }
    }

    /// Every field name the filter refers to, built-ins included.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Query::IssueType(_) => out.push(FIELD_ISSUE_TYPE),
            Query::Label(_) | Query::LabelIn(_) => out.push(FIELD_LABELS),
            Query::Status(_) | Query::StatusIn(_) => out.push(FIELD_STATUS),
            Query::FieldEquals { field, .. } | Query::FieldNotEmpty(field) => out.push(field),
            Query::And(parts) | Query::Or(parts) => {
                for q in parts {
                    q.collect_fields(out);
                }
            }
        }
    }

    /// Render the filter as JQL.
    pub fn to_jql(&self) -> String {
        match self {
            Query::IssueType(t) => format!("issuetype = {}", quote(t)),
            Query::Label(l) => format!("labels = {}", quote(l)),
            Query::LabelIn(ls) => format!("labels in ({})", quote_list(ls)),
            Query::Status(s) => format!("status = {}", quote(s)),
            Query::StatusIn(ss) => format!("status in ({})", quote_list(ss)),
            Query::FieldEquals { field, value } => {
                format!("{} = {}", jql_field(field), quote(value))
            }
            Query::FieldNotEmpty(field) => format!("{} is not EMPTY", jql_field(field)),
            Query::And(parts) => join(parts, " AND ", |q| matches!(q, Query::Or(_))),
            Query::Or(parts) => join(parts, " OR ", |q| matches!(q, Query::And(_))),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_jql())
    }
}

fn value_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|v| value_matches(v, expected)),
        v => value_text(v).is_some_and(|t| t == expected),
    }
}

fn value_is_present(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(value_is_present),
        v => value_text(v).is_some_and(|t| !t.trim().is_empty()),
    }
}

fn join(parts: &[Query], sep: &str, needs_parens: impl Fn(&Query) -> bool) -> String {
    parts
        .iter()
        .map(|q| {
            if needs_parens(q) {
                format!("({})", q.to_jql())
            } else {
                q.to_jql()
            }
        })
        .collect::<Vec<_>>()
        .join(sep)
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn quote_list(items: &[String]) -> String {
    items.iter().map(|s| quote(s)).collect::<Vec<_>>().join(", ")
}

/// Custom fields are addressed as `cf[id]`; anything else is quoted by name.
fn jql_field(field: &str) -> String {
    match field.strip_prefix("customfield_") {
        Some(id) if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) => {
            format!("cf[{}]", id)
        }
        _ if field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => field.to_string(),
        _ => quote(field),
    }
}
