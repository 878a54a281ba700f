//! Offline issue source backed by a JSON export.
//!
//! The snapshot file holds `{"issues": [...]}` in the [`Issue`] shape.
//! Queries are evaluated client-side.

use super::{IssueSource, Query, SearchOptions, SourceError};
use crate::models::Issue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// On-disk snapshot layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub issues: Vec<Issue>,
}

/// Issue source that answers queries from an in-memory snapshot.
pub struct SnapshotSource {
    issues: Vec<Issue>,
    /// Fields this source refuses to filter on, emulating a server
    /// that lacks them.
    unsupported_fields: HashSet<String>,
}

impl SnapshotSource {
    pub fn new(issues: Vec<Issue>) -> Self {
        Self {
            issues,
            unsupported_fields: HashSet::new(),
        }
    }

    /// Load a snapshot file.
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SourceError::Unavailable(format!(
                "failed to read snapshot {}: {}",
                path.display(),
                e
            ))
        })?;

        let snapshot: Snapshot = serde_json::from_str(&content).map_err(|e| {
            SourceError::Unavailable(format!(
                "failed to parse snapshot {}: {}",
                path.display(),
                e
            ))
        })?;

        info!(
            "Loaded {} issues from snapshot {}",
            snapshot.issues.len(),
            path.display()
        );
        Ok(Self::new(snapshot.issues))
    }

    /// Reject any query that filters on one of `fields`.
    pub fn with_unsupported_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unsupported_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl IssueSource for SnapshotSource {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn search(
        &self,
        query: &Query,
        options: SearchOptions,
    ) -> Result<Vec<Issue>, SourceError> {
        if let Some(field) = query
            .fields()
            .into_iter()
            .find(|f| self.unsupported_fields.contains(*f))
        {
            return Err(SourceError::QueryRejected(format!(
                "field '{}' is not supported",
                field
            )));
        }

        let issues: Vec<Issue> = self
            .issues
            .iter()
            .filter(|issue| query.matches(issue))
            .take(options.max_results)
            .map(|issue| {
                let mut issue = issue.clone();
                if !options.expand_history {
                    issue.history = None;
                }
                issue
            })
            .collect();

        debug!("Snapshot query `{}` matched {} issues", query, issues.len());
        Ok(issues)
    }
}
