//! Issue sources.
//!
//! The metrics engine only depends on the [`IssueSource`] capability:
//! run a filter query and hand back raw issue records. Two sources ship
//! with the tool, a JSON snapshot and a Jira Server REST client.

pub mod jira;
pub mod query;
pub mod snapshot;

pub use jira::JiraSource;
pub use query::Query;
pub use snapshot::SnapshotSource;

use crate::models::Issue;
use async_trait::async_trait;
use thiserror::Error;

/// Default cap on records returned by one query.
pub const DEFAULT_MAX_RESULTS: usize = 1000;

/// Options for a single search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// Include each issue's field-change history.
    pub expand_history: bool,
    /// Upper bound on the number of returned issues.
    pub max_results: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            expand_history: false,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// Failures reported by an issue source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source cannot be reached or refused our credentials.
    #[error("issue source unavailable: {0}")]
    Unavailable(String),

    /// The source rejected this particular query.
    #[error("query rejected: {0}")]
    QueryRejected(String),
}

impl SourceError {
    pub fn is_query_rejected(&self) -> bool {
        matches!(self, SourceError::QueryRejected(_))
    }
}

/// Something that can answer issue queries.
#[async_trait]
pub trait IssueSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run a query and return the matching issues.
    async fn search(&self, query: &Query, options: SearchOptions)
        -> Result<Vec<Issue>, SourceError>;

    /// Verify the source is reachable and accepts our credentials.
    async fn check_connection(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

#[async_trait]
impl<S: IssueSource + ?Sized> IssueSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn search(
        &self,
        query: &Query,
        options: SearchOptions,
    ) -> Result<Vec<Issue>, SourceError> {
        (**self).search(query, options).await
    }

    async fn check_connection(&self) -> Result<(), SourceError> {
        (**self).check_connection().await
    }
}
