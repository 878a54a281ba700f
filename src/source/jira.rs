//! Jira Server REST (v2) issue source.

use super::{IssueSource, Query, SearchOptions, SourceError};
use crate::models::{HistoryEvent, Issue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Issue source that talks to a Jira Server instance.
pub struct JiraSource {
    server_url: String,
    token: Option<String>,
    http_client: reqwest::Client,
}

impl JiraSource {
    /// Create a client for `server_url`, authenticating with a personal
    /// access token when one is given.
    pub fn new(
        server_url: &str,
        token: Option<String>,
        timeout_seconds: u64,
    ) -> Result<Self, SourceError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| SourceError::Unavailable(format!("failed to create HTTP client: {}", e)))?;

        info!("Jira source configured for {}", server_url);

        Ok(Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            token,
            http_client,
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.server_url, path);
        let builder = self.http_client.get(url);
        match self.token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value, SourceError> {
        let response = builder.send().await.map_err(|e| {
            SourceError::Unavailable(format!("cannot reach {}: {}", self.server_url, e))
        })?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SourceError::Unavailable(format!(
                    "authentication failed ({})",
                    status
                )));
            }
            StatusCode::BAD_REQUEST => {
                let body: Value = response.json().await.unwrap_or(Value::Null);
                return Err(SourceError::QueryRejected(error_messages(&body)));
            }
            s if !s.is_success() => {
                return Err(SourceError::Unavailable(format!(
                    "server returned {}",
                    status
                )));
            }
            _ => {}
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Unavailable(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl IssueSource for JiraSource {
    fn name(&self) -> &str {
        "jira"
    }

    async fn search(
        &self,
        query: &Query,
        options: SearchOptions,
    ) -> Result<Vec<Issue>, SourceError> {
        let jql = query.to_jql();
        debug!("JQL: {}", jql);

        let mut issues = Vec::new();
        let mut start_at: usize = 0;
        loop {
            let remaining = options.max_results.saturating_sub(issues.len());
            let mut params = vec![
                ("jql", jql.clone()),
                ("startAt", start_at.to_string()),
                ("maxResults", remaining.to_string()),
            ];
            if options.expand_history {
                params.push(("expand", "changelog".to_string()));
            }

            let body = self
                .send(self.request("/rest/api/2/search").query(&params))
                .await?;
            let page = parse_search_page(&body)?;
            debug!(
                "Fetched {} issues at offset {} of {}",
                page.entries, page.start_at, page.total
            );

            let collected = issues.len() + page.issues.len();
            let next = next_start_at(&page, collected, options.max_results);
            let total = page.total;
            issues.extend(page.issues);

            match next {
                Some(offset) => start_at = offset,
                None => {
                    if total > options.max_results {
                        debug!(
                            "Query matched {} issues, keeping the first {}",
                            total, options.max_results
                        );
                    }
                    break;
                }
            }
        }

        issues.truncate(options.max_results);
        Ok(issues)
    }

    async fn check_connection(&self) -> Result<(), SourceError> {
        let body = self.send(self.request("/rest/api/2/myself")).await?;
        let user = body
            .get("displayName")
            .and_then(Value::as_str)
            .unwrap_or("unknown user");
        info!("Connected to {} as {}", self.server_url, user);
        Ok(())
    }
}

fn error_messages(body: &Value) -> String {
    let messages: Vec<&str> = body
        .get("errorMessages")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if messages.is_empty() {
        "bad request".to_string()
    } else {
        messages.join("; ")
    }
}

/// Parse a Jira timestamp (`2024-01-10T09:00:00.000+0000`) or RFC 3339.
pub fn parse_jira_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// One page of a `/search` response.
#[derive(Debug)]
pub struct SearchPage {
    /// Offset of the first entry on this page.
    pub start_at: usize,
    /// Number of issues the query matched on the server.
    pub total: usize,
    /// Entries on this page, malformed ones included.
    pub entries: usize,
    pub issues: Vec<Issue>,
}

/// Map a `/search` response body onto a page of issue records.
///
/// Issues without a key or a parseable creation date are skipped. A body
/// without `total` is treated as the last page.
pub fn parse_search_page(body: &Value) -> Result<SearchPage, SourceError> {
    let raw = body
        .get("issues")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Unavailable("response has no issues array".to_string()))?;

    let offset = |name: &str| {
        body.get(name)
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
    };
    let start_at = offset("startAt").unwrap_or(0);
    let total = offset("total").unwrap_or(start_at + raw.len());

    let mut issues = Vec::with_capacity(raw.len());
    for item in raw {
        match parse_issue(item) {
            Some(issue) => issues.push(issue),
            None => {
                let key = item
                    .get("key")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("<no key>");
                warn!("Skipping malformed issue: {}", key);
            }
        }
    }

    Ok(SearchPage {
        start_at,
        total,
        entries: raw.len(),
        issues,
    })
}

/// Offset of the next page to request, or `None` when the search is done.
///
/// The search stops on an empty page, once the server's total is reached,
/// or once `collected` issues reach `max_results`.
pub fn next_start_at(page: &SearchPage, collected: usize, max_results: usize) -> Option<usize> {
    if page.entries == 0 || collected >= max_results {
        return None;
    }
    let next = page.start_at + page.entries;
    (next < page.total).then_some(next)
}

fn parse_issue(item: &Value) -> Option<Issue> {
    let key = item.get("key")?.as_str()?.to_string();
    let fields = item.get("fields")?;

    let text = |name: &str, member: &str| -> Option<String> {
        fields
            .get(name)
            .and_then(|v| v.get(member))
            .and_then(Value::as_str)
            .map(String::from)
    };

    let created = fields
        .get("created")
        .and_then(Value::as_str)
        .and_then(parse_jira_timestamp)?;
    let updated = fields
        .get("updated")
        .and_then(Value::as_str)
        .and_then(parse_jira_timestamp)
        .unwrap_or(created);

    let labels = fields
        .get("labels")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default();

    let custom: HashMap<String, Value> = fields
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(k, v)| k.starts_with("customfield_") && !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    let history = item
        .get("changelog")
        .and_then(|c| c.get("histories"))
        .and_then(Value::as_array)
        .map(|histories| parse_histories(&key, histories));

    Some(Issue {
        summary: fields
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        issue_type: text("issuetype", "name").unwrap_or_default(),
        status: text("status", "name").unwrap_or_default(),
        assignee: text("assignee", "displayName"),
        labels,
        created,
        updated,
        fields: custom,
        history,
        key,
    })
}

fn parse_histories(key: &str, histories: &[Value]) -> Vec<HistoryEvent> {
    let mut events = Vec::new();
    for history in histories {
        let Some(timestamp) = history
            .get("created")
            .and_then(Value::as_str)
            .and_then(parse_jira_timestamp)
        else {
            continue;
        };

        let items = history
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for item in items {
            let Some(field) = item.get("field").and_then(Value::as_str) else {
                continue;
            };
            events.push(HistoryEvent {
                issue_key: key.to_string(),
                field: field.to_string(),
                from: item.get("fromString").and_then(Value::as_str).map(String::from),
                to: item.get("toString").and_then(Value::as_str).map(String::from),
                timestamp,
            });
        }
    }
    events
}
