//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.pimetrics.toml` files.

use crate::analysis::timeseries::{DEFAULT_WINDOW_DAYS, MAX_WINDOW_DAYS};
use crate::models::StatusSet;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".pimetrics.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Issue source settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Custom field ids.
    #[serde(default)]
    pub fields: FieldsConfig,

    /// Metric settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Which issue source to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// JSON snapshot on disk
    #[default]
    Snapshot,
    /// Jira Server REST API
    Jira,
}

/// Issue source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,

    /// Path of the JSON snapshot (snapshot source).
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Jira server URL (jira source).
    #[serde(default)]
    pub server_url: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Maximum records returned by one query.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Concurrent per-feature story queries.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Fields the snapshot source refuses to filter on.
    #[serde(default)]
    pub unsupported_fields: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            snapshot_path: default_snapshot_path(),
            server_url: None,
            timeout_seconds: default_timeout(),
            max_results: default_max_results(),
            concurrency: default_concurrency(),
            unsupported_fields: Vec::new(),
        }
    }
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("issues.json")
}

fn default_timeout() -> u64 {
    30
}

fn default_max_results() -> usize {
    1000
}

fn default_concurrency() -> usize {
    4
}

/// Custom field ids read by the field extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldsConfig {
    #[serde(default = "default_story_points")]
    pub story_points: String,

    #[serde(default = "default_workstream")]
    pub workstream: String,

    #[serde(default = "default_sprint")]
    pub sprint: String,

    /// Direct story-to-feature link.
    #[serde(default = "default_feature_link")]
    pub feature_link: String,

    /// Epic link, used when the direct link is empty.
    #[serde(default = "default_epic_link")]
    pub epic_link: String,

    #[serde(default = "default_business_benefit")]
    pub business_benefit: String,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            story_points: default_story_points(),
            workstream: default_workstream(),
            sprint: default_sprint(),
            feature_link: default_feature_link(),
            epic_link: default_epic_link(),
            business_benefit: default_business_benefit(),
        }
    }
}

fn default_story_points() -> String {
    "customfield_10003".to_string()
}

fn default_workstream() -> String {
    "customfield_20403".to_string()
}

fn default_sprint() -> String {
    "customfield_11701".to_string()
}

fn default_feature_link() -> String {
    "customfield_11702".to_string()
}

fn default_epic_link() -> String {
    "customfield_10008".to_string()
}

fn default_business_benefit() -> String {
    "customfield_11800".to_string()
}

/// Metric settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Recognized PI labels. Empty means any `PI-` label.
    #[serde(default)]
    pub pi_labels: Vec<String>,

    /// Statuses that count as done.
    #[serde(default)]
    pub done_statuses: StatusSet,

    /// Sprint window length in days.
    #[serde(default = "default_sprint_length")]
    pub sprint_length_days: u32,

    /// Number of recent sprints in velocity reports.
    #[serde(default = "default_velocity_sprints")]
    pub velocity_sprints: usize,

    /// Calls slower than this are logged as slow operations.
    #[serde(default = "default_slow_operation_ms")]
    pub slow_operation_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            pi_labels: Vec::new(),
            done_statuses: StatusSet::default(),
            sprint_length_days: default_sprint_length(),
            velocity_sprints: default_velocity_sprints(),
            slow_operation_ms: default_slow_operation_ms(),
        }
    }
}

fn default_sprint_length() -> u32 {
    DEFAULT_WINDOW_DAYS
}

fn default_velocity_sprints() -> usize {
    5
}

fn default_slow_operation_ms() -> u64 {
    2000
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// Only explicitly provided values override.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(kind) = args.source {
            self.source.kind = kind;
        }
        if let Some(ref path) = args.snapshot {
            self.source.snapshot_path = path.clone();
        }
        if let Some(ref server) = args.server {
            self.source.server_url = Some(server.clone());
        }
        if let Some(max_results) = args.max_results {
            self.source.max_results = max_results;
        }
        if let Some(concurrency) = args.concurrency {
            self.source.concurrency = concurrency;
        }
        if let Some(ref labels) = args.pi_labels {
            self.metrics.pi_labels = labels.clone();
        }
    }

    /// Check values that serde cannot constrain.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.source.max_results > 0, "max_results must be at least 1");
        ensure!(self.source.concurrency > 0, "concurrency must be at least 1");
        ensure!(
            self.source.timeout_seconds > 0,
            "timeout_seconds must be at least 1"
        );
        ensure!(
            !self.metrics.done_statuses.is_empty(),
            "done_statuses must name at least one status"
        );
        ensure!(
            self.metrics.sprint_length_days > 0,
            "sprint_length_days must be at least 1"
        );
        ensure!(
            self.metrics.sprint_length_days <= MAX_WINDOW_DAYS,
            "sprint_length_days must be at most {}",
            MAX_WINDOW_DAYS
        );
        ensure!(
            self.metrics.velocity_sprints > 0,
            "velocity_sprints must be at least 1"
        );
        if self.source.kind == SourceKind::Jira {
            ensure!(
                self.source.server_url.is_some(),
                "the jira source needs a server URL (--server or source.server_url)"
            );
        }
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.source.max_results, 1000);
        assert_eq!(config.metrics.sprint_length_days, 14);
        assert!(config.metrics.done_statuses.contains("Done"));
        assert!(config.metrics.done_statuses.contains("Closed"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[source]
kind = "jira"
server_url = "https://jira.example.com"
max_results = 500

[fields]
workstream = "customfield_30000"

[metrics]
pi_labels = ["PI-1", "PI-2"]
done_statuses = ["Done", "Resolved"]
sprint_length_days = 10
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.source.kind, SourceKind::Jira);
        assert_eq!(config.source.max_results, 500);
        assert_eq!(config.source.concurrency, 4);
        assert_eq!(config.fields.workstream, "customfield_30000");
        assert_eq!(config.fields.story_points, "customfield_10003");
        assert_eq!(config.metrics.pi_labels, vec!["PI-1", "PI-2"]);
        assert!(config.metrics.done_statuses.contains("Resolved"));
        assert!(!config.metrics.done_statuses.contains("Closed"));
        assert_eq!(config.metrics.sprint_length_days, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.metrics.sprint_length_days = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.metrics.sprint_length_days = u32::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.source.kind = SourceKind::Jira;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.metrics.done_statuses = StatusSet::new(Vec::<String>::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[source]"));
        assert!(toml_str.contains("[fields]"));
        assert!(toml_str.contains("[metrics]"));
    }
}
