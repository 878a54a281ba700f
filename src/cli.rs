//! Command-line interface argument parsing.
//!
//! Global flags select and configure the issue source; each subcommand
//! computes one metric table.

use crate::analysis::timeseries::MAX_WINDOW_DAYS;
use crate::config::SourceKind;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// pimetrics - delivery metrics for SAFe programs tracked in Jira
///
/// Computes PI completion, ART predictability scores, sprint velocity,
/// cycle time and burndown from a Jira server or a JSON snapshot.
///
/// Examples:
///   pimetrics --snapshot issues.json pis
///   pimetrics overview --pi PI-4_Platform --workstream Web
///   pimetrics --source jira --server https://jira.example.com arts --pi PI-4
///   pimetrics timeline --pi PI-4 --format json
///   pimetrics burndown --workstream Web --sprint "Sprint 3" --start 2024-01-01
///   pimetrics --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .pimetrics.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Issue source to read from
    #[arg(long, value_name = "KIND", global = true)]
    pub source: Option<SourceKind>,

    /// JSON snapshot file for the snapshot source
    #[arg(long, value_name = "FILE", global = true)]
    pub snapshot: Option<PathBuf>,

    /// Jira server base URL
    #[arg(long, value_name = "URL", global = true)]
    pub server: Option<String>,

    /// Jira API token (bearer)
    #[arg(long, value_name = "TOKEN", global = true, env = "JIRA_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT", global = true)]
    pub format: OutputFormat,

    /// Write the report to this file instead of stdout
    #[arg(short, long, value_name = "FILE", global = true)]
    pub output: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Maximum number of issues returned by one query
    #[arg(long, value_name = "COUNT", global = true)]
    pub max_results: Option<usize>,

    /// Number of concurrent per-feature story queries
    #[arg(long, value_name = "NUM", global = true)]
    pub concurrency: Option<usize>,

    /// Recognized PI labels (comma-separated)
    ///
    /// Example: --pi-labels PI-3,PI-4
    #[arg(long, value_name = "LABELS", value_delimiter = ',', global = true)]
    pub pi_labels: Option<Vec<String>>,

    /// Generate a default .pimetrics.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Metric commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// List PI labels found on features
    Pis,

    /// List every workstream with at least one issue
    Workstreams,

    /// Feature and story completion for a PI
    Overview {
        /// PI label, e.g. PI-4 or PI-4_Platform
        #[arg(long)]
        pi: String,

        /// Only count stories of this workstream
        #[arg(long)]
        workstream: Option<String>,
    },

    /// ART scorecard and PI health
    Arts {
        #[arg(long)]
        pi: String,
    },

    /// Features of a PI, or the workstream breakdown of one feature
    Features {
        #[arg(long)]
        pi: String,

        /// Feature key to break down by workstream
        #[arg(long, value_name = "KEY")]
        feature: Option<String>,
    },

    /// Stories of a PI's features in update order
    Timeline {
        #[arg(long)]
        pi: String,
    },

    /// Sprint velocity of a workstream
    Velocity {
        #[arg(long)]
        workstream: String,

        /// Number of most recent sprints (default from config)
        #[arg(long, value_name = "N")]
        sprints: Option<usize>,
    },

    /// Cycle time of a workstream's completed issues
    CycleTime {
        #[arg(long)]
        workstream: String,
    },

    /// Daily burndown of one sprint
    Burndown {
        #[arg(long)]
        workstream: String,

        #[arg(long)]
        sprint: String,

        /// First day of the window (default: today minus the sprint length)
        #[arg(long, value_name = "YYYY-MM-DD")]
        start: Option<NaiveDate>,

        /// Window length in days (default from config)
        #[arg(long, value_name = "N")]
        days: Option<u32>,
    },
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown tables (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.command.is_none() {
            return Err("A command is required (try --help)".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.max_results == Some(0) {
            return Err("Max results must be at least 1".to_string());
        }

        if let Some(ref server) = self.server {
            if !server.starts_with("http://") && !server.starts_with("https://") {
                return Err("Server URL must start with 'http://' or 'https://'".to_string());
            }
        }

        match self.command {
            Some(Commands::Velocity {
                sprints: Some(0), ..
            }) => return Err("--sprints must be at least 1".to_string()),
            Some(Commands::Burndown { days: Some(0), .. }) => {
                return Err("--days must be at least 1".to_string())
            }
            Some(Commands::Burndown {
                days: Some(days), ..
            }) if days > MAX_WINDOW_DAYS => {
                return Err(format!("--days must be at most {}", MAX_WINDOW_DAYS))
            }
            _ => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("pimetrics").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_subcommand_with_global_flags() {
        let args = parse(&["overview", "--pi", "PI-4", "--format", "json", "--snapshot", "x.json"]);
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.snapshot, Some(PathBuf::from("x.json")));
        assert_eq!(
            args.command,
            Some(Commands::Overview {
                pi: "PI-4".to_string(),
                workstream: None
            })
        );
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_parse_burndown_start_date() {
        let args = parse(&[
            "burndown",
            "--workstream",
            "Web",
            "--sprint",
            "Sprint 3",
            "--start",
            "2024-01-01",
        ]);
        match args.command {
            Some(Commands::Burndown { start, days, .. }) => {
                assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 1));
                assert_eq!(days, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_timeline() {
        let args = parse(&["timeline", "--pi", "PI-4"]);
        assert!(matches!(args.command, Some(Commands::Timeline { ref pi }) if pi == "PI-4"));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_pi_labels_are_comma_separated() {
        let args = parse(&["--pi-labels", "PI-3,PI-4", "pis"]);
        assert_eq!(
            args.pi_labels,
            Some(vec!["PI-3".to_string(), "PI-4".to_string()])
        );
    }

    #[test]
    fn test_validation_requires_command() {
        let args = parse(&[]);
        assert!(args.validate().is_err());

        let init = parse(&["--init-config"]);
        assert!(init.validate().is_ok());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let args = parse(&["-v", "-q", "pis"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        assert!(parse(&["--concurrency", "0", "pis"]).validate().is_err());
        assert!(parse(&["velocity", "--workstream", "Web", "--sprints", "0"])
            .validate()
            .is_err());
        assert!(parse(&["--server", "jira.example.com", "pis"]).validate().is_err());
    }

    #[test]
    fn test_validation_bounds_burndown_window() {
        let burndown = |days: &str| {
            parse(&["burndown", "--workstream", "Web", "--sprint", "Sprint 1", "--days", days])
                .validate()
        };
        assert!(burndown("4000000000").is_err());
        assert!(burndown("367").is_err());
        assert!(burndown("366").is_ok());
        assert!(burndown("14").is_ok());
    }

    #[test]
    fn test_log_level() {
        let mut args = parse(&["pis"]);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
