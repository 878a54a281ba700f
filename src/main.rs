//! pimetrics - SAFe delivery metrics from Jira issue data
//!
//! A CLI tool that reads features and stories from a Jira server or a
//! JSON snapshot and reports PI completion, ART predictability,
//! velocity, cycle time and burndown.
//!
//! Exit codes:
//!   0 - Success (including an empty result)
//!   1 - Runtime error (source unreachable, bad config, write failure, etc.)

mod analysis;
mod cli;
mod config;
mod engine;
mod extract;
mod models;
mod report;
mod source;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use cli::{Args, Commands, OutputFormat};
use config::{Config, SourceKind, CONFIG_FILE};
use engine::{EngineSettings, MetricsEngine, RequestContext};
use extract::FieldSchema;
use report::{FeatureRow, GroupRow, Report, ReportBody, ReportMetadata};
use source::{IssueSource, JiraSource, SnapshotSource, SourceError};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("pimetrics v{}", env!("CARGO_PKG_VERSION"));
    debug!("Command: {:?}", args.command);

    if let Err(e) = run(args).await {
        match e.downcast_ref::<SourceError>() {
            Some(SourceError::Unavailable(msg)) => {
                error!("Issue source unavailable: {}", msg);
                eprintln!("\nError: cannot reach the issue source: {}", msg);
            }
            _ => {
                error!("Command failed: {:#}", e);
                eprintln!("\nError: {:#}", e);
            }
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .pimetrics.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set the source, custom field ids and done statuses.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

/// Build the configured issue source.
fn build_source(config: &Config, token: Option<String>) -> Result<Box<dyn IssueSource>> {
    match config.source.kind {
        SourceKind::Snapshot => {
            let source = SnapshotSource::load(&config.source.snapshot_path)?
                .with_unsupported_fields(config.source.unsupported_fields.iter().cloned());
            Ok(Box::new(source))
        }
        SourceKind::Jira => {
            let server_url = config
                .source
                .server_url
                .as_deref()
                .context("the jira source needs a server URL")?;
            if token.is_none() {
                warn!("No JIRA_API_TOKEN set, sending unauthenticated requests");
            }
            let source = JiraSource::new(server_url, token, config.source.timeout_seconds)?;
            Ok(Box::new(source))
        }
    }
}

/// Run one command end to end.
async fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;

    let Some(command) = args.command.clone() else {
        anyhow::bail!("no command given");
    };

    let schema = FieldSchema::new(&config.fields).context("Invalid [fields] configuration")?;
    let source = build_source(&config, args.token.clone())?;
    let source_name = source.name().to_string();

    let settings = EngineSettings {
        max_results: config.source.max_results,
        concurrency: config.source.concurrency,
        done: config.metrics.done_statuses.clone(),
        pi_labels: config.metrics.pi_labels.clone(),
        show_progress: !args.quiet,
        ..EngineSettings::default()
    };
    let engine = MetricsEngine::new(source, schema, settings);
    let ctx = RequestContext::new(Duration::from_millis(config.metrics.slow_operation_ms));

    engine.check_connection(&ctx).await?;

    let body = dispatch(&engine, &ctx, &config, command).await?;

    if let ReportBody::PiList { pis } = &body {
        if pis.is_empty() {
            println!("No PI labels found");
            return Ok(());
        }
    }

    let report = Report {
        metadata: ReportMetadata {
            generated_at: Utc::now(),
            source: source_name,
            request_id: ctx.id().to_string(),
            duration_seconds: ctx.elapsed().as_secs_f64(),
        },
        body,
    };

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };

    match args.output {
        Some(ref path) => {
            std::fs::write(path, &output)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!("Report saved to: {}", path.display());
        }
        None => println!("{}", output),
    }

    Ok(())
}

/// Compute the report body for `command`.
async fn dispatch<S: IssueSource>(
    engine: &MetricsEngine<S>,
    ctx: &RequestContext,
    config: &Config,
    command: Commands,
) -> Result<ReportBody> {
    let body = match command {
        Commands::Pis => ReportBody::PiList {
            pis: engine.available_pis(ctx).await?,
        },

        Commands::Workstreams => ReportBody::Workstreams {
            workstreams: engine.all_workstreams(ctx).await?,
        },

        Commands::Overview { pi, workstream } => ReportBody::Overview {
            metrics: engine.pi_metrics(ctx, &pi, workstream.as_deref()).await?,
        },

        Commands::Arts { pi } => {
            let card = engine.art_scorecard(ctx, &pi).await?;
            ReportBody::ArtScorecard {
                pi_label: pi,
                health: card.health,
                scores: card.scores,
                art_summary: GroupRow::from_pairs(card.summary),
            }
        }

        Commands::Features {
            feature: Some(key), ..
        } => {
            let breakdown = engine.feature_breakdown(ctx, &key).await?;
            ReportBody::FeatureBreakdown {
                feature_key: breakdown.feature_key,
                workstreams: GroupRow::from_pairs(breakdown.workstreams),
                stories: breakdown.stories,
            }
        }

        Commands::Features { pi, feature: None } => {
            let rows = engine.feature_rollups(ctx, &pi).await?;
            ReportBody::Features {
                pi_label: pi,
                features: rows
                    .into_iter()
                    .map(|(feature, stories)| FeatureRow { feature, stories })
                    .collect(),
            }
        }

        Commands::Timeline { pi } => ReportBody::Timeline {
            rows: engine.pi_timeline(ctx, &pi).await?,
            pi_label: pi,
        },

        Commands::Velocity {
            workstream,
            sprints,
        } => {
            let num_sprints = sprints.unwrap_or(config.metrics.velocity_sprints);
            let points = engine.velocity(ctx, &workstream, num_sprints).await?;
            let summary = analysis::summarize_velocity(&points);
            ReportBody::Velocity {
                workstream,
                sprints: points,
                summary,
            }
        }

        Commands::CycleTime { workstream } => {
            let records = engine.cycle_times(ctx, &workstream).await?;
            ReportBody::CycleTime {
                average_days: analysis::average_cycle_time(&records),
                workstream,
                records,
            }
        }

        Commands::Burndown {
            workstream,
            sprint,
            start,
            days,
        } => {
            let days = days.unwrap_or(config.metrics.sprint_length_days);
            let start = start.unwrap_or_else(|| default_window_start(Utc::now().date_naive(), days));
            let points = engine
                .burndown(ctx, &workstream, &sprint, start, days)
                .await?;
            ReportBody::Burndown {
                workstream,
                sprint,
                points,
            }
        }
    };

    Ok(body)
}

/// Burndown window start when none is given: `days` before `today`.
fn default_window_start(today: NaiveDate, days: u32) -> NaiveDate {
    today - ChronoDuration::days(i64::from(days))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_window_start() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(
            default_window_start(today, 14),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
    }

    #[test]
    fn test_build_snapshot_source_reports_missing_file() {
        let mut config = Config::default();
        config.source.snapshot_path = "/nonexistent/issues.json".into();
        let err = match build_source(&config, None) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::Unavailable(_))
        ));
    }
}
