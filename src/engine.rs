//! Request orchestration.
//!
//! [`MetricsEngine`] runs the queries a metric needs against an
//! [`IssueSource`], extracts typed records and hands them to the pure
//! functions in [`crate::analysis`]. Each CLI invocation gets its own
//! [`RequestContext`]; nothing is cached between requests.

use crate::analysis::{self, GroupKeyPolicy, ReplayItem, ScoreWeights};
use crate::extract::FieldSchema;
use crate::models::{
    ArtScore, BurndownPoint, CycleTimeRecord, Dimension, Feature, PiHealth,
    PiMetrics, Rollup, StatusSet, Story, TimelineRow, VelocityPoint,
};
use crate::source::{IssueSource, Query, SearchOptions, SourceError};
use chrono::{NaiveDate, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Per-request logging context.
///
/// Wraps each source call in a tracing span tagged with the request id
/// and flags calls slower than the configured threshold.
#[derive(Debug, Clone)]
pub struct RequestContext {
    id: String,
    started: Instant,
    slow_threshold: Duration,
}

impl RequestContext {
    pub fn new(slow_threshold: Duration) -> Self {
        let id = format!(
            "{:x}-{:x}",
            Utc::now().timestamp_millis(),
            std::process::id()
        );
        Self {
            id,
            started: Instant::now(),
            slow_threshold,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Time since the request started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Run `fut` inside a span for `operation`, logging its outcome.
    pub async fn traced<T, E, F>(&self, operation: &str, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let span = info_span!("op", request = %self.id, operation);
        let started = Instant::now();
        let result = fut.instrument(span).await;
        let elapsed = started.elapsed();

        match result {
            Ok(_) if elapsed > self.slow_threshold => warn!(
                "SLOW OPERATION: {} took {:.3}s",
                operation,
                elapsed.as_secs_f64()
            ),
            Ok(_) => debug!("{} completed in {:.3}s", operation, elapsed.as_secs_f64()),
            Err(ref e) => warn!(
                "{} failed after {:.3}s: {}",
                operation,
                elapsed.as_secs_f64(),
                e
            ),
        }
        result
    }
}

/// Engine-wide settings, taken from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_results: usize,
    pub concurrency: usize,
    pub done: StatusSet,
    pub pi_labels: Vec<String>,
    pub weights: ScoreWeights,
    pub show_progress: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_results: crate::source::DEFAULT_MAX_RESULTS,
            concurrency: 4,
            done: StatusSet::default(),
            pi_labels: Vec::new(),
            weights: ScoreWeights::default(),
            show_progress: false,
        }
    }
}

/// Stories of one feature plus their workstream breakdown.
#[derive(Debug, Clone)]
pub struct FeatureBreakdown {
    pub feature_key: String,
    pub stories: Vec<Story>,
    pub workstreams: Vec<(String, Rollup)>,
}

/// ART scorecard of one PI.
#[derive(Debug, Clone)]
pub struct ArtScorecard {
    pub health: PiHealth,
    pub scores: Vec<ArtScore>,
    pub summary: BTreeMap<String, Rollup>,
}

/// Computes metrics on demand from an issue source.
pub struct MetricsEngine<S> {
    source: S,
    schema: FieldSchema,
    settings: EngineSettings,
}

impl<S: IssueSource> MetricsEngine<S> {
    pub fn new(source: S, schema: FieldSchema, settings: EngineSettings) -> Self {
        info!(
            "Metrics engine using {} source (max {} results per query)",
            source.name(),
            settings.max_results
        );
        Self {
            source,
            schema,
            settings,
        }
    }

    async fn search(
        &self,
        ctx: &RequestContext,
        operation: &str,
        query: Query,
        expand_history: bool,
    ) -> Result<Vec<crate::models::Issue>, SourceError> {
        let options = SearchOptions {
            expand_history,
            max_results: self.settings.max_results,
        };
        debug!("{}: {}", operation, query);
        let issues = ctx
            .traced(operation, self.source.search(&query, options))
            .await?;
        if issues.len() >= self.settings.max_results {
            warn!(
                "{}: result cap of {} reached, metrics may be incomplete",
                operation, self.settings.max_results
            );
        }
        Ok(issues)
    }

    /// Verify the source is reachable before computing anything.
    pub async fn check_connection(&self, ctx: &RequestContext) -> Result<(), SourceError> {
        ctx.traced("check_connection", self.source.check_connection())
            .await
    }

    /// Features carrying `pi_label`.
    pub async fn features_by_pi(
        &self,
        ctx: &RequestContext,
        pi_label: &str,
    ) -> Result<Vec<Feature>, SourceError> {
        let query = Query::issue_type("Feature").and(Query::Label(pi_label.to_string()));
        let issues = self.search(ctx, "features_by_pi", query, false).await?;
        Ok(issues
            .iter()
            .map(|i| self.schema.extract_feature(i))
            .collect())
    }

    /// Stories linked to `feature_key` via the link or epic-link field.
    pub async fn stories_for_feature(
        &self,
        ctx: &RequestContext,
        feature_key: &str,
    ) -> Result<Vec<Story>, SourceError> {
        let query = Query::field_equals(&self.schema.feature_link.id, feature_key)
            .or(Query::field_equals(&self.schema.epic_link.id, feature_key));
        let issues = self.search(ctx, "stories_for_feature", query, false).await?;
        Ok(issues
            .iter()
            .map(|i| self.schema.extract_story(i, Some(feature_key)))
            .collect())
    }

    /// One story query per feature, run with bounded concurrency.
    async fn stories_by_feature(
        &self,
        ctx: &RequestContext,
        features: &[Feature],
    ) -> Result<HashMap<String, Vec<Story>>, SourceError> {
        let progress = self.progress_bar(features.len() as u64);

        let result = stream::iter(features.iter().map(|feature| {
            let progress = &progress;
            async move {
                let stories = self.stories_for_feature(ctx, &feature.key).await?;
                progress.inc(1);
                Ok::<_, SourceError>((feature.key.clone(), stories))
            }
        }))
        .buffer_unordered(self.settings.concurrency.max(1))
        .try_collect::<HashMap<_, _>>()
        .await;

        progress.finish_and_clear();
        result
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} features",
        )
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }

    /// PI labels present on features, sorted.
    ///
    /// With preferred labels configured, a targeted query is tried first.
    /// If the source rejects it, all features are scanned and filtered
    /// locally, which yields the same label set.
    pub async fn available_pis(&self, ctx: &RequestContext) -> Result<Vec<String>, SourceError> {
        let preferred = &self.settings.pi_labels;

        if !preferred.is_empty() {
            let labels = preferred
                .iter()
                .map(|l| Query::Label(l.clone()))
                .reduce(Query::or)
                .unwrap_or_else(|| Query::LabelIn(preferred.clone()));
            let query = Query::issue_type("Feature").and(labels);

            match self.search(ctx, "available_pis", query, false).await {
                Ok(issues) => {
                    let found = analysis::collect_pi_labels(
                        issues.iter().flat_map(|i| &i.labels),
                        preferred,
                    );
                    return Ok(found.into_iter().collect());
                }
                Err(e) if e.is_query_rejected() => {
                    warn!("Targeted PI query rejected ({}), scanning all features", e);
                }
                Err(e) => return Err(e),
            }
        }

        let issues = self
            .search(ctx, "available_pis_scan", Query::issue_type("Feature"), false)
            .await?;
        let found =
            analysis::collect_pi_labels(issues.iter().flat_map(|i| &i.labels), preferred);
        Ok(found.into_iter().collect())
    }

    /// Every workstream with at least one issue, sorted with `Unknown` last.
    pub async fn all_workstreams(&self, ctx: &RequestContext) -> Result<Vec<String>, SourceError> {
        let query = Query::FieldNotEmpty(self.schema.workstream.id.clone());
        let issues = self.search(ctx, "all_workstreams", query, false).await?;
        Ok(analysis::sort_workstreams(
            issues.iter().map(|i| self.schema.workstream.read(i)),
        ))
    }

    /// PI totals, optionally narrowed to one workstream's stories.
    pub async fn pi_metrics(
        &self,
        ctx: &RequestContext,
        pi_label: &str,
        workstream: Option<&str>,
    ) -> Result<PiMetrics, SourceError> {
        let features = self.features_by_pi(ctx, pi_label).await?;
        let stories = self.stories_by_feature(ctx, &features).await?;
        Ok(analysis::summarize_pi(
            pi_label,
            &features,
            &stories,
            workstream,
            &self.settings.done,
        ))
    }

    /// ART scorecard, PI health and per-ART feature counts.
    ///
    /// Features and stories are fetched once and shared by all three
    /// tables. Features without an ART are left out of the counts.
    pub async fn art_scorecard(
        &self,
        ctx: &RequestContext,
        pi_label: &str,
    ) -> Result<ArtScorecard, SourceError> {
        let features = self.features_by_pi(ctx, pi_label).await?;
        let stories = self.stories_by_feature(ctx, &features).await?;
        let done = &self.settings.done;

        let objectives = analysis::art_objectives(&features, &stories, done);
        debug!("Grouping {} features by {}", features.len(), Dimension::Art);
        Ok(ArtScorecard {
            health: analysis::pi_health(&objectives),
            scores: analysis::art_scores(&objectives, &self.settings.weights),
            summary: analysis::aggregate(&features, Dimension::Art, GroupKeyPolicy::Drop, done),
        })
    }

    /// Every feature of a PI with a rollup of its stories.
    pub async fn feature_rollups(
        &self,
        ctx: &RequestContext,
        pi_label: &str,
    ) -> Result<Vec<(Feature, Rollup)>, SourceError> {
        let features = self.features_by_pi(ctx, pi_label).await?;
        let stories = self.stories_by_feature(ctx, &features).await?;
        Ok(features
            .into_iter()
            .map(|f| {
                let r = stories
                    .get(&f.key)
                    .map(|s| analysis::rollup::rollup(s, &self.settings.done))
                    .unwrap_or_default();
                (f, r)
            })
            .collect())
    }

    /// Stories of a PI's features in update order.
    pub async fn pi_timeline(
        &self,
        ctx: &RequestContext,
        pi_label: &str,
    ) -> Result<Vec<TimelineRow>, SourceError> {
        let features = self.features_by_pi(ctx, pi_label).await?;
        let stories = self.stories_by_feature(ctx, &features).await?;
        Ok(analysis::pi_timeline(&features, &stories))
    }

    /// Stories of one feature with their workstream breakdown.
    pub async fn feature_breakdown(
        &self,
        ctx: &RequestContext,
        feature_key: &str,
    ) -> Result<FeatureBreakdown, SourceError> {
        let stories = self.stories_for_feature(ctx, feature_key).await?;
        let workstreams = analysis::workstream_breakdown(&stories, &self.settings.done);
        Ok(FeatureBreakdown {
            feature_key: feature_key.to_string(),
            stories,
            workstreams,
        })
    }

    /// Velocity of a workstream over its most recent sprints.
    pub async fn velocity(
        &self,
        ctx: &RequestContext,
        workstream: &str,
        num_sprints: usize,
    ) -> Result<Vec<VelocityPoint>, SourceError> {
        let query = Query::field_equals(&self.schema.workstream.id, workstream)
            .and(Query::FieldNotEmpty(self.schema.sprint.id.clone()));
        let issues = self.search(ctx, "velocity", query, false).await?;
        let stories: Vec<Story> = issues
            .iter()
            .map(|i| self.schema.extract_story(i, None))
            .collect();
        Ok(analysis::build_velocity(
            &stories,
            workstream,
            &self.settings.done,
            num_sprints,
        ))
    }

    /// Cycle times of a workstream's completed issues.
    ///
    /// Issues with no recorded transition into done are left out.
    pub async fn cycle_times(
        &self,
        ctx: &RequestContext,
        workstream: &str,
    ) -> Result<Vec<CycleTimeRecord>, SourceError> {
        let query = Query::field_equals(&self.schema.workstream.id, workstream)
            .and(Query::StatusIn(self.settings.done.as_slice().to_vec()));
        let issues = self.search(ctx, "cycle_times", query, true).await?;

        let records: Vec<CycleTimeRecord> = issues
            .iter()
            .filter_map(|i| {
                analysis::cycle_time_record(
                    &i.key,
                    i.created,
                    i.history(),
                    self.schema.story_points.read(i),
                    &self.settings.done,
                )
            })
            .collect();

        if records.len() < issues.len() {
            debug!(
                "{} of {} issues have no done transition and were excluded",
                issues.len() - records.len(),
                issues.len()
            );
        }
        Ok(records)
    }

    /// Burndown of one sprint of a workstream.
    pub async fn burndown(
        &self,
        ctx: &RequestContext,
        workstream: &str,
        sprint: &str,
        window_start: NaiveDate,
        window_length_days: u32,
    ) -> Result<Vec<BurndownPoint>, SourceError> {
        let query = Query::field_equals(&self.schema.workstream.id, workstream)
            .and(Query::field_equals(&self.schema.sprint.id, sprint));
        let issues = self.search(ctx, "burndown", query, true).await?;

        let items: Vec<ReplayItem<'_>> = issues
            .iter()
            .map(|i| ReplayItem {
                points: self.schema.story_points.read(i),
                history: i.history(),
            })
            .collect();

        Ok(analysis::build_burndown(
            &items,
            &self.settings.done,
            window_start,
            window_length_days,
        ))
    }
}
