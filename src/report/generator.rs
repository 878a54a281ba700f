//! Markdown and JSON report generation.
//!
//! Each command produces one [`Report`]. Markdown output is plain
//! tables; JSON output is the same data serialized as-is.

use crate::models::{
    ArtScore, BurndownPoint, CycleTimeRecord, Feature, PiHealth, PiMetrics, Rollup, Story,
    TimelineRow, VelocityPoint, VelocitySummary,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where and when a report was produced.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub source: String,
    pub request_id: String,
    pub duration_seconds: f64,
}

/// Rollup of one group, flattened for output.
#[derive(Debug, Clone, Serialize)]
pub struct GroupRow {
    pub name: String,
    #[serde(flatten)]
    pub rollup: Rollup,
}

impl GroupRow {
    pub fn from_pairs<I>(pairs: I) -> Vec<Self>
    where
        I: IntoIterator<Item = (String, Rollup)>,
    {
        pairs
            .into_iter()
            .map(|(name, rollup)| Self { name, rollup })
            .collect()
    }
}

/// A feature with the rollup of its stories.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureRow {
    #[serde(flatten)]
    pub feature: Feature,
    pub stories: Rollup,
}

/// Command-specific report content.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportBody {
    PiList {
        pis: Vec<String>,
    },
    Workstreams {
        workstreams: Vec<String>,
    },
    Overview {
        metrics: PiMetrics,
    },
    ArtScorecard {
        pi_label: String,
        health: PiHealth,
        scores: Vec<ArtScore>,
        art_summary: Vec<GroupRow>,
    },
    Features {
        pi_label: String,
        features: Vec<FeatureRow>,
    },
    FeatureBreakdown {
        feature_key: String,
        workstreams: Vec<GroupRow>,
        stories: Vec<Story>,
    },
    Timeline {
        pi_label: String,
        rows: Vec<TimelineRow>,
    },
    Velocity {
        workstream: String,
        sprints: Vec<VelocityPoint>,
        summary: VelocitySummary,
    },
    CycleTime {
        workstream: String,
        records: Vec<CycleTimeRecord>,
        average_days: Option<f64>,
    },
    Burndown {
        workstream: String,
        sprint: String,
        points: Vec<BurndownPoint>,
    },
}

/// A complete report.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    #[serde(flatten)]
    pub body: ReportBody,
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str(&format!("# {}\n\n", title(&report.body)));

    output.push_str(&match &report.body {
        ReportBody::PiList { pis } => generate_list_section("PI labels", pis, "No PI labels found"),
        ReportBody::Workstreams { workstreams } => {
            generate_list_section("Workstreams", workstreams, "No workstreams found")
        }
        ReportBody::Overview { metrics } => generate_overview_section(metrics),
        ReportBody::ArtScorecard {
            health,
            scores,
            art_summary,
            ..
        } => generate_scorecard_section(health, scores, art_summary),
        ReportBody::Features { features, .. } => generate_features_section(features),
        ReportBody::FeatureBreakdown {
            workstreams,
            stories,
            ..
        } => generate_breakdown_section(workstreams, stories),
        ReportBody::Timeline { rows, .. } => generate_timeline_section(rows),
        ReportBody::Velocity {
            sprints, summary, ..
        } => generate_velocity_section(sprints, summary),
        ReportBody::CycleTime {
            records,
            average_days,
            ..
        } => generate_cycle_time_section(records, *average_days),
        ReportBody::Burndown { points, .. } => generate_burndown_section(points),
    });

    output.push_str(&generate_footer(&report.metadata));

    output
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

fn title(body: &ReportBody) -> String {
    match body {
        ReportBody::PiList { .. } => "Program Increments".to_string(),
        ReportBody::Workstreams { .. } => "Workstreams".to_string(),
        ReportBody::Overview { metrics } => match &metrics.workstream {
            Some(ws) => format!("{} Overview ({})", metrics.pi_label, ws),
            None => format!("{} Overview", metrics.pi_label),
        },
        ReportBody::ArtScorecard { pi_label, .. } => format!("{} ART Scorecard", pi_label),
        ReportBody::Features { pi_label, .. } => format!("{} Features", pi_label),
        ReportBody::FeatureBreakdown { feature_key, .. } => {
            format!("{} Workstream Breakdown", feature_key)
        }
        ReportBody::Timeline { pi_label, .. } => format!("{} Timeline", pi_label),
        ReportBody::Velocity { workstream, .. } => format!("{} Velocity", workstream),
        ReportBody::CycleTime { workstream, .. } => format!("{} Cycle Time", workstream),
        ReportBody::Burndown {
            workstream, sprint, ..
        } => format!("{} Burndown: {}", workstream, sprint),
    }
}

/// Escape a value for use inside a table cell.
fn cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

fn table_header(columns: &[&str]) -> String {
    format!(
        "| {} |\n|{}\n",
        columns.join(" | "),
        "---|".repeat(columns.len())
    )
}

fn generate_list_section(heading: &str, items: &[String], empty: &str) -> String {
    if items.is_empty() {
        return format!("{}.\n\n", empty);
    }

    let mut section = format!("## {}\n\n", heading);
    for item in items {
        section.push_str(&format!("- {}\n", item));
    }
    section.push('\n');
    section
}

fn rollup_row(name: &str, r: &Rollup) -> String {
    format!(
        "| {} | {} | {} | {:.1}% | {} | {} | {:.1}% |\n",
        cell(name),
        r.completed_count,
        r.total_count,
        r.completion_rate,
        r.completed_points,
        r.total_points,
        r.points_completion_rate
    )
}

const ROLLUP_COLUMNS: [&str; 7] = [
    "Name",
    "Completed",
    "Total",
    "Completion",
    "Points Done",
    "Points",
    "Points Completion",
];

fn generate_overview_section(metrics: &PiMetrics) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str(&table_header(&ROLLUP_COLUMNS));
    section.push_str(&rollup_row("Features", &metrics.features));
    section.push_str(&rollup_row("Stories", &metrics.stories));
    section.push('\n');

    section
}

fn generate_scorecard_section(
    health: &PiHealth,
    scores: &[ArtScore],
    art_summary: &[GroupRow],
) -> String {
    let mut section = String::new();

    section.push_str("## PI Health\n\n");
    section.push_str(&format!(
        "- **Features:** {} of {} delivered ({:.1}%)\n",
        health.delivered_features, health.committed_features, health.overall_feature_predictability
    ));
    section.push_str(&format!(
        "- **Points:** {} of {} delivered\n",
        health.delivered_points, health.committed_points
    ));
    section.push_str(&format!(
        "- **Average feature predictability:** {:.1}%\n",
        health.avg_feature_predictability
    ));
    section.push_str(&format!(
        "- **Average points predictability:** {:.1}%\n\n",
        health.avg_points_predictability
    ));

    section.push_str("## Scorecard\n\n");
    if scores.is_empty() {
        section.push_str("No ARTs found.\n\n");
    } else {
        section.push_str(&table_header(&[
            "ART",
            "Features",
            "Points",
            "Feature Predictability",
            "Points Predictability",
            "Predictability",
            "Quality",
            "Overall",
        ]));
        for s in scores {
            section.push_str(&format!(
                "| {} | {}/{} | {}/{} | {:.1} | {:.1} | {:.1} | {:.1} | {:.1} |\n",
                cell(&s.art),
                s.delivered_features,
                s.committed_features,
                s.delivered_points,
                s.committed_points,
                s.feature_predictability,
                s.points_predictability,
                s.predictability_score,
                s.quality_score,
                s.overall_score
            ));
        }
        section.push('\n');
    }

    if !art_summary.is_empty() {
        section.push_str("## Features by ART\n\n");
        section.push_str(&table_header(&ROLLUP_COLUMNS[..4]));
        for row in art_summary {
            section.push_str(&format!(
                "| {} | {} | {} | {:.1}% |\n",
                cell(&row.name),
                row.rollup.completed_count,
                row.rollup.total_count,
                row.rollup.completion_rate
            ));
        }
        section.push('\n');
    }

    section
}

fn generate_features_section(features: &[FeatureRow]) -> String {
    if features.is_empty() {
        return "No features found.\n\n".to_string();
    }

    let mut section = table_header(&[
        "Key",
        "Summary",
        "Status",
        "ART",
        "Stories",
        "Points Done",
        "Points",
        "Points Completion",
    ]);
    for row in features {
        let f = &row.feature;
        section.push_str(&format!(
            "| {} | {} | {} | {} | {}/{} | {} | {} | {:.1}% |\n",
            cell(&f.key),
            cell(&f.summary),
            cell(&f.status),
            cell(f.art.as_deref().unwrap_or("-")),
            row.stories.completed_count,
            row.stories.total_count,
            row.stories.completed_points,
            row.stories.total_points,
            row.stories.points_completion_rate
        ));
    }
    section.push('\n');
    section
}

fn generate_breakdown_section(workstreams: &[GroupRow], stories: &[Story]) -> String {
    if stories.is_empty() {
        return "No stories found.\n\n".to_string();
    }

    let mut section = String::new();

    section.push_str("## By Workstream\n\n");
    section.push_str(&table_header(&ROLLUP_COLUMNS));
    for row in workstreams {
        section.push_str(&rollup_row(&row.name, &row.rollup));
    }
    section.push('\n');

    section.push_str("## Stories\n\n");
    section.push_str(&table_header(&[
        "Key", "Summary", "Status", "Points", "Workstream", "Sprint", "Assignee",
    ]));
    for s in stories {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            cell(&s.key),
            cell(&s.summary),
            cell(&s.status),
            s.story_points,
            cell(&s.workstream),
            cell(s.sprint.as_deref().unwrap_or("-")),
            cell(&s.assignee)
        ));
    }
    section.push('\n');

    section
}

fn generate_timeline_section(rows: &[TimelineRow]) -> String {
    if rows.is_empty() {
        return "No stories found.\n\n".to_string();
    }

    let mut section = table_header(&[
        "Updated", "Story", "Feature", "ART", "Workstream", "Status", "Points", "Created",
    ]);
    for r in rows {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
            r.updated.format("%Y-%m-%d"),
            cell(&r.story_key),
            cell(&r.feature_key),
            cell(r.art.as_deref().unwrap_or("-")),
            cell(&r.workstream),
            cell(&r.status),
            r.story_points,
            r.created.format("%Y-%m-%d")
        ));
    }
    section.push('\n');
    section
}

fn generate_velocity_section(sprints: &[VelocityPoint], summary: &VelocitySummary) -> String {
    if sprints.is_empty() {
        return "No sprints found.\n\n".to_string();
    }

    let mut section = table_header(&["Sprint", "Velocity", "Planned", "Completion", "Rolling Avg"]);
    for (point, rolling) in sprints.iter().zip(&summary.rolling_average) {
        section.push_str(&format!(
            "| {} | {} | {} | {:.1}% | {} |\n",
            cell(&point.sprint),
            point.velocity,
            point.planned_points,
            point.completion_rate,
            rolling.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v))
        ));
    }
    section.push('\n');

    section.push_str("## Trend\n\n");
    section.push_str(&format!(
        "- **Average velocity:** {:.1}\n",
        summary.average_velocity
    ));
    section.push_str(&format!(
        "- **Last sprint vs average:** {:+.1}\n",
        summary.last_delta
    ));
    section.push_str(&format!(
        "- **Average completion:** {:.1}%\n",
        summary.average_completion_rate
    ));
    section.push_str(&format!(
        "- **Completion std dev:** {:.1}\n\n",
        summary.completion_rate_std_dev
    ));

    section
}

fn generate_cycle_time_section(records: &[CycleTimeRecord], average_days: Option<f64>) -> String {
    if records.is_empty() {
        return "No completed issues found.\n\n".to_string();
    }

    let mut section = table_header(&["Key", "Created", "Completed", "Days", "Points"]);
    for r in records {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            cell(&r.issue_key),
            r.created.format("%Y-%m-%d"),
            r.completed.format("%Y-%m-%d"),
            r.cycle_time_days,
            r.story_points
        ));
    }
    section.push('\n');

    if let Some(avg) = average_days {
        section.push_str(&format!(
            "**Average cycle time:** {:.1} days over {} issues\n\n",
            avg,
            records.len()
        ));
    }

    section
}

fn generate_burndown_section(points: &[BurndownPoint]) -> String {
    let mut section = table_header(&["Day", "Date", "Remaining", "Ideal"]);
    for p in points {
        section.push_str(&format!(
            "| {} | {} | {} | {:.1} |\n",
            p.day,
            p.date.format("%Y-%m-%d"),
            p.remaining_points,
            p.ideal_remaining
        ));
    }
    section.push('\n');
    section
}

fn generate_footer(metadata: &ReportMetadata) -> String {
    format!(
        "---\n\n*Generated {} from {} source in {:.1}s (request {})*\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        metadata.source,
        metadata.duration_seconds,
        metadata.request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn metadata() -> ReportMetadata {
        ReportMetadata {
            generated_at: Utc::now(),
            source: "snapshot".to_string(),
            request_id: "abc".to_string(),
            duration_seconds: 0.2,
        }
    }

    fn report(body: ReportBody) -> Report {
        Report {
            metadata: metadata(),
            body,
        }
    }

    fn rollup(total: u64, done: u64) -> Rollup {
        let mut r = Rollup::default();
        for i in 0..total {
            r.record(2, i < done);
        }
        r
    }

    #[test]
    fn test_overview_markdown() {
        let markdown = generate_markdown_report(&report(ReportBody::Overview {
            metrics: PiMetrics {
                pi_label: "PI-4".to_string(),
                workstream: Some("Web".to_string()),
                features: rollup(10, 7),
                stories: rollup(4, 1),
            },
        }));

        assert!(markdown.contains("# PI-4 Overview (Web)"));
        assert!(markdown.contains("| Features | 7 | 10 | 70.0% |"));
        assert!(markdown.contains("| Stories | 1 | 4 | 25.0% | 2 | 8 | 25.0% |"));
        assert!(markdown.contains("snapshot source"));
    }

    #[test]
    fn test_empty_lists() {
        let markdown = generate_markdown_report(&report(ReportBody::PiList { pis: vec![] }));
        assert!(markdown.contains("No PI labels found"));

        let markdown = generate_markdown_report(&report(ReportBody::Workstreams {
            workstreams: vec!["Api".to_string(), "Unknown".to_string()],
        }));
        assert!(markdown.contains("- Api\n- Unknown\n"));
    }

    #[test]
    fn test_cells_are_escaped() {
        assert_eq!(cell("a|b\nc"), "a\\|b c");
    }

    #[test]
    fn test_velocity_markdown_rolling_average() {
        let point = |sprint: &str, v: u64| VelocityPoint {
            sprint: sprint.to_string(),
            workstream: "Web".to_string(),
            velocity: v,
            planned_points: 10,
            completion_rate: v as f64 * 10.0,
        };
        let markdown = generate_markdown_report(&report(ReportBody::Velocity {
            workstream: "Web".to_string(),
            sprints: vec![point("S1", 3), point("S2", 6), point("S3", 9)],
            summary: VelocitySummary {
                average_velocity: 6.0,
                last_delta: 3.0,
                average_completion_rate: 60.0,
                completion_rate_std_dev: 30.0,
                rolling_average: vec![None, None, Some(6.0)],
            },
        }));

        assert!(markdown.contains("| S1 | 3 | 10 | 30.0% | - |"));
        assert!(markdown.contains("| S3 | 9 | 10 | 90.0% | 6.0 |"));
        assert!(markdown.contains("+3.0"));
    }

    #[test]
    fn test_burndown_markdown() {
        let markdown = generate_markdown_report(&report(ReportBody::Burndown {
            workstream: "Web".to_string(),
            sprint: "Sprint 3".to_string(),
            points: vec![BurndownPoint {
                day: 0,
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                remaining_points: 10,
                ideal_remaining: 10.0,
            }],
        }));
        assert!(markdown.contains("# Web Burndown: Sprint 3"));
        assert!(markdown.contains("| 0 | 2024-01-01 | 10 | 10.0 |"));
    }

    #[test]
    fn test_timeline_markdown() {
        let day = |d: u32| Utc.with_ymd_and_hms(2024, 1, d, 9, 0, 0).unwrap();
        let markdown = generate_markdown_report(&report(ReportBody::Timeline {
            pi_label: "PI-4".to_string(),
            rows: vec![TimelineRow {
                feature_key: "F-1".to_string(),
                story_key: "S-1".to_string(),
                workstream: "Web".to_string(),
                art: None,
                status: "Done".to_string(),
                story_points: 5,
                created: day(2),
                updated: day(12),
            }],
        }));
        assert!(markdown.contains("# PI-4 Timeline"));
        assert!(markdown.contains("| 2024-01-12 | S-1 | F-1 | - | Web | Done | 5 | 2024-01-02 |"));

        let empty = generate_markdown_report(&report(ReportBody::Timeline {
            pi_label: "PI-4".to_string(),
            rows: vec![],
        }));
        assert!(empty.contains("No stories found."));
    }

    #[test]
    fn test_generate_json_report() {
        let json = generate_json_report(&report(ReportBody::CycleTime {
            workstream: "Web".to_string(),
            records: vec![],
            average_days: None,
        }))
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["kind"], "cycle_time");
        assert_eq!(value["workstream"], "Web");
        assert_eq!(value["metadata"]["source"], "snapshot");
        assert!(value["average_days"].is_null());
    }
}
