//! Burndown and velocity series.

use crate::analysis::history::{first_transition_into, STATUS_FIELD};
use crate::models::{
    completion_rate, BurndownPoint, HistoryEvent, StatusSet, Story, VelocityPoint,
    VelocitySummary,
};
use chrono::{Days, NaiveDate};
use std::collections::HashMap;

/// Default sprint window in days.
pub const DEFAULT_WINDOW_DAYS: u32 = 14;

/// Longest burndown window accepted from config or the command line.
pub const MAX_WINDOW_DAYS: u32 = 366;

/// Window used for the rolling velocity average.
pub const ROLLING_WINDOW: usize = 3;

/// One issue as seen by the burndown replay.
#[derive(Debug, Clone, Copy)]
pub struct ReplayItem<'a> {
    pub points: u64,
    pub history: &'a [HistoryEvent],
}

/// Completion dates of a set of issues, sorted, with running point sums.
///
/// Each issue contributes its points once, on the date of its first
/// transition into done. Dates are UTC calendar days, so a transition at
/// 01:00 +02:00 counts on the previous day.
#[derive(Debug, Clone, Default)]
pub struct CompletionIndex {
    dates: Vec<NaiveDate>,
    cumulative: Vec<u64>,
    total_points: u64,
}

impl CompletionIndex {
    pub fn build(items: &[ReplayItem<'_>], done: &StatusSet) -> Self {
        let mut completions: Vec<(NaiveDate, u64)> = items
            .iter()
            .filter_map(|item| {
                first_transition_into(item.history, STATUS_FIELD, done)
                    .map(|at| (at.date_naive(), item.points))
            })
            .collect();
        completions.sort_by_key(|(date, _)| *date);

        let mut running: u64 = 0;
        let (dates, cumulative) = completions
            .into_iter()
            .map(|(date, points)| {
                running = running.saturating_add(points);
                (date, running)
            })
            .unzip();

        Self {
            dates,
            cumulative,
            total_points: items
                .iter()
                .fold(0, |sum: u64, item| sum.saturating_add(item.points)),
        }
    }

    /// Points of every issue completed on or before `date`.
    pub fn completed_as_of(&self, date: NaiveDate) -> u64 {
        match self.dates.partition_point(|d| *d <= date) {
            0 => 0,
            n => self.cumulative[n - 1],
        }
    }

    pub fn total_points(&self) -> u64 {
        self.total_points
    }
}

/// Day-by-day remaining points over `[window_start, window_start + window_length_days]`.
///
/// The ideal line falls linearly from the total to zero. A zero-length
/// window yields a single point already at zero. The series stops early
/// if a day falls past the last representable date.
pub fn build_burndown(
    items: &[ReplayItem<'_>],
    done: &StatusSet,
    window_start: NaiveDate,
    window_length_days: u32,
) -> Vec<BurndownPoint> {
    let index = CompletionIndex::build(items, done);
    let total = index.total_points();

    (0..=window_length_days)
        .map_while(|day| {
            let date = window_start.checked_add_days(Days::new(u64::from(day)))?;
            Some(BurndownPoint {
                day,
                date,
                remaining_points: total.saturating_sub(index.completed_as_of(date)),
                ideal_remaining: ideal_remaining(total, day, window_length_days),
            })
        })
        .collect()
}

fn ideal_remaining(total: u64, day: u32, window_length_days: u32) -> f64 {
    if window_length_days == 0 {
        return 0.0;
    }
    total as f64 * (1.0 - f64::from(day) / f64::from(window_length_days))
}

#[derive(Default)]
struct SprintTotals {
    planned: u64,
    completed: u64,
}

/// Per-sprint velocity for the last `num_recent_sprints` sprints.
///
/// Sprints keep the order in which they were first seen in `stories`;
/// they are not re-sorted by date. Stories without a sprint are skipped.
pub fn build_velocity(
    stories: &[Story],
    workstream: &str,
    done: &StatusSet,
    num_recent_sprints: usize,
) -> Vec<VelocityPoint> {
    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, SprintTotals> = HashMap::new();

    for story in stories {
        let Some(sprint) = story.sprint.as_deref() else {
            continue;
        };
        let entry = totals.entry(sprint.to_string()).or_insert_with(|| {
            order.push(sprint.to_string());
            SprintTotals::default()
        });
        entry.planned += story.story_points;
        if done.contains(&story.status) {
            entry.completed += story.story_points;
        }
    }

    let skip = order.len().saturating_sub(num_recent_sprints);
    order
        .into_iter()
        .skip(skip)
        .map(|sprint| {
            let t = totals.remove(&sprint).unwrap_or_default();
            VelocityPoint {
                workstream: workstream.to_string(),
                velocity: t.completed,
                planned_points: t.planned,
                completion_rate: completion_rate(t.completed, t.planned),
                sprint,
            }
        })
        .collect()
}

/// Trailing mean over `window` values; `None` until the window fills.
pub fn rolling_average(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            (i + 1 >= window)
                .then(|| values[i + 1 - window..=i].iter().sum::<f64>() / window as f64)
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Sample standard deviation; 0 with fewer than two values.
fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Trend figures over a velocity series.
pub fn summarize_velocity(points: &[VelocityPoint]) -> VelocitySummary {
    let velocities: Vec<f64> = points.iter().map(|p| p.velocity as f64).collect();
    let rates: Vec<f64> = points.iter().map(|p| p.completion_rate).collect();

    let average_velocity = mean(&velocities);
    VelocitySummary {
        average_velocity,
        last_delta: velocities.last().map_or(0.0, |last| last - average_velocity),
        average_completion_rate: mean(&rates),
        completion_rate_std_dev: sample_std_dev(&rates),
        rolling_average: rolling_average(&velocities, ROLLING_WINDOW),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, m, d, h, 0, 0).unwrap()
    }

    fn done_event(key: &str, status: &str, timestamp: DateTime<Utc>) -> HistoryEvent {
        HistoryEvent {
            issue_key: key.to_string(),
            field: "status".to_string(),
            from: Some("In Progress".to_string()),
            to: Some(status.to_string()),
            timestamp,
        }
    }

    fn story(sprint: Option<&str>, status: &str, points: u64) -> Story {
        Story {
            key: "S".to_string(),
            summary: String::new(),
            status: status.to_string(),
            story_points: points,
            workstream: "Web".to_string(),
            sprint: sprint.map(String::from),
            feature_link: None,
            assignee: "Unassigned".to_string(),
            created: at(1, 1, 0),
            updated: at(1, 1, 0),
        }
    }

    #[test]
    fn test_burndown_end_states() {
        let h1 = vec![done_event("S-1", "Done", at(1, 3, 15))];
        let h2 = vec![
            done_event("S-2", "Closed", at(1, 20, 9)),
            done_event("S-2", "Done", at(1, 5, 9)),
        ];
        let h3: Vec<HistoryEvent> = vec![];
        let items = vec![
            ReplayItem { points: 5, history: &h1 },
            ReplayItem { points: 3, history: &h2 },
            ReplayItem { points: 2, history: &h3 },
        ];

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let series = build_burndown(&items, &StatusSet::default(), start, 14);

        assert_eq!(series.len(), 15);
        assert_eq!(series[0].ideal_remaining, 10.0);
        assert_eq!(series[14].ideal_remaining, 0.0);
        assert_eq!(series[7].ideal_remaining, 5.0);

        assert_eq!(series[0].remaining_points, 10);
        assert_eq!(series[1].remaining_points, 10);
        assert_eq!(series[2].date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
        assert_eq!(series[2].remaining_points, 5);
        assert_eq!(series[4].remaining_points, 2);
        assert_eq!(series[14].remaining_points, 2);
    }

    #[test]
    fn test_burndown_empty_and_zero_window() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let series = build_burndown(&[], &StatusSet::default(), start, 14);
        assert_eq!(series.len(), 15);
        assert!(series.iter().all(|p| p.remaining_points == 0 && p.ideal_remaining == 0.0));

        let single = build_burndown(&[], &StatusSet::default(), start, 0);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].ideal_remaining, 0.0);
    }

    #[test]
    fn test_burndown_stops_at_last_date() {
        let start = NaiveDate::MAX.pred_opt().unwrap();
        let series = build_burndown(&[], &StatusSet::default(), start, MAX_WINDOW_DAYS);
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].date, NaiveDate::MAX);
    }

    #[test]
    fn test_completion_uses_utc_calendar_day() {
        let local = DateTime::parse_from_rfc3339("2024-01-10T01:00:00+02:00")
            .unwrap()
            .with_timezone(&Utc);
        let h = vec![done_event("S-1", "Done", local)];
        let items = vec![ReplayItem { points: 3, history: &h }];
        let index = CompletionIndex::build(&items, &StatusSet::default());
        assert_eq!(index.completed_as_of(NaiveDate::from_ymd_opt(2024, 1, 9).unwrap()), 3);
        assert_eq!(index.completed_as_of(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()), 0);
    }

    #[test]
    fn test_completion_index_counts_each_issue_once() {
        let h = vec![
            done_event("S-1", "Done", at(1, 2, 9)),
            done_event("S-1", "Done", at(1, 4, 9)),
        ];
        let items = vec![ReplayItem { points: 8, history: &h }];
        let index = CompletionIndex::build(&items, &StatusSet::default());
        assert_eq!(index.completed_as_of(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()), 0);
        assert_eq!(index.completed_as_of(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()), 8);
        assert_eq!(index.completed_as_of(NaiveDate::from_ymd_opt(2024, 1, 9).unwrap()), 8);
        assert_eq!(index.total_points(), 8);
    }

    #[test]
    fn test_velocity_keeps_first_seen_order() {
        // Sprint 10 is seen first, so it stays first even though
        // "Sprint 2" sorts before it.
        let stories = vec![
            story(Some("Sprint 10"), "Done", 5),
            story(Some("Sprint 2"), "Done", 3),
            story(Some("Sprint 10"), "Open", 5),
            story(None, "Done", 8),
            story(Some("Sprint 3"), "Open", 0),
        ];
        let points = build_velocity(&stories, "Web", &StatusSet::default(), 5);
        let sprints: Vec<&str> = points.iter().map(|p| p.sprint.as_str()).collect();
        assert_eq!(sprints, vec!["Sprint 10", "Sprint 2", "Sprint 3"]);

        assert_eq!(points[0].velocity, 5);
        assert_eq!(points[0].planned_points, 10);
        assert_eq!(points[0].completion_rate, 50.0);
        assert_eq!(points[2].completion_rate, 0.0);
    }

    #[test]
    fn test_velocity_truncates_to_last_sprints() {
        let stories = vec![
            story(Some("A"), "Done", 1),
            story(Some("B"), "Done", 2),
            story(Some("C"), "Done", 3),
        ];
        let points = build_velocity(&stories, "Web", &StatusSet::default(), 2);
        let sprints: Vec<&str> = points.iter().map(|p| p.sprint.as_str()).collect();
        assert_eq!(sprints, vec!["B", "C"]);
        assert!(build_velocity(&[], "Web", &StatusSet::default(), 5).is_empty());
    }

    #[test]
    fn test_rolling_average() {
        let avg = rolling_average(&[3.0, 6.0, 9.0, 12.0], 3);
        assert_eq!(avg, vec![None, None, Some(6.0), Some(9.0)]);
        assert_eq!(rolling_average(&[1.0], 0), vec![None]);
    }

    #[test]
    fn test_summarize_velocity() {
        let point = |v: u64, rate: f64| VelocityPoint {
            sprint: "S".to_string(),
            workstream: "Web".to_string(),
            velocity: v,
            planned_points: 10,
            completion_rate: rate,
        };
        let summary = summarize_velocity(&[point(10, 50.0), point(20, 100.0), point(30, 75.0)]);
        assert_eq!(summary.average_velocity, 20.0);
        assert_eq!(summary.last_delta, 10.0);
        assert_eq!(summary.average_completion_rate, 75.0);
        assert_eq!(summary.completion_rate_std_dev, 25.0);
        assert_eq!(summary.rolling_average, vec![None, None, Some(20.0)]);

        let empty = summarize_velocity(&[]);
        assert_eq!(empty.average_velocity, 0.0);
        assert_eq!(empty.completion_rate_std_dev, 0.0);
    }
}
