//! Change-history replay.
//!
//! Reconstructs when an issue first reached a set of target values and
//! derives cycle times from it.

use crate::models::{CycleTimeRecord, HistoryEvent, StatusSet};
use chrono::{DateTime, Utc};

/// Field name used for workflow status changes.
pub const STATUS_FIELD: &str = "status";

const SECONDS_PER_DAY: i64 = 86_400;

/// Timestamp of the earliest change of `field` into one of `targets`.
///
/// Source order is not trusted; the earliest matching event wins.
/// Returns `None` if the issue never reached a target value.
pub fn first_transition_into(
    history: &[HistoryEvent],
    field: &str,
    targets: &StatusSet,
) -> Option<DateTime<Utc>> {
    history
        .iter()
        .filter(|e| e.field == field)
        .filter(|e| e.to.as_deref().is_some_and(|to| targets.contains(to)))
        .map(|e| e.timestamp)
        .min()
}

/// Whole days from `created` to `completed`, floored.
///
/// Zero and negative values are kept as-is.
pub fn cycle_time_days(created: DateTime<Utc>, completed: DateTime<Utc>) -> i64 {
    (completed - created).num_seconds().div_euclid(SECONDS_PER_DAY)
}

/// Cycle-time record for one issue, or `None` when it never reached done.
pub fn cycle_time_record(
    issue_key: &str,
    created: DateTime<Utc>,
    history: &[HistoryEvent],
    story_points: u64,
    done: &StatusSet,
) -> Option<CycleTimeRecord> {
    let completed = first_transition_into(history, STATUS_FIELD, done)?;
    Some(CycleTimeRecord {
        issue_key: issue_key.to_string(),
        created,
        completed,
        cycle_time_days: cycle_time_days(created, completed),
        story_points,
    })
}

/// Mean cycle time in days, or `None` for an empty sample.
pub fn average_cycle_time(records: &[CycleTimeRecord]) -> Option<f64> {
    if records.is_empty() {
        return None;
    }
    let total: i64 = records.iter().map(|r| r.cycle_time_days).sum();
    Some(total as f64 / records.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn event(field: &str, to: &str, timestamp: DateTime<Utc>) -> HistoryEvent {
        HistoryEvent {
            issue_key: "S-1".to_string(),
            field: field.to_string(),
            from: None,
            to: Some(to.to_string()),
            timestamp,
        }
    }

    #[test]
    fn test_first_transition_ignores_source_order() {
        let history = vec![
            event("status", "Closed", at(2024, 1, 20, 9)),
            event("status", "In Progress", at(2024, 1, 2, 9)),
            event("assignee", "Done", at(2024, 1, 3, 9)),
            event("status", "Done", at(2024, 1, 10, 9)),
        ];
        let done = StatusSet::default();
        assert_eq!(
            first_transition_into(&history, STATUS_FIELD, &done),
            Some(at(2024, 1, 10, 9))
        );
    }

    #[test]
    fn test_never_done_is_none() {
        let history = vec![event("status", "In Progress", at(2024, 1, 2, 9))];
        let done = StatusSet::default();
        assert_eq!(first_transition_into(&history, STATUS_FIELD, &done), None);
        assert_eq!(first_transition_into(&[], STATUS_FIELD, &done), None);
        assert!(cycle_time_record("S-1", at(2024, 1, 1, 0), &history, 3, &done).is_none());
    }

    #[test]
    fn test_replay_is_idempotent() {
        let mut history = vec![
            event("status", "Done", at(2024, 1, 12, 9)),
            event("status", "Done", at(2024, 1, 10, 9)),
        ];
        history.sort_by_key(|e| e.timestamp);
        let done = StatusSet::default();
        let first = first_transition_into(&history, STATUS_FIELD, &done);
        let second = first_transition_into(&history, STATUS_FIELD, &done);
        assert_eq!(first, second);
        assert_eq!(first, Some(at(2024, 1, 10, 9)));
    }

    #[test]
    fn test_cycle_time_days() {
        assert_eq!(cycle_time_days(at(2024, 1, 1, 0), at(2024, 1, 10, 0)), 9);
        assert_eq!(cycle_time_days(at(2024, 1, 1, 10), at(2024, 1, 1, 18)), 0);
        assert_eq!(cycle_time_days(at(2024, 1, 1, 18), at(2024, 1, 2, 10)), 0);
        assert_eq!(cycle_time_days(at(2024, 1, 2, 0), at(2024, 1, 1, 12)), -1);
    }

    #[test]
    fn test_cycle_time_record_and_average() {
        let done = StatusSet::default();
        let a = cycle_time_record(
            "S-1",
            at(2024, 1, 1, 0),
            &[event("status", "Done", at(2024, 1, 10, 0))],
            5,
            &done,
        )
        .unwrap();
        assert_eq!(a.cycle_time_days, 9);
        assert_eq!(a.story_points, 5);

        let b = cycle_time_record(
            "S-2",
            at(2024, 1, 1, 0),
            &[event("status", "Closed", at(2024, 1, 4, 0))],
            2,
            &done,
        )
        .unwrap();

        assert_eq!(average_cycle_time(&[a, b]), Some(6.0));
        assert_eq!(average_cycle_time(&[]), None);
    }
}
