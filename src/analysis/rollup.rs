//! Rollup aggregation.
//!
//! Groups features and stories by ART, workstream or PI and computes
//! counts, point sums and completion rates. Everything here is pure and
//! tolerates empty input.

use crate::models::{
    completion_rate, ArtObjectives, Dimension, Feature, PiHealth, PiMetrics, Rollup, StatusSet,
    Story, TimelineRow, PI_LABEL_PREFIX, UNKNOWN_WORKSTREAM,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// What to do with records whose group key is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKeyPolicy {
    /// Leave the record out.
    Drop,
    /// Count the record under the given key.
    Bucket(&'static str),
}

/// A record that can take part in a rollup.
pub trait Rollable {
    fn status(&self) -> &str;
    fn points(&self) -> u64;
    fn group_key(&self, dimension: Dimension) -> Option<&str>;
}

impl Rollable for Feature {
    fn status(&self) -> &str {
        &self.status
    }

    fn points(&self) -> u64 {
        0
    }

    fn group_key(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::Art => self.art.as_deref(),
            Dimension::Pi => self.pi.as_deref(),
            Dimension::Workstream => None,
        }
    }
}

impl Rollable for Story {
    fn status(&self) -> &str {
        &self.status
    }

    fn points(&self) -> u64 {
        self.story_points
    }

    fn group_key(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::Workstream => Some(&self.workstream),
            Dimension::Art | Dimension::Pi => None,
        }
    }
}

/// Roll up all records into a single total.
pub fn rollup<T: Rollable>(records: &[T], done: &StatusSet) -> Rollup {
    let mut total = Rollup::default();
    for record in records {
        total.record(record.points(), done.contains(record.status()));
    }
    total
}

/// Group records by `dimension` and roll up each group.
pub fn aggregate<T: Rollable>(
    records: &[T],
    dimension: Dimension,
    policy: GroupKeyPolicy,
    done: &StatusSet,
) -> BTreeMap<String, Rollup> {
    let mut groups: BTreeMap<String, Rollup> = BTreeMap::new();

    for record in records {
        let key = match (record.group_key(dimension), policy) {
            (Some(key), _) => key,
            (None, GroupKeyPolicy::Bucket(fallback)) => fallback,
            (None, GroupKeyPolicy::Drop) => continue,
        };
        groups
            .entry(key.to_string())
            .or_default()
            .record(record.points(), done.contains(record.status()));
    }

    groups
}

/// Sort workstream names ascending with `Unknown` always last.
pub fn sort_workstreams<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let unique: BTreeSet<String> = names.into_iter().map(Into::into).collect();
    let (mut known, unknown): (Vec<String>, Vec<String>) = unique
        .into_iter()
        .partition(|name| name != UNKNOWN_WORKSTREAM);
    known.extend(unknown);
    known
}

/// Workstream rollups for a set of stories, in workstream sort order.
pub fn workstream_breakdown(stories: &[Story], done: &StatusSet) -> Vec<(String, Rollup)> {
    let mut groups = aggregate(
        stories,
        Dimension::Workstream,
        GroupKeyPolicy::Bucket(UNKNOWN_WORKSTREAM),
        done,
    );
    sort_workstreams(groups.keys().cloned())
        .into_iter()
        .filter_map(|ws| groups.remove(&ws).map(|r| (ws, r)))
        .collect()
}

/// PI totals over features and the stories fetched for each feature.
///
/// A workstream filter only narrows the stories; features are always
/// counted in full. Features with no stories contribute nothing.
pub fn summarize_pi(
    pi_label: &str,
    features: &[Feature],
    stories_by_feature: &HashMap<String, Vec<Story>>,
    workstream: Option<&str>,
    done: &StatusSet,
) -> PiMetrics {
    let mut stories = Rollup::default();
    for feature in features {
        let Some(feature_stories) = stories_by_feature.get(&feature.key) else {
            continue;
        };
        for story in feature_stories {
            if workstream.is_some_and(|ws| story.workstream != ws) {
                continue;
            }
            stories.record(story.story_points, done.contains(&story.status));
        }
    }

    PiMetrics {
        pi_label: pi_label.to_string(),
        workstream: workstream.map(String::from),
        features: rollup(features, done),
        stories,
    }
}

/// Commitment versus delivery per ART. Features without an ART are dropped.
pub fn art_objectives(
    features: &[Feature],
    stories_by_feature: &HashMap<String, Vec<Story>>,
    done: &StatusSet,
) -> BTreeMap<String, ArtObjectives> {
    let mut feature_rollups: BTreeMap<String, Rollup> = BTreeMap::new();
    let mut point_rollups: BTreeMap<String, Rollup> = BTreeMap::new();

    for feature in features {
        let Some(art) = feature.art.as_deref() else {
            continue;
        };
        feature_rollups
            .entry(art.to_string())
            .or_default()
            .record(0, done.contains(&feature.status));

        let points = point_rollups.entry(art.to_string()).or_default();
        if let Some(stories) = stories_by_feature.get(&feature.key) {
            points.merge(&rollup(stories, done));
        }
    }

    feature_rollups
        .into_iter()
        .map(|(art, features)| {
            let points = point_rollups.get(&art).copied().unwrap_or_default();
            let objectives = ArtObjectives {
                art: art.clone(),
                committed_features: features.total_count,
                delivered_features: features.completed_count,
                committed_points: points.total_points,
                delivered_points: points.completed_points,
                feature_predictability: features.completion_rate,
                points_predictability: points.points_completion_rate,
            };
            (art, objectives)
        })
        .collect()
}

/// PI-wide health across ART objectives.
pub fn pi_health(objectives: &BTreeMap<String, ArtObjectives>) -> PiHealth {
    if objectives.is_empty() {
        return PiHealth::default();
    }

    let mut health = PiHealth::default();
    let mut feature_sum = 0.0;
    let mut points_sum = 0.0;
    for o in objectives.values() {
        health.committed_features = health.committed_features.saturating_add(o.committed_features);
        health.delivered_features = health.delivered_features.saturating_add(o.delivered_features);
        health.committed_points = health.committed_points.saturating_add(o.committed_points);
        health.delivered_points = health.delivered_points.saturating_add(o.delivered_points);
        feature_sum += o.feature_predictability;
        points_sum += o.points_predictability;
    }

    let n = objectives.len() as f64;
    health.overall_feature_predictability =
        completion_rate(health.delivered_features, health.committed_features);
    health.avg_feature_predictability = feature_sum / n;
    health.avg_points_predictability = points_sum / n;
    health
}

/// Every story of a PI's features, ordered by last update then story key.
pub fn pi_timeline(
    features: &[Feature],
    stories_by_feature: &HashMap<String, Vec<Story>>,
) -> Vec<TimelineRow> {
    let mut rows = Vec::new();
    for feature in features {
        let Some(stories) = stories_by_feature.get(&feature.key) else {
            continue;
        };
        for story in stories {
            rows.push(TimelineRow {
                feature_key: feature.key.clone(),
                story_key: story.key.clone(),
                workstream: story.workstream.clone(),
                art: feature.art.clone(),
                status: story.status.clone(),
                story_points: story.story_points,
                created: story.created,
                updated: story.updated,
            });
        }
    }

    rows.sort_by(|a, b| {
        a.updated
            .cmp(&b.updated)
            .then_with(|| a.story_key.cmp(&b.story_key))
    });
    rows
}

/// Distinct PI labels on `labels`, restricted to `preferred` when given,
/// otherwise to any label carrying the `PI-` prefix.
pub fn collect_pi_labels<'a, I>(labels: I, preferred: &[String]) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    labels
        .into_iter()
        .filter(|label| {
            if preferred.is_empty() {
                label.starts_with(PI_LABEL_PREFIX)
            } else {
                preferred.contains(label)
            }
        })
        .cloned()
        .collect()
}
