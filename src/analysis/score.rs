//! Composite ART scores.
//!
//! Scores combine feature predictability and points predictability,
//! both percentages in `[0, 100]`. The weights are tunable, not laws.

use crate::models::{ArtObjectives, ArtScore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Weights for the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Multiplier applied to points predictability for the quality score.
    /// Values above 1 reward high points predictability disproportionately.
    pub quality_amplifier: f64,
    /// Share of the predictability score in the overall score.
    pub predictability_weight: f64,
    /// Share of the quality score in the overall score.
    pub quality_weight: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            quality_amplifier: 1.2,
            predictability_weight: 0.6,
            quality_weight: 0.4,
        }
    }
}

/// The three derived scores, unrounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub predictability_score: f64,
    pub quality_score: f64,
    pub overall_score: f64,
}

/// Clamp to `[0, 100]`, mapping NaN to 0.
fn percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

impl ScoreWeights {
    pub fn score(&self, feature_predictability: f64, points_predictability: f64) -> CompositeScore {
        let feature = percent(feature_predictability);
        let points = percent(points_predictability);

        let predictability_score = (feature + points) / 2.0;
        let quality_score = percent(points * self.quality_amplifier);
        let overall_score = percent(
            predictability_score * self.predictability_weight + quality_score * self.quality_weight,
        );

        CompositeScore {
            predictability_score,
            quality_score,
            overall_score,
        }
    }
}

/// Composite score with the default weights.
pub fn composite_score(feature_predictability: f64, points_predictability: f64) -> CompositeScore {
    ScoreWeights::default().score(feature_predictability, points_predictability)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Scorecard rows for every ART, rounded to one decimal.
pub fn art_scores(
    objectives: &BTreeMap<String, ArtObjectives>,
    weights: &ScoreWeights,
) -> Vec<ArtScore> {
    objectives
        .values()
        .map(|o| {
            let score = weights.score(o.feature_predictability, o.points_predictability);
            ArtScore {
                art: o.art.clone(),
                committed_features: o.committed_features,
                delivered_features: o.delivered_features,
                committed_points: o.committed_points,
                delivered_points: o.delivered_points,
                feature_predictability: round1(o.feature_predictability),
                points_predictability: round1(o.points_predictability),
                predictability_score: round1(score.predictability_score),
                quality_score: round1(score.quality_score),
                overall_score: round1(score.overall_score),
            }
        })
        .collect()
}
