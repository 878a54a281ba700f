//! Metric computations.
//!
//! Pure transformations from typed records to rollups, replayed
//! histories, time series and scores. No I/O happens here.

pub mod history;
pub mod rollup;
pub mod score;
pub mod timeseries;

pub use history::{average_cycle_time, cycle_time_record};
pub use rollup::{
    aggregate, art_objectives, collect_pi_labels, pi_health, pi_timeline, sort_workstreams,
    summarize_pi, workstream_breakdown, GroupKeyPolicy,
};
pub use score::{art_scores, ScoreWeights};
pub use timeseries::{build_burndown, build_velocity, summarize_velocity, ReplayItem};
