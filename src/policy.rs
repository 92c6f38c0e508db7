//! Movement confidence thresholds per activity mode.
//!
//! Walking needs more confirming fixes and a larger minimum step because GPS
//! jitter is large relative to walking speed. Running confirms sooner but
//! demands a higher minimum speed. `Default` sits between the two and covers
//! any activity type that is not recognized.

use serde::{Deserialize, Serialize};

/// Activity category selected at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    Walking,
    Running,
    #[default]
    Default,
}

impl TrackingMode {
    /// Map an app activity type onto a tracking mode.
    ///
    /// Matching is case-insensitive and accepts the Portuguese names used by
    /// the app. Anything else falls back to [`TrackingMode::Default`].
    pub fn from_activity_type(activity_type: &str) -> Self {
        match activity_type.trim().to_lowercase().as_str() {
            "walk" | "walking" | "caminhada" | "caminhar" => TrackingMode::Walking,
            "run" | "running" | "corrida" | "correr" => TrackingMode::Running,
            _ => TrackingMode::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingMode::Walking => "walking",
            TrackingMode::Running => "running",
            TrackingMode::Default => "default",
        }
    }
}

/// Tunable thresholds for one tracking mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementConfidenceParams {
    /// Consecutive accepted fixes needed to enter `Moving`
    pub min_accepted_points_to_move: u32,
    /// Consecutive rejected fixes needed to leave `Moving`
    pub min_rejected_points_to_stop: u32,
    /// Pace stays unavailable below this cumulative distance
    pub min_distance_before_pace_meters: f64,
    /// Fixes slower than this are treated as drift
    pub min_speed_mps: f64,
    /// Fixes closer than this to the last accepted fix are treated as jitter
    pub min_step_meters: f64,
}

/// Look up the thresholds for a mode.
pub fn params_for(mode: TrackingMode) -> MovementConfidenceParams {
    match mode {
        TrackingMode::Walking => MovementConfidenceParams {
            min_accepted_points_to_move: 5,
            min_rejected_points_to_stop: 6,
            min_distance_before_pace_meters: 50.0,
            min_speed_mps: 0.5,
            min_step_meters: 8.0,
        },
        TrackingMode::Running => MovementConfidenceParams {
            min_accepted_points_to_move: 3,
            min_rejected_points_to_stop: 4,
            min_distance_before_pace_meters: 30.0,
            min_speed_mps: 1.5,
            min_step_meters: 5.0,
        },
        TrackingMode::Default => MovementConfidenceParams {
            min_accepted_points_to_move: 4,
            min_rejected_points_to_stop: 5,
            min_distance_before_pace_meters: 40.0,
            min_speed_mps: 1.0,
            min_step_meters: 6.0,
        },
    }
}
