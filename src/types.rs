//! Workout data containers shared by the tracker, the offline queue and the
//! remote store.
//!
//! Field names serialize in snake_case because the remote `workouts` table
//! uses those column names directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::GpsPoint;

// ============================================================================
// Workout Record
// ============================================================================

/// A completed workout summary. Built once by
/// [`TrackingSession::finalize`](crate::TrackingSession::finalize) and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRecord {
    pub user_id: String,
    /// App activity type (e.g., "corrida", "caminhada")
    pub activity_type: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: u32,
    pub distance_km: f64,
    pub calories: Option<u32>,
    pub avg_hr: Option<u16>,
    pub max_hr: Option<u16>,
    /// Average pace in seconds per km, None when too short to be meaningful
    pub pace_avg: Option<f64>,
    pub path: Vec<GpsPoint>,
    pub intensity: Option<String>,
    pub equipment: Option<String>,
    pub notes: Option<String>,
    /// Free-form metadata forwarded untouched to the remote store
    pub extras: serde_json::Value,
    /// Client session the workout was recorded in; scopes local cache entries
    pub session_id: Option<String>,
}

impl WorkoutRecord {
    /// Stable key used for the offline queue.
    ///
    /// Derived from the owner and the start instant, so enqueueing the same
    /// workout twice overwrites the same row instead of duplicating it.
    pub fn queue_id(&self) -> String {
        format!(
            "workout_{}_{}",
            self.user_id,
            self.started_at.timestamp_millis()
        )
    }
}

/// Fields of a workout that do not come from GPS, supplied at finalize time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkoutDetails {
    pub user_id: String,
    pub activity_type: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub calories: Option<u32>,
    #[serde(default)]
    pub avg_hr: Option<u16>,
    #[serde(default)]
    pub max_hr: Option<u16>,
    #[serde(default)]
    pub intensity: Option<String>,
    #[serde(default)]
    pub equipment: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub extras: serde_json::Value,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl WorkoutDetails {
    /// Minimal details for a workout; optional fields start empty.
    pub fn new(
        user_id: impl Into<String>,
        activity_type: impl Into<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            activity_type: activity_type.into(),
            started_at,
            ended_at,
            calories: None,
            avg_hr: None,
            max_hr: None,
            intensity: None,
            equipment: None,
            notes: None,
            extras: serde_json::Value::Null,
            session_id: None,
        }
    }
}

// ============================================================================
// Offline Queue Types
// ============================================================================

/// A workout waiting for confirmed remote persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedWorkout {
    pub id: String,
    pub record: WorkoutRecord,
    /// When the row was (last) written to the queue
    pub enqueued_at: DateTime<Utc>,
}

/// Read-through cache row.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityCacheEntry {
    pub key: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
