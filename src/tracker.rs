//! # Movement Confidence State Machine
//!
//! Turns a stream of raw location fixes into a hysteresis-filtered
//! moving/stopped signal plus a cumulative distance and path.
//!
//! ## States
//!
//! ```text
//! Acquiring ──(N accepted in a row)──▶ Moving ──(M rejected in a row)──▶ Stopped
//!                                        ▲                                  │
//!                                        └────────(N accepted in a row)─────┘
//! ```
//!
//! A fix is *accepted* when it moved at least `min_step_meters` away from the
//! last accepted fix and, when a speed is known, is at least `min_speed_mps`.
//! Everything else is drift and is *rejected*. Both consecutive counters are
//! hard-reset by the opposite outcome, so a single stray sample can never
//! flip the state.
//!
//! Fixes must be fed in arrival order; `process_fix` takes `&mut self`.

use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::policy::{MovementConfidenceParams, TrackingMode, params_for};
use crate::types::{WorkoutDetails, WorkoutRecord};
use crate::GpsPoint;

// ============================================================================
// Input
// ============================================================================

/// One raw reading from the location sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters
    pub accuracy: Option<f64>,
    /// Sensor-reported speed in m/s
    pub speed: Option<f64>,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: Option<i64>,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            speed: None,
            timestamp_ms: None,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn at(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

// ============================================================================
// Output
// ============================================================================

/// Movement state of a tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementState {
    #[default]
    Acquiring,
    Moving,
    Stopped,
}

/// Why a fix was classified as noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoiseReason {
    /// Non-finite or out-of-range coordinates
    InvalidCoordinates,
    /// Too close to the last accepted fix
    StepTooShort { step_meters: f64 },
    /// Slower than the mode's minimum speed
    TooSlow { speed_mps: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixClassification {
    Accepted { step_meters: f64 },
    Rejected(NoiseReason),
}

impl FixClassification {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FixClassification::Accepted { .. })
    }
}

/// Result of feeding one fix to a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixOutcome {
    pub classification: FixClassification,
    /// New state if this fix caused a transition
    pub transition: Option<MovementState>,
}

/// Point-in-time view of a session for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub mode: TrackingMode,
    pub state: MovementState,
    pub consecutive_accepted: u32,
    pub consecutive_rejected: u32,
    pub cumulative_distance_meters: f64,
    pub path_len: usize,
    pub pace_available: bool,
}

/// Per-session behaviour that is not part of the mode policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// When set, a fix arriving more than this long after the last accepted
    /// fix starts a fresh anchor instead of bridging the gap. Requires fix
    /// timestamps; `None` never re-anchors.
    pub max_fix_gap_ms: Option<i64>,
}

// ============================================================================
// Tracking Session
// ============================================================================

/// In-progress activity. Created at activity start, fed fix-by-fix, and
/// consumed by [`TrackingSession::finalize`].
#[derive(Debug, Clone)]
pub struct TrackingSession {
    mode: TrackingMode,
    params: MovementConfidenceParams,
    options: SessionOptions,
    state: MovementState,
    consecutive_accepted: u32,
    consecutive_rejected: u32,
    cumulative_distance_meters: f64,
    last_accepted_fix: Option<LocationFix>,
    path: Vec<GpsPoint>,
}

impl TrackingSession {
    pub fn new(mode: TrackingMode) -> Self {
        Self::with_options(mode, SessionOptions::default())
    }

    pub fn with_options(mode: TrackingMode, options: SessionOptions) -> Self {
        Self {
            mode,
            params: params_for(mode),
            options,
            state: MovementState::Acquiring,
            consecutive_accepted: 0,
            consecutive_rejected: 0,
            cumulative_distance_meters: 0.0,
            last_accepted_fix: None,
            path: Vec::new(),
        }
    }

    /// Feed the next fix. Never fails: bad input is classified as noise.
    pub fn process_fix(&mut self, fix: LocationFix) -> FixOutcome {
        if self.gap_exceeded(&fix) {
            log::debug!(
                "[TrackingSession] Fix gap exceeded {:?} ms, re-anchoring",
                self.options.max_fix_gap_ms
            );
            self.last_accepted_fix = None;
            self.consecutive_accepted = 0;
            self.consecutive_rejected = 0;
        }

        let classification = self.classify(&fix);

        match classification {
            FixClassification::Accepted { step_meters } => {
                self.consecutive_accepted = self.consecutive_accepted.saturating_add(1);
                self.consecutive_rejected = 0;
                self.cumulative_distance_meters += step_meters;
                self.path.push(fix.point());
                self.last_accepted_fix = Some(fix);
            }
            FixClassification::Rejected(_) => {
                self.consecutive_rejected = self.consecutive_rejected.saturating_add(1);
                self.consecutive_accepted = 0;
            }
        }

        FixOutcome {
            classification,
            transition: self.advance_state(),
        }
    }

    fn classify(&self, fix: &LocationFix) -> FixClassification {
        if !fix.point().is_valid() {
            return FixClassification::Rejected(NoiseReason::InvalidCoordinates);
        }

        let step_meters = match &self.last_accepted_fix {
            Some(last) => haversine_distance(&last.point(), &fix.point()),
            // First fix (or first after a gap) anchors the path
            None => 0.0,
        };

        if self.last_accepted_fix.is_some() && step_meters < self.params.min_step_meters {
            return FixClassification::Rejected(NoiseReason::StepTooShort { step_meters });
        }

        if let Some(speed_mps) = self.implied_speed(fix, step_meters) {
            if speed_mps < self.params.min_speed_mps {
                return FixClassification::Rejected(NoiseReason::TooSlow { speed_mps });
            }
        }

        FixClassification::Accepted { step_meters }
    }

    /// Reported speed if usable, otherwise speed derived from timestamps.
    fn implied_speed(&self, fix: &LocationFix, step_meters: f64) -> Option<f64> {
        if let Some(speed) = fix.speed.filter(|s| s.is_finite() && *s >= 0.0) {
            return Some(speed);
        }

        let last = self.last_accepted_fix.as_ref()?;
        let dt_ms = fix.timestamp_ms?.checked_sub(last.timestamp_ms?)?;
        if dt_ms <= 0 {
            return None;
        }
        Some(step_meters / (dt_ms as f64 / 1000.0))
    }

    fn gap_exceeded(&self, fix: &LocationFix) -> bool {
        let (Some(max_gap), Some(last)) = (self.options.max_fix_gap_ms, &self.last_accepted_fix)
        else {
            return false;
        };
        match (last.timestamp_ms, fix.timestamp_ms) {
            (Some(prev), Some(now)) => now.checked_sub(prev).is_none_or(|dt| dt > max_gap),
            _ => false,
        }
    }

    fn advance_state(&mut self) -> Option<MovementState> {
        let next = if self.state != MovementState::Moving
            && self.consecutive_accepted >= self.params.min_accepted_points_to_move
        {
            MovementState::Moving
        } else if self.state == MovementState::Moving
            && self.consecutive_rejected >= self.params.min_rejected_points_to_stop
        {
            MovementState::Stopped
        } else {
            return None;
        };

        log::info!(
            "[TrackingSession] {:?} -> {:?} ({} mode, {:.0}m)",
            self.state,
            next,
            self.mode.as_str(),
            self.cumulative_distance_meters
        );
        self.state = next;
        Some(next)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    pub fn params(&self) -> &MovementConfidenceParams {
        &self.params
    }

    pub fn state(&self) -> MovementState {
        self.state
    }

    pub fn consecutive_accepted(&self) -> u32 {
        self.consecutive_accepted
    }

    pub fn consecutive_rejected(&self) -> u32 {
        self.consecutive_rejected
    }

    pub fn cumulative_distance_meters(&self) -> f64 {
        self.cumulative_distance_meters
    }

    pub fn last_accepted_fix(&self) -> Option<&LocationFix> {
        self.last_accepted_fix.as_ref()
    }

    pub fn path(&self) -> &[GpsPoint] {
        &self.path
    }

    /// Whether enough distance has accumulated for pace to be meaningful.
    pub fn pace_available(&self) -> bool {
        self.cumulative_distance_meters >= self.params.min_distance_before_pace_meters
    }

    /// Average speed over `elapsed_seconds`, or None until pace is available.
    pub fn average_speed_mps(&self, elapsed_seconds: f64) -> Option<f64> {
        if !self.pace_available() || elapsed_seconds <= 0.0 {
            return None;
        }
        Some(self.cumulative_distance_meters / elapsed_seconds)
    }

    /// Average pace in seconds per km, or None until pace is available.
    pub fn pace_seconds_per_km(&self, elapsed_seconds: f64) -> Option<f64> {
        pace_seconds_per_km(
            self.cumulative_distance_meters,
            elapsed_seconds,
            self.pace_available(),
        )
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.mode,
            state: self.state,
            consecutive_accepted: self.consecutive_accepted,
            consecutive_rejected: self.consecutive_rejected,
            cumulative_distance_meters: self.cumulative_distance_meters,
            path_len: self.path.len(),
            pace_available: self.pace_available(),
        }
    }

    // ========================================================================
    // Finalize
    // ========================================================================

    /// Freeze the session into an immutable workout record.
    ///
    /// Consumes the session; nothing can be fed to it afterwards.
    pub fn finalize(self, details: WorkoutDetails) -> WorkoutRecord {
        let elapsed = (details.ended_at - details.started_at).num_seconds().max(0);
        let duration_seconds = u32::try_from(elapsed).unwrap_or(u32::MAX);
        let pace_avg = pace_seconds_per_km(
            self.cumulative_distance_meters,
            f64::from(duration_seconds),
            self.pace_available(),
        );

        log::info!(
            "[TrackingSession] Finalized {} workout: {:.0}m, {}s, {} points",
            self.mode.as_str(),
            self.cumulative_distance_meters,
            duration_seconds,
            self.path.len()
        );

        WorkoutRecord {
            user_id: details.user_id,
            activity_type: details.activity_type,
            started_at: details.started_at,
            ended_at: details.ended_at,
            duration_seconds,
            distance_km: self.cumulative_distance_meters / 1000.0,
            calories: details.calories,
            avg_hr: details.avg_hr,
            max_hr: details.max_hr,
            pace_avg,
            path: self.path,
            intensity: details.intensity,
            equipment: details.equipment,
            notes: details.notes,
            extras: details.extras,
            session_id: details.session_id,
        }
    }
}

fn pace_seconds_per_km(distance_meters: f64, elapsed_seconds: f64, available: bool) -> Option<f64> {
    if !available || distance_meters <= 0.0 || elapsed_seconds <= 0.0 {
        return None;
    }
    Some(elapsed_seconds / (distance_meters / 1000.0))
}
