//! # Fittrack
//!
//! On-device activity tracking and offline workout sync for the mobile app.
//!
//! This library provides:
//! - A movement confidence state machine that turns raw GPS fixes into a
//!   moving/stopped signal, a cumulative distance and a path
//! - A durable SQLite queue so a finished workout is never lost offline
//! - A sync reconciler that drains the queue when connectivity returns,
//!   without duplicating workouts on the remote store
//!
//! ## Features
//!
//! - **`http`** - REST implementation of the remote workout store (default)
//! - **`ffi`** - UniFFI bindings for iOS/Android
//!
//! ## Quick Start
//!
//! ```rust
//! use fittrack::{LocationFix, MovementState, TrackingMode, TrackingSession};
//!
//! let mut session = TrackingSession::new(TrackingMode::Running);
//! for i in 0..3 {
//!     let fix = LocationFix::new(-23.5505 + i as f64 * 0.0001, -46.6333).with_speed(3.0);
//!     session.process_fix(fix);
//! }
//! assert_eq!(session.state(), MovementState::Moving);
//! ```

use serde::{Deserialize, Serialize};

// Error types
pub mod error;
pub use error::{RemoteError, Result, TrackError};

// Geodesic distance
pub mod geo_utils;

// Per-mode movement thresholds
pub mod policy;
pub use policy::{MovementConfidenceParams, TrackingMode, params_for};

// Movement confidence state machine
pub mod tracker;
pub use tracker::{
    FixClassification, FixOutcome, LocationFix, MovementState, NoiseReason, SessionOptions,
    SessionSnapshot, TrackingSession,
};

// Workout records and queue rows
pub mod types;
pub use types::{ActivityCacheEntry, QueuedWorkout, WorkoutDetails, WorkoutRecord};

// Offline queue and cache (SQLite)
pub mod migrations;
pub mod persistence;
pub use persistence::{
    OFFLINE_QUEUE, OfflineQueue, init_offline_queue, session_cache_key, shared_offline_queue,
    with_offline_queue,
};

// Retry policy and cancellation
pub mod retry;
pub use retry::{AbortController, AbortSignal, RetryPolicy, with_retry};

// Remote workout store
pub mod remote;
pub use remote::RemoteWorkoutStore;
#[cfg(feature = "http")]
pub use remote::{RestStoreConfig, RestWorkoutStore};

// Queue draining on reconnect
pub mod sync;
pub use sync::{
    ConnectivityMonitor, DrainOutcome, DrainSummary, LogNotifier, SaveOutcome, SyncConfig,
    SyncNotifier, SyncReconciler,
};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("fittrack"),
    );
}

/// Initialize logging for iOS
#[cfg(target_os = "ios")]
pub fn init_logging() {
    use log::LevelFilter;

    // Fails only if a logger is already installed
    let _ = oslog::OsLogger::new("com.fittrack.core")
        .level_filter(LevelFilter::Debug)
        .init();
}

#[cfg(not(any(target_os = "android", target_os = "ios")))]
pub fn init_logging() {
    // Desktop hosts and tests install their own logger
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use fittrack::GpsPoint;
/// let point = GpsPoint::new(-23.5505, -46.6333); // São Paulo
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}
