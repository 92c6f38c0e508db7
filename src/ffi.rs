//! FFI bindings for mobile platforms (iOS/Android).
//!
//! Exposes the tracking session, the global offline queue and a blocking
//! drain entry point to Kotlin and Swift. Records cross the boundary as JSON
//! strings so the app's existing workout payloads can be passed through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{info, warn};
use once_cell::sync::Lazy;

use crate::persistence::{init_offline_queue, shared_offline_queue, with_offline_queue};
use crate::{
    AbortSignal, DrainOutcome, DrainSummary, LocationFix, MovementState, OfflineQueue,
    RemoteWorkoutStore, SessionSnapshot, SyncConfig, SyncNotifier, SyncReconciler, TrackingMode,
    TrackingSession, WorkoutDetails, WorkoutRecord, init_logging,
};

// ============================================================================
// Tracking Session
// ============================================================================

/// Session state for display, mirrored from [`SessionSnapshot`].
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSessionSnapshot {
    pub mode: TrackingMode,
    pub state: MovementState,
    pub consecutive_accepted: u32,
    pub consecutive_rejected: u32,
    pub cumulative_distance_meters: f64,
    pub path_len: u32,
    pub pace_available: bool,
}

impl From<SessionSnapshot> for FfiSessionSnapshot {
    fn from(s: SessionSnapshot) -> Self {
        Self {
            mode: s.mode,
            state: s.state,
            consecutive_accepted: s.consecutive_accepted,
            consecutive_rejected: s.consecutive_rejected,
            cumulative_distance_meters: s.cumulative_distance_meters,
            path_len: u32::try_from(s.path_len).unwrap_or(u32::MAX),
            pace_available: s.pace_available,
        }
    }
}

/// A tracking session owned by the app.
///
/// The inner session is taken on finalize; later calls are no-ops.
#[derive(uniffi::Object)]
pub struct FfiTrackingSession {
    inner: Mutex<Option<TrackingSession>>,
}

#[uniffi::export]
impl FfiTrackingSession {
    #[uniffi::constructor]
    pub fn new(mode: TrackingMode) -> Arc<Self> {
        init_logging();
        info!("[RUST: tracking_session] Started {} session", mode.as_str());
        Arc::new(Self {
            inner: Mutex::new(Some(TrackingSession::new(mode))),
        })
    }

    /// Feed one fix. Returns the new state if this fix caused a transition.
    pub fn push_fix(&self, fix: LocationFix) -> Option<MovementState> {
        let mut guard = self.inner.lock().ok()?;
        guard.as_mut()?.process_fix(fix).transition
    }

    pub fn snapshot(&self) -> Option<FfiSessionSnapshot> {
        let guard = self.inner.lock().ok()?;
        guard.as_ref().map(|s| s.snapshot().into())
    }

    /// Average pace for the elapsed time, or None while unavailable.
    pub fn pace_seconds_per_km(&self, elapsed_seconds: f64) -> Option<f64> {
        let guard = self.inner.lock().ok()?;
        guard.as_ref()?.pace_seconds_per_km(elapsed_seconds)
    }

    /// Finalize into a workout record.
    ///
    /// # Arguments
    /// * `details_json` - JSON object with the non-GPS workout fields
    ///
    /// # Returns
    /// The record as JSON, or None if the details did not parse or the
    /// session was already finalized
    pub fn finalize_json(&self, details_json: String) -> Option<String> {
        let details: WorkoutDetails = match serde_json::from_str(&details_json) {
            Ok(d) => d,
            Err(e) => {
                warn!("[RUST: tracking_session] Invalid workout details: {}", e);
                return None;
            }
        };

        let session = self.inner.lock().ok()?.take()?;
        let record = session.finalize(details);
        serde_json::to_string(&record).ok()
    }
}

/// Tracking mode for an app activity type.
#[uniffi::export]
pub fn tracking_mode_for_activity(activity_type: String) -> TrackingMode {
    TrackingMode::from_activity_type(&activity_type)
}

// ============================================================================
// Offline Queue
// ============================================================================

/// Open the global offline queue. Must be called once at app startup.
#[uniffi::export]
pub fn offline_queue_init(db_path: String) -> bool {
    init_logging();
    match init_offline_queue(&db_path) {
        Ok(()) => true,
        Err(e) => {
            warn!("[RUST: offline_queue_init] Failed to open {}: {}", db_path, e);
            false
        }
    }
}

/// Queue a workout record given as JSON.
///
/// # Returns
/// The queue id, or None on error
#[uniffi::export]
pub fn offline_queue_enqueue_json(record_json: String) -> Option<String> {
    let record: WorkoutRecord = match serde_json::from_str(&record_json) {
        Ok(r) => r,
        Err(e) => {
            warn!("[RUST: offline_queue_enqueue] Invalid workout record: {}", e);
            return None;
        }
    };

    with_offline_queue(|q| q.enqueue(&record))
        .and_then(|r| r.map_err(|e| warn!("[RUST: offline_queue_enqueue] {}", e)).ok())
        .map(|queued| queued.id)
}

/// Queued workouts as a JSON array, oldest first.
#[uniffi::export]
pub fn offline_queue_list_json() -> String {
    let records: Vec<WorkoutRecord> = with_offline_queue(|q| q.list_all())
        .and_then(|r| r.ok())
        .unwrap_or_default()
        .into_iter()
        .map(|queued| queued.record)
        .collect();
    serde_json::to_string(&records).unwrap_or_else(|_| "[]".to_string())
}

#[uniffi::export]
pub fn offline_queue_count() -> u32 {
    with_offline_queue(|q| q.count())
        .and_then(|r| r.ok())
        .unwrap_or(0)
}

#[uniffi::export]
pub fn offline_queue_clear() -> bool {
    with_offline_queue(|q| q.clear()).is_some_and(|r| r.is_ok())
}

// ============================================================================
// Activity Cache
// ============================================================================

#[uniffi::export]
pub fn activity_cache_put(key: String, data_json: String) -> bool {
    let Ok(data) = serde_json::from_str::<serde_json::Value>(&data_json) else {
        warn!("[RUST: activity_cache_put] Invalid JSON for {}", key);
        return false;
    };
    with_offline_queue(|q| q.cache_put(&key, &data)).is_some_and(|r| r.is_ok())
}

/// Cached JSON for `key`, or None on a miss or after the TTL.
#[uniffi::export]
pub fn activity_cache_get(key: String) -> Option<String> {
    with_offline_queue(|q| q.cache_get(&key))
        .and_then(|r| r.ok())
        .flatten()
        .and_then(|entry| serde_json::to_string(&entry.data).ok())
}

#[uniffi::export]
pub fn activity_cache_remove(key: String) -> bool {
    with_offline_queue(|q| q.cache_remove(&key)).is_some_and(|r| r.is_ok())
}

// ============================================================================
// Sync
// ============================================================================

/// Host notification surface for sync results.
/// Implement this in Kotlin/Swift to show the toast and system notification.
#[uniffi::export(callback_interface)]
pub trait SyncNotificationCallback: Send + Sync {
    /// A drain pass confirmed `synced_count` workouts.
    fn on_batch_synced(&self, synced_count: u32);

    /// Whether the user already granted system notification permission.
    fn system_notifications_permitted(&self) -> bool;

    fn post_system_notification(&self, title: String, body: String);
}

/// Result of one blocking drain pass.
#[derive(Debug, Clone, Default, uniffi::Record)]
pub struct FfiDrainResult {
    pub synced_ids: Vec<String>,
    pub failed_ids: Vec<String>,
    /// Another pass was running or the store was not available
    pub skipped: bool,
    /// Whether the batch notification was sent
    pub batch_notified: bool,
    /// Body of the system notification, if one was posted
    pub system_notification: Option<String>,
    pub total_time_ms: u32,
}

/// Single-flight flag shared by every drain started through the bindings.
static DRAIN_IN_FLIGHT: Lazy<Arc<AtomicBool>> = Lazy::new(|| Arc::new(AtomicBool::new(false)));

fn elapsed_ms(start: Instant) -> u32 {
    u32::try_from(start.elapsed().as_millis()).unwrap_or(u32::MAX)
}

/// Forwards to the host callback and remembers what was sent.
struct RecordingNotifier {
    callback: Box<dyn SyncNotificationCallback>,
    batch_notified: AtomicBool,
    system_notification: Mutex<Option<String>>,
}

impl SyncNotifier for RecordingNotifier {
    fn batch_synced(&self, summary: &DrainSummary) {
        self.batch_notified.store(true, Ordering::Release);
        let count = u32::try_from(summary.synced.len()).unwrap_or(u32::MAX);
        self.callback.on_batch_synced(count);
    }

    fn system_notifications_permitted(&self) -> bool {
        self.callback.system_notifications_permitted()
    }

    fn post_system_notification(&self, title: &str, body: &str) {
        if let Ok(mut sent) = self.system_notification.lock() {
            *sent = Some(body.to_string());
        }
        self.callback
            .post_system_notification(title.to_string(), body.to_string());
    }
}

/// Run one drain pass on a dedicated runtime, blocking the calling thread.
fn drain_blocking<R: RemoteWorkoutStore + 'static>(
    queue: Arc<Mutex<OfflineQueue>>,
    remote: R,
    callback: Box<dyn SyncNotificationCallback>,
    in_flight: Arc<AtomicBool>,
) -> FfiDrainResult {
    let start = Instant::now();
    let skipped = || FfiDrainResult {
        skipped: true,
        total_time_ms: elapsed_ms(start),
        ..Default::default()
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            warn!("[RUST: sync_offline_queue] Failed to create runtime: {}", e);
            return skipped();
        }
    };

    let notifier = Arc::new(RecordingNotifier {
        callback,
        batch_notified: AtomicBool::new(false),
        system_notification: Mutex::new(None),
    });
    let reconciler = SyncReconciler::new(
        queue,
        remote,
        Arc::clone(&notifier),
        SyncConfig::default(),
    )
    .with_in_flight_flag(in_flight);

    match rt.block_on(reconciler.drain(&AbortSignal::never())) {
        DrainOutcome::Completed(summary) => {
            info!(
                "[RUST: sync_offline_queue] {} synced, {} failed ({} ms)",
                summary.synced.len(),
                summary.failed.len(),
                elapsed_ms(start)
            );
            FfiDrainResult {
                synced_ids: summary.synced,
                failed_ids: summary.failed,
                skipped: false,
                batch_notified: notifier.batch_notified.load(Ordering::Acquire),
                system_notification: notifier
                    .system_notification
                    .lock()
                    .ok()
                    .and_then(|sent| sent.clone()),
                total_time_ms: elapsed_ms(start),
            }
        }
        DrainOutcome::AlreadyRunning => {
            info!("[RUST: sync_offline_queue] Drain already running, skipping");
            skipped()
        }
        DrainOutcome::StoreUnavailable(e) => {
            warn!("[RUST: sync_offline_queue] Store unavailable: {}", e);
            skipped()
        }
    }
}

/// Drain the global offline queue into the REST store, blocking the calling
/// thread. Call from a background thread on reconnect; overlapping calls are
/// skipped while a pass is running.
///
/// # Arguments
/// * `store_config_json` - Serialized [`crate::RestStoreConfig`]
/// * `notifier` - Receives the batch and system notification decisions
#[cfg(feature = "http")]
#[uniffi::export]
pub fn sync_offline_queue(
    store_config_json: String,
    notifier: Box<dyn SyncNotificationCallback>,
) -> FfiDrainResult {
    use crate::{RestStoreConfig, RestWorkoutStore};

    init_logging();
    let skipped = FfiDrainResult {
        skipped: true,
        ..Default::default()
    };

    let config: RestStoreConfig = match serde_json::from_str(&store_config_json) {
        Ok(c) => c,
        Err(e) => {
            warn!("[RUST: sync_offline_queue] Invalid store config: {}", e);
            return skipped;
        }
    };
    let remote = match RestWorkoutStore::new(config) {
        Ok(r) => r,
        Err(e) => {
            warn!("[RUST: sync_offline_queue] {}", e);
            return skipped;
        }
    };
    let Some(queue) = shared_offline_queue() else {
        warn!("[RUST: sync_offline_queue] Offline queue not initialized");
        return skipped;
    };

    drain_blocking(queue, remote, notifier, Arc::clone(&DRAIN_IN_FLIGHT))
}
