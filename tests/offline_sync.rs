//! Offline sync integration tests.
//!
//! Tests the full pipeline: tracking session -> finalize -> offline queue ->
//! app restart -> reconnect -> drain into the remote store.
//!
//! Run with: `cargo test --test offline_sync`

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use fittrack::{
    AbortController, AbortSignal, ConnectivityMonitor, DrainOutcome, DrainSummary, LocationFix,
    MovementState, OfflineQueue, RemoteError, RemoteWorkoutStore, RetryPolicy, SaveOutcome,
    SyncConfig, SyncNotifier, SyncReconciler, TrackingMode, TrackingSession, WorkoutDetails,
    WorkoutRecord, session_cache_key,
};
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// In-memory remote store with per-workout scripted failures.
#[derive(Clone, Default)]
struct FakeStore {
    state: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    scripted: HashMap<String, VecDeque<RemoteError>>,
    attempts: HashMap<String, u32>,
    inserted: Vec<String>,
}

impl FakeStore {
    fn fail_next(&self, id: &str, error: RemoteError) {
        let mut state = self.state.lock().unwrap();
        state.scripted.entry(id.to_string()).or_default().push_back(error);
    }

    fn inserted(&self) -> Vec<String> {
        self.state.lock().unwrap().inserted.clone()
    }

    fn attempts(&self, id: &str) -> u32 {
        self.state.lock().unwrap().attempts.get(id).copied().unwrap_or(0)
    }
}

impl RemoteWorkoutStore for FakeStore {
    fn insert_workout(
        &self,
        record: &WorkoutRecord,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send {
        let id = record.queue_id();
        let mut state = self.state.lock().unwrap();
        *state.attempts.entry(id.clone()).or_default() += 1;
        let result = match state.scripted.get_mut(&id).and_then(|q| q.pop_front()) {
            Some(error) => Err(error),
            None => {
                state.inserted.push(id);
                Ok(())
            }
        };
        std::future::ready(result)
    }
}

#[derive(Clone, Default)]
struct CountingNotifier {
    batches: Arc<AtomicUsize>,
    system: Arc<Mutex<Vec<String>>>,
    permitted: bool,
}

impl SyncNotifier for CountingNotifier {
    fn batch_synced(&self, _summary: &DrainSummary) {
        self.batches.fetch_add(1, Ordering::SeqCst);
    }

    fn system_notifications_permitted(&self) -> bool {
        self.permitted
    }

    fn post_system_notification(&self, _title: &str, body: &str) {
        self.system.lock().unwrap().push(body.to_string());
    }
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        retry: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        },
        ..Default::default()
    }
}

/// Record a short run through a real tracking session and finalize it.
fn record_run(user: &str, session_id: &str, minute: u32) -> WorkoutRecord {
    let mut session = TrackingSession::new(TrackingMode::from_activity_type("corrida"));
    for i in 0..10 {
        let fix = LocationFix::new(-23.5505 + i as f64 * 0.0001, -46.6333)
            .with_speed(3.2)
            .at(i as i64 * 4_000);
        session.process_fix(fix);
    }
    assert_eq!(session.state(), MovementState::Moving);

    let started = Utc.with_ymd_and_hms(2026, 5, 3, 7, minute, 0).unwrap();
    let mut details = WorkoutDetails::new(
        user,
        "corrida",
        started,
        started + chrono::Duration::minutes(1),
    );
    details.session_id = Some(session_id.to_string());
    session.finalize(details)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn shared_queue(path: &str) -> Arc<Mutex<OfflineQueue>> {
    Arc::new(Mutex::new(
        OfflineQueue::new(path).expect("failed to open queue"),
    ))
}

// ============================================================================
// Test: Offline Save Survives Restart and Syncs on Reconnect
// ============================================================================

#[tokio::test]
async fn test_offline_workout_survives_restart_and_syncs_on_reconnect() {
    init_test_logging();
    let tmp_dir = TempDir::new().expect("failed to create temp dir");
    let db_path = tmp_dir.path().join("offline.db");
    let db_path = db_path.to_str().unwrap();

    let record = record_run("u1", "s-1", 0);
    assert!(record.distance_km > 0.09);
    assert!(record.pace_avg.is_some());

    // First app run: finish the workout while offline
    {
        let reconciler = SyncReconciler::new(
            shared_queue(db_path),
            FakeStore::default(),
            CountingNotifier::default(),
            fast_config(),
        );
        let outcome = reconciler
            .persist_or_queue(&record, false, &AbortSignal::never())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SaveOutcome::Queued {
                id: record.queue_id()
            }
        );
    }

    // Second app run: queue is still there, plus a session-scoped cache entry
    let queue = shared_queue(db_path);
    {
        let q = queue.lock().unwrap();
        assert_eq!(q.list_all().unwrap()[0].record, record);
        q.cache_put(&session_cache_key("u1", "s-1"), &json!({ "draft": true }))
            .unwrap();
    }

    let store = FakeStore::default();
    let notifier = CountingNotifier {
        permitted: true,
        ..Default::default()
    };
    let reconciler = Arc::new(SyncReconciler::new(
        Arc::clone(&queue),
        store.clone(),
        notifier.clone(),
        fast_config(),
    ));

    let monitor = ConnectivityMonitor::new(false);
    let controller = AbortController::new();
    let listener = Arc::clone(&reconciler).spawn_listener(monitor.subscribe(), controller.signal());

    monitor.set_online(true);
    wait_until(|| notifier.batches.load(Ordering::SeqCst) == 1).await;

    assert_eq!(store.inserted(), vec![record.queue_id()]);
    {
        let q = queue.lock().unwrap();
        assert_eq!(q.count().unwrap(), 0);
        assert!(q.cache_get(&session_cache_key("u1", "s-1")).unwrap().is_none());
    }
    assert_eq!(
        notifier.system.lock().unwrap().as_slice(),
        ["1 treino salvo offline foi enviado.".to_string()]
    );

    controller.abort();
    listener.await.unwrap();
}

// ============================================================================
// Test: Failed Workout Stays Queued Until the Next Reconnect
// ============================================================================

#[tokio::test]
async fn test_failed_workout_retried_on_next_reconnect() {
    init_test_logging();
    let tmp_dir = TempDir::new().expect("failed to create temp dir");
    let db_path = tmp_dir.path().join("offline.db");
    let queue = shared_queue(db_path.to_str().unwrap());

    let rejected = record_run("u1", "s-1", 0);
    let accepted = record_run("u1", "s-2", 30);
    {
        let q = queue.lock().unwrap();
        q.enqueue(&rejected).unwrap();
        q.enqueue(&accepted).unwrap();
    }

    let store = FakeStore::default();
    store.fail_next(
        &rejected.queue_id(),
        RemoteError::Permanent {
            status: Some(403),
            message: "row-level security".to_string(),
        },
    );
    let notifier = CountingNotifier::default();
    let reconciler = Arc::new(SyncReconciler::new(
        Arc::clone(&queue),
        store.clone(),
        notifier.clone(),
        fast_config(),
    ));

    // Online at startup: the listener drains straight away
    let monitor = ConnectivityMonitor::new(true);
    let controller = AbortController::new();
    let listener = Arc::clone(&reconciler).spawn_listener(monitor.subscribe(), controller.signal());

    wait_until(|| notifier.batches.load(Ordering::SeqCst) == 1).await;
    wait_until(|| !reconciler.is_draining()).await;

    assert_eq!(store.inserted(), vec![accepted.queue_id()]);
    assert_eq!(store.attempts(&rejected.queue_id()), 1);
    let remaining: Vec<String> = queue
        .lock()
        .unwrap()
        .list_all()
        .unwrap()
        .into_iter()
        .map(|q| q.id)
        .collect();
    assert_eq!(remaining, vec![rejected.queue_id()]);

    // Drop and restore connectivity
    monitor.set_online(false);
    monitor.set_online(true);
    wait_until(|| notifier.batches.load(Ordering::SeqCst) == 2).await;

    assert_eq!(
        store.inserted(),
        vec![accepted.queue_id(), rejected.queue_id()]
    );
    assert_eq!(queue.lock().unwrap().count().unwrap(), 0);

    controller.abort();
    listener.await.unwrap();
}

// ============================================================================
// Test: Schema-Cache Staleness Is Retried Within One Pass
// ============================================================================

#[tokio::test]
async fn test_schema_cache_fault_retried_within_pass() {
    init_test_logging();
    let queue = Arc::new(Mutex::new(OfflineQueue::in_memory().unwrap()));
    let record = record_run("u2", "s-9", 0);
    queue.lock().unwrap().enqueue(&record).unwrap();

    let store = FakeStore::default();
    for _ in 0..2 {
        store.fail_next(
            &record.queue_id(),
            RemoteError::TransientBackendFault {
                message: "Could not find the table in the schema cache".to_string(),
            },
        );
    }

    let reconciler = SyncReconciler::new(
        Arc::clone(&queue),
        store.clone(),
        CountingNotifier::default(),
        fast_config(),
    );

    let DrainOutcome::Completed(summary) = reconciler.drain(&AbortSignal::never()).await else {
        panic!("expected a completed pass");
    };
    assert_eq!(summary.synced, vec![record.queue_id()]);
    assert_eq!(store.attempts(&record.queue_id()), 3);
    assert_eq!(queue.lock().unwrap().count().unwrap(), 0);
}

// ============================================================================
// Test: Online Save Never Touches the Queue
// ============================================================================

#[tokio::test]
async fn test_online_save_skips_queue() {
    init_test_logging();
    let queue = Arc::new(Mutex::new(OfflineQueue::in_memory().unwrap()));
    let store = FakeStore::default();
    let reconciler = SyncReconciler::new(
        Arc::clone(&queue),
        store.clone(),
        CountingNotifier::default(),
        fast_config(),
    );

    let record = record_run("u3", "s-1", 0);
    let outcome = reconciler
        .persist_or_queue(&record, true, &AbortSignal::never())
        .await
        .unwrap();

    assert_eq!(outcome, SaveOutcome::Saved);
    assert_eq!(store.inserted(), vec![record.queue_id()]);
    assert_eq!(queue.lock().unwrap().count().unwrap(), 0);
}

// ============================================================================
// Test: Unreachable Backend Falls Back to the Queue
// ============================================================================

#[tokio::test]
async fn test_unreachable_backend_queues_once() {
    init_test_logging();
    let queue = Arc::new(Mutex::new(OfflineQueue::in_memory().unwrap()));
    let store = FakeStore::default();
    let record = record_run("u4", "s-1", 0);
    store.fail_next(
        &record.queue_id(),
        RemoteError::ConnectivityUnavailable {
            message: "dns error".to_string(),
        },
    );

    let reconciler = SyncReconciler::new(
        Arc::clone(&queue),
        store.clone(),
        CountingNotifier::default(),
        fast_config(),
    );
    let outcome = reconciler
        .persist_or_queue(&record, true, &AbortSignal::never())
        .await
        .unwrap();

    assert!(matches!(outcome, SaveOutcome::Queued { .. }));
    // Not a transient backend fault, so no retry
    assert_eq!(store.attempts(&record.queue_id()), 1);
    assert_eq!(queue.lock().unwrap().count().unwrap(), 1);
}
