//! # Sync Reconciler
//!
//! Drains the offline queue into the remote store whenever connectivity is
//! restored.
//!
//! ## Drain Pass
//!
//! 1. Single-flight: a trigger while a pass runs is a no-op.
//! 2. Snapshot the queue with `list_all()`; workouts queued after this point
//!    wait for the next pass.
//! 3. For each workout, in order: insert remotely (bounded retry on
//!    schema-cache staleness only). Success removes the row and purges the
//!    session's cache entries; failure is logged and the row stays queued.
//! 4. One batch notification if anything succeeded, plus one system
//!    notification when the platform permission was granted.
//!
//! The queue lock is only held for individual store calls, never across an
//! await.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{RemoteError, Result, TrackError};
use crate::persistence::OfflineQueue;
use crate::remote::RemoteWorkoutStore;
use crate::retry::{AbortSignal, RetryPolicy, with_retry};
use crate::types::{QueuedWorkout, WorkoutRecord};

// ============================================================================
// Collaborators
// ============================================================================

/// Process-wide online/offline flag, fed by platform connectivity events.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Record a platform connectivity event. Repeated values are ignored.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Toast / system notification surface. Decides nothing; only displays.
pub trait SyncNotifier: Send + Sync {
    /// A drain pass confirmed at least one workout.
    fn batch_synced(&self, summary: &DrainSummary);

    /// Whether the user already granted system notification permission.
    fn system_notifications_permitted(&self) -> bool;

    fn post_system_notification(&self, title: &str, body: &str);
}

impl<N: SyncNotifier + ?Sized> SyncNotifier for Arc<N> {
    fn batch_synced(&self, summary: &DrainSummary) {
        (**self).batch_synced(summary)
    }

    fn system_notifications_permitted(&self) -> bool {
        (**self).system_notifications_permitted()
    }

    fn post_system_notification(&self, title: &str, body: &str) {
        (**self).post_system_notification(title, body)
    }
}

/// Notifier that only logs; for hosts without a notification surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl SyncNotifier for LogNotifier {
    fn batch_synced(&self, summary: &DrainSummary) {
        info!(
            "[SyncReconciler] {} workout(s) synced",
            summary.synced.len()
        );
    }

    fn system_notifications_permitted(&self) -> bool {
        false
    }

    fn post_system_notification(&self, _title: &str, _body: &str) {}
}

// ============================================================================
// Configuration and Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_notification_title")]
    pub notification_title: String,
}

fn default_notification_title() -> String {
    "Treinos sincronizados".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            notification_title: default_notification_title(),
        }
    }
}

/// What happened to each workout in one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Queue ids confirmed by the remote store and removed locally
    pub synced: Vec<String>,
    /// Queue ids that failed and stay queued
    pub failed: Vec<String>,
    /// Queue ids not attempted because the pass was cancelled
    pub skipped: Vec<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another pass was already running; nothing was done
    AlreadyRunning,
    /// The local store could not be read; retried on the next trigger
    StoreUnavailable(String),
    Completed(DrainSummary),
}

/// Result of the immediate-persist path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Held in the offline queue under this id
    Queued { id: String },
}

/// Releases the in-flight flag when the pass ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// Sync Reconciler
// ============================================================================

pub struct SyncReconciler<R, N> {
    queue: Arc<Mutex<OfflineQueue>>,
    remote: R,
    notifier: N,
    config: SyncConfig,
    in_flight: Arc<AtomicBool>,
}

impl<R, N> SyncReconciler<R, N>
where
    R: RemoteWorkoutStore + 'static,
    N: SyncNotifier + 'static,
{
    pub fn new(queue: Arc<Mutex<OfflineQueue>>, remote: R, notifier: N, config: SyncConfig) -> Self {
        Self {
            queue,
            remote,
            notifier,
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share the single-flight flag with other reconcilers draining the same
    /// queue, so at most one pass runs across all of them.
    pub fn with_in_flight_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.in_flight = flag;
        self
    }

    pub fn is_draining(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn lock_queue(&self) -> Result<MutexGuard<'_, OfflineQueue>> {
        self.queue.lock().map_err(|_| TrackError::LockPoisoned)
    }

    // ========================================================================
    // Immediate Persist
    // ========================================================================

    /// Save a just-finalized workout, falling back to the offline queue.
    ///
    /// When offline the remote call is skipped. Any failure, including a
    /// cancellation, queues the workout so it is never lost.
    pub async fn persist_or_queue(
        &self,
        record: &WorkoutRecord,
        online: bool,
        signal: &AbortSignal,
    ) -> Result<SaveOutcome> {
        if online {
            let result = with_retry(&self.config.retry, signal, |_| {
                self.remote.insert_workout(record)
            })
            .await;

            match result {
                Ok(()) => return Ok(SaveOutcome::Saved),
                Err(RemoteError::Cancelled) => {
                    debug!("[SyncReconciler] Save cancelled, queueing {}", record.queue_id());
                }
                Err(e) => {
                    info!(
                        "[SyncReconciler] Save failed ({}), queueing {}",
                        e,
                        record.queue_id()
                    );
                }
            }
        }

        let queued = self.lock_queue()?.enqueue(record)?;
        Ok(SaveOutcome::Queued { id: queued.id })
    }

    // ========================================================================
    // Drain
    // ========================================================================

    /// Run one drain pass unless one is already running.
    pub async fn drain(&self, signal: &AbortSignal) -> DrainOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("[SyncReconciler] Drain already running, ignoring trigger");
            return DrainOutcome::AlreadyRunning;
        };

        let snapshot = match self.lock_queue().and_then(|queue| queue.list_all()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("[SyncReconciler] Offline store unavailable: {}", e);
                return DrainOutcome::StoreUnavailable(e.to_string());
            }
        };

        if snapshot.is_empty() {
            debug!("[SyncReconciler] Queue empty");
            return DrainOutcome::Completed(DrainSummary::default());
        }

        let start = Instant::now();
        info!("[SyncReconciler] Draining {} queued workout(s)", snapshot.len());

        let mut summary = DrainSummary::default();
        let mut pending = snapshot.into_iter();

        for queued in pending.by_ref() {
            let result = with_retry(&self.config.retry, signal, |_| {
                self.remote.insert_workout(&queued.record)
            })
            .await;

            match result {
                Ok(()) => {
                    self.confirm_synced(&queued);
                    summary.synced.push(queued.id);
                }
                Err(RemoteError::Cancelled) => {
                    info!("[SyncReconciler] Drain cancelled at {}", queued.id);
                    summary.cancelled = true;
                    summary.skipped.push(queued.id);
                    break;
                }
                Err(e) => {
                    warn!("[SyncReconciler] Failed to sync {}: {}", queued.id, e);
                    summary.failed.push(queued.id);
                }
            }
        }
        summary.skipped.extend(pending.map(|queued| queued.id));

        info!(
            "[SyncReconciler] Pass complete: {} synced, {} failed, {} skipped ({} ms)",
            summary.synced.len(),
            summary.failed.len(),
            summary.skipped.len(),
            start.elapsed().as_millis()
        );

        if !summary.synced.is_empty() {
            self.notify(&summary);
        }

        DrainOutcome::Completed(summary)
    }

    /// Remove a confirmed workout and its session cache.
    ///
    /// A failure here leaves the row queued; it is logged because the next
    /// pass would send the workout again.
    fn confirm_synced(&self, queued: &QueuedWorkout) {
        let result = self.lock_queue().and_then(|queue| {
            queue.remove(&queued.id)?;
            if let Some(session_id) = &queued.record.session_id {
                queue.purge_session_cache(&queued.record.user_id, session_id)?;
            }
            Ok(())
        });

        if let Err(e) = result {
            warn!(
                "[SyncReconciler] Synced {} but could not clear it locally: {}",
                queued.id, e
            );
        }
    }

    fn notify(&self, summary: &DrainSummary) {
        self.notifier.batch_synced(summary);

        if self.notifier.system_notifications_permitted() {
            let body = match summary.synced.len() {
                1 => "1 treino salvo offline foi enviado.".to_string(),
                n => format!("{n} treinos salvos offline foram enviados."),
            };
            self.notifier
                .post_system_notification(&self.config.notification_title, &body);
        }
    }

    // ========================================================================
    // Connectivity Triggers
    // ========================================================================

    /// Start a drain pass in the background. A no-op while one is running.
    pub fn trigger(self: &Arc<Self>, signal: AbortSignal) -> JoinHandle<DrainOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.drain(&signal).await })
    }

    /// Watch connectivity and drain on every offline → online transition.
    ///
    /// `connectivity` must only notify on real changes (see
    /// [`ConnectivityMonitor`]), so a notification that ends online is a
    /// reconnect even when an intermediate offline value was coalesced.
    ///
    /// If already online when called, an initial pass runs immediately. The
    /// listener ends when `signal` fires or the connectivity source is dropped.
    pub fn spawn_listener(
        self: Arc<Self>,
        mut connectivity: watch::Receiver<bool>,
        signal: AbortSignal,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            if *connectivity.borrow_and_update() {
                info!("[SyncReconciler] Online at start, checking queue");
                self.trigger(signal.clone());
            }

            loop {
                tokio::select! {
                    _ = signal.aborted() => break,
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *connectivity.borrow_and_update() {
                            info!("[SyncReconciler] Connectivity restored");
                            self.trigger(signal.clone());
                        }
                    }
                }
            }
            debug!("[SyncReconciler] Connectivity listener stopped");
        })
    }
}
