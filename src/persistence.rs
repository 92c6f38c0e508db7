//! # Offline Durable Queue
//!
//! SQLite store for workouts that could not be confirmed on the remote store,
//! plus an independent read-through cache.
//!
//! ## Namespaces
//!
//! 1. **`workout_queue`**: one row per pending workout, keyed by
//!    [`WorkoutRecord::queue_id`]. The record itself is a MessagePack blob.
//!    Rows are only deleted when the remote store confirmed the insert.
//!
//! 2. **`activity_cache`**: arbitrary JSON keyed by string with a 24h TTL.
//!    Expired rows are evicted lazily on read.
//!
//! Every write is a single autocommitted statement with
//! `synchronous = FULL`, so a row is on disk before the call returns.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Result, TrackError};
use crate::migrations;
use crate::types::{ActivityCacheEntry, QueuedWorkout, WorkoutRecord};

/// Cache entries older than this many hours are treated as misses.
pub const CACHE_TTL_HOURS: i64 = 24;

/// Cache key scoping data to one user's recording session.
///
/// Entries stored under this key, or under `"{key}:..."`, are purged once the
/// session's workout is confirmed on the remote store.
pub fn session_cache_key(user_id: &str, session_id: &str) -> String {
    format!("session:{user_id}:{session_id}")
}

// ============================================================================
// Offline Queue
// ============================================================================

pub struct OfflineQueue {
    db: Connection,
}

impl OfflineQueue {
    /// Open (or create) the store at `db_path` and apply migrations.
    pub fn new(db_path: &str) -> Result<Self> {
        let mut db = Connection::open(db_path)?;
        let _mode: String =
            db.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        db.pragma_update(None, "synchronous", "FULL")?;
        migrations::apply(&mut db)?;

        info!("[OfflineQueue] Opened store at {}", db_path);
        Ok(Self { db })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    // ========================================================================
    // Workout Queue
    // ========================================================================

    /// Insert or replace the queued copy of `record`, stamped with the current time.
    pub fn enqueue(&self, record: &WorkoutRecord) -> Result<QueuedWorkout> {
        self.enqueue_at(record, Utc::now())
    }

    pub fn enqueue_at(&self, record: &WorkoutRecord, now: DateTime<Utc>) -> Result<QueuedWorkout> {
        let id = record.queue_id();
        let payload = rmp_serde::to_vec_named(record)?;

        self.db.execute(
            "INSERT INTO workout_queue (id, user_id, session_id, payload, enqueued_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                session_id = excluded.session_id,
                payload = excluded.payload,
                enqueued_at = excluded.enqueued_at",
            params![
                id,
                record.user_id,
                record.session_id,
                payload,
                now.timestamp_millis()
            ],
        )?;

        info!(
            "[OfflineQueue] Enqueued workout {} ({} bytes)",
            id,
            payload.len()
        );

        Ok(QueuedWorkout {
            id,
            record: record.clone(),
            enqueued_at: now,
        })
    }

    /// All queued workouts, oldest first.
    ///
    /// Rows that no longer decode are skipped with a warning rather than
    /// blocking the rest of the queue.
    pub fn list_all(&self) -> Result<Vec<QueuedWorkout>> {
        let mut stmt = self
            .db
            .prepare("SELECT id, payload, enqueued_at FROM workout_queue ORDER BY enqueued_at, id")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut queued = Vec::with_capacity(rows.len());
        for (id, payload, enqueued_ms) in rows {
            match decode_record(&id, &payload) {
                Ok(record) => queued.push(QueuedWorkout {
                    id,
                    record,
                    enqueued_at: millis_to_datetime(enqueued_ms),
                }),
                Err(e) => warn!("[OfflineQueue] Skipping unreadable row: {}", e),
            }
        }
        Ok(queued)
    }

    pub fn get(&self, id: &str) -> Result<Option<QueuedWorkout>> {
        let row = self
            .db
            .query_row(
                "SELECT payload, enqueued_at FROM workout_queue WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        row.map(|(payload, enqueued_ms)| {
            Ok(QueuedWorkout {
                id: id.to_string(),
                record: decode_record(id, &payload)?,
                enqueued_at: millis_to_datetime(enqueued_ms),
            })
        })
        .transpose()
    }

    /// Delete a queued workout. Absent ids are not an error.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let deleted = self
            .db
            .execute("DELETE FROM workout_queue WHERE id = ?1", params![id])?;
        debug!("[OfflineQueue] Removed {} (existed: {})", id, deleted > 0);
        Ok(deleted > 0)
    }

    pub fn clear(&self) -> Result<()> {
        let deleted = self.db.execute("DELETE FROM workout_queue", [])?;
        info!("[OfflineQueue] Cleared {} queued workouts", deleted);
        Ok(())
    }

    pub fn count(&self) -> Result<u32> {
        let count: u32 = self
            .db
            .query_row("SELECT COUNT(*) FROM workout_queue", [], |row| row.get(0))?;
        Ok(count)
    }

    // ========================================================================
    // Activity Cache
    // ========================================================================

    pub fn cache_put(&self, key: &str, data: &serde_json::Value) -> Result<()> {
        self.cache_put_at(key, data, Utc::now())
    }

    pub fn cache_put_at(&self, key: &str, data: &serde_json::Value, now: DateTime<Utc>) -> Result<()> {
        let json = serde_json::to_string(data)?;
        self.db.execute(
            "INSERT OR REPLACE INTO activity_cache (key, data, timestamp) VALUES (?1, ?2, ?3)",
            params![key, json, now.timestamp_millis()],
        )?;
        Ok(())
    }

    /// Cached entry for `key`, or None on a miss. Expired entries are evicted.
    pub fn cache_get(&self, key: &str) -> Result<Option<ActivityCacheEntry>> {
        self.cache_get_at(key, Utc::now())
    }

    pub fn cache_get_at(&self, key: &str, now: DateTime<Utc>) -> Result<Option<ActivityCacheEntry>> {
        let row = self
            .db
            .query_row(
                "SELECT data, timestamp FROM activity_cache WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        let Some((json, stored_ms)) = row else {
            return Ok(None);
        };

        let timestamp = millis_to_datetime(stored_ms);
        if now - timestamp > Duration::hours(CACHE_TTL_HOURS) {
            debug!("[OfflineQueue] Cache entry {} expired, evicting", key);
            self.cache_remove(key)?;
            return Ok(None);
        }

        Ok(Some(ActivityCacheEntry {
            key: key.to_string(),
            data: serde_json::from_str(&json)?,
            timestamp,
        }))
    }

    pub fn cache_remove(&self, key: &str) -> Result<()> {
        self.db
            .execute("DELETE FROM activity_cache WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Remove every cache entry scoped to a user's session. Returns the number removed.
    pub fn purge_session_cache(&self, user_id: &str, session_id: &str) -> Result<usize> {
        let key = session_cache_key(user_id, session_id);
        let prefix = format!("{key}:");
        let deleted = self.db.execute(
            "DELETE FROM activity_cache WHERE key = ?1 OR substr(key, 1, ?2) = ?3",
            params![key, prefix.chars().count() as i64, prefix],
        )?;
        if deleted > 0 {
            debug!("[OfflineQueue] Purged {} cache entries for {}", deleted, key);
        }
        Ok(deleted)
    }

    pub fn cache_count(&self) -> Result<u32> {
        let count: u32 = self
            .db
            .query_row("SELECT COUNT(*) FROM activity_cache", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn decode_record(id: &str, payload: &[u8]) -> Result<WorkoutRecord> {
    rmp_serde::from_slice(payload).map_err(|source| TrackError::Decode {
        id: id.to_string(),
        source,
    })
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

// ============================================================================
// Global Instance
// ============================================================================

/// Process-wide offline queue.
///
/// The mobile bindings open it once at startup. FFI calls and the sync
/// reconciler share the same connection through [`shared_offline_queue`].
pub static OFFLINE_QUEUE: Lazy<Mutex<Option<Arc<Mutex<OfflineQueue>>>>> =
    Lazy::new(|| Mutex::new(None));

/// Open the global queue at `db_path`, replacing any previous instance.
pub fn init_offline_queue(db_path: &str) -> Result<()> {
    let queue = OfflineQueue::new(db_path)?;
    let mut guard = OFFLINE_QUEUE.lock().map_err(|_| TrackError::LockPoisoned)?;
    *guard = Some(Arc::new(Mutex::new(queue)));
    Ok(())
}

/// Handle to the global queue, or None if it was never initialized.
pub fn shared_offline_queue() -> Option<Arc<Mutex<OfflineQueue>>> {
    OFFLINE_QUEUE.lock().ok()?.clone()
}

/// Run `f` against the global queue. Returns None if it was never initialized.
pub fn with_offline_queue<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut OfflineQueue) -> R,
{
    let queue = shared_offline_queue()?;
    let mut guard = queue.lock().ok()?;
    Some(f(&mut guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpsPoint;
    use serde_json::json;

    fn sample_record(user: &str, start_minute: u32) -> WorkoutRecord {
        let started_at = Utc.with_ymd_and_hms(2026, 4, 10, 7, start_minute, 0).unwrap();
        WorkoutRecord {
            user_id: user.to_string(),
            activity_type: "corrida".to_string(),
            started_at,
            ended_at: started_at + Duration::minutes(30),
            duration_seconds: 1800,
            distance_km: 5.2,
            calories: Some(410),
            avg_hr: Some(148),
            max_hr: Some(171),
            pace_avg: Some(346.0),
            path: vec![GpsPoint::new(-23.55, -46.63), GpsPoint::new(-23.56, -46.64)],
            intensity: Some("moderada".to_string()),
            equipment: None,
            notes: Some("parque".to_string()),
            extras: json!({ "weather": "sunny", "laps": [1, 2] }),
            session_id: Some(format!("s-{start_minute}")),
        }
    }

    #[test]
    fn test_enqueue_and_list() {
        let queue = OfflineQueue::in_memory().unwrap();
        let record = sample_record("u1", 0);
        let queued = queue.enqueue(&record).unwrap();

        let all = queue.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, queued.id);
        assert_eq!(all[0].record, record);
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let queue = OfflineQueue::in_memory().unwrap();
        let record = sample_record("u1", 0);
        queue.enqueue(&record).unwrap();
        queue.enqueue(&record).unwrap();
        assert_eq!(queue.count().unwrap(), 1);
    }

    #[test]
    fn test_remove_then_list() {
        let queue = OfflineQueue::in_memory().unwrap();
        let kept = queue.enqueue(&sample_record("u1", 0)).unwrap();
        let removed = queue.enqueue(&sample_record("u1", 5)).unwrap();

        assert!(queue.remove(&removed.id).unwrap());
        let ids: Vec<String> = queue.list_all().unwrap().into_iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![kept.id]);

        // Absent key is fine
        assert!(!queue.remove(&removed.id).unwrap());
    }

    #[test]
    fn test_list_order_is_by_enqueue_time() {
        let queue = OfflineQueue::in_memory().unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 4, 10, 9, 0, 0).unwrap();
        let late = queue.enqueue_at(&sample_record("u1", 0), t0 + Duration::seconds(10)).unwrap();
        let early = queue.enqueue_at(&sample_record("u2", 0), t0).unwrap();

        let ids: Vec<String> = queue.list_all().unwrap().into_iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[test]
    fn test_clear() {
        let queue = OfflineQueue::in_memory().unwrap();
        queue.enqueue(&sample_record("u1", 0)).unwrap();
        queue.enqueue(&sample_record("u2", 0)).unwrap();
        queue.clear().unwrap();
        assert!(queue.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_queue_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("offline.db");
        let path = path.to_str().unwrap();

        let record = sample_record("u1", 0);
        {
            let queue = OfflineQueue::new(path).unwrap();
            queue.enqueue(&record).unwrap();
        }

        let reopened = OfflineQueue::new(path).unwrap();
        let all = reopened.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].record, record);
    }

    #[test]
    fn test_unreadable_row_is_skipped() {
        let queue = OfflineQueue::in_memory().unwrap();
        queue.enqueue(&sample_record("u1", 0)).unwrap();
        queue
            .db
            .execute(
                "INSERT INTO workout_queue (id, user_id, payload, enqueued_at)
                 VALUES ('broken', 'u1', x'c1', 0)",
                [],
            )
            .unwrap();

        assert_eq!(queue.list_all().unwrap().len(), 1);
        assert!(matches!(
            queue.get("broken"),
            Err(TrackError::Decode { .. })
        ));
    }

    #[test]
    fn test_cache_hit_within_ttl() {
        let queue = OfflineQueue::in_memory().unwrap();
        let t = Utc.with_ymd_and_hms(2026, 4, 10, 9, 0, 0).unwrap();
        queue.cache_put_at("feed:u1", &json!({ "items": 3 }), t).unwrap();

        let entry = queue.cache_get_at("feed:u1", t + Duration::hours(23)).unwrap().unwrap();
        assert_eq!(entry.data, json!({ "items": 3 }));
        assert_eq!(entry.timestamp, t);
    }

    #[test]
    fn test_cache_expires_after_ttl() {
        let queue = OfflineQueue::in_memory().unwrap();
        let t = Utc.with_ymd_and_hms(2026, 4, 10, 9, 0, 0).unwrap();
        queue.cache_put_at("feed:u1", &json!([1, 2, 3]), t).unwrap();

        let hit = queue.cache_get_at("feed:u1", t + Duration::hours(25)).unwrap();
        assert!(hit.is_none());
        assert_eq!(queue.cache_count().unwrap(), 0);
    }

    #[test]
    fn test_cache_miss_for_unknown_key() {
        let queue = OfflineQueue::in_memory().unwrap();
        assert!(queue.cache_get("nope").unwrap().is_none());
    }

    #[test]
    fn test_purge_session_cache() {
        let queue = OfflineQueue::in_memory().unwrap();
        let key = session_cache_key("u1", "s-1");
        queue.cache_put(&key, &json!({})).unwrap();
        queue.cache_put(&format!("{key}:route"), &json!({})).unwrap();
        queue.cache_put(&session_cache_key("u1", "s-10"), &json!({})).unwrap();
        queue.cache_put("feed:u1", &json!({})).unwrap();

        assert_eq!(queue.purge_session_cache("u1", "s-1").unwrap(), 2);
        assert_eq!(queue.cache_count().unwrap(), 2);
        assert!(queue.cache_get(&session_cache_key("u1", "s-10")).unwrap().is_some());
    }

    #[test]
    fn test_global_queue() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("global.db");
        init_offline_queue(path.to_str().unwrap()).unwrap();

        let queued = with_offline_queue(|q| q.enqueue(&sample_record("u1", 0)))
            .unwrap()
            .unwrap();
        let count = with_offline_queue(|q| q.count()).unwrap().unwrap();
        assert_eq!(count, 1);
        with_offline_queue(|q| q.remove(&queued.id)).unwrap().unwrap();

        // Handles share one connection
        let first = shared_offline_queue().unwrap();
        let second = shared_offline_queue().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
