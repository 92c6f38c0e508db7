//! Schema migrations for the offline store.
//!
//! Applied in order on every open; `rusqlite_migration` tracks the applied
//! version in SQLite's `user_version`, so already-applied steps are skipped.

use log::info;
use once_cell::sync::Lazy;
use rusqlite_migration::{M, Migrations};

use crate::error::Result;

static MIGRATIONS: Lazy<Migrations<'static>> = Lazy::new(|| {
    Migrations::new(vec![
        // v1: queued workouts and the read-through cache
        M::up(
            r#"
            CREATE TABLE workout_queue (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                session_id TEXT,
                payload BLOB NOT NULL,
                enqueued_at INTEGER NOT NULL
            );

            CREATE TABLE activity_cache (
                key TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );
            "#,
        ),
        // v2: stable listing order
        M::up("CREATE INDEX idx_workout_queue_enqueued ON workout_queue(enqueued_at, id);"),
    ])
});

/// Bring the schema up to date.
pub fn apply(conn: &mut rusqlite::Connection) -> Result<()> {
    let before: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    MIGRATIONS.to_latest(conn)?;
    let after: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if after > before {
        info!("Migrated offline store schema v{} -> v{}", before, after);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_valid() {
        assert!(MIGRATIONS.validate().is_ok());
    }

    #[test]
    fn test_apply_twice_is_noop() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        apply(&mut conn).unwrap();
        apply(&mut conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('workout_queue', 'activity_cache')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}
