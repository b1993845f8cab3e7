//! SQLite page tracker

use super::{PageTracker, VisitedSet};
use crate::state::PageId;
use crate::storage::{initialize_schema, StorageResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const TOTAL_PAGES_KEY: &str = "total_pages";

struct Inner {
    conn: Connection,
    visited: VisitedSet,
    total_pages: Option<u64>,
}

/// Tracker stored in the `visited_pages` table
pub struct SqliteTracker {
    inner: Mutex<Inner>,
}

impl SqliteTracker {
    /// Opens the tracker tables in the database at `path`
    pub fn open(path: &Path, first: PageId) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
        ",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn, first)
    }

    pub fn open_in_memory(first: PageId) -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, first)
    }

    fn from_connection(conn: Connection, first: PageId) -> StorageResult<Self> {
        initialize_schema(&conn)?;

        let visited = load_visited(&conn, first)?;
        let total_pages = conn
            .query_row(
                "SELECT value FROM tracker_meta WHERE key = ?1",
                params![TOTAL_PAGES_KEY],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(|v| v as u64);

        tracing::debug!(
            "Tracker loaded {} visited pages (resume point: {:?})",
            visited.len(),
            visited.high_water()
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                visited,
                total_pages,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn load_visited(conn: &Connection, first: PageId) -> StorageResult<VisitedSet> {
    let mut stmt = conn.prepare("SELECT page_id FROM visited_pages")?;
    let ids = stmt.query_map([], |row| row.get::<_, i64>(0))?;

    let mut visited = VisitedSet::new(first);
    for id in ids {
        visited.insert(PageId(id? as u64));
    }
    Ok(visited)
}

impl PageTracker for SqliteTracker {
    fn is_visited(&self, id: PageId) -> bool {
        self.lock().visited.contains(id)
    }

    fn mark_visited(&self, id: PageId) -> StorageResult<()> {
        let mut inner = self.lock();
        if inner.visited.contains(id) {
            return Ok(());
        }

        inner.conn.execute(
            "INSERT OR IGNORE INTO visited_pages (page_id, visited_at) VALUES (?1, ?2)",
            params![id.get() as i64, Utc::now().to_rfc3339()],
        )?;
        inner.visited.insert(id);
        Ok(())
    }

    fn load_resume_point(&self) -> Option<PageId> {
        self.lock().visited.high_water()
    }

    fn visited_count(&self) -> u64 {
        self.lock().visited.len() as u64
    }

    fn visited_pages(&self) -> Vec<PageId> {
        self.lock().visited.iter().collect()
    }

    fn total_pages(&self) -> Option<u64> {
        self.lock().total_pages
    }

    fn store_total_pages(&self, total: u64) -> StorageResult<()> {
        let mut inner = self.lock();
        inner.conn.execute(
            "INSERT INTO tracker_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![TOTAL_PAGES_KEY, total as i64],
        )?;
        inner.total_pages = Some(total);
        Ok(())
    }

    fn record_growth(&self, total: u64, delta: u64) -> StorageResult<()> {
        let mut inner = self.lock();
        let tx = inner.conn.transaction()?;

        tx.execute(
            "INSERT INTO tracker_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![TOTAL_PAGES_KEY, total as i64],
        )?;
        if delta > 0 {
            // Two passes through negative ids keep the primary key unique mid-update
            tx.execute(
                "UPDATE visited_pages SET page_id = -(page_id + ?1)",
                params![delta as i64],
            )?;
            tx.execute("UPDATE visited_pages SET page_id = -page_id", [])?;
        }
        tx.commit()?;

        inner.visited = inner.visited.shifted(delta);
        inner.total_pages = Some(total);
        Ok(())
    }

    fn reset(&self) -> StorageResult<()> {
        let mut inner = self.lock();
        inner.conn.execute_batch(
            "
            BEGIN;
            DELETE FROM visited_pages;
            DELETE FROM tracker_meta;
            COMMIT;
        ",
        )?;
        inner.visited.clear();
        inner.total_pages = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mark_visited_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reviews.db");

        {
            let tracker = SqliteTracker::open(&path, PageId(1)).unwrap();
            tracker.mark_visited(PageId(1)).unwrap();
            tracker.mark_visited(PageId(3)).unwrap();
            assert!(tracker.is_visited(PageId(3)));
        }

        let tracker = SqliteTracker::open(&path, PageId(1)).unwrap();
        assert!(tracker.is_visited(PageId(1)));
        assert!(tracker.is_visited(PageId(3)));
        assert!(!tracker.is_visited(PageId(2)));
        assert_eq!(tracker.load_resume_point(), Some(PageId(1)));
    }

    #[test]
    fn test_mark_visited_is_idempotent() {
        let tracker = SqliteTracker::open_in_memory(PageId(1)).unwrap();

        tracker.mark_visited(PageId(2)).unwrap();
        tracker.mark_visited(PageId(2)).unwrap();

        assert_eq!(tracker.visited_count(), 1);
        assert_eq!(tracker.visited_pages(), vec![PageId(2)]);
    }

    #[test]
    fn test_total_pages_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reviews.db");

        {
            let tracker = SqliteTracker::open(&path, PageId(1)).unwrap();
            assert_eq!(tracker.total_pages(), None);
            tracker.store_total_pages(40).unwrap();
            tracker.store_total_pages(42).unwrap();
        }

        let tracker = SqliteTracker::open(&path, PageId(1)).unwrap();
        assert_eq!(tracker.total_pages(), Some(42));
    }

    #[test]
    fn test_record_growth_handles_overlapping_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reviews.db");

        {
            let tracker = SqliteTracker::open(&path, PageId(1)).unwrap();
            for id in 1..=3 {
                tracker.mark_visited(PageId(id)).unwrap();
            }
            tracker.record_growth(11, 1).unwrap();
            assert_eq!(
                tracker.visited_pages(),
                vec![PageId(2), PageId(3), PageId(4)]
            );
            assert_eq!(tracker.load_resume_point(), None);
        }

        let tracker = SqliteTracker::open(&path, PageId(1)).unwrap();
        assert_eq!(
            tracker.visited_pages(),
            vec![PageId(2), PageId(3), PageId(4)]
        );
        assert_eq!(tracker.total_pages(), Some(11));
    }

    #[test]
    fn test_failed_growth_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reviews.db");

        {
            let tracker = SqliteTracker::open(&path, PageId(1)).unwrap();
            tracker.store_total_pages(10).unwrap();
            for id in 1..=3 {
                tracker.mark_visited(PageId(id)).unwrap();
            }

            // The shift fails after the new size was already written in the transaction
            tracker
                .lock()
                .conn
                .execute_batch(
                    "CREATE TRIGGER fail_shift BEFORE UPDATE ON visited_pages
                     BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
                )
                .unwrap();
            assert!(tracker.record_growth(12, 2).is_err());
            assert_eq!(tracker.total_pages(), Some(10));
            assert_eq!(tracker.visited_count(), 3);
        }

        Connection::open(&path)
            .unwrap()
            .execute_batch("DROP TRIGGER fail_shift;")
            .unwrap();

        // After a restart the growth is still pending and gets applied
        let tracker = SqliteTracker::open(&path, PageId(1)).unwrap();
        assert_eq!(tracker.total_pages(), Some(10));
        assert_eq!(
            tracker.visited_pages(),
            vec![PageId(1), PageId(2), PageId(3)]
        );

        tracker.record_growth(12, 2).unwrap();
        assert_eq!(
            tracker.visited_pages(),
            vec![PageId(3), PageId(4), PageId(5)]
        );
    }

    #[test]
    fn test_reset_clears_everything() {
        let tracker = SqliteTracker::open_in_memory(PageId(1)).unwrap();
        tracker.mark_visited(PageId(1)).unwrap();
        tracker.store_total_pages(10).unwrap();

        tracker.reset().unwrap();

        assert_eq!(tracker.visited_count(), 0);
        assert_eq!(tracker.total_pages(), None);
        assert_eq!(tracker.load_resume_point(), None);
    }

    #[test]
    fn test_concurrent_marks_are_serialized() {
        let tracker = std::sync::Arc::new(SqliteTracker::open_in_memory(PageId(1)).unwrap());

        let handles: Vec<_> = (1..=8u64)
            .map(|t| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for i in 0..25u64 {
                        tracker.mark_visited(PageId(t + i * 8)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.visited_count(), 200);
        assert_eq!(tracker.load_resume_point(), Some(PageId(200)));
    }
}
