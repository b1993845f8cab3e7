//! SQLite repository implementation
//!
//! Every write is one transaction committed with `synchronous = FULL`. The
//! commit waits on an fsync, so writes and counts run on the blocking pool
//! rather than on the async workers.

use crate::state::PageId;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Repository, StorageError, StorageResult};
use crate::storage::{DriveType, RecordClaims, Review};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// SQLite-backed review repository
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
    claims: RecordClaims,
}

impl SqliteRepository {
    /// Opens or creates the review database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Database file, shared with the SQLite page tracker
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the file cannot be opened or the schema
    /// cannot be created
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            claims: RecordClaims::default(),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            claims: RecordClaims::default(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Looks up a stored review and the page it came from
    pub fn find(&self, link: &str) -> StorageResult<Option<(Review, PageId)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT link, name, year, review_text, total_rating, rating_components, mileage,
             fuel_consumption, drive_type, pros, pros_text, cons, cons_text, review_date,
             source_page
             FROM reviews WHERE link = ?1",
        )?;

        let row = stmt
            .query_row(params![link], |row| {
                Ok(StoredRow {
                    link: row.get(0)?,
                    name: row.get(1)?,
                    year: row.get(2)?,
                    review_text: row.get(3)?,
                    total_rating: row.get(4)?,
                    rating_components: row.get(5)?,
                    mileage: row.get(6)?,
                    fuel_consumption: row.get(7)?,
                    drive_type: row.get(8)?,
                    pros: row.get(9)?,
                    pros_text: row.get(10)?,
                    cons: row.get(11)?,
                    cons_text: row.get(12)?,
                    date: row.get(13)?,
                    source_page: row.get(14)?,
                })
            })
            .optional()?;

        row.map(StoredRow::into_review).transpose()
    }
}

/// Raw column values of one `reviews` row
struct StoredRow {
    link: String,
    name: String,
    year: u16,
    review_text: Option<String>,
    total_rating: Option<f64>,
    rating_components: String,
    mileage: Option<u32>,
    fuel_consumption: Option<f64>,
    drive_type: Option<String>,
    pros: String,
    pros_text: Option<String>,
    cons: String,
    cons_text: Option<String>,
    date: Option<String>,
    source_page: i64,
}

impl StoredRow {
    fn into_review(self) -> StorageResult<(Review, PageId)> {
        let drive_type = match self.drive_type {
            Some(name) => Some(DriveType::from_name(&name).ok_or_else(|| {
                StorageError::Serialization(format!("unknown drive type {:?}", name))
            })?),
            None => None,
        };

        let review = Review {
            link: self.link,
            name: self.name,
            year: self.year,
            review_text: self.review_text,
            total_rating: self.total_rating,
            rating_components: serde_json::from_str(&self.rating_components)?,
            mileage: self.mileage,
            fuel_consumption: self.fuel_consumption,
            drive_type,
            pros: serde_json::from_str(&self.pros)?,
            pros_text: self.pros_text,
            cons: serde_json::from_str(&self.cons)?,
            cons_text: self.cons_text,
            date: self
                .date
                .map(|d| d.parse::<NaiveDate>())
                .transpose()
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
        };

        Ok((review, PageId(self.source_page as u64)))
    }
}

/// Writes one page's reviews in a single transaction
fn write_batch(conn: &mut Connection, page: PageId, records: &[Review]) -> StorageResult<()> {
    let tx = conn.transaction()?;
    let now = Utc::now().to_rfc3339();

    {
        // Rows from earlier runs are refreshed; same-run duplicates never get here
        let mut stmt = tx.prepare(
            "INSERT INTO reviews (link, name, year, review_text, total_rating,
             rating_components, mileage, fuel_consumption, drive_type, pros, pros_text,
             cons, cons_text, review_date, source_page, harvested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(link) DO UPDATE SET
                name = excluded.name,
                year = excluded.year,
                review_text = excluded.review_text,
                total_rating = excluded.total_rating,
                rating_components = excluded.rating_components,
                mileage = excluded.mileage,
                fuel_consumption = excluded.fuel_consumption,
                drive_type = excluded.drive_type,
                pros = excluded.pros,
                pros_text = excluded.pros_text,
                cons = excluded.cons,
                cons_text = excluded.cons_text,
                review_date = excluded.review_date,
                source_page = excluded.source_page,
                harvested_at = excluded.harvested_at",
        )?;

        for review in records {
            stmt.execute(params![
                review.link,
                review.name,
                review.year,
                review.review_text,
                review.total_rating,
                serde_json::to_string(&review.rating_components)?,
                review.mileage,
                review.fuel_consumption,
                review.drive_type.map(DriveType::name),
                serde_json::to_string(&review.pros)?,
                review.pros_text,
                serde_json::to_string(&review.cons)?,
                review.cons_text,
                review.date.map(|d| d.to_string()),
                page.get() as i64,
                now,
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn save(&self, page: PageId, records: &[Review]) -> StorageResult<()> {
        self.claims.claim(page, records)?;

        let conn = self.conn.clone();
        let batch = records.to_vec();
        let result = tokio::task::spawn_blocking(move || -> StorageResult<()> {
            let mut conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            write_batch(&mut conn, page, &batch)
        })
        .await
        .map_err(StorageError::from)
        .and_then(|written| written);

        if result.is_err() {
            self.claims.release(page, records);
        }
        result
    }

    async fn count(&self) -> StorageResult<u64> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> StorageResult<u64> {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM reviews", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await?
    }
}
