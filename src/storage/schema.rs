//! Database schema definitions
//!
//! Reviews and the visited-page tracker share one SQLite file.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Harvested reviews, keyed by their listing link
CREATE TABLE IF NOT EXISTS reviews (
    link TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    year INTEGER NOT NULL,
    review_text TEXT,
    total_rating REAL,
    rating_components TEXT NOT NULL,
    mileage INTEGER,
    fuel_consumption REAL,
    drive_type TEXT,
    pros TEXT NOT NULL,
    pros_text TEXT,
    cons TEXT NOT NULL,
    cons_text TEXT,
    review_date TEXT,
    source_page INTEGER NOT NULL,
    harvested_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reviews_year ON reviews(year);

-- Listing pages whose reviews are durably stored
CREATE TABLE IF NOT EXISTS visited_pages (
    page_id INTEGER PRIMARY KEY,
    visited_at TEXT NOT NULL
);

-- Tracker bookkeeping (last known listing size)
CREATE TABLE IF NOT EXISTS tracker_meta (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
