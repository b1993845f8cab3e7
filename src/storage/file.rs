//! JSON-lines repository implementation
//!
//! Each saved review becomes one line holding the review plus the page it
//! came from. The file is append-only; records are durable once `save`
//! returns.

use crate::state::PageId;
use crate::storage::traits::{Repository, StorageResult};
use crate::storage::{RecordClaims, Review};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One line of the records file
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredReview {
    pub source_page: PageId,
    pub harvested_at: String,
    #[serde(flatten)]
    pub review: Review,
}

/// Appends `bytes` to `file` and syncs it to disk
///
/// A write that fails part-way is cut back off, so the next append never
/// lands on the tail of a half-written line.
///
/// # Arguments
///
/// * `file` - A file opened in append mode
/// * `bytes` - Complete lines to append
pub(crate) fn append_synced(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    write_or_truncate(file, |file| {
        file.write_all(bytes)?;
        file.sync_data()
    })
}

/// Runs `write`, truncating the file to its prior length if it fails
pub(crate) fn write_or_truncate(
    file: &mut File,
    write: impl FnOnce(&mut File) -> io::Result<()>,
) -> io::Result<()> {
    let len = file.metadata()?.len();

    if let Err(e) = write(file) {
        if let Err(truncate_err) = file.set_len(len).and_then(|_| file.sync_data()) {
            tracing::error!(
                "Could not remove a partial append ({}); the file may end in a torn line",
                truncate_err
            );
        }
        return Err(e);
    }
    Ok(())
}

/// Append-only JSON-lines review repository
pub struct FileRepository {
    path: PathBuf,
    file: Arc<Mutex<File>>,
    claims: RecordClaims,
}

impl FileRepository {
    /// Opens `path` for appending, creating it and its parent directories if needed
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(file)),
            claims: RecordClaims::default(),
        })
    }

    /// Reads every stored line back
    pub async fn load_all(&self) -> StorageResult<Vec<StoredReview>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut records = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }

    async fn append(&self, page: PageId, records: &[Review]) -> StorageResult<()> {
        let harvested_at = chrono::Utc::now().to_rfc3339();

        // Serialize the whole batch first so a bad record writes nothing
        let mut buffer = String::new();
        for review in records {
            let line = serde_json::to_string(&StoredReview {
                source_page: page,
                harvested_at: harvested_at.clone(),
                review: review.clone(),
            })?;
            buffer.push_str(&line);
            buffer.push('\n');
        }

        let file = self.file.clone();
        tokio::task::spawn_blocking(move || {
            let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
            append_synced(&mut file, buffer.as_bytes())
        })
        .await??;
        Ok(())
    }
}

#[async_trait]
impl Repository for FileRepository {
    async fn save(&self, page: PageId, records: &[Review]) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        self.claims.claim(page, records)?;

        let result = self.append(page, records).await;
        if result.is_err() {
            self.claims.release(page, records);
        }
        result
    }

    async fn count(&self) -> StorageResult<u64> {
        let file = self.file.clone();
        let path = self.path.clone();

        // Hold the writer lock so a half-written batch is never counted
        let count = tokio::task::spawn_blocking(move || -> io::Result<u64> {
            let _guard = file.lock().unwrap_or_else(|e| e.into_inner());
            let content = std::fs::read_to_string(&path)?;
            Ok(content.lines().filter(|l| !l.trim().is_empty()).count() as u64)
        })
        .await??;
        Ok(count)
    }
}
