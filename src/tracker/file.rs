//! Append-only file page tracker
//!
//! One visited page id per line, plus `total <n>` lines recording the
//! listing size. Every append is synced before `mark_visited` returns. A
//! crash mid-append leaves a torn last line, which is dropped on load.

use super::{PageTracker, VisitedSet};
use crate::state::PageId;
use crate::storage::{append_synced, StorageError, StorageResult};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

struct Inner {
    file: File,
    visited: VisitedSet,
    total_pages: Option<u64>,
}

/// Tracker kept in a plain text log
pub struct FileTracker {
    path: PathBuf,
    first: PageId,
    inner: Mutex<Inner>,
}

enum Entry {
    Visited(PageId),
    Total(u64),
}

fn parse_line(line: &str) -> Option<Entry> {
    let line = line.trim();
    if let Some(total) = line.strip_prefix("total ") {
        return total.trim().parse().ok().map(Entry::Total);
    }
    line.parse().ok().map(|id| Entry::Visited(PageId(id)))
}

impl FileTracker {
    /// Loads the log at `path`, creating it if missing
    pub fn open(path: &Path, first: PageId) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut visited = VisitedSet::new(first);
        let mut total_pages = None;

        // Anything after the last newline is a torn append
        let (complete, torn) = match content.rfind('\n') {
            Some(end) => (&content[..=end], &content[end + 1..]),
            None => ("", content.as_str()),
        };
        let torn = !torn.is_empty();
        if torn {
            tracing::warn!("Dropping torn trailing line in {}", path.display());
        }

        for (index, line) in complete.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Some(Entry::Visited(id)) => {
                    visited.insert(id);
                }
                Some(Entry::Total(total)) => total_pages = Some(total),
                None => {
                    return Err(StorageError::Serialization(format!(
                        "malformed tracker line {} in {}: {:?}",
                        index + 1,
                        path.display(),
                        line
                    )));
                }
            }
        }

        let tracker = Self {
            path: path.to_path_buf(),
            first,
            inner: Mutex::new(Inner {
                file: open_append(path)?,
                visited,
                total_pages,
            }),
        };

        if torn {
            let mut inner = tracker.lock();
            tracker.rewrite(&mut inner)?;
        }

        Ok(tracker)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn append(inner: &mut Inner, line: &str) -> StorageResult<()> {
        append_synced(&mut inner.file, format!("{}\n", line).as_bytes())?;
        Ok(())
    }

    /// Replaces the log with the given state via a synced temp file and rename
    fn rewrite_with(
        &self,
        inner: &mut Inner,
        visited: &VisitedSet,
        total_pages: Option<u64>,
    ) -> StorageResult<()> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            let mut body = String::new();
            if let Some(total) = total_pages {
                body.push_str(&format!("total {}\n", total));
            }
            for id in visited.iter() {
                body.push_str(&format!("{}\n", id));
            }
            tmp.write_all(body.as_bytes())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        inner.file = open_append(&self.path)?;
        Ok(())
    }

    fn rewrite(&self, inner: &mut Inner) -> StorageResult<()> {
        let visited = inner.visited.clone();
        let total = inner.total_pages;
        self.rewrite_with(inner, &visited, total)
    }
}

fn open_append(path: &Path) -> StorageResult<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

impl PageTracker for FileTracker {
    fn is_visited(&self, id: PageId) -> bool {
        self.lock().visited.contains(id)
    }

    fn mark_visited(&self, id: PageId) -> StorageResult<()> {
        let mut inner = self.lock();
        if inner.visited.contains(id) {
            return Ok(());
        }

        Self::append(&mut inner, &id.to_string())?;
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
        Self::append(&mut inner, &format!("total {}", total))?;
        inner.total_pages = Some(total);
        Ok(())
    }

    fn record_growth(&self, total: u64, delta: u64) -> StorageResult<()> {
        let mut inner = self.lock();
        let shifted = inner.visited.shifted(delta);

        // One rename publishes both the new size and the shifted pages
        self.rewrite_with(&mut inner, &shifted, Some(total))?;
        inner.visited = shifted;
        inner.total_pages = Some(total);
        Ok(())
    }

    fn reset(&self) -> StorageResult<()> {
        let mut inner = self.lock();
        let empty = VisitedSet::new(self.first);
        self.rewrite_with(&mut inner, &empty, None)?;
        inner.visited = empty;
        inner.total_pages = None;
        Ok(())
    }
}
