// crates/core/src/repository.rs
//! Staleness-aware session cache.
//!
//! Maps a log file path to its parsed [`Session`] so repeated reads of an
//! unchanged file cost one mtime stat instead of a reparse. An entry is
//! fresh while it is younger than `max_age` AND the file has not been
//! modified since it was loaded. Entries are replaced wholesale — a reader
//! holding the previous `Arc<Session>` always sees a consistent snapshot.

use crate::error::ParseError;
use crate::parser::parse_session_file;
use crate::types::Session;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::RwLock;
use tracing::debug;

/// Default freshness window.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60);

struct CacheEntry {
    session: Arc<Session>,
    loaded_at: Instant,
    mtime_at_load: Option<SystemTime>,
}

impl CacheEntry {
    fn is_fresh(&self, max_age: Duration, current_mtime: Option<SystemTime>) -> bool {
        if self.loaded_at.elapsed() >= max_age {
            return false;
        }
        match (current_mtime, self.mtime_at_load) {
            (Some(current), Some(recorded)) => current <= recorded,
            (None, None) => true,
            // Modification state changed in a way we can't compare.
            _ => false,
        }
    }
}

/// Path → session cache with age- and mtime-based invalidation.
///
/// All map updates go through one `RwLock`; the expensive parse runs
/// outside it, so loads of distinct files proceed in parallel.
pub struct SessionRepository {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    max_age: Duration,
    parses: AtomicU64,
}

impl Default for SessionRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRepository {
    pub fn new() -> Self {
        Self::with_max_age(DEFAULT_MAX_AGE)
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_age,
            parses: AtomicU64::new(0),
        }
    }

    /// Load a session, reusing the cached copy while it is fresh.
    ///
    /// On a miss or stale entry the file is reparsed and the entry replaced
    /// atomically. A failed parse propagates and leaves the cache untouched.
    pub async fn load(&self, path: &Path) -> Result<Arc<Session>, ParseError> {
        let current_mtime = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|m| m.modified().ok());

        {
            let map = self.entries.read().await;
            if let Some(entry) = map.get(path) {
                if entry.is_fresh(self.max_age, current_mtime) {
                    return Ok(entry.session.clone());
                }
                debug!("Stale cache entry for {}", path.display());
            }
        }

        self.parses.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(parse_session_file(path).await?);

        let entry = CacheEntry {
            session: session.clone(),
            loaded_at: Instant::now(),
            mtime_at_load: current_mtime,
        };
        self.entries.write().await.insert(path.to_path_buf(), entry);

        Ok(session)
    }

    /// Drop the entry for one path.
    pub async fn invalidate(&self, path: &Path) {
        self.entries.write().await.remove(path);
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Drop entries older than the freshness window, regardless of file state.
    pub async fn prune(&self) {
        let max_age = self.max_age;
        self.entries
            .write()
            .await
            .retain(|_, entry| entry.loaded_at.elapsed() < max_age);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Number of underlying parses performed since construction.
    pub fn parse_count(&self) -> u64 {
        self.parses.load(Ordering::Relaxed)
    }
}
