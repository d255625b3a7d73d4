//! Content-addressed result cache with dependency-aware invalidation.
//!
//! The cache is the only mutable state shared across tasks. Readers and
//! writers use a read/write lock; no caller holds the lock across I/O.
//! `lookup` validates dependency timestamps inside the read hold and
//! returns an owned snapshot, so entries can never change under a caller.
//!
//! Validity rule: an entry is valid iff, for every path in `depends_on`,
//! the recorded processing time is <= the entry's `last_run`.

use ahash::AHashMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::clock::ClockSource;
use crate::impact::{FileChange, TestTarget};
use crate::model::{TestStatus, TestSuite};

/// Cached outcome for one target.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub target: TestTarget,
    pub suite: TestSuite,
    /// Suite-level verdict: Passed unless something failed
    pub status: TestStatus,
    pub duration: Duration,
    /// Monotonic time the result was stored
    pub last_run: Instant,
    /// Hash of the file whose change produced this run; empty for initial runs
    pub file_hash: String,
    /// Paths whose later processing invalidates this entry
    pub depends_on: Vec<PathBuf>,
}

/// Diagnostic counters, snapshotted under the read lock.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub invalidations: u64,
}

struct CacheState {
    entries: AHashMap<PathBuf, CachedResult>,
    /// Latest processing time per path, fed by `mark_processed`
    file_times: AHashMap<PathBuf, Instant>,
}

/// Thread-safe result cache. In-memory only; nothing persists across
/// process restarts.
pub struct ResultCache {
    state: RwLock<CacheState>,
    clock: Arc<dyn ClockSource>,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    invalidations: AtomicU64,
}

impl ResultCache {
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            state: RwLock::new(CacheState {
                entries: AHashMap::new(),
                file_times: AHashMap::new(),
            }),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Store a result for a target, overwriting any prior entry.
    ///
    /// `last_run` is stamped from the cache's clock at store time. A
    /// missing suite is a no-op.
    pub fn store(
        &self,
        target: &TestTarget,
        suite: Option<&TestSuite>,
        file_hash: &str,
        depends_on: &[PathBuf],
    ) {
        let Some(suite) = suite else {
            return;
        };
        let status = if suite.build_failed || suite.num_failed > 0 {
            TestStatus::Failed
        } else {
            TestStatus::Passed
        };
        let entry = CachedResult {
            target: target.clone(),
            suite: suite.clone(),
            status,
            duration: suite.duration,
            last_run: self.clock.now(),
            file_hash: file_hash.to_string(),
            depends_on: depends_on.to_vec(),
        };
        let mut state = self.state.write().unwrap();
        state.entries.insert(target.path.clone(), entry);
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    /// Look up a target.
    ///
    /// # Returns
    /// `(snapshot, valid)`. `valid` is true iff the entry is present and
    /// every dependency's processing time is <= the entry's `last_run`.
    /// The snapshot is returned even when stale so callers can render the
    /// previous outcome while re-running.
    pub fn lookup(&self, target: &TestTarget) -> (Option<CachedResult>, bool) {
        let state = self.state.read().unwrap();
        let Some(entry) = state.entries.get(&target.path) else {
            drop(state);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return (None, false);
        };
        let valid = entry.depends_on.iter().all(|dep| {
            state
                .file_times
                .get(dep)
                .map_or(true, |&t| t <= entry.last_run)
        });
        let snapshot = entry.clone();
        drop(state);
        if valid {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        (Some(snapshot), valid)
    }

    /// Record that `path` was processed at `t`, invalidating dependents.
    pub fn mark_processed(&self, path: &Path, t: Instant) {
        let mut state = self.state.write().unwrap();
        state.file_times.insert(path.to_path_buf(), t);
    }

    /// Apply a batch of changes to the cache's bookkeeping.
    ///
    /// Config and dependency changes drop every entry; other kinds only
    /// advance the per-path processing times. Idempotent for a given
    /// batch: re-applying the same changes leaves the same state.
    pub fn invalidate(&self, changes: &[FileChange]) {
        let broad = changes.iter().any(|c| c.kind.is_broad());
        let mut state = self.state.write().unwrap();
        if broad {
            if !state.entries.is_empty() {
                self.invalidations
                    .fetch_add(state.entries.len() as u64, Ordering::Relaxed);
            }
            state.entries.clear();
        }
        for change in changes {
            state.file_times.insert(change.path.clone(), change.t);
            // Package-dir dependencies see any change inside the package.
            if let Some(dir) = change.path.parent() {
                if !dir.as_os_str().is_empty() {
                    state.file_times.insert(dir.to_path_buf(), change.t);
                }
            }
        }
    }

    /// Decide whether a batch warrants a run.
    ///
    /// # Returns
    /// `(true, targets)` iff any change has no valid cache entry for one
    /// of its targets; `targets` is the de-duplicated miss set, highest
    /// priority first.
    pub fn should_run(&self, changes: &[FileChange]) -> (bool, Vec<TestTarget>) {
        let mut targets: Vec<TestTarget> = Vec::new();
        for change in changes {
            for target in &change.affected_tests {
                if targets.iter().any(|t| t.path == target.path) {
                    continue;
                }
                let (_, valid) = self.lookup(target);
                if !valid {
                    targets.push(target.clone());
                }
            }
        }
        targets.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.path.cmp(&b.path)));
        (!targets.is_empty(), targets)
    }

    /// Targets whose cache entry is now invalid after these changes.
    pub fn stale_targets(&self, changes: &[FileChange]) -> Vec<TestTarget> {
        let state = self.state.read().unwrap();
        let mut stale: Vec<TestTarget> = Vec::new();
        for entry in state.entries.values() {
            let invalidated = entry.depends_on.iter().any(|dep| {
                state
                    .file_times
                    .get(dep)
                    .is_some_and(|&t| t > entry.last_run)
            }) || changes
                .iter()
                .any(|c| c.kind.is_broad() || c.affected_tests.iter().any(|t| t.path == entry.target.path));
            if invalidated && !stale.iter().any(|t| t.path == entry.target.path) {
                stale.push(entry.target.clone());
            }
        }
        stale.sort_by(|a, b| a.path.cmp(&b.path));
        stale
    }

    /// Every target currently cached, sorted by path.
    pub fn cached_targets(&self) -> Vec<TestTarget> {
        let state = self.state.read().unwrap();
        let mut targets: Vec<TestTarget> =
            state.entries.values().map(|e| e.target.clone()).collect();
        targets.sort_by(|a, b| a.path.cmp(&b.path));
        targets
    }

    /// Drop all state.
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap();
        state.entries.clear();
        state.file_times.clear();
    }

    /// Counter snapshot for diagnostics.
    pub fn stats(&self) -> CacheStats {
        let entries = self.state.read().unwrap().entries.len();
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}
