//! Impact analysis: coalesced file events in, test targets out.
//!
//! For each batch the analyzer classifies every path, hashes current
//! contents, and computes the minimal set of targets to re-run. Broad
//! kinds (config, dependency manifest) fan out to every cached target.
//!
//! Invariant: at most one `FileChange` per path per batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

use crate::classify::{ChangeKind, FileClassifier};
use crate::clock::ClockSource;
use crate::config::WatchConfig;
use crate::errors::VigilError;
use crate::hasher::Hasher;
use crate::patterns::{is_internally_ignored, PatternSet};
use crate::watcher::{FileEvent, FileOp};

/// Granularity a run is scheduled at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetScope {
    /// Whole package directory (the common case)
    Package,
    /// Single file
    File,
    /// Named functions within a file
    Function,
}

/// The unit of scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestTarget {
    /// Package directory (or file, per `scope`)
    pub path: PathBuf,
    pub scope: TargetScope,
    /// Function names when scope is `Function`
    pub functions: Vec<String>,
    /// Higher runs earlier within a cycle
    pub priority: i32,
}

impl TestTarget {
    /// Package-scoped target for a directory.
    pub fn package(path: impl Into<PathBuf>, priority: i32) -> Self {
        Self {
            path: path.into(),
            scope: TargetScope::Package,
            functions: Vec::new(),
            priority,
        }
    }

    /// A target is runnable iff its directory still exists.
    pub fn is_runnable(&self) -> bool {
        match self.scope {
            TargetScope::Package => self.path.is_dir(),
            TargetScope::File | TargetScope::Function => self.path.exists(),
        }
    }
}

/// One analyzed change, carrying everything downstream stages need.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// Path was unknown to the hasher before this change
    pub is_new: bool,
    pub is_deleted: bool,
    /// Post-change content hash; empty on delete
    pub hash: String,
    /// Monotonic analysis time, compared against cache timestamps
    pub t: Instant,
    pub affected_tests: Vec<TestTarget>,
}

/// Outcome of analyzing one batch.
///
/// Per-path failures (vanished files, permission errors) are reported
/// alongside the successful changes; they never abort the batch.
#[derive(Debug, Default)]
pub struct ImpactReport {
    pub changes: Vec<FileChange>,
    pub errors: Vec<VigilError>,
}

/// Turns debounced batches into [`FileChange`] sets.
pub struct ImpactAnalyzer {
    classifier: FileClassifier,
    hasher: Hasher,
    clock: Arc<dyn ClockSource>,
}

impl ImpactAnalyzer {
    pub fn new(config: &WatchConfig, clock: Arc<dyn ClockSource>) -> Result<Self, VigilError> {
        Ok(Self {
            classifier: FileClassifier::new(config)?,
            hasher: Hasher::new(),
            clock,
        })
    }

    /// Analyze one batch.
    ///
    /// `cached_targets` is the cache's current target list, used for the
    /// broad fan-out on config/dependency changes.
    pub fn analyze(&mut self, batch: &[FileEvent], cached_targets: &[TestTarget]) -> ImpactReport {
        let mut report = ImpactReport::default();
        let mut seen_paths: Vec<&Path> = Vec::with_capacity(batch.len());

        for event in batch {
            if seen_paths.contains(&event.path.as_path()) {
                continue;
            }
            seen_paths.push(event.path.as_path());

            let kind = self.classifier.classify(&event.path);
            let is_deleted = event.op == FileOp::Remove || !event.path.exists();

            let (hash, is_new) = if is_deleted {
                self.hasher.forget(&event.path);
                (String::new(), false)
            } else {
                match self.hasher.hash_file(&event.path) {
                    Ok(hashed) => hashed,
                    Err(error) => {
                        report.errors.push(error);
                        continue;
                    }
                }
            };

            let affected_tests = self.targets_for(&event.path, kind, cached_targets);

            report.changes.push(FileChange {
                path: event.path.clone(),
                kind,
                is_new,
                is_deleted,
                hash,
                t: self.clock.now(),
                affected_tests,
            });
        }

        report
    }

    /// Seed the hasher's seen-set so pre-existing files do not report as
    /// new on their first edit.
    pub fn mark_baseline(&mut self, path: &Path) {
        self.hasher.mark_seen(path);
    }

    fn targets_for(
        &self,
        path: &Path,
        kind: ChangeKind,
        cached_targets: &[TestTarget],
    ) -> Vec<TestTarget> {
        match kind {
            ChangeKind::Test => vec![TestTarget::package(containing_dir(path), 10)],
            // Best-effort: the containing directory is the package.
            ChangeKind::Source => vec![TestTarget::package(containing_dir(path), 5)],
            ChangeKind::Config | ChangeKind::Dependency => cached_targets.to_vec(),
            ChangeKind::Unknown => Vec::new(),
        }
    }
}

fn containing_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Discover the initial target set: every directory under the roots that
/// contains at least one test file.
///
/// Used by `RunOnce` and by watch mode's optional initial pass. Targets
/// come back sorted by path for deterministic scheduling.
pub fn initial_targets(config: &WatchConfig) -> Result<Vec<TestTarget>, VigilError> {
    let ignore = PatternSet::compile(&config.ignore_patterns)?;
    let mut dirs: Vec<PathBuf> = Vec::new();

    for root in &config.roots {
        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            !(entry.file_type().is_dir() && is_internally_ignored(entry.path()))
        });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                // Unreadable subtrees are skipped, not fatal.
                Err(_) => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if is_internally_ignored(path) || ignore.matches(path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(&config.test_suffix) {
                let dir = containing_dir(path);
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
    }

    dirs.sort();
    Ok(dirs
        .into_iter()
        .map(|dir| TestTarget::package(dir, 0))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::fs;
    use tempfile::TempDir;

    fn analyzer() -> ImpactAnalyzer {
        ImpactAnalyzer::new(&WatchConfig::default(), Arc::new(SystemClock)).unwrap()
    }

    fn write_event(path: &Path) -> FileEvent {
        FileEvent {
            path: path.to_path_buf(),
            op: FileOp::Write,
            t: Instant::now(),
        }
    }

    #[test]
    fn test_test_change_targets_its_package() {
        let temp = TempDir::new().unwrap();
        let pkg = temp.path().join("pkg");
        fs::create_dir(&pkg).unwrap();
        let file = pkg.join("foo_test.go");
        fs::write(&file, b"package pkg").unwrap();

        let mut analyzer = analyzer();
        let report = analyzer.analyze(&[write_event(&file)], &[]);

        assert!(report.errors.is_empty());
        assert_eq!(report.changes.len(), 1);
        let change = &report.changes[0];
        assert_eq!(change.kind, ChangeKind::Test);
        assert!(change.is_new);
        assert!(!change.is_deleted);
        assert!(!change.hash.is_empty());
        assert_eq!(change.affected_tests, vec![TestTarget::package(&pkg, 10)]);
    }

    #[test]
    fn test_dependency_change_fans_out_to_cached_targets() {
        let temp = TempDir::new().unwrap();
        let manifest = temp.path().join("go.mod");
        fs::write(&manifest, b"module example.com/m").unwrap();

        let cached = vec![
            TestTarget::package("a", 0),
            TestTarget::package("b", 0),
        ];
        let mut analyzer = analyzer();
        let report = analyzer.analyze(&[write_event(&manifest)], &cached);

        assert_eq!(report.changes[0].kind, ChangeKind::Dependency);
        assert_eq!(report.changes[0].affected_tests, cached);
    }

    #[test]
    fn test_unknown_change_has_no_targets() {
        let temp = TempDir::new().unwrap();
        let readme = temp.path().join("README.md");
        fs::write(&readme, b"hi").unwrap();

        let mut analyzer = analyzer();
        let report = analyzer.analyze(&[write_event(&readme)], &[]);
        assert!(report.changes[0].affected_tests.is_empty());
    }

    #[test]
    fn test_deleted_path_has_empty_hash() {
        let temp = TempDir::new().unwrap();
        let gone = temp.path().join("pkg").join("gone_test.go");

        let mut analyzer = analyzer();
        let mut event = write_event(&gone);
        event.op = FileOp::Remove;
        let report = analyzer.analyze(&[event], &[]);

        assert!(report.errors.is_empty());
        let change = &report.changes[0];
        assert!(change.is_deleted);
        assert!(change.hash.is_empty());
    }

    #[test]
    fn test_vanished_file_reports_error_not_crash() {
        let mut analyzer = analyzer();
        // A Write event for a path that no longer exists is treated as a
        // deletion, not an error.
        let report = analyzer.analyze(&[write_event(Path::new("/no/such/file.go"))], &[]);
        assert!(report.errors.is_empty());
        assert!(report.changes[0].is_deleted);
    }

    #[test]
    fn test_one_change_per_path_per_batch() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a_test.go");
        fs::write(&file, b"package a").unwrap();

        let mut analyzer = analyzer();
        let report = analyzer.analyze(&[write_event(&file), write_event(&file)], &[]);
        assert_eq!(report.changes.len(), 1);
    }

    #[test]
    fn test_baseline_suppresses_is_new() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a_test.go");
        fs::write(&file, b"package a").unwrap();

        let mut analyzer = analyzer();
        analyzer.mark_baseline(&file);
        let report = analyzer.analyze(&[write_event(&file)], &[]);
        assert!(!report.changes[0].is_new);
    }

    #[test]
    fn test_initial_targets_discovery() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        let plain = temp.path().join("plain");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::create_dir_all(&plain).unwrap();
        fs::write(a.join("a_test.go"), b"package a").unwrap();
        fs::write(b.join("b_test.go"), b"package b").unwrap();
        fs::write(plain.join("lib.go"), b"package plain").unwrap();

        let config = WatchConfig {
            roots: vec![temp.path().to_path_buf()],
            ..WatchConfig::default()
        };
        let targets = initial_targets(&config).unwrap();
        let paths: Vec<_> = targets.iter().map(|t| t.path.clone()).collect();
        assert_eq!(paths, vec![a, b]);
    }

    #[test]
    fn test_initial_targets_respects_ignores() {
        let temp = TempDir::new().unwrap();
        let vendor = temp.path().join("vendor").join("dep");
        fs::create_dir_all(&vendor).unwrap();
        fs::write(vendor.join("dep_test.go"), b"package dep").unwrap();

        let config = WatchConfig {
            roots: vec![temp.path().to_path_buf()],
            ..WatchConfig::default()
        };
        let targets = initial_targets(&config).unwrap();
        assert!(targets.is_empty());
    }
}
