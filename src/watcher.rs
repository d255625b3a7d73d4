//! Filesystem watcher emitting raw file events.
//!
//! Wraps the OS-level recursive watch and applies the filtering pipeline
//! (internal ignores, user globs, optional gitignore) before anything
//! reaches the debouncer. Per-path event order is preserved; cross-path
//! order is best-effort.
//!
//! Failure semantics: a watch-add error during bootstrap is fatal and
//! returned to the caller; a mid-run backend error is forwarded once into
//! the event channel and terminates the stream; channel-close terminates
//! cleanly.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::ClockSource;
use crate::config::WatchConfig;
use crate::errors::VigilError;
use crate::patterns::{is_internally_ignored, PatternSet};

/// Filesystem operation carried by a raw event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileOp {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

/// One raw filesystem event, post-filtering.
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: PathBuf,
    pub op: FileOp,
    /// Monotonic observation time
    pub t: Instant,
}

/// Message on the watcher's output channel.
pub type WatchMessage = Result<FileEvent, VigilError>;

/// Capacity of the raw event channel. Filtering happens on the backend
/// callback thread, so bursts beyond this block the backend briefly
/// rather than ballooning memory.
const RAW_CHANNEL_CAPACITY: usize = 1024;

/// Recursive filesystem watcher.
///
/// Owns the OS watch handle exclusively. New directories created under a
/// watched root are picked up by the recursive registration.
#[derive(Debug)]
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    receiver: Option<Receiver<WatchMessage>>,
    stopped: Arc<AtomicBool>,
}

impl FileWatcher {
    /// Register every root recursively and start emitting events.
    ///
    /// # Errors
    /// Fails if a root does not exist, is not a directory, or the OS
    /// refuses the watch registration.
    pub fn new(config: &WatchConfig, clock: Arc<dyn ClockSource>) -> Result<Self, VigilError> {
        let ignore_set = PatternSet::compile(&config.ignore_patterns)?;
        let gitignore = if config.gitignore_aware {
            load_gitignore(&config.roots)
        } else {
            None
        };

        for root in &config.roots {
            if !root.is_dir() {
                return Err(VigilError::watch(
                    "bootstrap",
                    root.display(),
                    "watch root is not a directory",
                ));
            }
        }

        let (tx, rx) = mpsc::sync_channel::<WatchMessage>(RAW_CHANNEL_CAPACITY);
        let stopped = Arc::new(AtomicBool::new(false));

        let filter = EventFilter {
            ignore: ignore_set,
            gitignore,
            roots: config
                .roots
                .iter()
                .map(|r| std::fs::canonicalize(r).unwrap_or_else(|_| r.clone()))
                .collect(),
        };

        let callback_stopped = stopped.clone();
        let mut watcher = notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| {
                if callback_stopped.load(Ordering::SeqCst) {
                    return;
                }
                match result {
                    Ok(event) => {
                        let Some(op) = translate_kind(&event.kind) else {
                            return;
                        };
                        for path in &event.paths {
                            if !filter.should_emit(path, op) {
                                continue;
                            }
                            let message = Ok(FileEvent {
                                path: path.clone(),
                                op,
                                t: clock.now(),
                            });
                            match tx.try_send(message) {
                                Ok(()) | Err(TrySendError::Full(_)) => {}
                                Err(TrySendError::Disconnected(_)) => {
                                    callback_stopped.store(true, Ordering::SeqCst);
                                    return;
                                }
                            }
                        }
                    }
                    Err(error) => {
                        // Backend failure is fatal to the stream: forward
                        // once, then stop emitting.
                        let _ = tx.try_send(Err(VigilError::Watch {
                            operation: "event-channel".to_string(),
                            target: "backend".to_string(),
                            message: error.to_string(),
                            cause: Some(Box::new(error)),
                        }));
                        callback_stopped.store(true, Ordering::SeqCst);
                    }
                }
            },
        )
        .map_err(|e| VigilError::Watch {
            operation: "bootstrap".to_string(),
            target: "backend".to_string(),
            message: e.to_string(),
            cause: Some(Box::new(e)),
        })?;

        for root in &config.roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| VigilError::Watch {
                    operation: "bootstrap".to_string(),
                    target: root.display().to_string(),
                    message: e.to_string(),
                    cause: Some(Box::new(e)),
                })?;
        }

        Ok(Self {
            _watcher: watcher,
            receiver: Some(rx),
            stopped,
        })
    }

    /// Hand the output channel to the consumer (typically the debouncer).
    ///
    /// Can only be taken once; the watcher itself must be kept alive for
    /// the channel to keep producing.
    pub fn take_receiver(&mut self) -> Option<Receiver<WatchMessage>> {
        self.receiver.take()
    }

    /// Blocking receive with timeout, for direct consumers and tests.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<WatchMessage>, ()> {
        let receiver = match &self.receiver {
            Some(receiver) => receiver,
            None => return Ok(None),
        };
        match receiver.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Err(()),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    /// Stop emitting events. The OS watch is torn down on drop.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Filtering state applied on the backend callback thread.
struct EventFilter {
    ignore: PatternSet,
    gitignore: Option<Gitignore>,
    roots: Vec<PathBuf>,
}

impl EventFilter {
    fn should_emit(&self, path: &Path, op: FileOp) -> bool {
        // Chmod never reaches consumers; deletes and renames pass through
        // so downstream can drop stale state, subject to the same filters.
        if op == FileOp::Chmod {
            return false;
        }
        // Directory events carry no content; files deleted out from under
        // us cannot be stat'd, so only gate existing paths.
        if matches!(op, FileOp::Create | FileOp::Write) && path.is_dir() {
            return false;
        }
        if is_internally_ignored(path) {
            return false;
        }
        if self.ignore.matches(path) {
            return false;
        }
        if let Some(gitignore) = &self.gitignore {
            if gitignore
                .matched_path_or_any_parents(path, false)
                .is_ignore()
            {
                return false;
            }
        }
        // Reject paths outside every watch root; symlinked trees can leak
        // foreign paths through the backend.
        if !self.roots.is_empty() {
            let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            if !self
                .roots
                .iter()
                .any(|root| canonical.starts_with(root) || path.starts_with(root))
            {
                return false;
            }
        }
        true
    }
}

/// Map a backend event kind onto a [`FileOp`]; `None` is not emitted.
fn translate_kind(kind: &EventKind) -> Option<FileOp> {
    match kind {
        EventKind::Create(_) => Some(FileOp::Create),
        EventKind::Modify(ModifyKind::Name(_)) => Some(FileOp::Rename),
        EventKind::Modify(ModifyKind::Metadata(_)) => Some(FileOp::Chmod),
        EventKind::Modify(_) => Some(FileOp::Write),
        EventKind::Remove(_) => Some(FileOp::Remove),
        EventKind::Access(_) => None,
        EventKind::Any | EventKind::Other => Some(FileOp::Write),
    }
}

/// Compile gitignore rules from `.gitignore` and `.ignore` at each root.
fn load_gitignore(roots: &[PathBuf]) -> Option<Gitignore> {
    let first = roots.first()?;
    let mut builder = GitignoreBuilder::new(first);
    let mut found = false;
    for root in roots {
        for name in [".gitignore", ".ignore"] {
            let candidate = root.join(name);
            if candidate.is_file() && builder.add(&candidate).is_none() {
                found = true;
            }
        }
    }
    if !found {
        return None;
    }
    builder.build().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::fs;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn config_for(root: &Path) -> WatchConfig {
        WatchConfig {
            roots: vec![root.to_path_buf()],
            gitignore_aware: false,
            ..WatchConfig::default()
        }
    }

    /// Helper: poll for an event with timeout
    fn poll_for_event(watcher: &FileWatcher, timeout_ms: u64) -> Option<FileEvent> {
        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        loop {
            match watcher.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(Ok(event))) => return Some(event),
                Ok(Some(Err(_))) | Ok(None) => return None,
                Err(()) => {}
            }
            if start.elapsed() >= timeout {
                return None;
            }
        }
    }

    #[test]
    fn test_bootstrap_missing_root_is_fatal() {
        let config = config_for(Path::new("/no/such/root"));
        let err = FileWatcher::new(&config, Arc::new(SystemClock)).unwrap_err();
        assert!(matches!(err, VigilError::Watch { .. }));
        assert_eq!(err.code(), crate::errors::VGL_W_001_BOOTSTRAP);
    }

    #[test]
    fn test_write_event_emitted() {
        let temp = TempDir::new().unwrap();
        let watcher = FileWatcher::new(&config_for(temp.path()), Arc::new(SystemClock)).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        let path = temp.path().join("foo_test.go");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "package foo").unwrap();
        drop(file);

        let event = poll_for_event(&watcher, 2000).expect("should receive event");
        assert!(event.path.ends_with("foo_test.go"));
        assert!(matches!(event.op, FileOp::Create | FileOp::Write));
    }

    #[test]
    fn test_ignored_pattern_filtered() {
        let temp = TempDir::new().unwrap();
        let mut config = config_for(temp.path());
        config.ignore_patterns = vec!["**/*.log".to_string()];
        let watcher = FileWatcher::new(&config, Arc::new(SystemClock)).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        fs::write(temp.path().join("noise.log"), b"x").unwrap();
        assert!(poll_for_event(&watcher, 600).is_none());

        fs::write(temp.path().join("real.go"), b"package x").unwrap();
        let event = poll_for_event(&watcher, 2000).expect("non-ignored file must emit");
        assert!(event.path.ends_with("real.go"));
    }

    #[test]
    fn test_new_subdirectory_auto_registered() {
        let temp = TempDir::new().unwrap();
        let watcher = FileWatcher::new(&config_for(temp.path()), Arc::new(SystemClock)).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        let sub = temp.path().join("newpkg");
        fs::create_dir(&sub).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        fs::write(sub.join("a_test.go"), b"package newpkg").unwrap();

        let start = Instant::now();
        let mut saw_file = false;
        while start.elapsed() < Duration::from_secs(3) {
            if let Some(event) = poll_for_event(&watcher, 500) {
                if event.path.ends_with("a_test.go") {
                    saw_file = true;
                    break;
                }
            }
        }
        assert!(saw_file, "file in new subdirectory should emit an event");
    }

    #[test]
    fn test_translate_kind() {
        use notify::event::{CreateKind, MetadataKind, RemoveKind};
        assert_eq!(
            translate_kind(&EventKind::Create(CreateKind::File)),
            Some(FileOp::Create)
        );
        assert_eq!(
            translate_kind(&EventKind::Remove(RemoveKind::File)),
            Some(FileOp::Remove)
        );
        assert_eq!(
            translate_kind(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))),
            Some(FileOp::Chmod)
        );
        assert_eq!(translate_kind(&EventKind::Access(notify::event::AccessKind::Any)), None);
    }
}
