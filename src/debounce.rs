//! Event debouncer: raw events in, coalesced batches out.
//!
//! Each input event arms (or re-arms) a quiet-interval timer; when the
//! timer fires, the pending set is flushed as one batch of distinct paths,
//! last write wins per path. Batch order is deterministic: paths sorted
//! lexicographically.
//!
//! Backpressure: the output channel is bounded. A flush into a full
//! channel drops the batch instead of blocking; the next batch observes
//! the same latest filesystem state because hashes are re-read downstream.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::clock::ClockSource;
use crate::errors::VigilError;
use crate::watcher::{FileEvent, WatchMessage};

/// Message on the debouncer's output channel.
pub type BatchMessage = Result<Vec<FileEvent>, VigilError>;

/// Poll granularity while idle, so `stop()` is honored promptly.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Grace period for the in-flight flush during shutdown.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// Debouncer task handle.
///
/// Owns its pending map exclusively; the worker thread is the only writer.
pub struct Debouncer {
    worker: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    dropped_batches: Arc<AtomicU64>,
}

impl Debouncer {
    /// Spawn the debounce task.
    ///
    /// Consumes the watcher's output channel; the returned receiver yields
    /// coalesced batches. Watcher errors pass through unchanged and
    /// terminate the stream.
    pub fn spawn(
        input: Receiver<WatchMessage>,
        output: SyncSender<BatchMessage>,
        interval: Duration,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let dropped_batches = Arc::new(AtomicU64::new(0));

        let worker_stop = stop.clone();
        let worker_dropped = dropped_batches.clone();
        let worker = thread::spawn(move || {
            run_debounce(input, output, interval, clock, worker_stop, worker_dropped);
        });

        Self {
            worker: Some(worker),
            stop,
            dropped_batches,
        }
    }

    /// Batches dropped due to a full output channel.
    pub fn dropped_batches(&self) -> u64 {
        self.dropped_batches.load(Ordering::SeqCst)
    }

    /// Halt the timer, refuse new input, and close the output channel
    /// after the in-flight flush completes.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let deadline = Instant::now() + STOP_GRACE;
            while !worker.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if worker.is_finished() {
                let _ = worker.join();
            }
            // A worker still blocked past the grace period is detached;
            // its output sender drops with it.
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_debounce(
    input: Receiver<WatchMessage>,
    output: SyncSender<BatchMessage>,
    interval: Duration,
    clock: Arc<dyn ClockSource>,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
) {
    // Last event per path; BTreeMap keeps flush order lexicographic.
    let mut pending: BTreeMap<PathBuf, FileEvent> = BTreeMap::new();
    let mut deadline: Option<Instant> = None;

    loop {
        if stop.load(Ordering::SeqCst) {
            flush(&mut pending, &output, &dropped);
            return;
        }

        let wait = match deadline {
            Some(d) => d.saturating_duration_since(clock.now()).min(IDLE_POLL),
            None => IDLE_POLL,
        };

        match input.recv_timeout(wait) {
            Ok(Ok(event)) => {
                pending.insert(event.path.clone(), event);
                deadline = Some(clock.now() + interval);
            }
            Ok(Err(error)) => {
                // Fatal backend error: forward and terminate the stream.
                let _ = output.send(Err(error));
                return;
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(d) = deadline {
                    if clock.now() >= d {
                        flush(&mut pending, &output, &dropped);
                        deadline = None;
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Producer gone: emit what we have and close cleanly.
                flush(&mut pending, &output, &dropped);
                return;
            }
        }
    }
}

fn flush(
    pending: &mut BTreeMap<PathBuf, FileEvent>,
    output: &SyncSender<BatchMessage>,
    dropped: &Arc<AtomicU64>,
) {
    if pending.is_empty() {
        return;
    }
    let batch: Vec<FileEvent> = std::mem::take(pending).into_values().collect();
    match output.try_send(Ok(batch)) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            dropped.fetch_add(1, Ordering::SeqCst);
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::watcher::FileOp;
    use std::sync::mpsc;

    fn event(path: &str) -> FileEvent {
        FileEvent {
            path: PathBuf::from(path),
            op: FileOp::Write,
            t: Instant::now(),
        }
    }

    fn spawn_pair(
        interval_ms: u64,
        capacity: usize,
    ) -> (mpsc::Sender<WatchMessage>, Receiver<BatchMessage>, Debouncer) {
        let (in_tx, in_rx) = mpsc::channel();
        let (out_tx, out_rx) = mpsc::sync_channel(capacity);
        let debouncer = Debouncer::spawn(
            in_rx,
            out_tx,
            Duration::from_millis(interval_ms),
            Arc::new(SystemClock),
        );
        (in_tx, out_rx, debouncer)
    }

    #[test]
    fn test_rapid_writes_coalesce_to_one_batch() {
        let (tx, rx, _debouncer) = spawn_pair(100, 4);

        // Two writes to the same path 20 ms apart.
        tx.send(Ok(event("pkg/foo_test.go"))).unwrap();
        thread::sleep(Duration::from_millis(20));
        tx.send(Ok(event("pkg/foo_test.go"))).unwrap();

        let batch = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].path, PathBuf::from("pkg/foo_test.go"));

        // No second batch follows.
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_distinct_paths_one_batch_sorted() {
        let (tx, rx, _debouncer) = spawn_pair(100, 4);

        tx.send(Ok(event("b.go"))).unwrap();
        tx.send(Ok(event("a.go"))).unwrap();
        tx.send(Ok(event("c.go"))).unwrap();

        let batch = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        let paths: Vec<_> = batch.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("a.go"),
                PathBuf::from("b.go"),
                PathBuf::from("c.go")
            ]
        );
    }

    #[test]
    fn test_last_write_wins_per_path() {
        let (tx, rx, _debouncer) = spawn_pair(100, 4);

        let mut first = event("a.go");
        first.op = FileOp::Create;
        tx.send(Ok(first)).unwrap();
        tx.send(Ok(event("a.go"))).unwrap(); // Write

        let batch = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].op, FileOp::Write);
    }

    #[test]
    fn test_timer_resets_on_new_event() {
        let (tx, rx, _debouncer) = spawn_pair(150, 4);

        tx.send(Ok(event("a.go"))).unwrap();
        thread::sleep(Duration::from_millis(80));
        // Still inside the quiet interval; this re-arms the timer.
        tx.send(Ok(event("b.go"))).unwrap();

        // Nothing yet at 80 ms after the second event.
        assert!(rx.recv_timeout(Duration::from_millis(60)).is_err());

        let batch = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_full_output_drops_batch() {
        let (tx, rx, debouncer) = spawn_pair(50, 1);

        // Fill the single output slot and leave it unread.
        tx.send(Ok(event("a.go"))).unwrap();
        thread::sleep(Duration::from_millis(200));

        // Second batch flushes into a full channel and is dropped.
        tx.send(Ok(event("b.go"))).unwrap();
        thread::sleep(Duration::from_millis(200));

        assert_eq!(debouncer.dropped_batches(), 1);

        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(first[0].path, PathBuf::from("a.go"));
        // The dropped batch never arrives.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_error_passthrough_terminates() {
        let (tx, rx, _debouncer) = spawn_pair(100, 4);

        tx.send(Err(VigilError::watch("event-channel", "backend", "boom")))
            .unwrap();

        let message = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(message.is_err());
        // Stream is closed after the error.
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(200)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn test_stop_flushes_pending() {
        let (tx, rx, debouncer) = spawn_pair(10_000, 4);

        tx.send(Ok(event("a.go"))).unwrap();
        thread::sleep(Duration::from_millis(100));
        debouncer.stop();

        let batch = rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_producer_close_flushes_and_closes() {
        let (tx, rx, _debouncer) = spawn_pair(10_000, 4);

        tx.send(Ok(event("a.go"))).unwrap();
        thread::sleep(Duration::from_millis(50));
        drop(tx);

        let batch = rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(500)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }
}
