//! Run-cycle orchestration.
//!
//! The scheduler owns the event loop wiring watcher -> debouncer ->
//! impact analyzer -> cache -> launcher -> parser -> cache write-back.
//! It runs on a single cooperative loop; the launcher/parser pair runs in
//! a sibling task that reports back over a channel, so renderer callbacks
//! always fire from the scheduler task, serially.
//!
//! A batch arriving mid-run is queued (depth 1); further arrivals collapse
//! into the queued batch. The in-flight run is never cancelled by a new
//! batch; it completes and the queued batch fires immediately after.

use std::collections::BTreeMap;
use std::io::BufReader;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::clock::ClockSource;
use crate::config::WatchConfig;
use crate::debounce::{BatchMessage, Debouncer};
use crate::errors::VigilError;
use crate::impact::{initial_targets, FileChange, ImpactAnalyzer, TestTarget};
use crate::model::{TestRun, TestSuite};
use crate::parser::{ParserConfig, StreamParser};
use crate::render::{Renderer, SkipReason, WatchDiagnostic};
use crate::runner::{ExitClass, Launcher, TestProcess};
use crate::watcher::{FileEvent, FileWatcher};

/// Interactive command, fed in by the CLI's key reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    /// `a`: run every discovered target
    RunAll,
    /// `f`: re-run only the targets that failed last cycle
    RunFailed,
    /// `q`: leave watch mode
    Quit,
}

/// Message from the launcher/parser task back to the scheduler.
enum RunMessage {
    Suite(TestSuite),
    Done(Box<Result<(TestRun, ExitClass), VigilError>>),
}

/// State for the run currently executing in the sibling task.
struct InFlight {
    receiver: Receiver<RunMessage>,
    kill_slot: Arc<Mutex<Option<TestProcess>>>,
    worker: Option<JoinHandle<()>>,
    deadline: Instant,
    timed_out: bool,
    targets: Vec<TestTarget>,
    changes: Vec<FileChange>,
}

/// Pipeline orchestrator. Owns the lifecycle of every downstream
/// component and tears them down in reverse dependency order.
pub struct Scheduler {
    config: WatchConfig,
    clock: Arc<dyn ClockSource>,
    cache: Arc<ResultCache>,
    launcher: Launcher,
}

impl Scheduler {
    pub fn new(config: WatchConfig, clock: Arc<dyn ClockSource>) -> Self {
        let cache = Arc::new(ResultCache::new(clock.clone()));
        let launcher = Launcher::new(config.tool.clone());
        Self {
            config,
            clock,
            cache,
            launcher,
        }
    }

    /// Shared cache handle, for stats and external inspection.
    pub fn cache(&self) -> Arc<ResultCache> {
        self.cache.clone()
    }

    /// Execute one run over the initial target set, blocking.
    ///
    /// Used by `RunOnce`; no watcher is installed.
    pub fn run_once(&self, renderer: &mut dyn Renderer) -> Result<TestRun, VigilError> {
        let targets = initial_targets(&self.config)?;
        if targets.is_empty() {
            return Ok(TestRun::new());
        }

        let run_id = Uuid::new_v4();
        renderer.on_run_start(&header_run(run_id, self.clock.as_ref()));

        let kill_slot = Arc::new(Mutex::new(None));
        let (run, exit) = run_cycle(
            &self.launcher,
            ParserConfig::from(&self.config),
            run_id,
            &targets,
            self.config.run_timeout,
            &kill_slot,
            &mut |suite| renderer.on_suite_complete(suite),
        )?;

        match exit {
            ExitClass::RunnerFailure { code, stderr } => Err(VigilError::Execution {
                operation: "wait".to_string(),
                target: describe_targets(&targets),
                message: runner_failure_message(code, &stderr),
                cause: None,
            }),
            _ => {
                self.write_back(&run, &targets, &[]);
                renderer.on_run_complete(&run);
                Ok(run)
            }
        }
    }

    /// Install the pipeline and run until `cancel` fires, a fatal error
    /// propagates, or the key channel requests quit.
    pub fn watch(
        &self,
        renderer: &mut dyn Renderer,
        cancel: Arc<AtomicBool>,
        keys: Option<Receiver<KeyCommand>>,
    ) -> Result<(), VigilError> {
        let mut watcher = FileWatcher::new(&self.config, self.clock.clone())?;
        let raw_rx = watcher
            .take_receiver()
            .ok_or_else(|| VigilError::watch("bootstrap", "watcher", "event channel missing"))?;
        let (batch_tx, batch_rx) = mpsc::sync_channel(self.config.batch_channel_capacity);
        let debouncer = Debouncer::spawn(
            raw_rx,
            batch_tx,
            self.config.debounce_interval,
            self.clock.clone(),
        );

        let mut analyzer = ImpactAnalyzer::new(&self.config, self.clock.clone())?;
        // Baseline: files present at startup are edits, not new files.
        for target in initial_targets(&self.config)? {
            analyzer.mark_baseline(&target.path);
        }

        let result = self.watch_loop(renderer, &cancel, keys, &batch_rx, &mut analyzer);

        // Teardown, producer to consumer: stop the watcher first so the
        // debouncer's input drains, then stop the debouncer.
        watcher.stop();
        debouncer.stop();
        drop(watcher);

        result
    }

    fn watch_loop(
        &self,
        renderer: &mut dyn Renderer,
        cancel: &Arc<AtomicBool>,
        keys: Option<Receiver<KeyCommand>>,
        batch_rx: &Receiver<BatchMessage>,
        analyzer: &mut ImpactAnalyzer,
    ) -> Result<(), VigilError> {
        let mut in_flight: Option<InFlight> = None;
        // Depth-1 queue of coalesced events, keyed by path.
        let mut queued: Option<BTreeMap<PathBuf, FileEvent>> = None;
        let mut last_failed: Vec<TestTarget> = Vec::new();

        loop {
            if cancel.load(Ordering::SeqCst) {
                self.abort_in_flight(renderer, &mut in_flight, &mut last_failed);
                return Ok(());
            }

            if let Some(command) = poll_keys(&keys) {
                match command {
                    KeyCommand::Quit => {
                        self.abort_in_flight(renderer, &mut in_flight, &mut last_failed);
                        return Ok(());
                    }
                    KeyCommand::RunAll if in_flight.is_none() => {
                        let targets = initial_targets(&self.config)?;
                        if !targets.is_empty() {
                            in_flight = Some(self.start_run(renderer, targets, Vec::new()));
                        }
                    }
                    KeyCommand::RunFailed if in_flight.is_none() => {
                        let targets: Vec<TestTarget> = last_failed
                            .iter()
                            .filter(|t| t.is_runnable())
                            .cloned()
                            .collect();
                        if !targets.is_empty() {
                            in_flight = Some(self.start_run(renderer, targets, Vec::new()));
                        }
                    }
                    // Mid-run interactive commands are dropped; the queued
                    // batch slot is reserved for file changes.
                    KeyCommand::RunAll | KeyCommand::RunFailed => {}
                }
            }

            if in_flight.is_some() {
                // Collapse any batches that arrive mid-run into the
                // single queued slot.
                loop {
                    match batch_rx.try_recv() {
                        Ok(Ok(batch)) => {
                            let slot = queued.get_or_insert_with(BTreeMap::new);
                            for event in batch {
                                slot.insert(event.path.clone(), event);
                            }
                        }
                        Ok(Err(error)) => {
                            self.abort_in_flight(renderer, &mut in_flight, &mut last_failed);
                            return Err(error);
                        }
                        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                    }
                }
            }

            if let Some(flight) = &mut in_flight {
                match flight.receiver.recv_timeout(Duration::from_millis(50)) {
                    Ok(RunMessage::Suite(suite)) => renderer.on_suite_complete(&suite),
                    Ok(RunMessage::Done(result)) => {
                        let flight = in_flight.take().unwrap();
                        self.finish_run(renderer, flight, *result, &mut last_failed);
                        if let Some(pending) = queued.take() {
                            let batch: Vec<FileEvent> = pending.into_values().collect();
                            in_flight = self.start_batch(renderer, analyzer, batch);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if !flight.timed_out && self.clock.now() >= flight.deadline {
                            flight.timed_out = true;
                            kill_process(&flight.kill_slot);
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        // Worker died without reporting; recover at the
                        // task boundary and keep watching.
                        in_flight = None;
                        renderer.on_error(&VigilError::execution(
                            "run-task",
                            "scheduler",
                            "run task terminated without a result",
                        ));
                    }
                }
                continue;
            }

            match batch_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(batch)) => {
                    in_flight = self.start_batch(renderer, analyzer, batch);
                }
                Ok(Err(error)) => {
                    self.abort_in_flight(renderer, &mut in_flight, &mut last_failed);
                    return Err(error);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.abort_in_flight(renderer, &mut in_flight, &mut last_failed);
                    return Ok(());
                }
            }
        }
    }

    /// Classify, invalidate, plan, and launch a batch. Returns the
    /// in-flight state when a run started.
    fn start_batch(
        &self,
        renderer: &mut dyn Renderer,
        analyzer: &mut ImpactAnalyzer,
        batch: Vec<FileEvent>,
    ) -> Option<InFlight> {
        let cached = self.cache.cached_targets();
        let report = analyzer.analyze(&batch, &cached);
        for error in &report.errors {
            renderer.on_error(error);
        }
        if report.changes.is_empty() {
            return None;
        }

        for change in &report.changes {
            if change.affected_tests.is_empty() {
                renderer.on_diagnostic(&WatchDiagnostic::skipped(
                    change.path.display().to_string(),
                    SkipReason::UnknownKind,
                ));
            }
        }

        self.cache.invalidate(&report.changes);
        let (should_run, targets) = self.cache.should_run(&report.changes);
        if !should_run {
            return None;
        }

        let runnable: Vec<TestTarget> = targets
            .into_iter()
            .filter(|target| {
                let ok = target.is_runnable();
                if !ok {
                    renderer.on_diagnostic(&WatchDiagnostic::skipped(
                        target.path.display().to_string(),
                        SkipReason::NotRunnable,
                    ));
                }
                ok
            })
            .collect();
        if runnable.is_empty() {
            return None;
        }

        renderer.on_file_change(&report.changes);
        Some(self.start_run(renderer, runnable, report.changes))
    }

    /// Spawn the launcher/parser sibling task for a target set.
    fn start_run(
        &self,
        renderer: &mut dyn Renderer,
        targets: Vec<TestTarget>,
        changes: Vec<FileChange>,
    ) -> InFlight {
        let run_id = Uuid::new_v4();
        renderer.on_run_start(&header_run(run_id, self.clock.as_ref()));

        let (tx, rx) = mpsc::channel();
        let kill_slot: Arc<Mutex<Option<TestProcess>>> = Arc::new(Mutex::new(None));

        let launcher = self.launcher.clone();
        let parser_config = ParserConfig::from(&self.config);
        let timeout = self.config.run_timeout;
        let worker_targets = targets.clone();
        let worker_slot = kill_slot.clone();
        let worker = thread::spawn(move || {
            run_task(
                launcher,
                parser_config,
                run_id,
                worker_targets,
                timeout,
                worker_slot,
                tx,
            );
        });

        InFlight {
            receiver: rx,
            kill_slot,
            worker: Some(worker),
            deadline: self.clock.now() + timeout,
            timed_out: false,
            targets,
            changes,
        }
    }

    /// Handle the sibling task's final report: cache write-back, failed
    /// target bookkeeping, renderer notification.
    fn finish_run(
        &self,
        renderer: &mut dyn Renderer,
        mut flight: InFlight,
        result: Result<(TestRun, ExitClass), VigilError>,
        last_failed: &mut Vec<TestTarget>,
    ) {
        if let Some(worker) = flight.worker.take() {
            let _ = worker.join();
        }

        if flight.timed_out {
            renderer.on_error(&VigilError::Timeout {
                target: describe_targets(&flight.targets),
                timeout_ms: self.config.run_timeout.as_millis() as u64,
            });
            return;
        }

        match result {
            Ok((run, exit)) => match exit {
                ExitClass::RunnerFailure { code, stderr } => {
                    renderer.on_error(&VigilError::Execution {
                        operation: "wait".to_string(),
                        target: describe_targets(&flight.targets),
                        message: runner_failure_message(code, &stderr),
                        cause: None,
                    });
                }
                _ => {
                    self.write_back(&run, &flight.targets, &flight.changes);
                    *last_failed = failed_targets(&run, &flight.targets);
                    renderer.on_run_complete(&run);
                }
            },
            Err(error) => renderer.on_error(&error),
        }
    }

    /// Store each target's suite, keyed to the changes that produced it.
    fn write_back(&self, run: &TestRun, targets: &[TestTarget], changes: &[FileChange]) {
        for target in targets {
            let suite = match_suite(run, target);
            let triggering: Vec<&FileChange> = changes
                .iter()
                .filter(|c| c.affected_tests.iter().any(|t| t.path == target.path))
                .collect();
            let file_hash = triggering
                .first()
                .map(|c| c.hash.clone())
                .unwrap_or_default();
            let mut depends_on: Vec<PathBuf> = vec![target.path.clone()];
            depends_on.extend(triggering.iter().map(|c| c.path.clone()));

            self.cache.store(target, suite, &file_hash, &depends_on);
        }
    }

    /// Cancellation: signal the child, drain the parser's final report,
    /// write bookkeeping last.
    fn abort_in_flight(
        &self,
        renderer: &mut dyn Renderer,
        in_flight: &mut Option<InFlight>,
        last_failed: &mut Vec<TestTarget>,
    ) {
        let Some(mut flight) = in_flight.take() else {
            return;
        };
        kill_process(&flight.kill_slot);

        let mut drained = None;
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            match flight.receiver.recv_timeout(Duration::from_millis(200)) {
                Ok(RunMessage::Done(result)) => {
                    drained = Some(*result);
                    break;
                }
                Ok(RunMessage::Suite(_)) => continue,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        if let Some(worker) = flight.worker.take() {
            let _ = worker.join();
        }

        // The interrupted child exits by signal; that is expected, not a
        // runner failure. Partial results are still written back.
        if let Some(Ok((run, exit))) = drained {
            if exit.is_usable() {
                self.write_back(&run, &flight.targets, &flight.changes);
                *last_failed = failed_targets(&run, &flight.targets);
                renderer.on_run_complete(&run);
            }
        }
    }
}

/// The sibling task body: launch, stream-parse, classify exit. Panics are
/// recovered here and converted to an error for the scheduler.
fn run_task(
    launcher: Launcher,
    parser_config: ParserConfig,
    run_id: Uuid,
    targets: Vec<TestTarget>,
    timeout: Duration,
    kill_slot: Arc<Mutex<Option<TestProcess>>>,
    tx: Sender<RunMessage>,
) {
    let suite_tx = tx.clone();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        run_cycle(
            &launcher,
            parser_config,
            run_id,
            &targets,
            timeout,
            &kill_slot,
            &mut |suite| {
                let _ = suite_tx.send(RunMessage::Suite(suite.clone()));
            },
        )
    }));

    let result = match outcome {
        Ok(result) => result,
        Err(panic) => Err(VigilError::execution(
            "run-task",
            describe_targets(&targets),
            panic_message(panic),
        )),
    };
    let _ = tx.send(RunMessage::Done(Box::new(result)));
}

/// One launcher+parser cycle, blocking. Shared by `run_once` and the
/// watch-mode sibling task.
///
/// The kill slot is polled, never held across a blocking wait, so a
/// concurrent cancel or watchdog kill always gets the lock promptly.
fn run_cycle(
    launcher: &Launcher,
    parser_config: ParserConfig,
    run_id: Uuid,
    targets: &[TestTarget],
    timeout: Duration,
    kill_slot: &Mutex<Option<TestProcess>>,
    on_suite: &mut dyn FnMut(&TestSuite),
) -> Result<(TestRun, ExitClass), VigilError> {
    let mut process = launcher.launch(targets)?;
    let stdout = process.take_stdout().ok_or_else(|| {
        VigilError::execution("launch", describe_targets(targets), "stdout not piped")
    })?;
    *kill_slot.lock().unwrap() = Some(process);

    let mut parser = StreamParser::with_run_id(parser_config, run_id);
    let parse_result = parser.parse_streaming(BufReader::new(stdout), |suite| on_suite(suite));

    let deadline = Instant::now() + timeout;
    let exit = loop {
        let polled = {
            let mut guard = kill_slot.lock().unwrap();
            match guard.as_mut() {
                Some(process) => process.poll_exit(),
                None => {
                    break Err(VigilError::execution(
                        "wait",
                        describe_targets(targets),
                        "process handle lost",
                    ))
                }
            }
        };
        match polled {
            Ok(Some(exit)) => break Ok(exit),
            Ok(None) => {
                if Instant::now() >= deadline {
                    if let Some(process) = kill_slot.lock().unwrap().as_mut() {
                        process.kill();
                    }
                    break Err(VigilError::Timeout {
                        target: describe_targets(targets),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                thread::sleep(Duration::from_millis(20));
            }
            Err(error) => break Err(error),
        }
    };
    *kill_slot.lock().unwrap() = None;

    // A stream read error after a clean exit classification is still a
    // broken cycle.
    parse_result?;
    Ok((parser.finish(), exit?))
}

fn kill_process(slot: &Arc<Mutex<Option<TestProcess>>>) {
    if let Some(process) = slot.lock().unwrap().as_mut() {
        process.kill();
    }
}

fn poll_keys(keys: &Option<Receiver<KeyCommand>>) -> Option<KeyCommand> {
    keys.as_ref().and_then(|rx| rx.try_recv().ok())
}

/// Header `TestRun` for `on_run_start`: id and start time only.
fn header_run(run_id: Uuid, clock: &dyn ClockSource) -> TestRun {
    let mut run = TestRun::new();
    run.run_id = run_id;
    run.start_time = Some(clock.wall());
    run
}

/// Match a parsed suite to a scheduled target.
///
/// Package names are import paths while targets are directories, so match
/// on the trailing segment; a lone suite pairs with a lone target.
fn match_suite<'a>(run: &'a TestRun, target: &TestTarget) -> Option<&'a TestSuite> {
    let dir_name = target
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let by_segment = run.suites.iter().find(|suite| {
        suite
            .package_name
            .rsplit('/')
            .next()
            .map(|last| last == dir_name)
            .unwrap_or(false)
    });
    if by_segment.is_some() {
        return by_segment;
    }
    if run.suites.len() == 1 {
        return run.suites.first();
    }
    None
}

fn failed_targets(run: &TestRun, targets: &[TestTarget]) -> Vec<TestTarget> {
    targets
        .iter()
        .filter(|target| {
            match_suite(run, target)
                .map(|s| s.build_failed || s.num_failed > 0)
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

fn describe_targets(targets: &[TestTarget]) -> String {
    targets
        .iter()
        .map(|t| t.path.display().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn runner_failure_message(code: Option<i32>, stderr: &str) -> String {
    let code_text = code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string());
    if stderr.is_empty() {
        format!("runner exited with code {}", code_text)
    } else {
        format!("runner exited with code {}: {}", code_text, stderr)
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("run task panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("run task panicked: {}", s)
    } else {
        "run task panicked".to_string()
    }
}
