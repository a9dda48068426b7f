//! Background worker running on a dedicated OS thread.

use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::queue::{JobQueue, QueueStats};
use super::{BatchHandler, WorkerOptions, panic_message};
use crate::error::{ChatmemError, Result};
use crate::observer::{SharedObserver, noop};

/// Thread-backed [`BatchHandler`] executor.
///
/// `start` and `stop` are idempotent, and the worker can be restarted after a
/// clean stop. Payloads emitted while stopped are kept and processed on the
/// next start.
pub struct BackgroundWorker<T, H> {
    options: WorkerOptions,
    queue: JobQueue<T>,
    handler: Arc<Mutex<H>>,
    observer: SharedObserver,
    running: Mutex<Option<RunningThread>>,
    _payload: PhantomData<fn(T)>,
}

struct RunningThread {
    stop: Arc<AtomicBool>,
    done: Arc<DoneSignal>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct DoneSignal {
    finished: Mutex<bool>,
    cv: Condvar,
}

impl DoneSignal {
    fn set(&self) {
        *self.finished.lock() = true;
        self.cv.notify_all();
    }

    /// `false` if `timeout` elapsed first.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut finished = self.finished.lock();
        match timeout {
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*finished {
                    if self.cv.wait_until(&mut finished, deadline).timed_out() {
                        return *finished;
                    }
                }
                true
            }
            None => {
                while !*finished {
                    self.cv.wait(&mut finished);
                }
                true
            }
        }
    }
}

/// Marks the run finished even if the loop unwinds.
struct FinishOnDrop(Arc<DoneSignal>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.set();
    }
}

impl<T, H> BackgroundWorker<T, H>
where
    T: Send + 'static,
    H: BatchHandler<T>,
{
    /// Create a stopped worker.
    #[must_use]
    pub fn new(options: WorkerOptions, handler: H) -> Self {
        Self::with_observer(options, handler, noop())
    }

    /// Create a stopped worker reporting to `observer`.
    #[must_use]
    pub fn with_observer(options: WorkerOptions, handler: H, observer: SharedObserver) -> Self {
        let queue = JobQueue::new(options.name.clone(), options.max_queue);
        Self {
            options,
            queue,
            handler: Arc::new(Mutex::new(handler)),
            observer,
            running: Mutex::new(None),
            _payload: PhantomData,
        }
    }

    /// Worker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Spawn the worker thread. No-op if already running.
    ///
    /// # Errors
    /// Returns `ChatmemError::Io` if the OS refuses to spawn a thread.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let done = Arc::new(DoneSignal::default());
        let ctx = LoopContext {
            options: self.options.clone(),
            queue: self.queue.clone(),
            handler: Arc::clone(&self.handler),
            observer: Arc::clone(&self.observer),
            stop: Arc::clone(&stop),
        };
        let finish = FinishOnDrop(Arc::clone(&done));
        let handle = std::thread::Builder::new()
            .name(format!("chatmem-{}", self.options.name))
            .spawn(move || {
                let _finish = finish;
                ctx.run();
            })?;

        info!(worker = %self.options.name, "background worker started");
        *running = Some(RunningThread { stop, done, handle });
        Ok(())
    }

    /// Enqueue a payload and return immediately.
    ///
    /// # Errors
    /// Returns `ChatmemError::QueueFull` if the queue is bounded and full.
    pub fn emit(&self, payload: T) -> Result<()> {
        self.queue.push(payload)?;
        self.observer.on_job_submitted(&self.options.name);
        Ok(())
    }

    /// Ask the loop to end and wait for it.
    ///
    /// With `drain_on_stop`, everything queued before this call is processed
    /// before it returns; otherwise queued payloads are discarded. No-op if
    /// the worker is not running.
    ///
    /// # Errors
    /// Returns `ChatmemError::StopTimeout` if the thread is still busy when
    /// `timeout` elapses. The worker then stays registered as running so the
    /// caller can retry. Returns `ChatmemError::WorkerPanic` if the loop itself
    /// panicked.
    pub fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        let Some(run) = self.running.lock().take() else {
            return Ok(());
        };
        run.stop.store(true, Ordering::SeqCst);
        self.queue.wake_all();

        if !run.done.wait(timeout) {
            let timeout_ms = timeout.map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
            error!(worker = %self.options.name, timeout_ms, "background worker did not stop in time");
            *self.running.lock() = Some(run);
            return Err(ChatmemError::StopTimeout {
                worker: self.options.name.clone(),
                timeout_ms,
            });
        }

        run.handle.join().map_err(|payload| ChatmemError::WorkerPanic {
            worker: self.options.name.clone(),
            message: panic_message(payload.as_ref()),
        })?;
        info!(worker = %self.options.name, "background worker stopped");
        Ok(())
    }

    /// Payloads waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queue statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Whether the worker thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl<T, H> Drop for BackgroundWorker<T, H> {
    fn drop(&mut self) {
        if let Some(run) = self.running.get_mut().take() {
            run.stop.store(true, Ordering::SeqCst);
            self.queue.wake_all();
        }
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

struct LoopContext<T, H> {
    options: WorkerOptions,
    queue: JobQueue<T>,
    handler: Arc<Mutex<H>>,
    observer: SharedObserver,
    stop: Arc<AtomicBool>,
}

impl<T, H: BatchHandler<T>> LoopContext<T, H> {
    fn run(self) {
        let name = self.options.name.as_str();
        while !self.stop.load(Ordering::SeqCst) {
            let Some(first) = self.queue.wait_pop(self.options.poll_interval) else {
                continue;
            };
            if !self.options.debounce.is_zero() {
                std::thread::sleep(self.options.debounce);
            }
            let mut batch = vec![first];
            batch.extend(self.queue.drain());
            self.run_batch(batch);
        }

        let leftover = self.queue.drain();
        if leftover.is_empty() {
            return;
        }
        if self.options.drain_on_stop {
            debug!(worker = name, items = leftover.len(), "draining queue before stop");
            self.run_batch(leftover);
        } else {
            warn!(worker = name, dropped = leftover.len(), "discarding queued payloads on stop");
        }
    }

    fn run_batch(&self, batch: Vec<T>) {
        let name = self.options.name.as_str();
        let submitted = batch.len();
        let started = Instant::now();
        let mut handler = self.handler.lock();

        let mut merged_len = submitted;
        let result = catch_unwind(AssertUnwindSafe(|| {
            let merged = handler.merge(batch);
            merged_len = merged.len();
            handler.process(merged)
        }))
        .unwrap_or_else(|payload| {
            Err(ChatmemError::WorkerPanic {
                worker: name.to_string(),
                message: panic_message(payload.as_ref()),
            })
        });

        match result {
            Ok(()) => {
                debug!(
                    worker = name,
                    submitted,
                    merged = merged_len,
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "batch processed"
                );
                self.observer.on_job_completed(name, merged_len);
            }
            Err(err) => {
                self.observer.on_job_failed(name, &err, merged_len);
                let hook = catch_unwind(AssertUnwindSafe(|| handler.on_error(&err, merged_len)));
                if hook.is_err() {
                    error!(worker = name, "error hook panicked");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsObserver;
    use crate::worker::FnHandler;

    fn fast(name: &str) -> WorkerOptions {
        WorkerOptions::new(name).poll_interval(Duration::from_millis(10))
    }

    fn recording() -> (Arc<Mutex<Vec<Vec<u32>>>>, FnHandler<u32>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = FnHandler::new(move |batch: Vec<u32>| {
            sink.lock().push(batch);
            Ok(())
        });
        (seen, handler)
    }

    #[test]
    fn drain_on_stop_processes_everything_exactly_once() {
        let (seen, handler) = recording();
        let worker = BackgroundWorker::new(fast("drain"), handler);
        for i in 0..100 {
            worker.emit(i).expect("emit");
        }
        worker.start().expect("start");
        worker.stop(Some(Duration::from_secs(5))).expect("stop");

        let mut all: Vec<u32> = seen.lock().iter().flatten().copied().collect();
        assert_eq!(all.len(), 100);
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
        assert_eq!(worker.pending(), 0);
    }

    #[test]
    fn batches_preserve_submission_order() {
        let (seen, handler) = recording();
        let worker = BackgroundWorker::new(fast("order"), handler);
        for i in 0..20 {
            worker.emit(i).expect("emit");
        }
        worker.start().expect("start");
        worker.stop(None).expect("stop");

        let flat: Vec<u32> = seen.lock().iter().flatten().copied().collect();
        assert_eq!(flat, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn failed_batch_does_not_stop_the_loop() {
        let metrics = Arc::new(MetricsObserver::new());
        let processed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&processed);
        let handler = FnHandler::new(move |batch: Vec<u32>| {
            if batch.contains(&0) {
                return Err(ChatmemError::Summarizer("first batch fails".into()));
            }
            sink.lock().extend(batch);
            Ok(())
        });
        let worker = BackgroundWorker::with_observer(fast("fail"), handler, metrics.clone());
        worker.start().expect("start");

        worker.emit(0).expect("emit");
        while metrics.snapshot().batches_failed == 0 {
            std::thread::sleep(Duration::from_millis(2));
        }
        worker.emit(1).expect("emit");
        worker.stop(Some(Duration::from_secs(5))).expect("stop");

        assert_eq!(*processed.lock(), vec![1]);
        let snap = metrics.snapshot();
        assert_eq!(snap.jobs_submitted, 2);
        assert_eq!(snap.batches_failed, 1);
        assert_eq!(snap.batches_completed, 1);
    }

    #[test]
    fn panicking_batch_is_reported_and_survived() {
        let metrics = Arc::new(MetricsObserver::new());
        let handler = FnHandler::new(|batch: Vec<u32>| {
            assert!(!batch.contains(&13), "unlucky payload");
            Ok(())
        });
        let worker = BackgroundWorker::with_observer(fast("panic"), handler, metrics.clone());
        worker.start().expect("start");
        worker.emit(13).expect("emit");
        while metrics.snapshot().batches_failed == 0 {
            std::thread::sleep(Duration::from_millis(2));
        }
        worker.emit(1).expect("emit");
        worker.stop(Some(Duration::from_secs(5))).expect("stop");

        assert!(worker.start().is_ok());
        assert_eq!(metrics.snapshot().batches_completed, 1);
        worker.stop(None).expect("second stop");
    }

    #[test]
    fn merge_sees_the_whole_debounced_batch() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let handler = FnHandler::new(move |batch: Vec<u32>| {
            sink.lock().push(batch);
            Ok(())
        })
        .with_merge(|mut batch: Vec<u32>| {
            batch.dedup();
            batch
        });
        let worker = BackgroundWorker::new(
            fast("merge").debounce(Duration::from_millis(50)),
            handler,
        );
        worker.start().expect("start");
        for _ in 0..5 {
            worker.emit(9).expect("emit");
        }
        worker.stop(Some(Duration::from_secs(5))).expect("stop");

        let batches = batches.lock();
        assert!(batches.iter().all(|b| b == &vec![9]));
        assert!(!batches.is_empty());
    }

    #[test]
    fn stop_without_drain_discards_queue() {
        let (seen, handler) = recording();
        let worker = BackgroundWorker::new(fast("discard").drain_on_stop(false), handler);
        worker.start().expect("start");
        worker.stop(None).expect("stop");
        for i in 0..3 {
            worker.emit(i).expect("emit while stopped");
        }
        worker.start().expect("restart");
        // Stopping before the loop wakes may still process some items; the
        // queue must be empty afterwards either way.
        worker.stop(None).expect("stop");
        assert_eq!(worker.pending(), 0);
        assert!(seen.lock().iter().flatten().count() <= 3);
    }

    #[test]
    fn stop_timeout_is_surfaced() {
        let gate = Arc::new((std::sync::Mutex::new(false), std::sync::Condvar::new()));
        let inner = Arc::clone(&gate);
        let handler = FnHandler::new(move |_batch: Vec<u32>| {
            let (lock, cv) = &*inner;
            let mut open = lock.lock().expect("gate lock");
            while !*open {
                open = cv.wait(open).expect("gate wait");
            }
            Ok(())
        });
        let worker = BackgroundWorker::new(fast("slow"), handler);
        worker.start().expect("start");
        worker.emit(1).expect("emit");
        while worker.pending() > 0 {
            std::thread::sleep(Duration::from_millis(1));
        }

        let err = worker
            .stop(Some(Duration::from_millis(20)))
            .expect_err("blocked handler must time out");
        assert!(matches!(err, ChatmemError::StopTimeout { timeout_ms: 20, .. }));
        assert!(worker.is_running());

        {
            let (lock, cv) = &*gate;
            *lock.lock().expect("gate lock") = true;
            cv.notify_all();
        }
        worker.stop(Some(Duration::from_secs(5))).expect("retry stop");
        assert!(!worker.is_running());
    }

    #[test]
    fn bounded_queue_rejects_when_full() {
        let (_seen, handler) = recording();
        let worker = BackgroundWorker::new(fast("bounded").max_queue(1), handler);
        worker.emit(1).expect("first fits");
        assert!(matches!(
            worker.emit(2),
            Err(ChatmemError::QueueFull { capacity: 1, .. })
        ));
        assert_eq!(worker.stats().total_dropped, 1);
    }
}
