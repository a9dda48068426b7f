//! Background worker running as a tokio task.
//!
//! Same loop as [`super::BackgroundWorker`], but the wait for the next payload
//! is an `.await`, so an idle worker costs no thread.

use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::queue::{JobQueue, QueueStats};
use super::{AsyncBatchHandler, WorkerOptions, panic_message};
use crate::error::{ChatmemError, Result};
use crate::observer::{SharedObserver, noop};

/// Task-backed [`AsyncBatchHandler`] executor.
pub struct AsyncWorker<T, H> {
    options: WorkerOptions,
    queue: JobQueue<T>,
    handler: Arc<tokio::sync::Mutex<H>>,
    observer: SharedObserver,
    running: Mutex<Option<RunningTask>>,
    _payload: PhantomData<fn(T)>,
}

struct RunningTask {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl<T, H> AsyncWorker<T, H>
where
    T: Send + 'static,
    H: AsyncBatchHandler<T>,
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
            handler: Arc::new(tokio::sync::Mutex::new(handler)),
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

    /// Spawn the worker task on the current runtime. No-op if already running.
    ///
    /// # Errors
    /// Returns `ChatmemError::Config` when called outside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ChatmemError::Config(format!(
                "async worker '{}' needs a tokio runtime: {e}",
                self.options.name
            ))
        })?;

        let shutdown = Arc::new(Notify::new());
        let ctx = TaskContext {
            options: self.options.clone(),
            queue: self.queue.clone(),
            handler: Arc::clone(&self.handler),
            observer: Arc::clone(&self.observer),
            shutdown: Arc::clone(&shutdown),
        };
        let handle = runtime.spawn(ctx.run());

        info!(worker = %self.options.name, "async worker started");
        *running = Some(RunningTask { shutdown, handle });
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

    /// End the worker task.
    ///
    /// With `drain_on_stop` the task is signalled and allowed to finish the
    /// current batch and everything still queued. Without it the task is
    /// cancelled and queued payloads are discarded; cancellation counts as a
    /// clean stop.
    ///
    /// # Errors
    /// Returns `ChatmemError::StopTimeout` if the task has not finished when
    /// `timeout` elapses (the task is then aborted), or
    /// `ChatmemError::WorkerPanic` if the task itself panicked.
    pub async fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        let Some(run) = self.running.lock().take() else {
            return Ok(());
        };

        if self.options.drain_on_stop {
            run.shutdown.notify_one();
        } else {
            run.handle.abort();
        }
        let joined = self.join(run.handle, timeout).await;

        if !self.options.drain_on_stop {
            let dropped = self.queue.drain().len();
            if dropped > 0 {
                warn!(worker = %self.options.name, dropped, "discarding queued payloads on stop");
            }
        }
        joined?;
        info!(worker = %self.options.name, "async worker stopped");
        Ok(())
    }

    async fn join(&self, mut handle: JoinHandle<()>, timeout: Option<Duration>) -> Result<()> {
        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                    error!(worker = %self.options.name, timeout_ms, "async worker did not stop in time");
                    return Err(ChatmemError::StopTimeout {
                        worker: self.options.name.clone(),
                        timeout_ms,
                    });
                }
            },
            None => handle.await,
        };
        self.map_join(joined)
    }

    fn map_join(&self, joined: std::result::Result<(), JoinError>) -> Result<()> {
        match joined {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => {
                debug!(worker = %self.options.name, "async worker cancelled");
                Ok(())
            }
            Err(e) => Err(ChatmemError::WorkerPanic {
                worker: self.options.name.clone(),
                message: e
                    .try_into_panic()
                    .map_or_else(|e| e.to_string(), |p| panic_message(p.as_ref())),
            }),
        }
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

    /// Whether the worker task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl<T, H> Drop for AsyncWorker<T, H> {
    fn drop(&mut self) {
        if let Some(run) = self.running.get_mut().take() {
            run.handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

struct TaskContext<T, H> {
    options: WorkerOptions,
    queue: JobQueue<T>,
    handler: Arc<tokio::sync::Mutex<H>>,
    observer: SharedObserver,
    shutdown: Arc<Notify>,
}

impl<T, H> TaskContext<T, H>
where
    T: Send + 'static,
    H: AsyncBatchHandler<T>,
{
    async fn run(self) {
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.notified() => break,
                () = self.queue.item_available() => {}
            }
            let Some(first) = self.queue.pop() else {
                continue;
            };
            if !self.options.debounce.is_zero() {
                tokio::time::sleep(self.options.debounce).await;
            }
            let mut batch = vec![first];
            batch.extend(self.queue.drain());
            self.run_batch(batch).await;
        }

        let leftover = self.queue.drain();
        if !leftover.is_empty() {
            debug!(worker = %self.options.name, items = leftover.len(), "draining queue before stop");
            self.run_batch(leftover).await;
        }
    }

    async fn run_batch(&self, batch: Vec<T>) {
        let name = self.options.name.as_str();
        let submitted = batch.len();
        let started = Instant::now();
        let mut handler = self.handler.lock().await;

        let mut merged_len = submitted;
        let result = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.merge(batch))) {
            Ok(merged) => {
                merged_len = merged.len();
                AssertUnwindSafe(handler.process(merged))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(self.panicked(payload.as_ref())))
            }
            Err(payload) => Err(self.panicked(payload.as_ref())),
        };

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
                let hook = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    handler.on_error(&err, merged_len);
                }));
                if hook.is_err() {
                    error!(worker = name, "error hook panicked");
                }
            }
        }
    }

    fn panicked(&self, payload: &(dyn std::any::Any + Send)) -> ChatmemError {
        ChatmemError::WorkerPanic {
            worker: self.options.name.clone(),
            message: panic_message(payload),
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
    use crate::worker::AsyncFnHandler;

    fn fast(name: &str) -> WorkerOptions {
        WorkerOptions::new(name).poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn drain_on_stop_processes_everything() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = AsyncFnHandler::new(move |batch: Vec<u32>| {
            let sink = Arc::clone(&sink);
            async move {
                tokio::task::yield_now().await;
                sink.lock().extend(batch);
                Ok(())
            }
        });
        let worker = AsyncWorker::new(fast("async-drain"), handler);
        worker.start().expect("start");
        for i in 0..50 {
            worker.emit(i).expect("emit");
        }
        worker
            .stop(Some(Duration::from_secs(5)))
            .await
            .expect("stop");

        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn error_in_one_batch_keeps_loop_alive() {
        let metrics = Arc::new(MetricsObserver::new());
        let handler = AsyncFnHandler::new(|batch: Vec<u32>| async move {
            if batch.contains(&0) {
                Err(ChatmemError::Index("backend down".into()))
            } else {
                Ok(())
            }
        });
        let worker = AsyncWorker::with_observer(fast("async-fail"), handler, metrics.clone());
        worker.start().expect("start");

        worker.emit(0).expect("emit");
        while metrics.snapshot().batches_failed == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        worker.emit(1).expect("emit");
        worker.stop(None).await.expect("stop");

        let snap = metrics.snapshot();
        assert_eq!(snap.batches_failed, 1);
        assert_eq!(snap.batches_completed, 1);
    }

    #[tokio::test]
    async fn panic_in_process_is_caught() {
        let metrics = Arc::new(MetricsObserver::new());
        let handler = AsyncFnHandler::new(|batch: Vec<u32>| async move {
            assert!(batch.is_empty(), "never empty");
            Ok(())
        });
        let worker = AsyncWorker::with_observer(fast("async-panic"), handler, metrics.clone());
        worker.start().expect("start");
        worker.emit(1).expect("emit");
        worker.stop(None).await.expect("stop returns cleanly");
        assert_eq!(metrics.snapshot().batches_failed, 1);
    }

    #[tokio::test]
    async fn stop_without_drain_cancels_cleanly() {
        let handler = AsyncFnHandler::new(|_batch: Vec<u32>| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let worker = AsyncWorker::new(fast("async-cancel").drain_on_stop(false), handler);
        worker.start().expect("start");
        worker.emit(1).expect("emit");
        worker.emit(2).expect("emit");
        tokio::task::yield_now().await;

        worker
            .stop(Some(Duration::from_secs(5)))
            .await
            .expect("cancellation is a clean stop");
        assert_eq!(worker.pending(), 0);
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn stuck_drain_times_out() {
        let handler = AsyncFnHandler::new(|_batch: Vec<u32>| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let worker = AsyncWorker::new(fast("async-stuck"), handler);
        worker.start().expect("start");
        worker.emit(1).expect("emit");
        while worker.pending() > 0 {
            tokio::task::yield_now().await;
        }

        let err = worker
            .stop(Some(Duration::from_millis(20)))
            .await
            .expect_err("must time out");
        assert!(matches!(err, ChatmemError::StopTimeout { timeout_ms: 20, .. }));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_restartable() {
        let handler = AsyncFnHandler::new(|_batch: Vec<u32>| async move { Ok(()) });
        let worker = AsyncWorker::new(fast("async-restart"), handler);
        worker.start().expect("start");
        worker.start().expect("second start is a no-op");
        worker.stop(None).await.expect("stop");
        worker.stop(None).await.expect("stop twice is a no-op");
        worker.start().expect("restart");
        assert!(worker.is_running());
        worker.stop(None).await.expect("stop");
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let handler = AsyncFnHandler::new(|_batch: Vec<u32>| async move { Ok(()) });
        let worker = AsyncWorker::new(fast("no-runtime"), handler);
        assert!(matches!(worker.start(), Err(ChatmemError::Config(_))));
    }
}
