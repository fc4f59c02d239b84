use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{PoolStats, TaskOutcome, TaskReport, TaskTicket};
use crate::error::{InvexError, PipelineError};
use crate::models::config::InvexConfig;
use crate::models::record::InvoiceRecord;
use crate::models::task::{GroundTruth, ProcessingTask, SourceRef, TaskId, TaskState};
use crate::pipeline::{Pipeline, PipelineOutput};
use crate::quality::QualityMonitor;
use crate::queue::TaskQueue;

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    dead: AtomicU64,
    retries: AtomicU64,
    in_flight: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead: self.dead.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

type Waiters = Mutex<HashMap<TaskId, oneshot::Sender<TaskReport>>>;

/// State shared by the pool handle and its workers.
struct Shared {
    pipeline: Arc<Pipeline>,
    queue: Arc<TaskQueue>,
    monitor: Arc<QualityMonitor>,
    counters: Counters,
    waiters: Waiters,
    results: mpsc::UnboundedSender<TaskReport>,
    task_timeout: Duration,
    retry_delay: Duration,
}

/// Fixed pool of async workers sharing one task queue.
///
/// Each pipeline execution runs on the blocking thread pool under the
/// configured timeout. Transient failures are requeued with the retry delay
/// until the retry budget is spent.
pub struct WorkerPool {
    config: Arc<InvexConfig>,
    shared: Arc<Shared>,
    results: Option<mpsc::UnboundedReceiver<TaskReport>>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers.count` workers with a fresh queue and quality monitor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Arc<InvexConfig>, pipeline: Pipeline) -> Self {
        let queue = Arc::new(TaskQueue::from_config(&config.workers));
        let monitor = Arc::new(QualityMonitor::new(config.quality.clone()));
        Self::with_parts(config, pipeline, queue, monitor)
    }

    /// Start workers over an existing queue and monitor.
    pub fn with_parts(
        config: Arc<InvexConfig>,
        pipeline: Pipeline,
        queue: Arc<TaskQueue>,
        monitor: Arc<QualityMonitor>,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            pipeline: Arc::new(pipeline),
            queue,
            monitor,
            counters: Counters::default(),
            waiters: Mutex::new(HashMap::new()),
            results: results_tx,
            task_timeout: config.workers.task_timeout(),
            retry_delay: config.workers.retry_delay(),
        });

        let count = config.workers.count.max(1);
        let workers = (0..count)
            .map(|id| {
                let worker = Worker {
                    id,
                    shared: Arc::clone(&shared),
                    shutdown: shutdown_rx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(workers = count, "worker pool started");

        Self {
            config,
            shared,
            results: Some(results_rx),
            shutdown: shutdown_tx,
            workers,
        }
    }

    /// Submit a document; `None` priority means the normal level.
    pub fn submit(
        &self,
        source: SourceRef,
        priority: Option<u8>,
        ground_truth: Option<GroundTruth>,
    ) -> Result<TaskTicket, InvexError> {
        if self.is_shutdown() {
            return Err(InvexError::PoolClosed);
        }

        let priority = priority.unwrap_or_else(|| self.config.workers.normal_priority());
        let mut task = ProcessingTask::new(source, priority, self.config.workers.max_retries);
        if let Some(truth) = ground_truth {
            task = task.with_ground_truth(truth);
        }
        let id = task.id.clone();

        // Register before enqueueing so a fast worker always finds the waiter.
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.waiters).insert(id.clone(), tx);

        if let Err(e) = self.shared.queue.enqueue(task) {
            lock(&self.shared.waiters).remove(&id);
            warn!(task_id = %id, error = %e, "submission rejected");
            return Err(e.into());
        }

        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = %id, priority, "task submitted");
        Ok(TaskTicket { id, outcome: rx })
    }

    /// Take the pool-wide report stream. Returns `None` after the first call.
    pub fn take_results(&mut self) -> Option<mpsc::UnboundedReceiver<TaskReport>> {
        self.results.take()
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.counters.snapshot()
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.shared.queue
    }

    pub fn monitor(&self) -> &Arc<QualityMonitor> {
        &self.shared.monitor
    }

    /// Stop accepting submissions and let workers exit after their current task.
    pub fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        info!("shutting down worker pool");
        self.shared.queue.wake_all();
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Wait for every worker to exit and return the final counters.
    ///
    /// Tasks resolved while draining are published on the result stream
    /// before this returns; tasks requeued while draining stay in the queue.
    pub async fn join(self) -> PoolStats {
        for (id, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!(worker = id, error = %e, "worker terminated abnormally");
            }
        }
        info!("all workers have stopped");
        self.shared.counters.snapshot()
    }
}

struct Worker {
    id: usize,
    shared: Arc<Shared>,
    shutdown: watch::Receiver<bool>,
}

/// What one pipeline execution produced.
enum Execution {
    Completed(PipelineOutput),
    Failed(PipelineError),
}

impl Worker {
    async fn run(mut self) {
        debug!(worker = self.id, "worker started");

        while let Some(task) = self.shared.queue.dequeue_wait(&mut self.shutdown).await {
            let span = info_span!(
                "task",
                task_id = %task.id,
                worker = self.id,
                attempt = task.attempts + 1
            );
            self.process(task).instrument(span).await;
        }

        debug!(worker = self.id, "worker stopped");
    }

    async fn process(&self, mut task: ProcessingTask) {
        task.state = TaskState::InProgress;
        task.attempts += 1;
        debug!(source = %task.source, priority = task.priority, "processing task");

        let counters = &self.shared.counters;
        counters.in_flight.fetch_add(1, Ordering::Relaxed);
        let execution = self.execute(&task).await;
        counters.in_flight.fetch_sub(1, Ordering::Relaxed);

        match execution {
            Execution::Completed(output) => {
                if let Some(sample) = output.sample.clone() {
                    self.shared.monitor.record(sample);
                }
                match output.validation_gap() {
                    Some(gap) => self.resolve(task, TaskOutcome::Failed, Some(output.record), Some(gap.to_string())),
                    None => self.resolve(task, TaskOutcome::Succeeded, Some(output.record), None),
                }
            }
            Execution::Failed(e) if e.is_transient() => self.retry_or_bury(task, e),
            Execution::Failed(e) => self.resolve(task, TaskOutcome::Failed, None, Some(e.to_string())),
        }
    }

    /// Run the pipeline on the blocking pool, abandoning it on timeout.
    async fn execute(&self, task: &ProcessingTask) -> Execution {
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = tokio::task::spawn_blocking({
            let pipeline = Arc::clone(&self.shared.pipeline);
            let cancel = Arc::clone(&cancel);
            let task = task.clone();
            move || pipeline.run(&task, &cancel)
        });

        match tokio::time::timeout(self.shared.task_timeout, handle).await {
            Ok(Ok(Ok(output))) => Execution::Completed(output),
            Ok(Ok(Err(e))) => Execution::Failed(e),
            Ok(Err(join_error)) => Execution::Failed(PipelineError::Panicked(panic_message(join_error))),
            Err(_) => {
                // The execution stops at its next checkpoint; its output is dropped.
                cancel.store(true, Ordering::Release);
                Execution::Failed(PipelineError::Timeout {
                    secs: self.shared.task_timeout.as_secs(),
                })
            }
        }
    }

    fn retry_or_bury(&self, mut task: ProcessingTask, error: PipelineError) {
        let reason = error.to_string();
        if !task.schedule_retry(reason.clone()) {
            self.resolve(task, TaskOutcome::Dead, None, Some(reason));
            return;
        }

        warn!(
            retry = task.retry_count,
            max_retries = task.max_retries,
            delay_secs = self.shared.retry_delay.as_secs(),
            error = %reason,
            "transient failure, retrying"
        );
        self.shared.counters.retries.fetch_add(1, Ordering::Relaxed);

        let fallback = task.clone();
        if let Err(e) = self.shared.queue.requeue(task, self.shared.retry_delay) {
            self.resolve(fallback, TaskOutcome::Failed, None, Some(e.to_string()));
        }
    }

    fn resolve(
        &self,
        mut task: ProcessingTask,
        outcome: TaskOutcome,
        record: Option<InvoiceRecord>,
        reason: Option<String>,
    ) {
        task.resolve(outcome.state(), reason.clone());

        let counters = &self.shared.counters;
        match outcome {
            TaskOutcome::Succeeded => {
                counters.succeeded.fetch_add(1, Ordering::Relaxed);
                info!(attempts = task.attempts, "task succeeded");
            }
            TaskOutcome::Failed => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(reason = reason.as_deref().unwrap_or_default(), "task failed");
            }
            TaskOutcome::Dead => {
                counters.dead.fetch_add(1, Ordering::Relaxed);
                error!(
                    retries = task.retry_count,
                    reason = reason.as_deref().unwrap_or_default(),
                    "task dead after exhausting retries"
                );
            }
        }

        let report = TaskReport {
            task,
            outcome,
            record,
            reason,
        };

        if let Some(waiter) = lock(&self.shared.waiters).remove(&report.task.id) {
            // The submitter may have dropped its ticket.
            let _ = waiter.send(report.clone());
        }
        let _ = self.shared.results.send(report);
    }
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
