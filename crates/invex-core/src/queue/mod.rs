//! Priority task queue with delayed re-entry.
//!
//! Tasks are filed into one FIFO bucket per priority level; dequeue serves
//! the oldest task of the highest non-empty bucket. Retried tasks wait in a
//! delay heap until their not-before instant and then rejoin the back of
//! their bucket. All state sits behind a single mutex.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::error::QueueError;
use crate::models::config::WorkerConfig;
use crate::models::task::ProcessingTask;

/// Pending tasks at one priority level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub priority: u8,
    /// Visible to dequeue.
    pub ready: usize,
    /// Waiting out a retry delay.
    pub delayed: usize,
}

/// Serializable image of the pending tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub task: ProcessingTask,
    /// Remaining retry delay in milliseconds (0 for ready tasks).
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Debug)]
struct Ready {
    seq: u64,
    task: ProcessingTask,
}

#[derive(Debug)]
struct Delayed {
    due: Instant,
    seq: u64,
    task: ProcessingTask,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

#[derive(Debug)]
struct QueueState {
    buckets: Vec<VecDeque<Ready>>,
    delayed: BinaryHeap<Reverse<Delayed>>,
    next_seq: u64,
    /// Consecutive dequeues that passed over a waiting lower-priority task.
    bypassed: u32,
}

impl QueueState {
    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn pending(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum::<usize>() + self.delayed.len()
    }

    /// Move every due delayed task to the back of its bucket.
    fn promote_due(&mut self, now: Instant) {
        while self.delayed.peek().is_some_and(|Reverse(d)| d.due <= now) {
            let Some(Reverse(delayed)) = self.delayed.pop() else {
                break;
            };
            let seq = self.seq();
            trace!(task_id = %delayed.task.id, "retry delay elapsed");
            let priority = usize::from(delayed.task.priority);
            self.buckets[priority].push_back(Ready {
                seq,
                task: delayed.task,
            });
        }
    }

    fn pop(&mut self, starvation_guard: Option<u32>) -> Option<ProcessingTask> {
        let top = self.buckets.iter().rposition(|bucket| !bucket.is_empty())?;
        let lower_waiting = self.buckets[..top].iter().any(|bucket| !bucket.is_empty());

        if let Some(limit) = starvation_guard {
            if lower_waiting && self.bypassed >= limit {
                let oldest = self.buckets[..top]
                    .iter()
                    .enumerate()
                    .filter_map(|(level, bucket)| bucket.front().map(|r| (r.seq, level)))
                    .min()
                    .map(|(_, level)| level)?;
                self.bypassed = 0;
                debug!(priority = oldest, "starvation guard serving lower priority");
                return self.buckets[oldest].pop_front().map(|r| r.task);
            }
        }

        self.bypassed = if lower_waiting { self.bypassed.saturating_add(1) } else { 0 };
        self.buckets[top].pop_front().map(|r| r.task)
    }
}

/// Priority queue shared by submitters and workers.
#[derive(Debug)]
pub struct TaskQueue {
    levels: u8,
    capacity: usize,
    starvation_guard: Option<u32>,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl TaskQueue {
    /// Create a queue with `levels` priorities (`0..levels`, higher first).
    /// A `capacity` of 0 means unbounded.
    pub fn new(levels: u8, capacity: usize) -> Self {
        let levels = levels.max(1);
        Self {
            levels,
            capacity,
            starvation_guard: None,
            state: Mutex::new(QueueState {
                buckets: (0..levels).map(|_| VecDeque::new()).collect(),
                delayed: BinaryHeap::new(),
                next_seq: 0,
                bypassed: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.priority_levels, config.queue_capacity).with_starvation_guard(config.starvation_guard)
    }

    /// Serve the oldest waiting lower-priority task after `limit` consecutive
    /// dequeues passed it over.
    pub fn with_starvation_guard(mut self, limit: Option<u32>) -> Self {
        self.starvation_guard = limit.filter(|l| *l > 0);
        self
    }

    pub fn levels(&self) -> u8 {
        self.levels
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_priority(&self, priority: u8) -> Result<(), QueueError> {
        if priority >= self.levels {
            return Err(QueueError::InvalidPriority {
                priority,
                levels: self.levels,
            });
        }
        Ok(())
    }

    /// File a task under its priority, behind older tasks of that priority.
    pub fn enqueue(&self, task: ProcessingTask) -> Result<(), QueueError> {
        self.check_priority(task.priority)?;

        let mut state = self.lock();
        if self.capacity > 0 && state.pending() >= self.capacity {
            return Err(QueueError::Saturated {
                capacity: self.capacity,
            });
        }

        let seq = state.seq();
        trace!(task_id = %task.id, priority = task.priority, "task enqueued");
        state.buckets[usize::from(task.priority)].push_back(Ready { seq, task });
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    /// Return a task to the queue, visible again after `delay`.
    ///
    /// Never rejected for saturation: the task already held a slot.
    pub fn requeue(&self, task: ProcessingTask, delay: Duration) -> Result<(), QueueError> {
        self.check_priority(task.priority)?;

        let mut state = self.lock();
        let seq = state.seq();
        if delay.is_zero() {
            state.buckets[usize::from(task.priority)].push_back(Ready { seq, task });
        } else {
            trace!(task_id = %task.id, delay_ms = delay.as_millis() as u64, "task requeued with delay");
            state.delayed.push(Reverse(Delayed {
                due: Instant::now() + delay,
                seq,
                task,
            }));
        }
        drop(state);

        // Wake a waiter so it re-arms its timer for the new entry.
        self.notify.notify_one();
        Ok(())
    }

    /// Take the next visible task, if any.
    pub fn try_dequeue(&self) -> Option<ProcessingTask> {
        let mut state = self.lock();
        state.promote_due(Instant::now());
        state.pop(self.starvation_guard)
    }

    /// Wait for the next visible task.
    ///
    /// Wakes on enqueue, when the earliest delayed task becomes due, or when
    /// `shutdown` turns true (returning `None`).
    pub async fn dequeue_wait(&self, shutdown: &mut watch::Receiver<bool>) -> Option<ProcessingTask> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            if let Some(task) = self.try_dequeue() {
                return Some(task);
            }

            let next_due = self.lock().delayed.peek().map(|Reverse(d)| d.due);
            let delay_elapsed = async {
                match next_due {
                    Some(due) => sleep_until(due).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = delay_elapsed => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Wake every waiting worker, e.g. after signalling shutdown.
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }

    /// Pending tasks, ready and delayed.
    pub fn len(&self) -> usize {
        self.lock().pending()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Depth per priority level, highest priority first.
    pub fn depths(&self) -> Vec<QueueDepth> {
        let state = self.lock();
        (0..self.levels)
            .rev()
            .map(|priority| QueueDepth {
                priority,
                ready: state.buckets[usize::from(priority)].len(),
                delayed: state
                    .delayed
                    .iter()
                    .filter(|Reverse(d)| d.task.priority == priority)
                    .count(),
            })
            .collect()
    }

    /// Copy the pending tasks without removing them.
    ///
    /// Ready tasks come first in dequeue order, then delayed tasks by due time.
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        let now = Instant::now();

        let mut entries: Vec<SnapshotEntry> = state
            .buckets
            .iter()
            .rev()
            .flat_map(|bucket| bucket.iter())
            .map(|ready| SnapshotEntry {
                task: ready.task.clone(),
                delay_ms: 0,
            })
            .collect();

        let mut delayed: Vec<&Delayed> = state.delayed.iter().map(|Reverse(d)| d).collect();
        delayed.sort();
        entries.extend(delayed.into_iter().map(|d| SnapshotEntry {
            task: d.task.clone(),
            delay_ms: d.due.saturating_duration_since(now).as_millis() as u64,
        }));

        QueueSnapshot { entries }
    }

    /// Re-file the tasks of a snapshot, returning how many were restored.
    pub fn restore(&self, snapshot: QueueSnapshot) -> Result<usize, QueueError> {
        for entry in &snapshot.entries {
            self.check_priority(entry.task.priority)?;
        }

        let count = snapshot.entries.len();
        for entry in snapshot.entries {
            self.requeue(entry.task, Duration::from_millis(entry.delay_ms))?;
        }
        debug!(count, "queue restored from snapshot");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::SourceRef;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn task(name: &str, priority: u8) -> ProcessingTask {
        ProcessingTask::new(SourceRef::new(name), priority, 3)
    }

    fn drain(queue: &TaskQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.try_dequeue())
            .map(|t| t.source.to_string())
            .collect()
    }

    #[test]
    fn test_highest_priority_first() {
        let queue = TaskQueue::new(3, 0);
        queue.enqueue(task("low", 0)).unwrap();
        queue.enqueue(task("high", 2)).unwrap();

        assert_eq!(drain(&queue), vec!["high", "low"]);
    }

    #[test]
    fn test_fifo_within_priority() {
        let queue = TaskQueue::new(3, 0);
        for name in ["a", "b", "c"] {
            queue.enqueue(task(name, 1)).unwrap();
        }
        queue.enqueue(task("urgent", 2)).unwrap();

        assert_eq!(drain(&queue), vec!["urgent", "a", "b", "c"]);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_invalid_priority() {
        let queue = TaskQueue::new(3, 0);
        assert_eq!(
            queue.enqueue(task("x", 3)),
            Err(QueueError::InvalidPriority { priority: 3, levels: 3 })
        );
    }

    #[test]
    fn test_saturation_and_requeue_bypass() {
        let queue = TaskQueue::new(3, 2);
        queue.enqueue(task("a", 1)).unwrap();
        queue.enqueue(task("b", 1)).unwrap();
        assert_eq!(queue.enqueue(task("c", 1)), Err(QueueError::Saturated { capacity: 2 }));

        let taken = queue.try_dequeue().unwrap();
        queue.enqueue(task("c", 1)).unwrap();
        // The dequeued task still owns a slot and may come back.
        queue.requeue(taken, Duration::from_secs(60)).unwrap();
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_hidden_until_delay_elapses() {
        let queue = TaskQueue::new(3, 0);
        queue.requeue(task("retry", 2), Duration::from_secs(60)).unwrap();
        queue.enqueue(task("fresh", 0)).unwrap();

        assert_eq!(queue.try_dequeue().map(|t| t.source.to_string()).as_deref(), Some("fresh"));
        assert!(queue.try_dequeue().is_none());
        assert_eq!(
            queue.depths()[0],
            QueueDepth {
                priority: 2,
                ready: 0,
                delayed: 1,
            }
        );

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(queue.try_dequeue().is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        let retried = queue.try_dequeue().unwrap();
        assert_eq!(retried.priority, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_wait_wakes_on_enqueue() {
        let queue = Arc::new(TaskQueue::new(3, 0));
        let (_tx, mut rx) = watch::channel(false);

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue_wait(&mut rx).await })
        };
        tokio::task::yield_now().await;
        queue.enqueue(task("late", 1)).unwrap();

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.source.as_str(), "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_wait_wakes_when_delay_elapses() {
        let queue = TaskQueue::new(3, 0);
        let (_tx, mut rx) = watch::channel(false);
        queue.requeue(task("retry", 1), Duration::from_secs(30)).unwrap();

        let started = Instant::now();
        let got = queue.dequeue_wait(&mut rx).await.unwrap();
        assert_eq!(got.source.as_str(), "retry");
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_wait_returns_on_shutdown() {
        let queue = Arc::new(TaskQueue::new(3, 0));
        let (tx, mut rx) = watch::channel(false);

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue_wait(&mut rx).await })
        };
        tokio::task::yield_now().await;
        tx.send(true).unwrap();

        assert!(waiter.await.unwrap().is_none());
    }

    #[test]
    fn test_starvation_guard() {
        let queue = TaskQueue::new(3, 0).with_starvation_guard(Some(2));
        queue.enqueue(task("low", 0)).unwrap();
        for name in ["h1", "h2", "h3"] {
            queue.enqueue(task(name, 2)).unwrap();
        }

        assert_eq!(drain(&queue), vec!["h1", "h2", "low", "h3"]);
    }

    #[test]
    fn test_strict_priority_without_guard() {
        let queue = TaskQueue::new(3, 0);
        queue.enqueue(task("low", 0)).unwrap();
        for name in ["h1", "h2", "h3"] {
            queue.enqueue(task(name, 2)).unwrap();
        }

        assert_eq!(drain(&queue), vec!["h1", "h2", "h3", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_and_restore() {
        let queue = TaskQueue::new(3, 0);
        queue.enqueue(task("normal", 1)).unwrap();
        queue.enqueue(task("high", 2)).unwrap();
        queue.requeue(task("retry", 0), Duration::from_secs(60)).unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        let snapshot = queue.snapshot();
        assert_eq!(queue.len(), 3);
        let names: Vec<&str> = snapshot.entries.iter().map(|e| e.task.source.as_str()).collect();
        assert_eq!(names, vec!["high", "normal", "retry"]);
        assert_eq!(snapshot.entries[2].delay_ms, 40_000);

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored = TaskQueue::new(3, 0);
        assert_eq!(restored.restore(serde_json::from_str(&json).unwrap()), Ok(3));
        assert_eq!(drain(&restored), vec!["high", "normal"]);

        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(drain(&restored), vec!["retry"]);
    }

    #[test]
    fn test_restore_rejects_unknown_priority() {
        let snapshot = QueueSnapshot {
            entries: vec![SnapshotEntry {
                task: task("x", 5),
                delay_ms: 0,
            }],
        };
        let queue = TaskQueue::new(3, 0);
        assert!(matches!(queue.restore(snapshot), Err(QueueError::InvalidPriority { .. })));
        assert!(queue.is_empty());
    }
}
