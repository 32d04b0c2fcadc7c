//! Level-triggered work queue with per-key serialization
//!
//! Keys deduplicate while queued and serialize while processing: a key
//! re-added mid-reconcile runs again after the current pass finishes, never
//! concurrently with it. Delayed re-delivery backs requeue-after decisions
//! and error backoff.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::Result;

/// Base delay for error backoff
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Cap on error backoff
const BACKOFF_MAX: Duration = Duration::from_secs(300);

#[derive(Default)]
struct QueueState {
    ready: VecDeque<String>,
    queued: HashSet<String>,
    processing: HashSet<String>,
    /// Keys re-added while processing; re-enqueued on `done`
    redo: HashSet<String>,
    shutdown: bool,
}

/// Work queue for reconcile keys
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        })
    }

    /// Enqueue a key. Already-queued keys are deduplicated; keys currently
    /// processing are marked for another pass instead.
    pub fn add(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        if state.shutdown {
            return;
        }
        if state.processing.contains(key) {
            state.redo.insert(key.to_string());
            return;
        }
        if state.queued.insert(key.to_string()) {
            state.ready.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Enqueue a key after a delay; zero delay enqueues immediately.
    pub fn add_after(self: Arc<Self>, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            self.add(&key);
        });
    }

    /// Dequeue the next key, waiting until one is available. Returns `None`
    /// once the queue is shut down and drained.
    pub async fn next(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap();
                if let Some(key) = state.ready.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    // Wake another worker in case more keys are ready
                    if !state.ready.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutdown {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark a key's pass finished; a pass requested meanwhile re-enqueues it.
    pub fn done(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.processing.remove(key);
        if state.redo.remove(key) && state.queued.insert(key.to_string()) {
            state.ready.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop delivery; workers drain remaining keys and exit.
    pub fn shutdown(&self) {
        self.state.lock().unwrap().shutdown = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run a pool of workers against the queue.
///
/// Handler results drive re-delivery: `Ok(Some(delay))` requeues after the
/// delay, `Ok(None)` settles the key, errors requeue with exponential
/// per-key backoff that resets on the next success.
pub async fn run_workers<H, Fut>(queue: Arc<WorkQueue>, workers: usize, handler: H)
where
    H: Fn(String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Duration>>> + Send + 'static,
{
    let failures: Arc<Mutex<HashMap<String, u32>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut handles = Vec::with_capacity(workers);

    for worker in 0..workers {
        let queue = Arc::clone(&queue);
        let handler = handler.clone();
        let failures = Arc::clone(&failures);

        handles.push(tokio::spawn(async move {
            while let Some(key) = queue.next().await {
                match handler(key.clone()).await {
                    Ok(requeue) => {
                        failures.lock().unwrap().remove(&key);
                        queue.done(&key);
                        if let Some(delay) = requeue {
                            Arc::clone(&queue).add_after(&key, delay);
                        }
                    }
                    Err(e) => {
                        let attempt = {
                            let mut failures = failures.lock().unwrap();
                            let n = failures.entry(key.clone()).or_insert(0);
                            *n += 1;
                            *n
                        };
                        let delay = backoff(attempt);
                        tracing::warn!(
                            worker,
                            key = %key,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "reconcile failed, requeuing"
                        );
                        queue.done(&key);
                        Arc::clone(&queue).add_after(&key, delay);
                    }
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

fn backoff(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(exp))
        .min(BACKOFF_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn dedup_while_queued() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.add("a");
        queue.add("b");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.next().await.as_deref(), Some("a"));
        assert_eq!(queue.next().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn readd_during_processing_runs_again_after_done() {
        let queue = WorkQueue::new();
        queue.add("a");

        let key = queue.next().await.unwrap();
        // Re-added while in flight: must not be delivered concurrently
        queue.add("a");
        assert_eq!(queue.len(), 0);

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn add_after_delivers_later() {
        let queue = WorkQueue::new();
        Arc::clone(&queue).add_after("a", Duration::from_millis(20));
        assert_eq!(queue.len(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_drains_and_stops() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.shutdown();

        assert_eq!(queue.next().await.as_deref(), Some("a"));
        queue.done("a");
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test]
    async fn workers_process_and_requeue() {
        let queue = WorkQueue::new();
        let seen = Arc::new(AtomicUsize::new(0));
        queue.add("a");

        let worker_queue = Arc::clone(&queue);
        let worker_seen = Arc::clone(&seen);
        let workers = tokio::spawn(run_workers(worker_queue, 2, move |_key: String| {
            let seen = Arc::clone(&worker_seen);
            async move {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                // First pass asks for a quick re-delivery, second settles
                if n == 0 {
                    Ok(Some(Duration::from_millis(5)))
                } else {
                    Ok(None)
                }
            }
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.shutdown();
        let _ = workers.await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(5), Duration::from_secs(16));
        assert_eq!(backoff(30), BACKOFF_MAX);
    }
}
