//! Deduplicating work queue shared by the background loops.
//!
//! A key is held at most once in the queue. A key that is re-added while a
//! worker is processing it is queued again when the worker calls
//! [`WorkQueue::done`], so no change is lost and no key is processed by two
//! workers at once.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Cloneable handle to one work queue.
#[derive(Clone)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue a key unless it is already waiting.
    pub async fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.shared.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Enqueue a key after `delay`, from a detached task.
    pub fn add_after(&self, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Wait for the next key. Returns `None` once the queue is shut down;
    /// keys still waiting at that point are dropped.
    ///
    /// Cancel-safe: a key is only taken off the queue when it is returned.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.shared.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Mark a key as processed. Requeues it if it was re-added meanwhile.
    pub async fn done(&self, key: &str) {
        let mut state = self.shared.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiter.
    pub async fn shut_down(&self) {
        self.shared.state.lock().await.shutting_down = true;
        self.shared.notify.notify_waiters();
    }

    /// Number of keys waiting.
    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedups_waiting_keys() {
        let q = WorkQueue::new();
        q.add("a").await;
        q.add("a").await;
        q.add("b").await;
        assert_eq!(q.len().await, 2);
        assert_eq!(q.get().await.as_deref(), Some("a"));
        assert_eq!(q.get().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn readd_during_processing_requeues_on_done() {
        let q = WorkQueue::new();
        q.add("a").await;
        let key = q.get().await.unwrap();
        q.add("a").await;
        // Not handed out twice while in flight.
        assert!(q.is_empty().await);
        q.done(&key).await;
        assert_eq!(q.get().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn shutdown_releases_waiters() {
        let q = WorkQueue::new();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shut_down().await;
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn add_after_delays() {
        let q = WorkQueue::new();
        q.add_after("late", Duration::from_millis(200));
        assert!(q.is_empty().await);
        let key = tokio::time::timeout(Duration::from_secs(5), q.get())
            .await
            .unwrap();
        assert_eq!(key.as_deref(), Some("late"));
    }
}
