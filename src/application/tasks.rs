use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Tracker for work that outlives the call that started it.
///
/// Each task carries an idempotency key; while a task with a given key is in
/// flight, spawning another one with the same key is a no-op. The same keys
/// can be claimed directly to serialize foreground work.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    set: Arc<Mutex<JoinSet<()>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Holds a key in flight until dropped.
#[derive(Debug)]
pub struct InFlight {
    key: String,
    keys: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key` in flight, or `None` if someone already holds it.
    pub fn claim(&self, key: impl Into<String>) -> Option<InFlight> {
        let key = key.into();
        if !self.in_flight.lock().insert(key.clone()) {
            debug!(task = %key, "key already in flight");
            return None;
        }
        Some(InFlight {
            key,
            keys: self.in_flight.clone(),
        })
    }

    /// Spawns `task` unless one keyed `key` is still running. Returns whether
    /// it was spawned.
    ///
    /// The key is released when the task ends, even by panicking.
    pub fn spawn<F>(&self, key: impl Into<String>, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(guard) = self.claim(key) else {
            return false;
        };
        let mut set = self.set.lock();
        while let Some(joined) = set.try_join_next() {
            if let Err(err) = joined {
                warn!(error = %err, "background task panicked");
            }
        }
        set.spawn(async move {
            let _guard = guard;
            task.await;
        });
        true
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Join handles currently held, finished or not.
    pub fn handles(&self) -> usize {
        self.set.lock().len()
    }

    /// Waits for every spawned task, including ones spawned while draining.
    pub async fn drain(&self) {
        loop {
            let mut pending = std::mem::take(&mut *self.set.lock());
            if pending.is_empty() {
                return;
            }
            while let Some(joined) = pending.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "background task panicked");
                }
            }
        }
    }
}
