//! Structured fan-out for repair and translation tasks.
//!
//! Tasks are keyed by the output slot they fill. Each task's value comes back
//! through its own join handle, so no output structure is shared while tasks
//! run. Only the first error is kept; every task is joined regardless.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

/// Holds the first error recorded by any task.
#[derive(Debug)]
pub struct FirstError<E> {
    slot: Mutex<Option<E>>,
}

impl<E> Default for FirstError<E> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<E> FirstError<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `err` unless an earlier one is already held. Returns true when
    /// this call won.
    pub fn record(&self, err: E) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(err);
        true
    }

    pub fn take(&self) -> Option<E> {
        self.slot.lock().take()
    }
}

pub struct TaskGroup<K, T, E> {
    tasks: Vec<(K, JoinHandle<Option<T>>)>,
    first_error: Arc<FirstError<E>>,
    completed: Arc<AtomicUsize>,
}

impl<K, T, E> Default for TaskGroup<K, T, E> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            first_error: Arc::new(FirstError::new()),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<K, T, E> TaskGroup<K, T, E>
where
    T: Send + 'static,
    E: From<JoinError> + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `fut` on the runtime inside the caller's tracing span.
    pub fn spawn<F>(&mut self, key: K, fut: F)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let first_error = self.first_error.clone();
        let completed = self.completed.clone();
        let handle = tokio::spawn(
            async move {
                let out = fut.await;
                completed.fetch_add(1, Ordering::SeqCst);
                match out {
                    Ok(value) => Some(value),
                    Err(err) => {
                        first_error.record(err);
                        None
                    }
                }
            }
            .in_current_span(),
        );
        self.tasks.push((key, handle));
    }

    /// Tasks spawned so far.
    pub fn spawned(&self) -> usize {
        self.tasks.len()
    }

    /// Tasks finished so far, successful or not.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Waits for every task. Returns each successful value with its key, in
    /// spawn order, or the first error any task produced.
    pub async fn join_all(self) -> Result<Vec<(K, T)>, E> {
        let mut values = Vec::with_capacity(self.tasks.len());
        for (key, handle) in self.tasks {
            match handle.await {
                Ok(Some(value)) => values.push((key, value)),
                Ok(None) => {}
                Err(join_err) => {
                    self.first_error.record(E::from(join_err));
                }
            }
        }
        match self.first_error.take() {
            Some(err) => Err(err),
            None => Ok(values),
        }
    }
}
