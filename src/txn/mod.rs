//! # Transaction Queue
//!
//! A single-consumer serializer: one background worker thread owns a FIFO
//! of `(transaction id, work function)` pairs and runs them one at a time,
//! in enqueue order. `execute` blocks the submitting thread until its
//! transaction completes, handing back the work function's result, error,
//! or captured panic to exactly that caller.
//!
//! ```text
//! Thread 1 ──┐
//! Thread 2 ──┼──► FIFO ──► Worker (runs tasks serially) ──► notify id
//! Thread 3 ──┘
//! ```
//!
//! ## Guarantees
//!
//! - **Serial order**: work functions never overlap; they run in enqueue
//!   order, and transaction ids are assigned under the queue lock so the
//!   id order *is* the enqueue order.
//! - **Fate sharing**: each `execute` observes exactly one outcome. An
//!   error or panic inside one task is delivered to its submitter alone;
//!   failures are keyed by transaction id, never shared.
//! - **No starvation, no cancellation**: the worker always takes the
//!   head, and a dequeued task runs to completion.
//! - **Shutdown**: drains the queue, joins the worker, and rejects any
//!   `execute` submitted afterwards. Dropping the queue shuts it down.
//!
//! Partial on-disk state written by a failed task is not rolled back;
//! there is no WAL.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::trace;

type Task = Box<dyn FnOnce() -> Option<eyre::Report> + Send + 'static>;

struct QueueState {
    queue: VecDeque<(u64, Task)>,
    next_txn_id: u64,
    completed_txn_id: u64,
    failures: HashMap<u64, eyre::Report>,
    shutdown: bool,
}

struct QueueShared {
    state: Mutex<QueueState>,
    /// Wakes the worker when work arrives or shutdown is requested.
    worker_cv: Condvar,
    /// Wakes submitters when the completion watermark advances.
    done_cv: Condvar,
}

pub struct TransactionQueue {
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionQueue {
    pub fn new() -> Self {
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                next_txn_id: 1,
                completed_txn_id: 0,
                failures: HashMap::new(),
                shutdown: false,
            }),
            worker_cv: Condvar::new(),
            done_cv: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("ibexdb-txn-worker".to_string())
            .spawn(move || worker_loop(worker_shared))
            .expect("failed to spawn transaction worker");

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Runs `f` on the worker thread, blocking until it completes.
    /// Returns `f`'s value, or rethrows its error (or captured panic) to
    /// this caller only.
    pub fn execute<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let slot: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let task_slot = Arc::clone(&slot);

        let task: Task = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(f));
            match outcome {
                Ok(Ok(value)) => {
                    *task_slot.lock() = Some(value);
                    None
                }
                Ok(Err(report)) => Some(report),
                Err(panic) => Some(eyre::eyre!("transaction panicked: {}", panic_message(&panic))),
            }
        });

        let txn_id;
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return Err(eyre::eyre!("transaction queue is shut down"));
            }
            txn_id = state.next_txn_id;
            state.next_txn_id += 1;
            state.queue.push_back((txn_id, task));
            self.shared.worker_cv.notify_one();
        }
        trace!(txn_id, "transaction enqueued");

        let mut state = self.shared.state.lock();
        while state.completed_txn_id < txn_id {
            self.shared.done_cv.wait(&mut state);
        }
        if let Some(report) = state.failures.remove(&txn_id) {
            return Err(report);
        }
        drop(state);

        let result = slot
            .lock()
            .take()
            .ok_or_else(|| eyre::eyre!("transaction {txn_id} completed without a result"));
        result
    }

    /// Drains pending work, stops the worker, and joins it. Subsequent
    /// `execute` calls fail. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.worker_cv.notify_one();
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Default for TransactionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransactionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<QueueShared>) {
    loop {
        let (txn_id, task) = {
            let mut state = shared.state.lock();
            loop {
                if let Some(entry) = state.queue.pop_front() {
                    break entry;
                }
                if state.shutdown {
                    return;
                }
                shared.worker_cv.wait(&mut state);
            }
        };

        trace!(txn_id, "transaction running");
        let failure = task();

        let mut state = shared.state.lock();
        if let Some(report) = failure {
            state.failures.insert(txn_id, report);
        }
        state.completed_txn_id = txn_id;
        shared.done_cv.notify_all();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{error_kind, not_found, ErrorKind};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[test]
    fn execute_returns_task_value() {
        let queue = TransactionQueue::new();
        let result = queue.execute(|| Ok(21 * 2)).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn tasks_run_in_enqueue_order() {
        let queue = Arc::new(TransactionQueue::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..8u64 {
            let queue = Arc::clone(&queue);
            let order = Arc::clone(&order);
            handles.push(std::thread::spawn(move || {
                queue
                    .execute(move || {
                        order.lock().push(i);
                        // Make overlap likely if serialization were broken.
                        std::thread::sleep(Duration::from_millis(2));
                        Ok(())
                    })
                    .unwrap();
            }));
            // Stagger submissions so enqueue order is deterministic.
            std::thread::sleep(Duration::from_millis(5));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn error_reaches_only_its_submitter() {
        let queue = TransactionQueue::new();

        let err = queue
            .execute::<(), _>(|| Err(not_found("missing row")))
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));

        // The queue keeps working and later callers are unaffected.
        assert_eq!(queue.execute(|| Ok(7)).unwrap(), 7);
    }

    #[test]
    fn panic_is_captured_and_rethrown_as_error() {
        let queue = TransactionQueue::new();

        let err = queue
            .execute::<(), _>(|| panic!("boom in transaction"))
            .unwrap_err();
        assert!(err.to_string().contains("boom in transaction"));

        assert_eq!(queue.execute(|| Ok(1)).unwrap(), 1);
    }

    #[test]
    fn shutdown_rejects_new_work() {
        let queue = TransactionQueue::new();
        queue.execute(|| Ok(())).unwrap();
        queue.shutdown();

        let err = queue.execute(|| Ok(())).unwrap_err();
        assert!(err.to_string().contains("shut down"));
    }

    #[test]
    fn shutdown_drains_queued_tasks() {
        let queue = Arc::new(TransactionQueue::new());
        let counter = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let queue = Arc::clone(&queue);
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                let _ = queue.execute(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        queue.shutdown();

        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let queue = TransactionQueue::new();
        queue.shutdown();
        queue.shutdown();
    }
}
