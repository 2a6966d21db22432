//! Bounded background delivery
//!
//! A dedicated thread hosts a tokio runtime that pulls envelopes off a queue
//! and delivers at most `threads` of them concurrently.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, warn};

use crate::envelope::Envelope;

use super::{DiscardCounter, DiscardReason};

/// Delivers one envelope. Must account for its own failures.
pub type DeliverFn = Arc<dyn Fn(Envelope) -> BoxFuture<'static, ()> + Send + Sync>;

enum Task {
    Deliver(Envelope),
    Flush(std_mpsc::SyncSender<()>),
}

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    /// Queued `Deliver` tasks
    deliveries: usize,
    closed: bool,
}

impl QueueState {
    fn push(&mut self, task: Task) {
        if matches!(task, Task::Deliver(_)) {
            self.deliveries += 1;
        }
        self.tasks.push_back(task);
    }

    fn pop(&mut self) -> Option<Task> {
        let task = self.tasks.pop_front()?;
        if matches!(task, Task::Deliver(_)) {
            self.deliveries -= 1;
        }
        Some(task)
    }
}

/// Queue shared by the caller side and the worker thread. Every envelope is
/// popped exactly once, either by the worker or by a discard.
#[derive(Default)]
struct Queue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Queue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Removes every queued envelope and counts it under `reason`.
    fn discard_all(&self, discards: &DiscardCounter, reason: DiscardReason) -> usize {
        let tasks: Vec<Task> = {
            let mut state = self.lock();
            state.deliveries = 0;
            state.tasks.drain(..).collect()
        };

        let mut discarded = 0;
        for task in tasks {
            // Dropping a Flush task wakes its waiter with a disconnect
            if let Task::Deliver(envelope) = task {
                discards.record(reason, envelope.category());
                discarded += 1;
            }
        }
        discarded
    }
}

pub struct BackgroundWorker {
    queue: Arc<Queue>,
    max_queue: usize,
    cancelled: Arc<AtomicBool>,
    discards: Arc<DiscardCounter>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundWorker {
    pub fn spawn(
        threads: usize,
        max_queue: usize,
        discards: Arc<DiscardCounter>,
        deliver: DeliverFn,
    ) -> Self {
        let threads = threads.max(1);
        let queue = Arc::new(Queue::default());
        let cancelled = Arc::new(AtomicBool::new(false));

        let state = WorkerState {
            threads,
            queue: queue.clone(),
            cancelled: cancelled.clone(),
            discards: discards.clone(),
            deliver,
        };

        let handle = thread::Builder::new()
            .name("temps-reporter-transport".to_string())
            .spawn(move || state.run())
            .map_err(|e| error!("Failed to spawn transport thread: {}", e))
            .ok();
        if handle.is_none() {
            queue.lock().closed = true;
        }

        debug!(
            "Background worker started with {} concurrent deliveries, queue size {}",
            threads, max_queue
        );

        Self {
            queue,
            max_queue,
            cancelled,
            discards,
            handle: Mutex::new(handle),
        }
    }

    /// Queues an envelope. Returns `false` if it was discarded instead.
    pub fn enqueue(&self, envelope: Envelope) -> bool {
        let category = envelope.category();
        {
            let mut state = self.queue.lock();
            if state.closed {
                drop(state);
                debug!("Transport is shut down, discarding {}", category);
                self.discards.record(DiscardReason::Shutdown, category);
                return false;
            }
            if state.deliveries >= self.max_queue {
                drop(state);
                warn!("Transport queue is full, discarding {}", category);
                self.discards.record(DiscardReason::QueueOverflow, category);
                return false;
            }
            state.push(Task::Deliver(envelope));
        }
        self.queue.notify.notify_one();
        true
    }

    /// Number of envelopes waiting for a delivery slot
    pub fn queued(&self) -> usize {
        self.queue.lock().deliveries
    }

    pub fn flush(&self, timeout: Duration) -> bool {
        let (done_tx, done_rx) = std_mpsc::sync_channel(1);
        {
            let mut state = self.queue.lock();
            if state.closed {
                return state.deliveries == 0;
            }
            state.push(Task::Flush(done_tx));
        }
        self.queue.notify.notify_one();
        done_rx.recv_timeout(timeout).is_ok()
    }

    /// Counts everything still queued as `shutdown` and drops it. Returns
    /// the number of envelopes discarded.
    pub fn discard_pending(&self) -> usize {
        self.queue.discard_all(&self.discards, DiscardReason::Shutdown)
    }

    /// Drains the queue within `timeout`. Whatever is still queued after
    /// that is counted as `shutdown` before this returns; in-flight requests
    /// are left to finish.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let drained = self.flush(timeout);
        if !drained {
            self.cancelled.store(true, Ordering::SeqCst);
        }

        self.queue.lock().closed = true;
        let discarded = self.discard_pending();
        self.queue.notify.notify_one();
        if discarded > 0 {
            warn!(
                "Transport did not drain within {:?}, discarded {} queued envelopes",
                timeout, discarded
            );
        }

        if drained {
            if let Some(handle) = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
                if handle.join().is_err() {
                    error!("Transport thread panicked");
                }
            }
        }
        drained && discarded == 0
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        // The thread keeps draining whatever is queued and exits on its own
        self.queue.lock().closed = true;
        self.queue.notify.notify_one();
    }
}

struct WorkerState {
    threads: usize,
    queue: Arc<Queue>,
    cancelled: Arc<AtomicBool>,
    discards: Arc<DiscardCounter>,
    deliver: DeliverFn,
}

impl WorkerState {
    fn run(self) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.threads)
            .thread_name("temps-reporter-delivery")
            .enable_all()
            .build();

        match runtime {
            Ok(runtime) => runtime.block_on(self.process()),
            Err(e) => {
                error!("Failed to start delivery runtime: {}", e);
                self.queue.lock().closed = true;
                self.queue.discard_all(&self.discards, DiscardReason::SendError);
            }
        }
    }

    async fn process(self) {
        let permits = Arc::new(Semaphore::new(self.threads));

        loop {
            // A slot is reserved before taking a task, so queued envelopes
            // stay visible to discards while all slots are busy
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let Some(task) = self.next_task().await else {
                break;
            };

            match task {
                Task::Deliver(envelope) => {
                    if self.cancelled.load(Ordering::SeqCst) {
                        self.discards.record(DiscardReason::Shutdown, envelope.category());
                        continue;
                    }
                    let delivery = (self.deliver)(envelope);
                    tokio::spawn(async move {
                        delivery.await;
                        drop(permit);
                    });
                }
                Task::Flush(done) => {
                    drop(permit);
                    // Holding every permit means nothing is in flight
                    if let Ok(all) = permits.acquire_many(self.threads as u32).await {
                        drop(all);
                    }
                    let _ = done.try_send(());
                }
            }
        }

        let _ = permits.acquire_many(self.threads as u32).await;
        debug!("Background worker stopped");
    }

    /// Next queued task, `None` once the queue is closed and empty.
    async fn next_task(&self) -> Option<Task> {
        loop {
            {
                let mut state = self.queue.lock();
                if let Some(task) = state.pop() {
                    return Some(task);
                }
                if state.closed {
                    return None;
                }
            }
            self.queue.notify.notified().await;
        }
    }
}
