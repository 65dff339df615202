//! Priority-ordered worker slots.
//!
//! A fixed number of slots (semaphore permits) is handed out to waiting
//! computations in priority order, FIFO among equal priorities. A
//! computation gives its slot back while it waits on sub-requests and
//! queues again to resume.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};

use crate::rules::Priority;

struct Pending {
    priority: Priority,
    sequence: u64,
    grant: oneshot::Sender<OwnedSemaphorePermit>,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Hands out worker slots in priority order.
pub(crate) struct Scheduler {
    permits: Arc<Semaphore>,
    queue: Mutex<BinaryHeap<Pending>>,
    sequence: AtomicU64,
}

impl Scheduler {
    pub fn new(workers: usize) -> Arc<Self> {
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            queue: Mutex::new(BinaryHeap::new()),
            sequence: AtomicU64::new(0),
        })
    }

    /// Wait for a worker slot.
    pub async fn acquire(self: &Arc<Self>, priority: Priority) -> WorkerPermit {
        loop {
            let (grant, granted) = oneshot::channel();
            let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
            self.queue.lock().push(Pending {
                priority,
                sequence,
                grant,
            });
            self.dispatch();

            if let Ok(permit) = granted.await {
                return WorkerPermit {
                    permit: Some(permit),
                    scheduler: Arc::clone(self),
                };
            }
        }
    }

    /// Number of computations waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Hand free slots to the head of the queue.
    fn dispatch(&self) {
        let mut queue = self.queue.lock();
        while !queue.is_empty() {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };
            let Some(pending) = queue.pop() else {
                break;
            };
            // A dropped receiver hands the permit straight back.
            let _ = pending.grant.send(permit);
        }
    }
}

/// An occupied worker slot. Dropping it admits the next queued computation.
pub(crate) struct WorkerPermit {
    permit: Option<OwnedSemaphorePermit>,
    scheduler: Arc<Scheduler>,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.scheduler.dispatch();
    }
}

struct SlotState {
    permit: Option<WorkerPermit>,
    outstanding: usize,
}

/// The slot of one running computation.
///
/// Tracks outstanding sub-requests: the slot is released when the first
/// one starts and reacquired when the last one finishes.
pub(crate) struct WorkerSlot {
    scheduler: Arc<Scheduler>,
    priority: Priority,
    state: tokio::sync::Mutex<SlotState>,
}

impl WorkerSlot {
    pub fn new(scheduler: Arc<Scheduler>, priority: Priority) -> Self {
        Self {
            scheduler,
            priority,
            state: tokio::sync::Mutex::new(SlotState {
                permit: None,
                outstanding: 0,
            }),
        }
    }

    /// Take a slot before running.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.permit.is_none() {
            state.permit = Some(self.scheduler.acquire(self.priority).await);
        }
    }

    /// A sub-request is about to wait.
    pub async fn suspend(&self) {
        let mut state = self.state.lock().await;
        state.outstanding += 1;
        if state.outstanding == 1 {
            state.permit = None;
        }
    }

    /// A sub-request finished waiting.
    pub async fn resume(&self) {
        let mut state = self.state.lock().await;
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 && state.permit.is_none() {
            state.permit = Some(self.scheduler.acquire(self.priority).await);
        }
    }

    /// Give the slot back for good.
    pub async fn release(&self) {
        let mut state = self.state.lock().await;
        state.permit = None;
    }
}
