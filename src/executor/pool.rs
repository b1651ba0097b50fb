//! Worker pool: an arena of reusable execution slots ("virtual users").
//!
//! Slots live in a table indexed by [`WorkerId`] behind a single mutex, which
//! is the only state the dispatcher (acquiring) and the request tasks
//! (releasing) share. A [`Worker`] lease is move-only, so a slot can only be
//! handed back once per acquisition.

use std::{collections::VecDeque, fmt};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Index of a slot in the pool table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    /// Running the request for the given tick.
    Busy { tick: u64 },
}

/// A worker bound to one tick, handed out by [`WorkerPool::acquire`].
#[derive(Debug, PartialEq, Eq)]
pub struct Worker {
    id: WorkerId,
    tick: u64,
}

impl Worker {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Workers created so far.
    pub total: usize,
    pub busy: usize,
    pub idle: usize,
    /// Highest number of simultaneously busy workers.
    pub peak_busy: usize,
}

#[derive(Debug)]
struct Slots {
    states: Vec<WorkerState>,
    idle: VecDeque<usize>,
    busy: usize,
    peak_busy: usize,
    torn_down: bool,
}

#[derive(Debug)]
pub struct WorkerPool {
    slots: Mutex<Slots>,
    max: Option<usize>,
    released: Notify,
}

impl WorkerPool {
    /// Build the pool with `pre_allocated` idle workers ready to go.
    ///
    /// `max` bounds lazy growth; `None` lets the pool grow as needed.
    pub fn new(pre_allocated: usize, max: Option<usize>) -> Self {
        let states = vec![WorkerState::Idle; pre_allocated];
        let idle = (0..pre_allocated).collect();
        tracing::debug!(pre_allocated, ?max, "Worker pool ready");
        Self {
            slots: Mutex::new(Slots {
                states,
                idle,
                busy: 0,
                peak_busy: 0,
                torn_down: false,
            }),
            max,
            released: Notify::new(),
        }
    }

    pub fn max(&self) -> Option<usize> {
        self.max
    }

    /// Take an idle worker for `tick`, growing the pool if allowed.
    ///
    /// Never waits: returns `None` when every worker is busy and the pool is
    /// at its maximum size (or has been torn down).
    pub fn acquire(&self, tick: u64) -> Option<Worker> {
        let mut slots = self.slots.lock();
        if slots.torn_down {
            return None;
        }

        let idx = match slots.idle.pop_front() {
            Some(idx) => idx,
            None => {
                let total = slots.states.len();
                if self.max.is_some_and(|max| total >= max) {
                    return None;
                }
                slots.states.push(WorkerState::Idle);
                tracing::debug!(worker = total, "Worker pool grew");
                total
            }
        };

        debug_assert_eq!(slots.states[idx], WorkerState::Idle);
        slots.states[idx] = WorkerState::Busy { tick };
        slots.busy += 1;
        slots.peak_busy = slots.peak_busy.max(slots.busy);

        Some(Worker {
            id: WorkerId(idx),
            tick,
        })
    }

    /// Return a worker to the idle set and wake one waiting dispatcher.
    pub fn release(&self, worker: Worker) {
        {
            let mut slots = self.slots.lock();
            let idx = worker.id.0;
            debug_assert_eq!(
                slots.states.get(idx),
                Some(&WorkerState::Busy { tick: worker.tick })
            );
            slots.states[idx] = WorkerState::Idle;
            slots.busy -= 1;
            if !slots.torn_down {
                slots.idle.push_back(idx);
            }
        }
        self.released.notify_one();
    }

    /// Resolves after some worker has been released.
    ///
    /// A release that happened while nobody was waiting is remembered, so
    /// callers must re-check with [`acquire`](Self::acquire).
    pub async fn released(&self) {
        self.released.notified().await;
    }

    pub fn state(&self, id: WorkerId) -> Option<WorkerState> {
        self.slots.lock().states.get(id.0).copied()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let slots = self.slots.lock();
        PoolSnapshot {
            total: slots.states.len(),
            busy: slots.busy,
            idle: slots.states.len() - slots.busy,
            peak_busy: slots.peak_busy,
        }
    }

    /// Destroy every worker. Later acquisitions fail.
    ///
    /// Returns the final snapshot taken just before the table was cleared.
    pub fn teardown(&self) -> PoolSnapshot {
        let snapshot = self.snapshot();
        let mut slots = self.slots.lock();
        if slots.busy > 0 {
            tracing::warn!(busy = slots.busy, "Tearing down pool with busy workers");
        }
        slots.torn_down = true;
        slots.idle.clear();
        tracing::debug!(workers = slots.states.len(), "Worker pool torn down");
        snapshot
    }
}
