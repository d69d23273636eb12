//! Slot scheduler
//!
//! A fixed number of worker slots. `submit` blocks until a slot is free,
//! joins the thread that last ran in it and spawns the job on a new thread.
//! The free-slot mutex also serializes result persistence, so workers
//! write one at a time.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// State shared with the workers
struct SlotState {
    /// Ids of the slots with no running job
    free: Mutex<VecDeque<usize>>,

    /// Signalled whenever a slot is released
    slot_freed: Condvar,
}

impl SlotState {
    fn lock(&self) -> MutexGuard<'_, VecDeque<usize>> {
        // A job that panicked while persisting leaves the queue intact
        self.free.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handed to every job; releases the slot when dropped
pub struct SlotGuard {
    slot: usize,
    state: Arc<SlotState>,
}

impl SlotGuard {
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Run `f` while holding the scheduler lock
    pub fn persist<R>(&self, f: impl FnOnce() -> R) -> R {
        let _lock = self.state.lock();
        f()
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.state.lock().push_back(self.slot);
        self.state.slot_freed.notify_one();
    }
}

/// Fixed-size thread scheduler
pub struct SlotScheduler {
    state: Arc<SlotState>,
    threads: Vec<Option<JoinHandle<()>>>,
    panicked: usize,
}

impl SlotScheduler {
    /// Create a scheduler with `slots` workers (at least one)
    pub fn new(slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            state: Arc::new(SlotState {
                free: Mutex::new((0..slots).collect()),
                slot_freed: Condvar::new(),
            }),
            threads: (0..slots).map(|_| None).collect(),
            panicked: 0,
        }
    }

    pub fn slots(&self) -> usize {
        self.threads.len()
    }

    /// Number of jobs that panicked so far
    pub fn panicked(&self) -> usize {
        self.panicked
    }

    fn join_slot(&mut self, slot: usize) {
        if let Some(handle) = self.threads[slot].take() {
            if handle.join().is_err() {
                self.panicked += 1;
                error!(slot, "worker panicked");
            }
        }
    }

    /// Run `job` on the next free slot, blocking while every slot is busy
    pub fn submit<F>(&mut self, job: F)
    where
        F: FnOnce(&SlotGuard) + Send + 'static,
    {
        let slot = {
            let mut free = self.state.lock();
            loop {
                if let Some(slot) = free.pop_front() {
                    break slot;
                }
                free = self
                    .state
                    .slot_freed
                    .wait(free)
                    .unwrap_or_else(|e| e.into_inner());
            }
        };
        self.join_slot(slot);

        let guard = SlotGuard {
            slot,
            state: Arc::clone(&self.state),
        };
        debug!(slot, "job submitted");
        self.threads[slot] = Some(thread::spawn(move || job(&guard)));
    }

    /// Wait for every submitted job; returns the number that panicked
    pub fn drain(&mut self) -> usize {
        for slot in 0..self.threads.len() {
            self.join_slot(slot);
        }
        self.panicked
    }
}

impl Drop for SlotScheduler {
    fn drop(&mut self) {
        self.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_runs_every_job_within_slot_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let mut scheduler = SlotScheduler::new(3);
        for _ in 0..12 {
            let running = Arc::clone(&running);
            let max_running = Arc::clone(&max_running);
            let done = Arc::clone(&done);
            scheduler.submit(move |_| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(scheduler.drain(), 0);
        assert_eq!(done.load(Ordering::SeqCst), 12);
        assert!(max_running.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_panicking_job_frees_its_slot() {
        let mut scheduler = SlotScheduler::new(1);
        scheduler.submit(|_| panic!("job failed"));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        scheduler.submit(move |guard| {
            guard.persist(|| ran_clone.fetch_add(1, Ordering::SeqCst));
        });
        assert_eq!(scheduler.drain(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
