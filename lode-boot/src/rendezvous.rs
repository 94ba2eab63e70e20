//! Multi-core rendezvous barrier
//!
//! One-shot barrier between the primary core and the secondaries it
//! started:
//!
//! 1. The primary publishes the participant count and sets `go` once the
//!    address space is built.
//! 2. Each core waits for `go`, takes the arrival lock, marks its readiness
//!    slot and drops the lock.
//! 3. Each core spins, without the lock, until every slot is set.
//!
//! There is no timeout. A core that never arrives holds every other core in
//! step 3 forever.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::mutex::SpinMutex;

/// Rendezvous state for up to `N` cores.
pub struct Rendezvous<const N: usize> {
    go: AtomicBool,
    cores: AtomicUsize,
    /// Serialises slot writes; holds the number of arrivals
    arrivals: SpinMutex<usize>,
    ready: [AtomicBool; N],
}

impl<const N: usize> Rendezvous<N> {
    pub const fn new() -> Self {
        Self {
            go: AtomicBool::new(false),
            cores: AtomicUsize::new(1),
            arrivals: SpinMutex::new(0),
            ready: [const { AtomicBool::new(false) }; N],
        }
    }

    /// Capacity of the readiness array.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Open the barrier for `cores` participants.
    ///
    /// Called once by the primary after the tables are complete. `cores` is
    /// clamped to `1..=N`.
    pub fn release(&self, cores: usize) {
        self.cores.store(cores.clamp(1, N), Ordering::Relaxed);
        self.go.store(true, Ordering::Release);
    }

    /// Check whether the primary has opened the barrier.
    pub fn is_released(&self) -> bool {
        self.go.load(Ordering::Acquire)
    }

    /// Number of participating cores. Meaningful once released.
    pub fn cores(&self) -> usize {
        self.cores.load(Ordering::Relaxed)
    }

    /// Spin until the primary opens the barrier.
    pub fn wait_for_go(&self, mut hint: impl FnMut()) {
        while !self.is_released() {
            hint();
        }
    }

    /// Mark core `logical_id` as arrived.
    ///
    /// Returns the number of cores arrived so far, this one included.
    pub fn arrive(&self, logical_id: usize) -> usize {
        let mut arrivals = self.arrivals.lock();
        if let Some(slot) = self.ready.get(logical_id) {
            if !slot.swap(true, Ordering::Release) {
                *arrivals += 1;
            }
        }
        *arrivals
    }

    /// Check whether core `logical_id` has arrived.
    pub fn is_ready(&self, logical_id: usize) -> bool {
        self.ready
            .get(logical_id)
            .is_some_and(|slot| slot.load(Ordering::Acquire))
    }

    /// Check whether every participant has arrived.
    pub fn all_ready(&self) -> bool {
        (0..self.cores()).all(|id| self.is_ready(id))
    }

    /// Number of participants that have arrived.
    pub fn ready_count(&self) -> usize {
        (0..self.cores()).filter(|&id| self.is_ready(id)).count()
    }

    /// Spin until every participant has arrived.
    pub fn wait_all(&self, mut hint: impl FnMut()) {
        while !self.all_ready() {
            hint();
        }
    }

    /// Run the whole barrier for core `logical_id`.
    ///
    /// With a single participant this returns as soon as `go` is seen.
    pub fn enter(&self, logical_id: usize, mut hint: impl FnMut()) {
        self.wait_for_go(&mut hint);
        if self.cores() == 1 {
            self.arrive(logical_id);
            return;
        }
        let arrived = self.arrive(logical_id);
        log::debug!("rendezvous: core {} arrived ({}/{})", logical_id, arrived, self.cores());
        self.wait_all(&mut hint);
    }
}

impl<const N: usize> Default for Rendezvous<N> {
    fn default() -> Self {
        Self::new()
    }
}
