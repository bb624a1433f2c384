//! Barriers used to coordinate the worker pool between rounds: a
//! sense-reversing round barrier that lets every worker see a consistent
//! snapshot of the fact store before the next round starts, and a
//! termination check built on a shared idle counter.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};

/// A reusable barrier for `n` parties. The last party to arrive at a round
/// ("the leader") flips the barrier's sense and wakes every follower; this
/// avoids the classic two-barrier reset race since no party ever waits on
/// the same sense value twice.
pub struct RoundBarrier {
    num_parties: usize,
    state: Mutex<BarrierState>,
    condvar: Condvar,
}

struct BarrierState {
    arrived: usize,
    sense: bool,
}

impl RoundBarrier {
    pub fn new(num_parties: usize) -> Self {
        RoundBarrier {
            num_parties,
            state: Mutex::new(BarrierState { arrived: 0, sense: false }),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until every party has called `wait` for the current round.
    /// Returns `true` to exactly one caller per round (the leader), which a
    /// caller can use to run once-per-round bookkeeping (e.g. draining the
    /// GC candidate set) before the others proceed.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        let my_sense = state.sense;
        state.arrived += 1;
        if state.arrived == self.num_parties {
            state.arrived = 0;
            state.sense = !my_sense;
            self.condvar.notify_all();
            true
        } else {
            while state.sense == my_sense {
                self.condvar.wait(&mut state);
            }
            false
        }
    }
}

/// Tracks whether every worker is simultaneously idle with no pending
/// deliveries, so the scheduler can decide to stop instead of busy-waiting
/// forever once a fixpoint is reached.
pub struct TerminationBarrier {
    idle_count: CachePadded<AtomicUsize>,
    num_workers: usize,
}

impl TerminationBarrier {
    pub fn new(num_workers: usize) -> Self {
        TerminationBarrier { idle_count: CachePadded::new(AtomicUsize::new(0)), num_workers }
    }

    /// Called by a worker that found no work on this attempt. Returns `true`
    /// if this observation means every worker is currently idle (a
    /// necessary, not sufficient, condition for termination — a caller
    /// still has to recheck after any delivery that could have broken it).
    pub fn mark_idle(&self) -> bool {
        self.idle_count.fetch_add(1, Ordering::AcqRel) + 1 == self.num_workers
    }

    /// Called by a worker that found work (or delivered work to another
    /// worker), invalidating any in-progress termination observation.
    pub fn mark_active(&self) {
        self.idle_count.store(0, Ordering::Release);
    }

    pub fn all_idle(&self) -> bool {
        self.idle_count.load(Ordering::Acquire) == self.num_workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn round_barrier_releases_all_parties_and_names_one_leader() {
        let barrier = Arc::new(RoundBarrier::new(4));
        let leaders: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let leaders = Arc::clone(&leaders);
                thread::spawn(move || {
                    if barrier.wait() {
                        *leaders.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*leaders.lock(), 1);
    }

    #[test]
    fn round_barrier_is_reusable_across_rounds() {
        let barrier = Arc::new(RoundBarrier::new(2));
        for _ in 0..3 {
            let b1 = Arc::clone(&barrier);
            let h = thread::spawn(move || b1.wait());
            let leader_here = barrier.wait();
            let leader_there = h.join().unwrap();
            assert_ne!(leader_here, leader_there);
        }
    }

    #[test]
    fn termination_barrier_flags_all_idle_and_resets_on_activity() {
        let term = TerminationBarrier::new(2);
        assert!(!term.mark_idle());
        assert!(term.mark_idle());
        assert!(term.all_idle());

        term.mark_active();
        assert!(!term.all_idle());
    }
}
