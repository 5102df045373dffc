//! MVCC Manager - lifecycle and visibility authority for write operations
//!
//! The manager owns the mutable side of MVCC: which hybrid times are
//! in flight, which have committed out of order, and the watermark below
//! which everything is committed. All of it lives behind one mutex; the
//! critical sections are short and never span a blocking call. Readers get
//! their consistent view by copying an `MvccSnapshot` out and evaluating it
//! entirely outside the lock.
//!
//! Operations move through a fixed state machine:
//!
//! ```text
//! start ──► IN_FLIGHT ──► APPLYING ──► committed (folded into watermark)
//!               │
//!               └──► aborted (forgotten)
//! ```
//!
//! Any other transition is a caller bug and panics: continuing past a
//! misordered transition would silently corrupt the watermark.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::mvcc::snapshot::MvccSnapshot;
use crate::time::{Clock, HybridTime};
use crate::{Result, TabletError};

// ============================================================================
// Operation State
// ============================================================================

/// State of an operation that has started but not yet reached a terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationState {
    /// Started; the mutation is not yet guaranteed to replicate. May still
    /// abort.
    InFlight,
    /// Guaranteed to eventually commit; the write is being applied to
    /// storage. Can no longer abort.
    Applying,
}

/// What a blocked thread is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitFor {
    /// Every operation at or before the target hybrid time has committed.
    AllCommitted,
    /// No operation at or before the target hybrid time is applying.
    NoneApplying,
}

// ============================================================================
// Manager
// ============================================================================

/// State guarded by the manager's mutex.
struct MvccState {
    /// The evolving "current" snapshot, copied out by `take_snapshot`.
    cur_snap: MvccSnapshot,
    /// Started-but-not-terminal operations: hybrid time → state.
    in_flight: BTreeMap<u64, OperationState>,
    /// No operation may start at or below this bound. Advanced on commit
    /// and by explicit safe-time adjustment during replay.
    no_new_operations_at_or_before: HybridTime,
    /// Threads currently blocked in a wait.
    waiter_count: usize,
}

/// Thread-safe MVCC core for a single tablet.
///
/// Writers drive operations through start / start-applying / commit (or
/// abort); readers take snapshots, possibly waiting until a snapshot is
/// clean at a target hybrid time. The clock is a shared collaborator: the
/// manager reads and ratchets it but never owns its policy.
pub struct MvccManager {
    clock: Arc<dyn Clock>,
    state: Mutex<MvccState>,
    waiters: Condvar,
    /// Total committed operations (for monitoring)
    committed_total: AtomicU64,
    /// Total aborted operations (for monitoring)
    aborted_total: AtomicU64,
}

impl MvccManager {
    /// Create a manager whose watermark starts at the clock's initial
    /// hybrid time.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        MvccManager {
            clock,
            state: Mutex::new(MvccState {
                cur_snap: MvccSnapshot::new(),
                in_flight: BTreeMap::new(),
                no_new_operations_at_or_before: HybridTime::MIN,
                waiter_count: 0,
            }),
            waiters: Condvar::new(),
            committed_total: AtomicU64::new(0),
            aborted_total: AtomicU64::new(0),
        }
    }

    /// The clock this manager stamps operations with.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ------------------------------------------------------------------
    // Starting operations
    // ------------------------------------------------------------------

    /// Start an operation at the current clock reading.
    ///
    /// Hybrid times handed out by successive calls are strictly increasing
    /// across all threads. The loop retries with a fresh reading on the
    /// rare race where another committer raised the lower bound past ours.
    pub fn start_operation(&self) -> HybridTime {
        loop {
            let now = self.clock.now();
            let mut state = self.state.lock();
            if Self::init_operation_unlocked(&mut state, now) {
                return now;
            }
        }
    }

    /// Start an operation at a hybrid time no other node in the cluster can
    /// currently produce (commit-wait style).
    ///
    /// The returned hybrid time may be ahead of the local clock; the caller
    /// must wait on the clock before treating the operation as externally
    /// committed.
    pub fn start_operation_at_latest(&self) -> HybridTime {
        let mut state = self.state.lock();
        let mut now_latest = self.clock.now_latest();
        while !Self::init_operation_unlocked(&mut state, now_latest) {
            now_latest = self.clock.now_latest();
        }
        debug_assert!(
            state
                .in_flight
                .keys()
                .next_back()
                .is_some_and(|&max| max == now_latest.value()),
            "commit-wait hybrid time {now_latest} is not the newest in-flight operation"
        );
        now_latest
    }

    /// Register a caller-supplied hybrid time as in flight, without
    /// consulting the clock. Used when replaying previously ordered
    /// operations during bootstrap.
    pub fn start_operation_at_hybrid_time(&self, ht: HybridTime) -> Result<()> {
        let mut state = self.state.lock();
        if state.cur_snap.is_committed(ht) {
            return Err(TabletError::IllegalState(format!(
                "hybrid time {} is already committed, current snapshot: {}",
                ht, state.cur_snap
            )));
        }
        if !Self::init_operation_unlocked(&mut state, ht) {
            return Err(TabletError::IllegalState(format!(
                "hybrid time {} is already in flight or at or below the \
                 new-operation bound {}",
                ht, state.no_new_operations_at_or_before
            )));
        }
        debug!("registered replayed operation at hybrid time {ht}");
        Ok(())
    }

    fn init_operation_unlocked(state: &mut MvccState, ht: HybridTime) -> bool {
        if ht <= state.no_new_operations_at_or_before {
            return false;
        }
        match state.in_flight.entry(ht.value()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(OperationState::InFlight);
                true
            }
        }
    }

    // ------------------------------------------------------------------
    // State transitions
    // ------------------------------------------------------------------

    /// Move `ht` from IN_FLIGHT to APPLYING.
    ///
    /// Panics unless `ht` is currently IN_FLIGHT.
    pub fn start_applying_operation(&self, ht: HybridTime) {
        let mut state = self.state.lock();
        match state.in_flight.get_mut(&ht.value()) {
            None => panic!("cannot mark hybrid time {ht} as applying: not in the in-flight set"),
            Some(op_state @ OperationState::InFlight) => *op_state = OperationState::Applying,
            Some(op_state) => {
                panic!("cannot mark hybrid time {ht} as applying: operation is {op_state:?}")
            }
        }
    }

    /// Commit `ht` and fold the watermark forward when it was the earliest
    /// in-flight operation.
    ///
    /// Panics unless `ht` is currently APPLYING.
    pub fn commit_operation(&self, ht: HybridTime) {
        let mut state = self.state.lock();
        let was_earliest = Self::commit_operation_unlocked(&mut state, ht, &*self.clock);

        // No operation can start at or below a committed hybrid time.
        state.no_new_operations_at_or_before = state.no_new_operations_at_or_before.max(ht);

        if was_earliest {
            Self::adjust_clean_time(&mut state);
        }
        self.committed_total.fetch_add(1, Ordering::Relaxed);
        self.waiters.notify_all();
    }

    /// Commit `ht` without folding the watermark. During replay the
    /// watermark is advanced separately, via `offline_adjust_safe_time`.
    pub fn offline_commit_operation(&self, ht: HybridTime) {
        let mut state = self.state.lock();
        let was_earliest = Self::commit_operation_unlocked(&mut state, ht, &*self.clock);

        // Only fold if a prior safe-time adjustment already covers this
        // hybrid time; otherwise the watermark stays put.
        if was_earliest && state.no_new_operations_at_or_before >= ht {
            Self::adjust_clean_time(&mut state);
        }
        self.committed_total.fetch_add(1, Ordering::Relaxed);
        self.waiters.notify_all();
    }

    /// Raise the new-operation bound to `safe_time` and fold the watermark.
    /// Replay-only: the caller asserts nothing will start at or below it.
    pub fn offline_adjust_safe_time(&self, safe_time: HybridTime) {
        let mut state = self.state.lock();
        debug!("adjusting safe time to hybrid time {safe_time}");
        state.no_new_operations_at_or_before =
            state.no_new_operations_at_or_before.max(safe_time);
        Self::adjust_clean_time(&mut state);
        self.waiters.notify_all();
    }

    /// Abort `ht`, forgetting it without any effect on committed state.
    ///
    /// Panics unless `ht` is currently IN_FLIGHT; an APPLYING operation is
    /// guaranteed to commit and can no longer abort.
    pub fn abort_operation(&self, ht: HybridTime) {
        let mut state = self.state.lock();
        let op_state = Self::remove_in_flight_unlocked(&mut state, ht);
        assert!(
            op_state == OperationState::InFlight,
            "cannot abort hybrid time {ht}: operation is {op_state:?}"
        );
        self.aborted_total.fetch_add(1, Ordering::Relaxed);
        self.waiters.notify_all();
    }

    /// Returns whether `ht` was the earliest in-flight operation.
    fn commit_operation_unlocked(
        state: &mut MvccState,
        ht: HybridTime,
        clock: &dyn Clock,
    ) -> bool {
        debug_assert!(
            clock.is_after(ht),
            "committing hybrid time {ht} which is ahead of the clock"
        );
        let was_earliest = state
            .in_flight
            .first_key_value()
            .is_some_and(|(&earliest, _)| earliest == ht.value());

        let op_state = Self::remove_in_flight_unlocked(state, ht);
        assert!(
            op_state == OperationState::Applying,
            "cannot commit hybrid time {ht}: operation never entered the applying state"
        );
        state.cur_snap.add_committed(ht);
        was_earliest
    }

    fn remove_in_flight_unlocked(state: &mut MvccState, ht: HybridTime) -> OperationState {
        match state.in_flight.remove(&ht.value()) {
            Some(op_state) => op_state,
            None => panic!("hybrid time {ht} is not in the in-flight set"),
        }
    }

    /// Fold the watermark forward as far as current state allows and drop
    /// the committed entries it absorbs.
    ///
    /// With operations still in flight the watermark stops at the earliest
    /// one; otherwise everything up to the new-operation bound is settled
    /// and the watermark moves just past it.
    fn adjust_clean_time(state: &mut MvccState) {
        let earliest_in_flight = state
            .in_flight
            .keys()
            .next()
            .map(|&ts| HybridTime::new(ts))
            .unwrap_or(HybridTime::MAX);

        let watermark = if earliest_in_flight <= state.no_new_operations_at_or_before {
            earliest_in_flight
        } else {
            state.no_new_operations_at_or_before.incremented()
        };
        state.cur_snap.all_committed_before = watermark;
        state.cur_snap.trim_committed_below(watermark);
    }

    // ------------------------------------------------------------------
    // Snapshots and waits
    // ------------------------------------------------------------------

    /// Copy out the current snapshot. Never blocks.
    pub fn take_snapshot(&self) -> MvccSnapshot {
        self.state.lock().cur_snap.clone()
    }

    /// Block until every operation below `ht` has committed, then return
    /// the clean snapshot at `ht`.
    ///
    /// When `ht` is still ahead of the clock this first waits for the clock
    /// to pass it, so no later call can start an operation below `ht`.
    /// Returns `TimedOut` if the deadline expires first.
    pub fn wait_for_clean_snapshot_at_hybrid_time(
        &self,
        ht: HybridTime,
        deadline: Option<Instant>,
    ) -> Result<MvccSnapshot> {
        if !self.clock.is_after(ht) {
            self.clock.wait_until_after(ht, deadline)?;
        }
        self.wait_until(WaitFor::AllCommitted, ht, deadline)?;
        Ok(MvccSnapshot::clean_at(ht))
    }

    /// Block until every operation that is APPLYING right now has
    /// committed. Operations that are merely in flight, aborted, or started
    /// after this call are ignored. Returns immediately when nothing is
    /// applying.
    pub fn wait_for_applying_operations_to_commit(&self) {
        let newest_applying = {
            let state = self.state.lock();
            state
                .in_flight
                .iter()
                .filter(|(_, &op_state)| op_state == OperationState::Applying)
                .map(|(&ts, _)| ts)
                .next_back()
        };
        let Some(ts) = newest_applying else {
            return;
        };
        self.wait_until(WaitFor::NoneApplying, HybridTime::new(ts), None)
            .expect("wait without a deadline cannot time out");
    }

    /// The greatest hybrid time a reader can take a complete, non-blocking
    /// snapshot at.
    ///
    /// While operations are in flight this is the watermark's predecessor;
    /// with nothing in flight it degrades to the current clock reading, so
    /// repeated calls keep advancing even without new writes.
    pub fn max_safe_time_to_read_at(&self) -> HybridTime {
        let state = self.state.lock();
        if state.in_flight.is_empty() {
            return self.clock.now();
        }
        state.cur_snap.all_committed_before.decremented()
    }

    /// True when no operation at or before `ht` is still in flight or
    /// applying. Distinct from "`ht` is committed": `ht` itself may be an
    /// uncommitted hole while an earlier bound is satisfied.
    pub fn are_all_operations_committed(&self, ht: HybridTime) -> bool {
        let state = self.state.lock();
        self.are_all_committed_unlocked(&state, ht)
    }

    fn are_all_committed_unlocked(&self, state: &MvccState, ht: HybridTime) -> bool {
        if state.in_flight.is_empty() {
            // Nothing in flight: once the clock passes `ht`, no new
            // operation can ever start at or below it.
            return ht <= self.clock.now();
        }
        !state
            .cur_snap
            .may_have_uncommitted_operations_at_or_before(ht)
    }

    fn any_applying_at_or_before(state: &MvccState, ht: HybridTime) -> bool {
        state
            .in_flight
            .iter()
            .any(|(&ts, &op_state)| op_state == OperationState::Applying && ts <= ht.value())
    }

    fn is_done_waiting(&self, state: &MvccState, wait_for: WaitFor, ht: HybridTime) -> bool {
        match wait_for {
            WaitFor::AllCommitted => self.are_all_committed_unlocked(state, ht),
            WaitFor::NoneApplying => !Self::any_applying_at_or_before(state, ht),
        }
    }

    fn wait_until(
        &self,
        wait_for: WaitFor,
        ht: HybridTime,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if self.is_done_waiting(&state, wait_for, ht) {
            return Ok(());
        }
        state.waiter_count += 1;
        loop {
            let timed_out = match deadline {
                Some(deadline) => self.waiters.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.waiters.wait(&mut state);
                    false
                }
            };
            if self.is_done_waiting(&state, wait_for, ht) {
                state.waiter_count -= 1;
                return Ok(());
            }
            if timed_out {
                state.waiter_count -= 1;
                return Err(TabletError::TimedOut(ht));
            }
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Number of operations that have started but not committed or aborted.
    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Number of threads currently blocked in a wait.
    pub fn num_waiters(&self) -> usize {
        self.state.lock().waiter_count
    }

    /// Total operations committed over the manager's lifetime.
    pub fn committed_total(&self) -> u64 {
        self.committed_total.load(Ordering::Relaxed)
    }

    /// Total operations aborted over the manager's lifetime.
    pub fn aborted_total(&self) -> u64 {
        self.aborted_total.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Tests
// ============================================================================
