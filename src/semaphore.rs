//! Counting semaphore (§4.9).
//!
//! Grounded on `original_source/rtos/kernel/semaphore.h` for the contract
//! (`count`/`max_count`, `SEMAPHORE_BUSY`/`SEMAPHORE_DELETED`, the
//! `interrupt_lock`/`interrupt_unlock`/`interrupt_data` hooks for
//! ISR-usable semaphores) and on `rtos/os/semaphore.c` for the simpler,
//! common case's actual obtain/release shape (disable interrupts, check
//! count, maybe suspend). Built directly on [`crate::condition::Condition`]
//! rather than re-deriving a wait queue, the way the teacher's
//! `semaphore.rs` is a thin wrapper over its own `wait::WaitQueue`.
use core::cell::Cell;

use crate::condition::{self, Condition, SuspendList};
use crate::error::Status;
use crate::intr_lock::{self, IntLck, IntrLockCell, IntrLockGuard};
use crate::kassert;
use crate::list::List;

/// A counting semaphore with a configurable maximum count.
///
/// In the default mode, `obtain`/`release` rely on the kernel interrupt
/// lock for mutual exclusion, exactly like every other [`Condition`] in this
/// crate, and must only ever be called from task context. Constructing with
/// [`Semaphore::new_interrupt_protected`] additionally guards the count with
/// its own [`IntLck`] spinlock, making [`Semaphore::try_obtain`] and
/// [`Semaphore::release`] safe to call from an ISR too — mirroring the
/// original's `interrupt_protected` flag and its `INTLCK`-based
/// `SEM_INT_LOCK`/`SEM_INT_UNLOCK` pair.
pub struct Semaphore {
    count: Cell<u32>,
    max_count: u32,
    suspend_list: IntrLockCell<SuspendList>,
    /// `Some` only for an interrupt-protected semaphore: an additional lock
    /// over `count`, independent of whether the kernel interrupt lock is
    /// already held by the calling ISR.
    interrupt_lock: Option<IntLck>,
}

// Safety: `count` is only ever touched while holding either the kernel
// interrupt lock (via `try_consume`/`release`) or, for an interrupt-protected
// instance, `interrupt_lock`, both of which serialize access on this
// single-core target regardless of which task or ISR observes it.
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Creates a semaphore starting at `initial_count`, saturating at
    /// `max_count`. Usable only from task context.
    pub const fn new(initial_count: u32, max_count: u32) -> Self {
        Self {
            count: Cell::new(initial_count),
            max_count,
            suspend_list: IntrLockCell::new(List::new()),
            interrupt_lock: None,
        }
    }

    /// Creates an interrupt-protected semaphore: [`Self::try_obtain`] and
    /// [`Self::release`] may additionally be called from an ISR.
    pub const fn new_interrupt_protected(initial_count: u32, max_count: u32) -> Self {
        Self {
            count: Cell::new(initial_count),
            max_count,
            suspend_list: IntrLockCell::new(List::new()),
            interrupt_lock: Some(IntLck::new()),
        }
    }

    /// Consumes one unit of count if available. Called with either the
    /// kernel interrupt lock (plain mode) or `interrupt_lock` (protected
    /// mode) already held.
    fn try_take_locked(&self) -> bool {
        let count = self.count.get();
        if count > 0 {
            self.count.set(count - 1);
            true
        } else {
            false
        }
    }

    /// Blocks the current task until a unit is available or, with the
    /// `sleep` feature, `timeout_ticks` elapses. `None` waits indefinitely. A
    /// timeout of zero ticks is a non-blocking attempt, returning
    /// [`Status::Busy`] immediately instead of parking for even one tick.
    /// Task context only — see [`Self::try_obtain`] for the ISR-safe variant.
    pub fn obtain(&self, #[cfg(feature = "sleep")] timeout_ticks: Option<u32>) -> Status {
        #[cfg(feature = "sleep")]
        if timeout_ticks == Some(0) {
            return self.try_obtain();
        }
        condition::suspend_on(self, #[cfg(feature = "sleep")] timeout_ticks)
    }

    /// Attempts to obtain the semaphore without blocking. Returns
    /// [`Status::Busy`] if count is currently zero. Safe to call from an ISR
    /// only if this semaphore was created with
    /// [`Self::new_interrupt_protected`] — mirrors the original's rule that
    /// a non-zero-timeout `obtain` from an ISR asserts, by only ever
    /// offering the zero-timeout path to interrupt context.
    pub fn try_obtain(&self) -> Status {
        let mut guard = intr_lock::lock();
        if self.try_consume(&mut guard) {
            Status::Success
        } else {
            Status::Busy
        }
    }

    /// Releases one unit, capped at `max_count`, or hands it directly to the
    /// highest-priority waiting task if any. Over-release (releasing past
    /// `max_count` with nobody waiting) is a logic error and asserts in
    /// debug, matching the original's count invariant.
    pub fn release(&self) {
        if condition::resume_one(self, Status::Success) {
            return;
        }
        let _guard = intr_lock::lock();
        self.release_locked();
    }

    /// Increments count under whichever lock guards it, separately from the
    /// kernel interrupt lock for an interrupt-protected instance.
    fn release_locked(&self) {
        let do_increment = || {
            let count = self.count.get();
            debug_assert!(count < self.max_count, "semaphore released past max_count");
            self.count.set((count + 1).min(self.max_count));
        };
        match &self.interrupt_lock {
            Some(lock) => {
                kassert!(lock.try_acquire(), "semaphore interrupt lock is already held");
                do_increment();
                lock.release();
            }
            None => do_increment(),
        }
    }

    /// The current count, for diagnostics — not meant to be polled as part
    /// of normal control flow, since it can change the instant it's read.
    pub fn count(&self) -> u32 {
        let _guard = intr_lock::lock();
        self.count.get()
    }

    /// Tears down this semaphore: every task currently blocked in
    /// [`Self::obtain`] is woken immediately with [`Status::Deleted`] rather
    /// than waiting out its timeout (or forever). Mirrors
    /// `semaphore_destroy`/`SEMAPHORE_DELETED` in the original kernel.
    ///
    /// Does not otherwise reset `count`: a destroyed semaphore is expected to
    /// be dropped or reinitialized by the caller, not reused.
    pub fn destroy(&self) {
        condition::resume_all(self, Status::Deleted);
    }
}

impl Condition for Semaphore {
    fn try_consume(&self, _guard: &mut IntrLockGuard) -> bool {
        match &self.interrupt_lock {
            Some(lock) => {
                kassert!(lock.try_acquire(), "semaphore interrupt lock is already held");
                let took = self.try_take_locked();
                lock.release();
                took
            }
            None => self.try_take_locked(),
        }
    }

    fn suspend_list(&self) -> &IntrLockCell<SuspendList> {
        &self.suspend_list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_obtain_succeeds_while_count_is_positive_then_busy() {
        let _guard = crate::port::test_guard();
        let sem = Semaphore::new(2, 2);
        assert_eq!(sem.try_obtain(), Status::Success);
        assert_eq!(sem.try_obtain(), Status::Success);
        assert_eq!(sem.try_obtain(), Status::Busy);
    }

    #[test]
    fn release_caps_at_max_count_when_nobody_is_waiting() {
        let _guard = crate::port::test_guard();
        let sem = Semaphore::new(0, 1);
        sem.release();
        assert_eq!(sem.count(), 1);
        assert_eq!(sem.try_obtain(), Status::Success);
        assert_eq!(sem.try_obtain(), Status::Busy);
    }

    #[test]
    fn interrupt_protected_semaphore_is_obtainable_without_kernel_lock_held() {
        let _guard = crate::port::test_guard();
        let sem = Semaphore::new_interrupt_protected(1, 1);
        assert_eq!(sem.try_obtain(), Status::Success);
        assert_eq!(sem.try_obtain(), Status::Busy);
        sem.release();
        assert_eq!(sem.try_obtain(), Status::Success);
    }

    #[test]
    fn obtain_with_zero_timeout_is_busy_instead_of_blocking() {
        let _guard = crate::port::test_guard();
        let sem = Semaphore::new(0, 1);
        assert_eq!(sem.obtain(Some(0)), Status::Busy);
        sem.release();
        assert_eq!(sem.obtain(Some(0)), Status::Success);
    }

    #[test]
    fn destroy_with_no_waiters_is_a_no_op_on_count() {
        let _guard = crate::port::test_guard();
        let sem = Semaphore::new(1, 1);
        sem.destroy();
        assert_eq!(sem.count(), 1);
        assert_eq!(sem.try_obtain(), Status::Success);
    }
}
