//! The generic wait/suspend primitive every blocking operation is built on
//! (§4.8).
//!
//! Grounded on `original_source/rtos/kernel/condition.h` for the contract
//! (`CONDITION`'s `lock`/`unlock`/`do_suspend` callbacks, `SUSPEND`'s
//! priority-ordered per-condition list, the `CONDITION_PING` flag) and on
//! `r3_kernel::wait` (`WaitQueue`/`Wait`) for the Rust shape: a trait at the
//! seam instead of C function pointers, and a suspend record built on the
//! waiting task's own stack instead of a separately allocated node — this
//! crate has no kernel-owned heap (§3 Non-goals), and a suspend only ever
//! needs to live as long as the call that blocks on it.
use core::cell::Cell;
use core::ptr::NonNull;

use crate::error::Status;
use crate::intr_lock::{self, IntrLockCell, IntrLockGuard};
use crate::list::{Link, LinkAdapter, List};
use crate::sched;
use crate::task::TaskCb;

/// Something a task can suspend on: a semaphore, a mutex, an event, or any
/// other user-defined wait condition.
///
/// Collapses the original's `CONDITION_LOCK`/`CONDITION_DO_SUSPEND`/
/// `CONDITION_UNLOCK` triad into one call taken under the kernel interrupt
/// lock that [`suspend_on`] already holds: on this single-core target the
/// condition's own lock and the kernel's are the same lock, so checking and
/// consuming need only ever happen once, under one critical section,
/// matching `rtos/os/semaphore.c`'s `DISABLE_INTERRUPTS`/check/
/// `ENABLE_INTERRUPTS` shape directly rather than the header's more general
/// (and, for a single lock domain, racier) two-lock version.
pub trait Condition: Sync {
    /// Called with the kernel interrupt lock held: if the calling task may
    /// proceed immediately without suspending, performs this condition's
    /// "acquire" side effect (e.g. decrementing a semaphore's count) and
    /// returns `true`. Returns `false` (with no side effect) if the task
    /// must suspend.
    fn try_consume(&self, guard: &mut IntrLockGuard) -> bool;

    /// The list of tasks currently suspended on this condition.
    fn suspend_list(&self) -> &IntrLockCell<SuspendList>;
}

pub(crate) struct SuspendTag;

/// A suspend record, built on the stack of the task that is blocking and
/// linked into the target [`Condition`]'s suspend list for exactly the
/// duration of the wait. Mirrors `SUSPEND` in the original kernel.
pub struct SuspendRecord {
    link: Link<SuspendRecord>,
    task: NonNull<TaskCb>,
    priority: u8,
    status: Cell<Status>,
    #[cfg(feature = "sleep")]
    timeout_armed: Cell<bool>,
}

// Safety: a `SuspendRecord` is only ever touched (by the blocking task, by
// `resume_condition`, or by the sleep-timeout ISR path) while holding
// `crate::intr_lock`, which on this single-core target serializes every
// access regardless of which task's stack it lives on.
unsafe impl Sync for SuspendRecord {}

unsafe impl LinkAdapter<SuspendTag> for SuspendRecord {
    fn link_mut(mut node: NonNull<Self>) -> NonNull<Link<Self>> {
        unsafe { NonNull::new_unchecked(&mut node.as_mut().link) }
    }
}

impl SuspendRecord {
    fn new(task: NonNull<TaskCb>, priority: u8) -> Self {
        Self {
            link: Link::new(),
            task,
            priority,
            status: Cell::new(Status::Success),
            #[cfg(feature = "sleep")]
            timeout_armed: Cell::new(false),
        }
    }
}

/// A priority-ordered (FIFO among ties) list of [`SuspendRecord`]s, as kept
/// per-[`Condition`].
pub type SuspendList = List<SuspendRecord, SuspendTag>;

/// Blocks the current task on `condition` until it is satisfied or (with the
/// `sleep` feature) `timeout_ticks` elapses.
///
/// Returns [`Status::Success`] if the condition was already satisfied or
/// became satisfied via [`resume_condition`]; [`Status::Timeout`] if the
/// optional timeout elapsed first.
pub fn suspend_on(condition: &dyn Condition, #[cfg(feature = "sleep")] timeout_ticks: Option<u32>) -> Status {
    let tcb = sched::current();
    let record = SuspendRecord::new(NonNull::from(tcb), tcb.priority());
    let record_ptr = NonNull::from(&record);

    // Computed before taking the interrupt lock below, since
    // `current_system_tick` takes (and releases) its own.
    #[cfg(feature = "sleep")]
    let wake_tick = timeout_ticks.map(|ticks| crate::tick::current_system_tick().wrapping_add(ticks));

    // Locked for the whole park below, exactly like `sleep::sleep_ticks`:
    // without this, the interrupt lock dropped at the end of this block and
    // the one re-acquired inside `block_current` leave a window, with this
    // task already marked `Suspended` but still the running task, where the
    // tick ISR's `task_yield` would otherwise re-enqueue it into the ready
    // queue a second time. Locking the scheduler here makes that call a
    // deferred drift instead.
    sched::lock_scheduler();

    {
        let mut guard = intr_lock::lock();
        if condition.try_consume(&mut guard) {
            sched::unlock_scheduler();
            return Status::Success;
        }

        // Safety: `record` was just created and is not linked anywhere.
        unsafe {
            condition.suspend_list().write(&mut *guard).insert_sorted(record_ptr, |existing| {
                unsafe { existing.as_ref() }.priority <= record.priority
            });
        }
        *tcb.state.write(&mut *guard) = crate::task::TaskState::Suspended;

        #[cfg(feature = "sleep")]
        if let Some(wake_tick) = wake_tick {
            record.timeout_armed.set(true);
            crate::sleep::arm_condition_timeout(&mut guard, tcb, NonNull::from(&record.status), wake_tick);
        }
    }

    // Blocks here until `resume_condition` (or the sleep timeout) wakes us.
    sched::block_current();
    sched::unlock_scheduler();

    // Whichever path woke us, make sure this stack frame is unlinked from
    // both lists it might still be on: `resume_condition` already removed
    // the suspend-list entry but may not have reached the sleep list yet (or
    // vice versa for a timeout); both removals are no-ops if already done.
    {
        let mut guard = intr_lock::lock();
        unsafe { condition.suspend_list().write(&mut *guard).remove(record_ptr) };
        #[cfg(feature = "sleep")]
        if record.timeout_armed.get() {
            crate::sleep::disarm_timeout(&mut guard, tcb);
        }
    }

    record.status.get()
}

/// Wakes up to `max` tasks suspended on `condition` for which `should_wake`
/// returns `true`, in suspend-list order (priority, then FIFO), setting
/// `status` as their wait result. Returns the number actually woken.
///
/// `should_wake` is this crate's analog of the original's `RESUME::do_resume`
/// callback — used by the `CONDITION_PING` style conditions (e.g. an event
/// object) that only wake tasks whose individual criteria are now met,
/// rather than unconditionally waking the head of the list.
pub fn resume_condition(
    condition: &dyn Condition,
    status: Status,
    mut should_wake: impl FnMut(&SuspendRecord) -> bool,
    max: usize,
) -> usize {
    let mut woken = 0;
    while woken < max {
        let mut guard = intr_lock::lock();
        let list = condition.suspend_list().write(&mut *guard);
        let found = list.iter().find(|&node| should_wake(unsafe { node.as_ref() }));
        let Some(node) = found else {
            drop(guard);
            break;
        };
        // Safety: `node` was just found linked in this list.
        unsafe { list.remove(node) };

        let record = unsafe { node.as_ref() };
        record.status.set(status);
        let task = unsafe { record.task.as_ref() };
        *task.state.write(&mut *guard) = crate::task::TaskState::ResumePending;

        // Disarm any pending timeout now, under the same lock: otherwise the
        // tick ISR could race this task back onto the ready queue a second
        // time before `sched::add` below runs.
        #[cfg(feature = "sleep")]
        if record.timeout_armed.get() {
            crate::sleep::disarm_timeout(&mut guard, task);
        }
        drop(guard);

        sched::add(task);
        woken += 1;
    }
    woken
}

/// Wakes exactly one task (the highest-priority, then earliest, suspended),
/// if any. The common case for a counting resource becoming available.
pub fn resume_one(condition: &dyn Condition, status: Status) -> bool {
    resume_condition(condition, status, |_| true, 1) == 1
}

/// Wakes every task currently suspended on `condition`.
pub fn resume_all(condition: &dyn Condition, status: Status) -> usize {
    resume_condition(condition, status, |_| true, usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspend_record_starts_with_success_status() {
        let tcb = TaskCb::new();
        let record = SuspendRecord::new(NonNull::from(&tcb), 10);
        assert_eq!(record.status.get(), Status::Success);
    }

    /// A condition that never grants immediate access, so every waiter
    /// actually lands on `suspend_list` — just enough to drive
    /// `resume_condition`'s selection logic without going through
    /// `suspend_on`'s `sched::block_current` (which needs a real dispatched
    /// task, i.e. `kernel_run`, to return from).
    struct NeverSatisfied {
        suspend_list: IntrLockCell<SuspendList>,
    }

    impl Condition for NeverSatisfied {
        fn try_consume(&self, _guard: &mut IntrLockGuard) -> bool {
            false
        }

        fn suspend_list(&self) -> &IntrLockCell<SuspendList> {
            &self.suspend_list
        }
    }

    #[test]
    fn resume_condition_wakes_highest_priority_waiter_first() {
        let _guard = crate::port::test_guard();
        let condition = NeverSatisfied {
            suspend_list: IntrLockCell::new(List::new()),
        };

        let low_prio_task = TaskCb::new();
        let high_prio_task = TaskCb::new();
        let low_record = SuspendRecord::new(NonNull::from(&low_prio_task), 200);
        let high_record = SuspendRecord::new(NonNull::from(&high_prio_task), 1);
        let low_ptr = NonNull::from(&low_record);
        let high_ptr = NonNull::from(&high_record);

        {
            let mut lock = intr_lock::lock();
            let list = condition.suspend_list().write(&mut *lock);
            // Insert in arrival order (low priority first), exactly as
            // `suspend_on` would for two tasks blocking one after another.
            unsafe {
                list.insert_sorted(low_ptr, |existing| unsafe { existing.as_ref() }.priority <= low_record.priority);
                list.insert_sorted(high_ptr, |existing| unsafe { existing.as_ref() }.priority <= high_record.priority);
            }
        }

        let woken = resume_condition(&condition, Status::Success, |_| true, 1);
        assert_eq!(woken, 1);
        assert_eq!(high_prio_task.state.read(&*intr_lock::lock()), &crate::task::TaskState::ResumePending);
        assert_eq!(low_prio_task.state.read(&*intr_lock::lock()), &crate::task::TaskState::Finished);

        let mut lock = intr_lock::lock();
        let list = condition.suspend_list().write(&mut *lock);
        // The high-priority waiter was unlinked; the low-priority one is
        // still there.
        assert!(list.iter().any(|n| n == low_ptr));
        assert!(!list.iter().any(|n| n == high_ptr));
        unsafe { list.remove(low_ptr) };
    }
}
