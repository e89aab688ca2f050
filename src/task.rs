//! Task control blocks and task creation (§3, §4.5).
//!
//! Grounded on `original_source/rtos/kernel/tasks.c`/`tasks.h` for the exact
//! field set and lifecycle (stack-pattern fill, the `task_entry_return`
//! wrapper that loops a task back to `TASK_FINISHED` instead of letting it
//! fall off the end of its stack, the `TASK_NO_RETURN`/`TASK_SCHED_DRIFT`
//! flags) and on `r3_kernel::task`'s shape for the Rust idiom: state behind
//! [`IntrLockCell`] fields, intrusive `NonNull`-based list links rather than
//! an ID-indexed pool (this crate's tasks live in caller-`'static` storage,
//! not a kernel-owned array).
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use bitflags::bitflags;

use crate::intr_lock::{self, IntrLockCell, IntrLockGuard};
use crate::list::{Link, LinkAdapter};
use crate::port::{Port, TaskEntryThunk};

bitflags! {
    /// Task configuration flags, fixed at [`task_create`] time.
    pub struct TaskFlags: u8 {
        /// This task's entry function never returns; its stack frame is
        /// built directly around `entry` instead of the `task_entry_return`
        /// trampoline.
        const NO_RETURN = 0x1;
    }
}

/// A task's lifecycle state.
///
/// ```text
/// ToBeSuspended --dispatch--> Running --yield/preempt--> ToBeSuspended
///                               |
///                            block on Condition/sleep
///                               v
///                           Suspended --resume_condition--> ResumePending
///                           Suspended --sleep timeout------> SleepResumePending
///                    ResumePending/SleepResumePending --dispatch--> Running
///                               |
///                           entry returns
///                               v
///                            Finished
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Enqueued in the ready queue, waiting to be dispatched.
    ToBeSuspended,
    /// Currently the task executing on the CPU.
    Running,
    /// Blocked on a [`crate::condition::Condition`] or asleep; not in the
    /// ready queue.
    Suspended,
    /// Was suspended, but [`crate::condition::resume_condition`] (or a
    /// direct manual resume) has claimed it; waiting to be moved back into
    /// the ready queue.
    ResumePending,
    /// Was suspended, but its sleep timeout elapsed first.
    SleepResumePending,
    /// The entry function has returned and this task will never run again.
    Finished,
}

pub(crate) struct ReadyTag;
#[cfg(feature = "sleep")]
pub(crate) struct SleepTag;

/// A task control block.
///
/// Caller-owned, `'static` storage: the kernel never allocates, frees, or
/// moves a `TaskCb` (§3 Non-goals). [`task_create`] only initializes fields;
/// placing the resulting value somewhere `'static` (a `static` item, or
/// leaked storage) and handing the kernel a `NonNull` into it is the
/// caller's responsibility.
pub struct TaskCb {
    /// Diagnostic name, not used by the kernel for anything but logging.
    pub name: &'static str,
    entry: TaskEntryThunk,
    arg: usize,
    flags: TaskFlags,
    /// Numerically lower is higher priority, matching [`crate::prio_bitmap`].
    pub(crate) priority: u8,
    pub(crate) state: IntrLockCell<TaskState>,
    lock_count: IntrLockCell<u8>,
    tos: IntrLockCell<*mut u8>,
    /// Absolute wake-up tick while linked into the sleep list. A plain
    /// atomic rather than an `IntrLockCell`: the sleep list orders itself by
    /// this value from inside `List::insert_sorted`'s comparator, which
    /// already holds the interrupt-lock token to get `&mut List` and so
    /// cannot also borrow it to read a sibling node's cell (see
    /// `sleep::insert_sleeping`). Still only ever touched with interrupts
    /// disabled.
    #[cfg(feature = "sleep")]
    pub(crate) tick_sleep: AtomicU32,
    /// Where to record `Status::Timeout` if this task's sleep-list entry
    /// expires while it is actually blocked on a [`crate::condition::Condition`]
    /// (rather than a plain [`crate::sleep::sleep_ticks`]), set by
    /// [`crate::sleep::arm_condition_timeout`] and cleared by whichever of
    /// `resume_condition` or the tick ISR gets to this task first.
    #[cfg(feature = "sleep")]
    timeout_status: IntrLockCell<Option<NonNull<core::cell::Cell<crate::error::Status>>>>,
    #[cfg(feature = "task_stats")]
    scheduled: AtomicU8,
    /// Set when this task requested a yield while scheduler-locked; the
    /// deferred reschedule runs once the lock count drops back to zero
    /// (`TASK_SCHED_DRIFT` in the original kernel, §4.6).
    sched_drift: AtomicBool,
    pub(crate) ready_link: Link<TaskCb>,
    #[cfg(feature = "sleep")]
    pub(crate) sleep_link: Link<TaskCb>,
}

// Safety: every field is either immutable after `task_create` or behind an
// `IntrLockCell`/atomic; a `TaskCb` is always accessed under the interrupt
// lock or through atomics, never aliased mutably outside of it.
unsafe impl Sync for TaskCb {}

unsafe impl LinkAdapter<ReadyTag> for TaskCb {
    fn link_mut(mut node: NonNull<Self>) -> NonNull<Link<Self>> {
        unsafe { NonNull::new_unchecked(&mut node.as_mut().ready_link) }
    }
}

#[cfg(feature = "sleep")]
unsafe impl LinkAdapter<SleepTag> for TaskCb {
    fn link_mut(mut node: NonNull<Self>) -> NonNull<Link<Self>> {
        unsafe { NonNull::new_unchecked(&mut node.as_mut().sleep_link) }
    }
}

impl TaskCb {
    /// Creates a not-yet-scheduled task control block in place. The caller
    /// must [`crate::sched::add`] it before it will ever run.
    pub const fn new() -> Self {
        Self {
            name: "",
            entry: default_entry,
            arg: 0,
            flags: TaskFlags::empty(),
            priority: 0,
            state: IntrLockCell::new(TaskState::Finished),
            lock_count: IntrLockCell::new(0),
            tos: IntrLockCell::new(core::ptr::null_mut()),
            #[cfg(feature = "sleep")]
            tick_sleep: AtomicU32::new(0),
            #[cfg(feature = "sleep")]
            timeout_status: IntrLockCell::new(None),
            #[cfg(feature = "task_stats")]
            scheduled: AtomicU8::new(0),
            sched_drift: AtomicBool::new(false),
            ready_link: Link::new(),
            #[cfg(feature = "sleep")]
            sleep_link: Link::new(),
        }
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn state(&self) -> TaskState {
        let guard = intr_lock::lock();
        *self.state.read(&*guard)
    }

    /// Increments the scheduler-lock nesting count. While nonzero, this task
    /// cannot be preempted or cooperatively switched away from; see
    /// §4.1/§4.6.
    pub fn lock_scheduler(&self) {
        let mut guard = intr_lock::lock();
        let count = self.lock_count.write(&mut *guard);
        *count += 1;
    }

    /// Decrements the scheduler-lock nesting count. Returns `true` once it
    /// reaches zero (the caller should then service any deferred reschedule,
    /// i.e. [`Self::take_sched_drift`]).
    pub fn unlock_scheduler(&self) -> bool {
        let mut guard = intr_lock::lock();
        let count = self.lock_count.write(&mut *guard);
        debug_assert!(*count > 0, "rtcore: scheduler unlock without matching lock");
        *count -= 1;
        *count == 0
    }

    pub(crate) fn is_scheduler_locked(&self) -> bool {
        let guard = intr_lock::lock();
        *self.lock_count.read(&*guard) > 0
    }

    pub(crate) fn flags(&self) -> TaskFlags {
        self.flags
    }

    pub(crate) fn mark_sched_drift(&self) {
        self.sched_drift.store(true, Ordering::Relaxed);
    }

    /// Reads and clears the deferred-yield flag.
    pub(crate) fn take_sched_drift(&self) -> bool {
        self.sched_drift.swap(false, Ordering::Relaxed)
    }

    pub(crate) fn tos_cell(&self) -> &IntrLockCell<*mut u8> {
        &self.tos
    }

    #[cfg(feature = "sleep")]
    pub(crate) fn tick_sleep(&self) -> u32 {
        self.tick_sleep.load(Ordering::Relaxed)
    }

    #[cfg(feature = "sleep")]
    pub(crate) fn set_tick_sleep(&self, tick: u32) {
        self.tick_sleep.store(tick, Ordering::Relaxed);
    }

    #[cfg(feature = "sleep")]
    pub(crate) fn set_timeout_status_slot(
        &self,
        guard: &mut IntrLockGuard,
        slot: Option<NonNull<core::cell::Cell<crate::error::Status>>>,
    ) {
        *self.timeout_status.write(&mut **guard) = slot;
    }

    /// Clears and returns the timeout status slot, if one was armed. Called
    /// by whichever of `resume_condition` or the sleep-list tick expiry
    /// reaches this task first; the other sees `None` and does nothing.
    #[cfg(feature = "sleep")]
    pub(crate) fn take_timeout_status_slot(
        &self,
        guard: &mut IntrLockGuard,
    ) -> Option<NonNull<core::cell::Cell<crate::error::Status>>> {
        self.timeout_status.write(&mut **guard).take()
    }

    #[cfg(feature = "task_stats")]
    pub fn times_scheduled(&self) -> u8 {
        self.scheduled.load(Ordering::Relaxed)
    }

    #[cfg(feature = "task_stats")]
    pub(crate) fn mark_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for TaskCb {
    fn default() -> Self {
        Self::new()
    }
}

extern "C" fn default_entry(_arg: usize) {}

/// Initializes a [`TaskCb`] and its stack, ready to be handed to
/// [`crate::sched::add`].
///
/// `stack` and `tcb` must both outlive the task; the kernel never frees
/// either. `stack` is filled with the port's stack pattern before the
/// initial context is written into it, so a later stats pass can measure
/// high-water-mark usage by scanning for the first disturbed byte.
///
/// If `flags` does not contain [`TaskFlags::NO_RETURN`], the task's initial
/// context is built around an internal trampoline that, when `entry`
/// returns, marks the task [`TaskState::Finished`] and hands control back to
/// the scheduler forever (matching `task_entry_return` in the original
/// kernel) rather than running off the end of its stack.
pub fn task_create(
    port: &dyn Port,
    tcb: &'static TaskCb,
    name: &'static str,
    stack: &'static mut [u8],
    priority: u8,
    entry: TaskEntryThunk,
    arg: usize,
    flags: TaskFlags,
) {
    // Safety: `tcb` is freshly handed to us by the caller and not yet
    // shared with the scheduler (it is only added to a list by
    // `sched::add`, which the caller has not called yet).
    let tcb_mut = unsafe { &mut *(tcb as *const TaskCb as *mut TaskCb) };
    tcb_mut.name = name;
    tcb_mut.entry = entry;
    tcb_mut.arg = arg;
    tcb_mut.flags = flags;
    tcb_mut.priority = priority;

    stack.fill(port.stack_pattern());

    let thunk: TaskEntryThunk = if flags.contains(TaskFlags::NO_RETURN) {
        entry
    } else {
        task_entry_return
    };

    // Safety: `stack` is exclusively owned by this not-yet-scheduled task
    // and large enough by the caller's contract.
    let tos = unsafe { port.init_stack(stack, thunk, arg) };

    {
        let mut guard = intr_lock::lock();
        *tcb.tos.write(&mut *guard) = tos;
        *tcb.state.write(&mut *guard) = TaskState::ToBeSuspended;
    }
}

/// Wraps a returning task's entry function so that, when it returns, the
/// task is marked finished and control is handed back to the scheduler
/// forever, instead of falling off the end of its stack. Mirrors
/// `task_entry_return` in the original kernel.
extern "C" fn task_entry_return(arg: usize) {
    loop {
        let tcb = crate::sched::current();
        (tcb.entry)(arg);

        let mut guard = intr_lock::lock();
        *tcb.state.write(&mut *guard) = TaskState::Finished;
        drop(guard);
        crate::sched::reschedule_and_never_return_to(tcb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_finished() {
        let tcb = TaskCb::new();
        assert_eq!(tcb.flags(), TaskFlags::empty());
    }
}
