//! The ready queue and dispatcher (§4.6).
//!
//! Grounded on `original_source/rtos/kernel/kernel.c` for the ready-queue
//! contract (`add`/`get_next`/`yield`/scheduler lock with drift payback) and
//! on `r3_kernel::task::State`/its single global `State` for the Rust shape:
//! one process-wide `Kernel` singleton behind [`IntrLockCell`]s rather than a
//! per-core or generic-over-`Traits` structure, since this spec targets a
//! single core (SPEC_FULL.md §3 Non-goals).
use core::ptr::NonNull;

use crate::intr_lock::{self, IntrLockCell};
use crate::port::{self, Port};
use crate::prio_bitmap::PrioBitmap;
use crate::task::{ReadyTag, TaskCb, TaskState};
use crate::list::List;

/// One FIFO list per priority level, plus the bitmap that makes picking the
/// occupied one with the lowest index (i.e. highest priority) `O(1)`.
struct ReadyQueue {
    bitmap: PrioBitmap,
    lists: [List<TaskCb, ReadyTag>; 256],
}

impl ReadyQueue {
    const fn new() -> Self {
        const EMPTY: List<TaskCb, ReadyTag> = List::new();
        Self {
            bitmap: PrioBitmap::new(),
            lists: [EMPTY; 256],
        }
    }

    /// # Safety
    /// `task` must not already be linked into this or any other `ReadyTag`
    /// list.
    unsafe fn enqueue(&mut self, task: NonNull<TaskCb>) {
        let prio = unsafe { task.as_ref() }.priority();
        unsafe { self.lists[prio as usize].push_back(task) };
        self.bitmap.set(prio);
    }

    fn peek_highest_priority(&self) -> Option<u8> {
        self.bitmap.find_set()
    }

    fn pop_highest(&mut self) -> Option<NonNull<TaskCb>> {
        let prio = self.bitmap.find_set()?;
        let list = &mut self.lists[prio as usize];
        // Safety: `prio` came from the bitmap, so this list is nonempty.
        let task = unsafe { list.pop_front() };
        if list.is_empty() {
            self.bitmap.clear(prio);
        }
        task
    }
}

struct Kernel {
    ready: IntrLockCell<ReadyQueue>,
    current: IntrLockCell<Option<NonNull<TaskCb>>>,
}

// Safety: `Kernel` is only ever touched through `IntrLockCell`'s token
// discipline (interrupts disabled), so sharing it as a `'static` across the
// single core it runs on is sound despite the raw `NonNull` it carries.
unsafe impl Sync for Kernel {}

static KERNEL: Kernel = Kernel {
    ready: IntrLockCell::new(ReadyQueue::new()),
    current: IntrLockCell::new(None),
};

/// Admits `task` to the ready queue and performs the equivalent of an
/// initial preemption check: if a task is already running and `task` is
/// strictly higher priority, it preempts immediately (or, if the running
/// task holds the scheduler lock, marks the deferred-yield flag for the
/// lock to pay back on release). Safe to call before [`kernel_run`], in
/// which case there is no running task yet and this is just an enqueue.
pub fn add(task: &'static TaskCb) {
    let ptr = NonNull::from(task);
    let mut guard = intr_lock::lock();
    // The caller is responsible for having already set `task.state` to
    // whatever led to this call (`ToBeSuspended` for a brand-new task from
    // `task_create`, `ResumePending` from `resume_condition`,
    // `SleepResumePending` from `service_tick`): per §4.5's state machine,
    // only an actual dispatch transitions either of those to `Running`, so
    // `add` must not collapse the distinction by overwriting it here.
    // Safety: a task handed to `add` for the first time, or returning from
    // `Suspended`, is not linked into any `ReadyTag` list.
    unsafe { KERNEL.ready.write(&mut *guard).enqueue(ptr) };
    let current = *KERNEL.current.read(&*guard);
    drop(guard);

    let Some(current) = current else { return };
    // Safety: `current` was written by `kernel_run`/a reschedule and always
    // points at a live, currently-running `TaskCb`.
    let current_ref = unsafe { current.as_ref() };
    if task.priority() >= current_ref.priority() {
        return;
    }
    if current_ref.is_scheduler_locked() {
        current_ref.mark_sched_drift();
    } else {
        reschedule_keeping(current);
    }
}

/// Returns the task currently executing. Valid only once [`kernel_run`] has
/// dispatched the first task.
///
/// # Panics
/// Panics if called before any task has been dispatched.
pub(crate) fn current() -> &'static TaskCb {
    let guard = intr_lock::lock();
    let ptr = KERNEL
        .current
        .read(&*guard)
        .expect("rtcore: sched::current() called before the first task was dispatched");
    // Safety: every value ever stored in `KERNEL.current` is a `NonNull`
    // derived from a `&'static TaskCb`.
    unsafe { ptr.as_ref() }
}

/// Initializes the idle task, installs `port`, and dispatches the
/// highest-priority ready task. Never returns.
///
/// # Safety
/// Must be called exactly once, before any other kernel entry point.
pub(crate) unsafe fn kernel_run(port: &'static dyn Port) -> ! {
    unsafe { port::install(port) };
    // Safety: first and only call, before any task has been dispatched.
    let idle = unsafe { crate::idle::init(port) };
    add(idle);

    let mut guard = intr_lock::lock();
    let next = KERNEL
        .ready
        .write(&mut *guard)
        .pop_highest()
        .expect("rtcore: ready queue is empty at startup (idle task missing)");
    *unsafe { next.as_ref() }.state.write(&mut *guard) = TaskState::Running;
    *KERNEL.current.write(&mut *guard) = Some(next);
    #[cfg(feature = "task_stats")]
    unsafe { next.as_ref() }.mark_scheduled();
    let tos = *unsafe { next.as_ref() }.tos_cell().read(&*guard);
    drop(guard);

    // Safety: `tos` was produced by `task_create`'s call to `init_stack` for
    // a task that has never run.
    unsafe { port.first_dispatch(tos) }
}

/// Cooperatively reschedules the current task (§4.6 "manual" yield). If a
/// higher- or equal-priority task is ready, the current task is re-enqueued
/// and control switches away; otherwise this returns immediately having done
/// nothing. If the scheduler is locked, records a deferred yield instead.
pub fn task_yield() {
    let guard = intr_lock::lock();
    let current = KERNEL
        .current
        .read(&*guard)
        .expect("rtcore: task_yield() called before the first task was dispatched");
    drop(guard);
    // Safety: see `current()`.
    let current_ref = unsafe { current.as_ref() };
    if current_ref.is_scheduler_locked() {
        current_ref.mark_sched_drift();
        return;
    }
    reschedule_keeping(current);
}

/// Re-enqueues `current`, dispatches the new highest-priority ready task,
/// and switches context to it (a no-op if `current` is still the winner).
fn reschedule_keeping(current: NonNull<TaskCb>) {
    let mut guard = intr_lock::lock();
    *unsafe { current.as_ref() }.state.write(&mut *guard) = TaskState::ToBeSuspended;
    // Safety: `current` is the running task, so by definition not linked
    // into the ready queue.
    unsafe { KERNEL.ready.write(&mut *guard).enqueue(current) };
    let next = KERNEL
        .ready
        .write(&mut *guard)
        .pop_highest()
        .expect("rtcore: ready queue emptied by its own running task");

    *unsafe { next.as_ref() }.state.write(&mut *guard) = TaskState::Running;
    *KERNEL.current.write(&mut *guard) = Some(next);
    #[cfg(feature = "task_stats")]
    unsafe { next.as_ref() }.mark_scheduled();

    if next == current {
        // Nobody outranked us; carry on without touching the machine
        // context.
        return;
    }

    let restore_tos = *unsafe { next.as_ref() }.tos_cell().read(&*guard);
    let save_tos = unsafe { current.as_ref() }.tos_cell().write(&mut *guard) as *mut *mut u8;
    let port = port::installed();
    // Safety: interrupts are disabled (we are holding `guard`); `restore_tos`
    // was produced by `init_stack` or a prior `switch_context` for a task
    // that is not running anywhere else; `save_tos` points at `current`'s own
    // `tos` cell. `guard` is intentionally not dropped before this call: it
    // is carried across the switch and only actually drops once `current` is
    // dispatched again, at which point it restores the interrupt level that
    // was active when `current` was last switched away from.
    unsafe { port.switch_context(save_tos, restore_tos) };
}

/// Switches away from the current task without re-enqueuing it. Used by
/// [`crate::condition::suspend_on`] once the current task has been linked
/// into a wait list and marked [`TaskState::Suspended`] — unlike
/// [`task_yield`], the caller is responsible for making the task ready again
/// later (via [`add`]).
pub(crate) fn block_current() {
    let mut guard = intr_lock::lock();
    let current = KERNEL
        .current
        .read(&*guard)
        .expect("rtcore: block_current() called before the first task was dispatched");

    let next = KERNEL
        .ready
        .write(&mut *guard)
        .pop_highest()
        .expect("rtcore: ready queue empty while blocking a task (idle task missing)");

    *unsafe { next.as_ref() }.state.write(&mut *guard) = TaskState::Running;
    *KERNEL.current.write(&mut *guard) = Some(next);
    #[cfg(feature = "task_stats")]
    unsafe { next.as_ref() }.mark_scheduled();

    debug_assert_ne!(next, current, "rtcore: blocked task was its own successor");

    let restore_tos = *unsafe { next.as_ref() }.tos_cell().read(&*guard);
    let save_tos = unsafe { current.as_ref() }.tos_cell().write(&mut *guard) as *mut *mut u8;
    let port = port::installed();
    // Safety: see `reschedule_keeping`; `guard` is carried across the switch
    // and drops once `current` is dispatched again.
    unsafe { port.switch_context(save_tos, restore_tos) };
}

/// Dispatches the next ready task and never returns to `finished`. Used by
/// [`crate::task::task_entry_return`] once a task's entry function has
/// returned; `finished` is never re-enqueued.
pub(crate) fn reschedule_and_never_return_to(finished: &'static TaskCb) -> ! {
    let finished_ptr = NonNull::from(finished);
    let mut guard = intr_lock::lock();
    let next = KERNEL
        .ready
        .write(&mut *guard)
        .pop_highest()
        .expect("rtcore: ready queue empty while retiring a finished task (idle task missing)");

    *unsafe { next.as_ref() }.state.write(&mut *guard) = TaskState::Running;
    *KERNEL.current.write(&mut *guard) = Some(next);
    #[cfg(feature = "task_stats")]
    unsafe { next.as_ref() }.mark_scheduled();

    let restore_tos = *unsafe { next.as_ref() }.tos_cell().read(&*guard);
    // The finished task's own `tos` cell is reused purely as scratch storage
    // for the save half of the switch: nothing will ever read it again.
    let save_tos = finished.tos_cell().write(&mut *guard) as *mut *mut u8;
    let port = port::installed();
    // Safety: same preconditions as in `reschedule_keeping`, except the
    // saved context is never going to be restored.
    unsafe { port.switch_context(save_tos, restore_tos) };
    unreachable!("rtcore: switch_context returned into a finished task")
}

/// Increments the current task's scheduler-lock nesting count (§4.6). While
/// held, this task cannot be preempted; ready-queue changes made by ISRs or
/// [`add`] are deferred (recorded as a pending yield) until the matching
/// [`unlock_scheduler`] brings the count back to zero.
pub fn lock_scheduler() {
    current().lock_scheduler();
}

/// Decrements the current task's scheduler-lock nesting count. If it reaches
/// zero and a preemption was deferred while locked, pays it back immediately
/// with a yield.
pub fn unlock_scheduler() {
    let tcb = current();
    if tcb.unlock_scheduler() && tcb.take_sched_drift() {
        task_yield();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_queue_starts_empty() {
        let q = ReadyQueue::new();
        assert_eq!(q.peek_highest_priority(), None);
    }
}
