//! The idle task and its work table (§4.10).
//!
//! Grounded on `original_source/rtos/kernel/idle.h` (a fixed-size array of
//! `(function, private data)` pairs, `IDLE_NO_SPACE`/`IDLE_NOT_FOUND`) for
//! the contract. There is no direct analog in the teacher (`r3_kernel`
//! expresses idle behavior as an ordinary lowest-priority task supplied by
//! the application), so the fixed-capacity work table itself is built with
//! `arrayvec::ArrayVec`, already in the teacher's dependency stack, as the
//! idiomatic Rust equivalent of the original's compile-time-sized C array.
use arrayvec::ArrayVec;

use crate::error::Status;
use crate::intr_lock::{self, IntrLockCell};
use crate::port::{Port, TaskEntryThunk};
use crate::task::{TaskCb, TaskFlags};

/// Lowest possible priority: the idle task always loses a tie-break against
/// any registered task.
pub const IDLE_PRIORITY: u8 = u8::MAX;

const IDLE_STACK_SIZE: usize = 256;

type IdleDo = extern "C" fn(usize);

#[derive(Clone, Copy)]
struct IdleWork {
    func: IdleDo,
    data: usize,
}

/// A fixed-capacity table of callbacks run from the idle task whenever
/// nothing else is ready, parameterized over its capacity the way a
/// `arrayvec`-backed embedded table typically is.
pub struct IdleWorkTable<const N: usize> {
    work: IntrLockCell<ArrayVec<IdleWork, N>>,
}

impl<const N: usize> IdleWorkTable<N> {
    pub const fn new() -> Self {
        Self {
            work: IntrLockCell::new(ArrayVec::new_const()),
        }
    }

    /// Registers a callback to be invoked (with `data`) every time the idle
    /// task runs. Returns [`Status::IdleNoSpace`] if the table is full.
    pub fn add(&self, func: IdleDo, data: usize) -> Status {
        let mut guard = intr_lock::lock();
        let work = self.work.write(&mut *guard);
        if work.try_push(IdleWork { func, data }).is_err() {
            return Status::IdleNoSpace;
        }
        Status::Success
    }

    /// Removes a previously registered callback. Returns
    /// [`Status::IdleNotFound`] if `func`/`data` is not currently registered.
    pub fn remove(&self, func: IdleDo, data: usize) -> Status {
        let mut guard = intr_lock::lock();
        let work = self.work.write(&mut *guard);
        match work.iter().position(|w| w.func as usize == func as usize && w.data == data) {
            Some(i) => {
                work.remove(i);
                Status::Success
            }
            None => Status::IdleNotFound,
        }
    }

    fn run_once(&self) {
        let mut snapshot: ArrayVec<IdleWork, N> = ArrayVec::new();
        {
            let guard = intr_lock::lock();
            snapshot.extend(self.work.read(&*guard).iter().copied());
        }
        for entry in snapshot {
            (entry.func)(entry.data);
        }
    }
}

impl<const N: usize> Default for IdleWorkTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Default-capacity idle work table, registered globally via [`add_work`]/
/// [`remove_work`]. Sized the way the original's `IDLE_WORK_MAX` constant
/// did: the application only gets one idle task, so one table is shared by
/// everything that wants idle-time work done.
const DEFAULT_CAPACITY: usize = 8;

static IDLE_WORK: IdleWorkTable<DEFAULT_CAPACITY> = IdleWorkTable::new();

/// Registers a callback to run whenever the idle task executes.
pub fn add_work(func: IdleDo, data: usize) -> Status {
    IDLE_WORK.add(func, data)
}

/// Unregisters a previously registered idle callback.
pub fn remove_work(func: IdleDo, data: usize) -> Status {
    IDLE_WORK.remove(func, data)
}

static mut IDLE_STACK: [u8; IDLE_STACK_SIZE] = [0; IDLE_STACK_SIZE];
static IDLE_TASK: TaskCb = TaskCb::new();

extern "C" fn idle_entry(_arg: usize) {
    loop {
        IDLE_WORK.run_once();
    }
}

/// Builds the built-in idle task. Called once by [`crate::sched::kernel_run`]
/// before the first task is dispatched.
///
/// # Safety
/// Must be called at most once, before any task is scheduled.
pub(crate) unsafe fn init(port: &dyn Port) -> &'static TaskCb {
    let entry: TaskEntryThunk = idle_entry;
    // Safety: `IDLE_STACK` is exclusively owned by the idle task from this
    // point on; `init` runs at most once.
    let stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(IDLE_STACK) };
    crate::task::task_create(
        port,
        &IDLE_TASK,
        "idle",
        stack,
        IDLE_PRIORITY,
        entry,
        0,
        TaskFlags::NO_RETURN,
    );
    &IDLE_TASK
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn noop(_: usize) {}

    #[test]
    fn work_table_reports_no_space_when_full() {
        let _guard = crate::port::test_guard();
        let table: IdleWorkTable<2> = IdleWorkTable::new();
        assert_eq!(table.add(noop, 1), Status::Success);
        assert_eq!(table.add(noop, 2), Status::Success);
        assert_eq!(table.add(noop, 3), Status::IdleNoSpace);
    }

    #[test]
    fn removing_unregistered_work_is_not_found() {
        let _guard = crate::port::test_guard();
        let table: IdleWorkTable<2> = IdleWorkTable::new();
        assert_eq!(table.remove(noop, 42), Status::IdleNotFound);
    }
}
