//! The hardware-abstraction boundary.
//!
//! Everything in this module is the one place in the crate where "what the
//! CPU actually does" leaks in. A target port implements [`Port`] and hands a
//! `&'static dyn Port` to [`crate::kernel_run`]; everything above this layer
//! (scheduler, condition, semaphore, sleep) is pure, portable Rust.
use core::fmt;

/// A saved interrupt enable level, as returned by [`Port::interrupt_level`]
/// and accepted by [`Port::set_interrupt_level`].
///
/// Opaque to the kernel: it is only ever a value obtained from and fed back
/// into the same `Port`, so its representation is entirely up to the target
/// (a single status register bit on AVR, the `PRIMASK`/`BASEPRI` value on
/// Cortex-M, ...).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IntrLevel(pub u32);

impl fmt::Debug for IntrLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IntrLevel({:#x})", self.0)
    }
}

/// The entry point a newly created task resumes at on its first dispatch.
pub type TaskEntryThunk = extern "C" fn(arg: usize);

/// The hardware/architecture abstraction the kernel is generic over.
///
/// A port is responsible for exactly four things: the interrupt gate
/// (§4.1), building a task's initial machine context (§4.4), transferring
/// control to a task for the very first time, and switching context between
/// two tasks (cooperatively or from an ISR). Everything else — scheduling
/// decisions, wait-list bookkeeping, timeouts — lives above this trait and
/// never needs to know which of these a given target uses.
///
/// # Safety
///
/// Implementors must ensure interrupt enable/disable nests correctly
/// (`set_interrupt_level` restores exactly the level it's given, never more
/// "enabled" than that), and that `init_stack`/`first_dispatch`/
/// `switch_context` produce a context that, when restored, resumes execution
/// with the CPU's full register file (including condition flags and the
/// interrupt-enable bit) exactly as the save left it.
pub unsafe trait Port: Sync {
    /// Byte pattern used to fill a fresh stack for high-water-mark
    /// measurement. Advisory only; see SPEC_FULL.md §7.
    ///
    /// A method rather than an associated constant: the kernel holds its
    /// single port as `&'static dyn Port` (SPEC_FULL.md §9), and associated
    /// constants would make this trait impossible to turn into a trait
    /// object.
    fn stack_pattern(&self) -> u8 {
        0xA5
    }

    /// Soft ticks per second. Used by the `MS_TO_TICK`/`TICK_TO_MS`-style
    /// conversions in [`crate::tick`].
    fn ticks_per_sec(&self) -> u32;

    /// Disables interrupts and returns the *previous* level, so it can later
    /// be restored with [`Self::set_interrupt_level`].
    ///
    /// # Safety
    /// May only be called by kernel code forming a critical section that
    /// will restore the level it's given.
    unsafe fn disable_interrupts(&self) -> IntrLevel;

    /// Restores a previously saved interrupt level.
    ///
    /// # Safety
    /// `level` must be a value this port previously returned from
    /// `disable_interrupts` or `interrupt_level`, not yet consumed by
    /// another restore.
    unsafe fn set_interrupt_level(&self, level: IntrLevel);

    /// Returns the current interrupt level without changing it.
    fn interrupt_level(&self) -> IntrLevel;

    /// Returns the live value of the hardware timer register backing the
    /// soft tick, or `None` if this port has no sub-tick resolution timer
    /// (the hardware tick then degrades to the soft tick scaled by
    /// `TICKS_PER_SEC`, see [`crate::tick::current_hardware_tick`]).
    fn hw_timer_counter(&self) -> Option<u32> {
        None
    }

    /// Writes an initial machine context to the top of `stack` such that,
    /// once dispatched, execution resumes at `entry(arg)` as if it had been
    /// called normally. Returns the resulting top-of-stack pointer.
    ///
    /// `stack` has already been filled with [`Self::stack_pattern`] by the
    /// caller ([`crate::task::task_create`]).
    ///
    /// # Safety
    /// `stack` must be large enough for this port's context frame and must
    /// remain valid and exclusively owned by the resulting task for as long
    /// as the task exists.
    unsafe fn init_stack(&self, stack: &mut [u8], entry: TaskEntryThunk, arg: usize) -> *mut u8;

    /// Restores the first task's context and never returns. Called exactly
    /// once, by [`crate::sched::kernel_run`].
    ///
    /// # Safety
    /// `tos` must be a top-of-stack pointer produced by [`Self::init_stack`]
    /// (or a later [`Self::switch_context`]) for a task that has not yet run.
    unsafe fn first_dispatch(&self, tos: *mut u8) -> !;

    /// Saves the currently running task's context onto its own stack
    /// (writing the resulting top-of-stack pointer to `*save_tos`), then
    /// restores `restore_tos` and resumes it.
    ///
    /// Called with interrupts already disabled by the caller; this function
    /// returns (to the *newly restored* task's point of view, i.e. this call
    /// returns when that task is switched back to) with the same interrupt
    /// level the restored task had when it was last saved.
    ///
    /// # Safety
    /// `restore_tos` must be a top-of-stack pointer previously produced by
    /// `init_stack` or a prior `switch_context` for a task that is not
    /// currently running anywhere else. `save_tos` must point at storage
    /// owned by the currently running task's control block.
    unsafe fn switch_context(&self, save_tos: *mut *mut u8, restore_tos: *mut u8);

    /// Requests that a reschedule happen at the next opportunity, without
    /// switching context synchronously. Used by ISR-context releases that
    /// can't safely switch stacks until ISR exit (e.g. a Cortex-M PendSV
    /// pend). The default implementation is a no-op, appropriate for ports
    /// whose `switch_context` can be invoked directly from ISR context.
    ///
    /// # Safety
    /// May only be called from within an ISR entered via the port's own ISR
    /// glue.
    unsafe fn pend_reschedule(&self) {}
}

#[cfg(test)]
pub mod sim;

/// The port installed by [`crate::kernel_run`].
///
/// A plain global, not an atomic or an `IntrLockCell`: exactly like
/// `current_task`/`current_tick` in the original C kernel, it is written
/// exactly once (by `kernel_run`, before any task or ISR can run) and is
/// thereafter read-only, so no synchronization is needed for the write to
/// become visible, and nothing else accesses it before that write happens.
static mut INSTALLED_PORT: Option<&'static dyn Port> = None;

/// Installs the port. Called once by [`crate::sched::kernel_run`].
///
/// # Safety
/// Must be called before any other kernel entry point, and at most once.
pub(crate) unsafe fn install(port: &'static dyn Port) {
    unsafe {
        INSTALLED_PORT = Some(port);
    }
}

/// Returns the installed port.
///
/// # Panics
/// Panics if called before [`crate::kernel_run`] has installed a port.
pub(crate) fn installed() -> &'static dyn Port {
    // Safety: `INSTALLED_PORT` is written once, before any task or ISR runs,
    // and never written again.
    unsafe { INSTALLED_PORT.expect("rtcore: kernel_run has not installed a Port yet") }
}

/// Installs a shared [`sim::SimPort`] the first time any test needs one.
///
/// This crate has exactly one kernel singleton (SPEC_FULL.md §9), so unlike
/// a real embedded program — which calls [`crate::kernel_run`] exactly once
/// — the test suite has many independent tests that each want a `Port`
/// present. They share a single installed `SimPort` and serialize through
/// [`test_guard`] rather than each getting a fresh kernel instance.
#[cfg(test)]
fn ensure_test_port_installed() {
    use std::sync::OnceLock;
    static PORT: OnceLock<sim::SimPort> = OnceLock::new();
    let port = PORT.get_or_init(|| sim::SimPort::new(1000));
    // Safety: the write below only ever stores the same `&'static` value,
    // and every caller serializes through `test_guard`'s mutex first.
    unsafe {
        if INSTALLED_PORT.is_none() {
            INSTALLED_PORT = Some(port);
        }
    }
}

/// Acquires the process-wide test serialization lock and makes sure a
/// [`sim::SimPort`] is installed. Every test that touches [`crate::intr_lock`]
/// or the scheduler's global state must hold this for its duration: this
/// crate's singletons (unlike the teacher's per-application monomorphized
/// statics) are shared across every test in the binary, and `cargo test`
/// runs tests concurrently on real OS threads by default.
#[cfg(test)]
pub(crate) fn test_guard() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    let guard = LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    ensure_test_port_installed();
    guard
}
