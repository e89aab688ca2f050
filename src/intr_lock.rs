//! The interrupt-level gate (§4.1): disable/enable/get/set on the CPU's
//! global interrupt line, an RAII critical-section guard built on it, and
//! the [`IntrLockCell`] interior-mutability cell that every other module
//! uses to touch shared kernel state.
//!
//! Mirrors `r3_kernel::klock` (`CpuLockCell`/`CpuLockGuard` over
//! `tokenlock::UnsyncTokenLock`), collapsed from generic-over-`Traits` to a
//! single concrete lock tag: this crate has exactly one kernel singleton, so
//! there is only ever one keyhole.
use core::{fmt, ops};
use tokenlock::UnsyncTokenLock;

use crate::port::{self, IntrLevel};

struct IntrLockTag(());

/// The token proving interrupts are currently disabled. Borrowed from
/// [`IntrLockGuard`].
pub(crate) type IntrLockToken = tokenlock::UnsyncSingletonToken<IntrLockTag>;
type IntrLockKeyhole = tokenlock::SingletonTokenId<IntrLockTag>;

/// A cell that can only be read or written while holding an [`IntrLockGuard`]
/// (or a borrow of one). Every field of kernel state that is touched from
/// both task and ISR context is one of these.
pub struct IntrLockCell<T: ?Sized>(UnsyncTokenLock<T, IntrLockKeyhole>);

impl<T> IntrLockCell<T> {
    pub const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(IntrLockKeyhole::INIT, x))
    }
}

impl<T: ?Sized> ops::Deref for IntrLockCell<T> {
    type Target = UnsyncTokenLock<T, IntrLockKeyhole>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for IntrLockCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lock = try_lock();
        write!(f, "IntrLockCell({:?})", self.0.read(&*lock))
    }
}

/// Disables interrupts and returns an RAII guard restoring the previous
/// level on drop.
///
/// Never fails: nested calls compose by saving/restoring whatever level was
/// current, exactly like the original's `GET_INTERRUPT_LEVEL` /
/// `DISABLE_INTERRUPTS` / `SET_INTERRUPT_LEVEL` triad.
pub fn lock() -> IntrLockGuard {
    try_lock()
}

fn try_lock() -> IntrLockGuard {
    let port = port::installed();
    // Safety: we are the kernel, forming a bona fide critical section, and
    // we store the previous level so it can be restored on drop.
    let previous = unsafe { port.disable_interrupts() };
    IntrLockGuard {
        // Safety: interrupts are now disabled and no other `IntrLockGuard`
        // can exist simultaneously on this single-core target (its own
        // constructor always disables interrupts first, and is only ever
        // dropped after restoring the level it observed).
        token: unsafe { IntrLockToken::new_unchecked() },
        previous,
    }
}

/// RAII critical-section guard. Dropping it restores the interrupt level
/// that was active when it was created (not unconditionally re-enabling
/// interrupts — nested locks must compose).
pub struct IntrLockGuard {
    token: IntrLockToken,
    previous: IntrLevel,
}

impl IntrLockGuard {
    pub fn borrow_mut(&mut self) -> &mut IntrLockToken {
        &mut self.token
    }
}

impl Drop for IntrLockGuard {
    fn drop(&mut self) {
        // Safety: restores the exact level this guard observed on entry.
        unsafe { port::installed().set_interrupt_level(self.previous) };
    }
}

impl ops::Deref for IntrLockGuard {
    type Target = IntrLockToken;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl ops::DerefMut for IntrLockGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}

/// A scoped try-acquire lock built directly on the interrupt gate, usable
/// from both task and ISR context (`INTLCK` in the original).
///
/// Unlike [`IntrLockCell`] this does not guard arbitrary data — it is a bare
/// test-and-set flag, for subsystems (such as an interrupt-protected
/// [`crate::semaphore::Semaphore`]) that need a trivial atomic region rather
/// than a typed cell.
pub struct IntLck(core::cell::UnsafeCell<bool>);

// Safety: every access to the inner `bool` happens with interrupts disabled.
unsafe impl Sync for IntLck {}

impl IntLck {
    pub const fn new() -> Self {
        Self(core::cell::UnsafeCell::new(false))
    }

    /// Attempts to acquire the lock. Returns `true` if it was free.
    pub fn try_acquire(&self) -> bool {
        let previous = {
            let port = port::installed();
            // Safety: forms a critical section around the test-and-set.
            unsafe { port.disable_interrupts() }
        };
        // Safety: interrupts are disabled for the duration of this access.
        let acquired = unsafe {
            if *self.0.get() {
                false
            } else {
                *self.0.get() = true;
                true
            }
        };
        // Safety: restores the level this call observed on entry.
        unsafe { port::installed().set_interrupt_level(previous) };
        acquired
    }

    /// Releases a previously acquired lock.
    pub fn release(&self) {
        let port = port::installed();
        // Safety: forms a critical section around the clear.
        let previous = unsafe { port.disable_interrupts() };
        // Safety: interrupts are disabled for the duration of this access.
        unsafe {
            *self.0.get() = false;
        }
        // Safety: restores the level this call observed on entry.
        unsafe { port.set_interrupt_level(previous) };
    }
}

impl Default for IntLck {
    fn default() -> Self {
        Self::new()
    }
}
