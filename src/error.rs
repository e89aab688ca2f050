//! Kernel-wide result codes (§7).
//!
//! A flat `#[repr(i8)]` enum, in the spirit of `r3_kernel::error`'s small
//! `repr`-typed result enums, simplified from the teacher's
//! `define_suberror!`-generated per-operation sub-error taxonomy (which ties
//! each operation's error set to a large shared `r3_core::kernel::ResultCode`)
//! down to the flat status list this spec actually defines. The exact
//! variants and their meaning come from `condition.h` (`CONDITION_TIMEOUT`)
//! and `semaphore.h` (`SEMAPHORE_BUSY`, `SEMAPHORE_DELETED`) in the original
//! kernel, folded into one status type shared by every blocking primitive.
use core::fmt;

/// Outcome of a blocking or idle-table operation.
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation completed normally.
    Success = 0,
    /// A wait timed out before the condition was satisfied.
    Timeout = -1,
    /// A non-blocking attempt found the resource unavailable.
    Busy = -2,
    /// The condition or semaphore a task was waiting on was torn down while
    /// it was suspended.
    Deleted = -3,
    /// The idle work table has no free slot (`IDLE_NO_SPACE`).
    IdleNoSpace = -4,
    /// A requested idle work entry is not registered (`IDLE_NOT_FOUND`).
    IdleNotFound = -5,
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Success => "success",
            Self::Timeout => "wait timed out",
            Self::Busy => "resource busy",
            Self::Deleted => "condition deleted while suspended",
            Self::IdleNoSpace => "idle work table full",
            Self::IdleNotFound => "idle work entry not found",
        };
        f.write_str(msg)
    }
}
