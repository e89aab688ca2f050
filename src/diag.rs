//! Ambient diagnostics: the halt-with-diagnostics assertion and the
//! per-component logging facade (SPEC_FULL.md §4.11).
//!
//! Grounded on `original_source/rtos/kernel/assert.c`/`assert.h`
//! (`system_assert`, disables interrupts then spins forever) and
//! `original_source/rtos/utils/sys_log.c` (`sys_log`, one line per
//! component/message), reimplemented with the `log` crate the way the
//! teacher's hosted pieces use it (`log::trace!`/`log::debug!` with an
//! implicit module-path target), rather than the original's
//! `SYS_LOG_RUNTIME_UPDATE` per-component level table — `log`'s own
//! per-target filtering (set by the embedder's chosen logger) already
//! covers that.

/// Halts the kernel after logging a diagnostic, mirroring `system_assert`'s
/// "disable interrupts, then spin forever" contract.
///
/// Unlike the original's `ASSERT_ENABLE` build switch, this is always
/// compiled in: an RTOS kernel invariant violation is not a condition any
/// caller should ever recover from or build around.
#[cold]
pub fn halt(message: &str, file: &'static str, line: u32) -> ! {
    log::error!(target: "rtcore::assert", "{file}:{line}: {message}");
    let port = crate::port::installed();
    // Safety: halting, never restored — this call never returns.
    unsafe {
        port.disable_interrupts();
    }
    loop {
        core::hint::spin_loop();
    }
}

/// Halts the kernel if `cond` is false, logging the stringified condition,
/// file and line, or a caller-supplied static message. The kernel-internal
/// equivalent of `ASSERT`/`ASSERT_INFO`.
///
/// Takes only `&'static str` messages, never a format string: this kernel
/// has no heap (§3 Non-goals), so there is nowhere to assemble a formatted
/// diagnostic.
#[macro_export]
macro_rules! kassert {
    ($cond:expr) => {
        if !($cond) {
            $crate::diag::halt(concat!("assertion failed: ", stringify!($cond)), file!(), line!());
        }
    };
    ($cond:expr, $msg:expr) => {
        if !($cond) {
            $crate::diag::halt($msg, file!(), line!());
        }
    };
}
