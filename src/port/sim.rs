//! A hosted [`Port`] backing this crate's own test suite.
//!
//! Grounded on `r3_port_std`'s role in the teacher's workspace: a simulation
//! port that runs each task body on a real OS thread, using a condition
//! variable per task to enforce "only one task's instruction stream ever
//! advances at a time", so the scheduler/condition/sleep/semaphore logic can
//! be exercised deterministically without targeting real hardware. Unlike a
//! real `Port`, there is no machine context to save and restore — the
//! "context" a task is switched to is simply its own OS thread, parked on
//! its gate until switched back to.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use super::{IntrLevel, Port, TaskEntryThunk};

/// A one-slot rendezvous: `wait_for_turn` parks until some other thread
/// calls `signal`.
struct ThreadGate {
    runnable: Mutex<bool>,
    cv: Condvar,
}

impl ThreadGate {
    fn new() -> Self {
        Self {
            runnable: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn wait_for_turn(&self) {
        let mut runnable = self.runnable.lock().unwrap();
        while !*runnable {
            runnable = self.cv.wait(runnable).unwrap();
        }
        *runnable = false;
    }

    fn signal(&self) {
        let mut runnable = self.runnable.lock().unwrap();
        *runnable = true;
        self.cv.notify_one();
    }
}

struct TaskSlot {
    gate: Arc<ThreadGate>,
    pending: Mutex<Option<(TaskEntryThunk, usize)>>,
    spawned: AtomicBool,
}

/// A test-only [`Port`]. One soft tick is not actually delivered by any
/// timer in this simulation; tests that exercise [`crate::sleep`] advance it
/// explicitly via [`crate::tick::advance_system_tick`] and
/// [`crate::sleep::service_tick`].
pub struct SimPort {
    ticks_per_sec: u32,
    interrupt_disabled: Mutex<bool>,
    slots: Mutex<HashMap<usize, Arc<TaskSlot>>>,
}

impl SimPort {
    pub fn new(ticks_per_sec: u32) -> Self {
        Self {
            ticks_per_sec,
            interrupt_disabled: Mutex::new(false),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot_for(&self, key: usize) -> Arc<TaskSlot> {
        self.slots
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| {
                Arc::new(TaskSlot {
                    gate: Arc::new(ThreadGate::new()),
                    pending: Mutex::new(None),
                    spawned: AtomicBool::new(false),
                })
            })
            .clone()
    }

    /// Makes sure `key`'s task is either already running on its own thread
    /// (in which case just wake it) or spawns that thread for the first
    /// time, consuming the `(entry, arg)` recorded by `init_stack`.
    fn ensure_running(&self, key: usize) {
        let slot = self.slot_for(key);
        if slot.spawned.swap(true, Ordering::SeqCst) {
            slot.gate.signal();
            return;
        }
        let (entry, arg) = slot
            .pending
            .lock()
            .unwrap()
            .take()
            .expect("rtcore sim port: dispatched a task with no initial context");
        let gate = slot.gate.clone();
        thread::spawn(move || {
            gate.wait_for_turn();
            entry(arg);
        });
    }
}

// Safety: every field is behind a `std::sync` primitive.
unsafe impl Port for SimPort {
    fn ticks_per_sec(&self) -> u32 {
        self.ticks_per_sec
    }

    unsafe fn disable_interrupts(&self) -> IntrLevel {
        let mut disabled = self.interrupt_disabled.lock().unwrap();
        let previous = IntrLevel(*disabled as u32);
        *disabled = true;
        previous
    }

    unsafe fn set_interrupt_level(&self, level: IntrLevel) {
        *self.interrupt_disabled.lock().unwrap() = level.0 != 0;
    }

    fn interrupt_level(&self) -> IntrLevel {
        IntrLevel(*self.interrupt_disabled.lock().unwrap() as u32)
    }

    unsafe fn init_stack(&self, stack: &mut [u8], entry: TaskEntryThunk, arg: usize) -> *mut u8 {
        let tos = stack.as_mut_ptr();
        let slot = self.slot_for(tos as usize);
        *slot.pending.lock().unwrap() = Some((entry, arg));
        tos
    }

    unsafe fn first_dispatch(&self, tos: *mut u8) -> ! {
        self.ensure_running(tos as usize);
        // This thread (whoever called `kernel_run`) has no task identity of
        // its own in this model: every task is its own real OS thread, so
        // there is nothing for this call to ever switch back to.
        loop {
            thread::park();
        }
    }

    unsafe fn switch_context(&self, save_tos: *mut *mut u8, restore_tos: *mut u8) {
        // The "context" at `*save_tos` is just this task's stable thread
        // identity (its stack's base address, written once by `init_stack`),
        // so there is nothing to actually save here.
        let save_key = unsafe { *save_tos } as usize;
        self.ensure_running(restore_tos as usize);
        let save_slot = self.slot_for(save_key);
        save_slot.gate.wait_for_turn();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_interrupts_reports_previous_level() {
        let port = SimPort::new(1000);
        let first = unsafe { port.disable_interrupts() };
        assert_eq!(first, IntrLevel(0));
        let second = unsafe { port.disable_interrupts() };
        assert_eq!(second, IntrLevel(1));
        unsafe { port.set_interrupt_level(second) };
        assert_eq!(port.interrupt_level(), IntrLevel(1));
        unsafe { port.set_interrupt_level(first) };
        assert_eq!(port.interrupt_level(), IntrLevel(0));
    }
}
