//! IRQ-safe spinning mutex.
//!
//! A test-and-set spinlock with nested push_off/pop_off interrupt
//! discipline: the first `acquire` on a CPU disables interrupts and
//! remembers whether they were enabled, nested acquires just bump a
//! depth counter, and interrupts are only re-enabled once the
//! outermost lock releases. Built on the primitives in
//! [`crate::cpuops`].

use core::sync::atomic::AtomicBool;

use crate::cpuops::{cli, interrupts_enabled, pause, sti, test_and_set, clear};
use crate::proc::mycpu;

pub struct Spinlock {
    locked: AtomicBool,
    /// Interrupt state of this CPU the moment `acquire` disabled them,
    /// restored by the matching `release`. Debug-only name for panics.
    name: &'static str,
}

impl Spinlock {
    pub const fn new(name: &'static str) -> Self {
        Spinlock {
            locked: AtomicBool::new(false),
            name,
        }
    }

    /// Acquire the lock. Disables interrupts first (recording whether
    /// they were enabled, via the per-CPU push/pop-off counter) so an
    /// interrupt on this CPU can never try to retake a lock this CPU
    /// already holds.
    pub fn acquire(&self) {
        push_off();
        if self.holding() {
            panic!("spinlock {}: recursive acquire", self.name);
        }

        while test_and_set(&self.locked) {
            while self.locked.load(core::sync::atomic::Ordering::Relaxed) {
                pause();
            }
        }
    }

    /// Release the lock, re-enabling interrupts iff this call's matching
    /// `acquire` is the one that disabled them.
    pub fn release(&self) {
        if !self.locked.load(core::sync::atomic::Ordering::Relaxed) {
            panic!("spinlock {}: release while not held", self.name);
        }
        clear(&self.locked);
        pop_off();
    }

    pub fn holding(&self) -> bool {
        self.locked.load(core::sync::atomic::Ordering::Relaxed)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

unsafe impl Sync for Spinlock {}

/// push_off/pop_off nest like intr_off/intr_on but are matched: it takes
/// as many pop_off()s as push_off()s to restore interrupts, and if
/// interrupts started out disabled, push_off/pop_off leaves them
/// disabled.
pub fn push_off() {
    let was_enabled = interrupts_enabled();
    cli();

    let cpu = mycpu();
    if cpu.noff == 0 {
        cpu.intena = was_enabled;
    }
    cpu.noff += 1;
}

pub fn pop_off() {
    if interrupts_enabled() {
        panic!("pop_off: interrupts already enabled");
    }

    let cpu = mycpu();
    if cpu.noff < 1 {
        panic!("pop_off: unbalanced");
    }
    cpu.noff -= 1;
    if cpu.noff == 0 && cpu.intena {
        sti();
    }
}
