//! Callee-saved context switch.
//!
//! The usual trick: save the callee-save register set onto the
//! current stack, swap `rsp`, pop the other set. The register list is
//! exactly the x86-64 System V callee-saved set (`rbx rbp r12 r13 r14
//! r15`).

use core::arch::global_asm;

/// Laid out to match the push order in [`switch_context`]'s assembly:
/// the last-pushed register sits at the lowest address, i.e. at the
/// `rsp` value stashed into a process's `context` pointer.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct Context {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    /// Return address `switch_context`'s own `ret` will pop. For a
    /// process's first activation this is set to `fork_ret` rather than
    /// a real call site.
    pub rip: u64,
}

extern "C" {
    /// `switch_context(old: *mut u64, new: u64)`. Stores the current
    /// `rsp` (after pushing callee-saves) into `*old`, then loads `rsp =
    /// new` and pops the other side's callee-saves, returning into
    /// whatever `rip` that stack encodes.
    pub fn switch_context(old_rsp: *mut u64, new_rsp: u64);
}

global_asm!(
    ".global switch_context",
    "switch_context:",
    "push rbx",
    "push rbp",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov [rdi], rsp",
    "mov rsp, rsi",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbp",
    "pop rbx",
    "ret",
);

/// Address to install as a freshly-allocated process's `context.rip`.
/// `switch_context`'s final `ret` jumps straight here on a process's
/// first activation — `fork_ret` itself releases the
/// process-table lock and drives the trap-return epilogue; there is no
/// second trampoline to fall through.
pub fn fork_ret_entry() -> u64 {
    crate::proc::fork_ret as u64
}
