//! Trap/interrupt dispatch.
//!
//! There is no trampoline page mapped identically into kernel and user
//! address spaces: every process's page table already maps the kernel
//! half identically, so a trap can be handled on the process's own
//! kernel stack without ever switching CR3. Each vector gets its own
//! tiny assembly stub (x86 doesn't tell a handler which vector fired)
//! that pushes a placeholder error code where hardware doesn't supply
//! one, pushes the vector number, then saves every general-purpose
//! register before calling into [`dispatch`].

use core::arch::{asm, global_asm};

use crate::cpuops::read_cr2;
use crate::idt::{VECTOR_GENERAL_PROTECTION, VECTOR_KEYBOARD, VECTOR_PAGE_FAULT, VECTOR_SYSCALL, VECTOR_TIMER};
use crate::{pic, proc};

/// Matches the stub push order in the `stub_body!` macro exactly:
/// fields run from the stack pointer at entry (lowest address, most
/// recently pushed) up to the hardware-pushed `ss` (highest address).
/// `es`/`ds` sit above the general-purpose registers: long mode has no
/// `push ds`/`push es` encoding, so the stubs capture them into a
/// scratch GPR (already safely saved by that point) after the
/// general-purpose push sequence, not interleaved with it.
#[repr(C)]
pub struct TrapFrame {
    pub es: u64,
    pub ds: u64,
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub vector: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

// Shared epilogue: restores `es`/`ds` through a scratch GPR, pops the
// general-purpose registers a stub pushed, skips the vector/error-code
// pair, and `iretq`s back to whatever `cs:rip` the trap frame holds.
// `fork_ret` jumps in here directly for a process's first activation,
// landing on exactly this code path with no separate "trampoline"
// needed.
global_asm!(
    ".global trap_return",
    "trap_return:",
    "pop rax", "mov es, ax",
    "pop rax", "mov ds, ax",
    "pop r15", "pop r14", "pop r13", "pop r12",
    "pop r11", "pop r10", "pop r9", "pop r8",
    "pop rbp", "pop rdi", "pop rsi", "pop rdx",
    "pop rcx", "pop rbx", "pop rax",
    "add rsp, 16",
    "iretq",
);

extern "C" {
    pub fn trap_return();
}

macro_rules! stub_body {
    ($name:ident, $vector:expr, has_error_code) => {
        global_asm!(
            concat!(".global ", stringify!($name)),
            concat!(stringify!($name), ":"),
            "push {vector}",
            "push rax", "push rbx", "push rcx", "push rdx",
            "push rsi", "push rdi", "push rbp",
            "push r8", "push r9", "push r10", "push r11",
            "push r12", "push r13", "push r14", "push r15",
            "mov ax, ds", "movzx eax, ax", "push rax",
            "mov ax, es", "movzx eax, ax", "push rax",
            "mov rdi, rsp",
            "call {dispatch}",
            "jmp {trap_return}",
            vector = const $vector,
            dispatch = sym dispatch,
            trap_return = sym trap_return,
        );
    };
    ($name:ident, $vector:expr, no_error_code) => {
        global_asm!(
            concat!(".global ", stringify!($name)),
            concat!(stringify!($name), ":"),
            "push 0",
            "push {vector}",
            "push rax", "push rbx", "push rcx", "push rdx",
            "push rsi", "push rdi", "push rbp",
            "push r8", "push r9", "push r10", "push r11",
            "push r12", "push r13", "push r14", "push r15",
            "mov ax, ds", "movzx eax, ax", "push rax",
            "mov ax, es", "movzx eax, ax", "push rax",
            "mov rdi, rsp",
            "call {dispatch}",
            "jmp {trap_return}",
            vector = const $vector,
            dispatch = sym dispatch,
            trap_return = sym trap_return,
        );
    };
}

macro_rules! declare_stub {
    ($name:ident, $vector:expr, $has_err:ident) => {
        extern "C" {
            fn $name();
        }
        stub_body!($name, $vector, $has_err);
    };
}

declare_stub!(stub_divide_error, 0, no_error_code);
declare_stub!(stub_debug, 1, no_error_code);
declare_stub!(stub_nmi, 2, no_error_code);
declare_stub!(stub_breakpoint, 3, no_error_code);
declare_stub!(stub_overflow, 4, no_error_code);
declare_stub!(stub_bound_range, 5, no_error_code);
declare_stub!(stub_invalid_opcode, 6, no_error_code);
declare_stub!(stub_device_not_available, 7, no_error_code);
declare_stub!(stub_double_fault, 8, has_error_code);
declare_stub!(stub_invalid_tss, 10, has_error_code);
declare_stub!(stub_segment_not_present, 11, has_error_code);
declare_stub!(stub_stack_fault, 12, has_error_code);
declare_stub!(stub_general_protection, 13, has_error_code);
declare_stub!(stub_page_fault, 14, has_error_code);
declare_stub!(stub_x87_fp, 16, no_error_code);
declare_stub!(stub_alignment_check, 17, has_error_code);
declare_stub!(stub_machine_check, 18, no_error_code);
declare_stub!(stub_simd_fp, 19, no_error_code);
declare_stub!(stub_timer, 0x20, no_error_code);
declare_stub!(stub_keyboard, 0x21, no_error_code);
declare_stub!(stub_syscall, 0x40, no_error_code);

/// Address of the assembly stub installed for `vector`, or `None` if
/// this kernel doesn't dispatch that vector (its IDT entry is left
/// not-present; a hardware fault landing there escalates to #GP, and
/// ultimately a triple fault — a known limitation, since only the
/// vectors this kernel actually uses have a handler).
pub fn stub_for(vector: u8) -> Option<u64> {
    let addr = match vector {
        0 => stub_divide_error as u64,
        1 => stub_debug as u64,
        2 => stub_nmi as u64,
        3 => stub_breakpoint as u64,
        4 => stub_overflow as u64,
        5 => stub_bound_range as u64,
        6 => stub_invalid_opcode as u64,
        7 => stub_device_not_available as u64,
        8 => stub_double_fault as u64,
        10 => stub_invalid_tss as u64,
        11 => stub_segment_not_present as u64,
        12 => stub_stack_fault as u64,
        13 => stub_general_protection as u64,
        14 => stub_page_fault as u64,
        16 => stub_x87_fp as u64,
        17 => stub_alignment_check as u64,
        18 => stub_machine_check as u64,
        19 => stub_simd_fp as u64,
        0x20 => stub_timer as u64,
        0x21 => stub_keyboard as u64,
        0x40 => stub_syscall as u64,
        _ => return None,
    };
    Some(addr)
}

/// Single Rust-side entry point every stub calls into.
///
/// Routes by vector: the syscall gate hands off to
/// [`crate::syscall::dispatch`], the timer and keyboard IRQs are
/// acknowledged and handled, and any other vector is treated as fatal
/// — this kernel has no in-kernel fault recovery story.
extern "C" fn dispatch(tf: *mut TrapFrame) {
    let tf = unsafe { &mut *tf };
    match tf.vector as u8 {
        v if v == VECTOR_SYSCALL => {
            let ret = crate::syscall::dispatch(tf);
            tf.rax = ret;
        }
        v if v == VECTOR_TIMER => {
            pic::send_eoi(0);
            proc::yield_if_runnable();
        }
        v if v == VECTOR_KEYBOARD => {
            pic::send_eoi(1);
            crate::console::handle_keyboard_irq();
        }
        v if v == VECTOR_PAGE_FAULT => {
            let fault_addr = read_cr2();
            panic!(
                "page fault at {:#x}: rip={:#x} error_code={:#x}",
                fault_addr, tf.rip, tf.error_code
            );
        }
        v if v == VECTOR_GENERAL_PROTECTION => {
            panic!("general protection fault: rip={:#x} error_code={:#x}", tf.rip, tf.error_code);
        }
        other => panic!("unhandled trap vector {:#x} at rip={:#x}", other, tf.rip),
    }
}

/// Enable interrupts once the IDT/GDT/PIC are fully installed.
pub fn enable() {
    unsafe { asm!("sti", options(nomem, nostack)) };
}
