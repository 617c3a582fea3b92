//! QEMU `isa-debug-exit` helper for the in-kernel test harness. Not
//! part of the kernel a real loader boots — gated behind
//! `kernel_as_a_lib` like the rest of this crate's library-only
//! surface.

use crate::cpuops::outl;

#[derive(Clone, Copy)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

/// Write `code` to the `isa-debug-exit` device (QEMU started with
/// `-device isa-debug-exit,iobase=0xf4,iosize=0x04`), which terminates
/// the VM with a status derived from it.
pub fn exit_qemu(code: QemuExitCode) -> ! {
    unsafe { outl(0xf4, code as u32) };
    loop {
        crate::cpuops::hlt();
    }
}
