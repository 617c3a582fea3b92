//! Exercises `alloc_process` end to end: kernel stack mapping, a fresh
//! per-process address space, and the process-table invariants that
//! depend on real paging hardware rather than pure logic, so they
//! cannot live in `proc.rs`'s host `#[cfg(test)]` module.
//!
//! `ProcId` and the scheduler's notion of "current process" are private
//! to `proc.rs`; reaching fork/exit/wait from outside would mean
//! running the (never-returning) scheduler loop itself. This harness
//! stays at the boundary that's both reachable and hardware-dependent:
//! allocate a handful of slots and check what the process table
//! promises about them.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use tsukuyomi::bootinfo::MemoryRegion;
use tsukuyomi::pagealloc::PAGE_ALLOCATOR;
use tsukuyomi::proc::{self, State};
use tsukuyomi::qemu_exit::{exit_qemu, QemuExitCode};
use tsukuyomi::{cpuops, memlayout, paging};

/// Backing store for the synthetic "physical" memory this harness hands
/// to the page allocator. A real boot supplies an actual memory map;
/// here the harness's own static BSS plays that role, with the direct
/// map offset fixed at zero so physical and virtual addresses coincide.
const SCRATCH_PAGES: usize = 160;

#[repr(align(4096))]
struct Scratch([u8; SCRATCH_PAGES * 4096]);

static mut SCRATCH: Scratch = Scratch([0; SCRATCH_PAGES * 4096]);

#[no_mangle]
pub extern "C" fn _start() -> ! {
    tsukuyomi::logger::init();
    log::info!("proc_smoke: starting");

    unsafe { setup() };
    test_alloc_process_invariants();

    log::info!("proc_smoke: all tests passed");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("proc_smoke: {}", info);
    exit_qemu(QemuExitCode::Failed)
}

unsafe fn setup() {
    memlayout::set_phys_offset(0);

    let base = core::ptr::addr_of_mut!(SCRATCH) as u64;
    let region = MemoryRegion { start: base, len: (SCRATCH_PAGES * 4096) as u64, usable: true };
    PAGE_ALLOCATOR.init(core::slice::from_ref(&region));

    // Whatever table the loader already runs under maps this harness's
    // own code and the scratch region; adopt it as the master table the
    // way `kmain` adopts the bootloader's.
    paging::set_kernel_pml4(cpuops::read_cr3() & 0x000F_FFFF_FFFF_F000);
}

/// Two freshly allocated slots never alias: distinct pids, distinct
/// backing PML4s, both start life in `Embryo` with an empty cwd of `/`.
fn test_alloc_process_invariants() {
    let a = proc::alloc_process().expect("first alloc_process failed");
    assert_eq!(a.state, State::Embryo);
    assert_eq!(a.wait_channel, 0);
    assert_eq!(a.cwd_str(), "/");
    let a_pid = a.pid;
    let a_pt = a.pagetable_phys;

    let b = proc::alloc_process().expect("second alloc_process failed");
    assert_eq!(b.state, State::Embryo);
    let b_pid = b.pid;
    let b_pt = b.pagetable_phys;

    assert_ne!(a_pid, b_pid, "two live processes must not share a pid");
    assert_ne!(a_pt, b_pt, "two live processes must not share a page table");

    log::info!("  alloc_process: pid {} and {} hold distinct address spaces", a_pid, b_pid);
}
