//! Tsukuyomi: a monolithic kernel core for preemptible, isolated user
//! processes on 64-bit x86.
//!
//! The boot entry protocol itself — the multiboot-style loader, its
//! ELF/module packaging, its handoff calling convention — is out of
//! scope. What this crate assumes is narrow and fixed:
//! the loader jumps to [`kmain`] with a `&'static` [`bootinfo::BootInfo`]
//! in `rdi` (the first System V integer argument), already running in
//! long mode with the higher-half direct map active and some top-level
//! page table loaded into `CR3` that identity-maps the kernel the way
//! every later process table must.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(any(test, feature = "kernel_as_a_lib")), no_main)]

extern crate alloc;

pub mod bootinfo;
pub mod console;
pub mod context;
pub mod cpuops;
pub mod elf;
pub mod exec;
pub mod file;
pub mod gdt;
pub mod idt;
pub mod kheap;
pub mod logger;
pub mod memlayout;
pub mod pagealloc;
pub mod paging;
pub mod param;
pub mod path;
pub mod pic;
pub mod proc;
#[cfg(feature = "kernel_as_a_lib")]
pub mod qemu_exit;
pub mod spinlock;
pub mod string;
pub mod syscall;
pub mod trap;
pub mod vfs;

/// The first user process this kernel loads. Out-of-scope build
/// tooling is responsible for baking a binary at this path
/// into the loader's module list.
const INIT_PATH: &str = "/init";

#[cfg(not(any(test, feature = "kernel_as_a_lib")))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("kernel panic: {}", info);
    loop {
        cpuops::hlt();
    }
}

/// Bring up every subsystem the process/memory core depends on, load
/// the first user process, and fall into the scheduler loop, which
/// never returns.
///
/// # Safety
/// Must be the first Rust code to run on this CPU, called at most
/// once, with `boot_info` describing a bootloader handoff in long
/// mode, direct map already active, that matches the module docs
/// above in full.
#[cfg(not(feature = "kernel_as_a_lib"))]
#[no_mangle]
pub extern "C" fn kmain(boot_info: &'static bootinfo::BootInfo) -> ! {
    logger::init();
    log::info!("tsukuyomi kernel booting");

    memlayout::set_phys_offset(boot_info.phys_mem_offset);

    pagealloc::PAGE_ALLOCATOR.init(boot_info.memory_map);
    log::debug!("page allocator: {} frames free", pagealloc::PAGE_ALLOCATOR.count_free());

    // The loader's own top-level table already maps the kernel half;
    // capture it as the master table every process's PML4 is seeded
    // from.
    paging::set_kernel_pml4(cpuops::read_cr3() & 0x000F_FFFF_FFFF_F000);

    kheap::KERNEL_HEAP.init();
    log::debug!("kernel heap window reserved");

    // CPU 0's boot stack serves as its scheduler stack; point TSS.rsp0
    // at it until the scheduler installs the first real process.
    gdt::init(memlayout::kstack_top(0));
    idt::init();
    pic::init();
    log::debug!("GDT/IDT/PIC installed");

    unsafe { bootinfo::set_modules(boot_info.modules) };

    proc::userinit(INIT_PATH);
    log::info!("first user process loaded from {}", INIT_PATH);

    trap::enable();
    proc::scheduler();
}
