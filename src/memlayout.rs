//! Virtual memory layout.
//!
//! The bootloader hands the kernel a higher-half direct physical map at
//! [`phys_offset`]: physical address `P` is readable at virtual
//! address `phys_offset() + P`. Everything else here is fixed by the
//! kernel itself, the layout constants a platform port picks once and
//! holds steady.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::paging::PGSIZE;
use crate::param::KSTACK_PAGES;

/// Set once at boot from the loader's direct-map offset. Every later
/// `phys_offset()` call reads it back; nothing may mutate it after boot.
static PHYS_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Record the bootloader-reported direct-map offset. Must be called
/// exactly once, before any other subsystem touches physical memory.
pub fn set_phys_offset(offset: u64) {
    PHYS_OFFSET.store(offset, Ordering::Relaxed);
}

/// physical address P -> kernel-visible virtual address `phys_offset()+P`.
pub fn phys_offset() -> u64 {
    PHYS_OFFSET.load(Ordering::Relaxed)
}

pub fn p2v(phys: u64) -> usize {
    (phys + phys_offset()) as usize
}

pub fn v2p(virt: usize) -> u64 {
    let off = phys_offset();
    debug_assert!(virt as u64 >= off, "v2p: address below the direct map");
    virt as u64 - off
}

/// Top of the canonical, higher-half kernel address range. Kernel
/// mappings (PML4 indices 256..511) live below this; one guard page
/// separates the highest kernel stack from it.
pub const KERNEL_VA_TOP: usize = 0xFFFF_FFFF_FFFF_F000;

/// Kernel stacks are mapped high in every process's virtual space, each
/// preceded by an (unmapped) guard page.
pub fn kstack_top(slot: usize) -> usize {
    KERNEL_VA_TOP - slot * (KSTACK_PAGES + 1) * PGSIZE
}

pub fn kstack_base(slot: usize) -> usize {
    kstack_top(slot) - KSTACK_PAGES * PGSIZE
}

/// Fixed single-page user stack top for freshly `exec`'d images.
pub const USER_STACK_TOP: usize = 0x0000_7FFF_FFFF_F000;
pub const USER_STACK_PAGES: usize = 1;

/// Virtual window reserved for [`crate::kheap`]'s bump allocator.
pub const KHEAP_START: usize = 0xFFFF_FF00_0000_0000;
pub const KHEAP_SIZE: usize = 16 * 1024 * 1024;
