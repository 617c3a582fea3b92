//! Kernel heap: a fixed virtual window, bump
//! allocator over kernel pages mapped once at boot.
//!
//! Grounded on the same allocation-without-coalescing philosophy as
//! [`crate::pagealloc::PageAllocator`], one level up: rather than handing
//! out raw 4 KiB frames, it carves arbitrary-sized, arbitrary-aligned
//! slices out of a range of already-mapped virtual memory. There is no
//! `dealloc` in the real sense — freed memory is never reclaimed, which
//! is the documented cost of a bump allocator and acceptable for a
//! kernel heap used only for short-lived ELF-load and VFS-read buffers.

use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::memlayout::{KHEAP_SIZE, KHEAP_START};
use crate::pagealloc::PAGE_ALLOCATOR;
use crate::paging::{Access, MapMode, Mapper, PGSIZE};

pub struct KernelHeap {
    next: AtomicUsize,
    mapped_to: AtomicUsize,
}

/// Not registered as `#[global_allocator]` when this crate is pulled
/// in as a library (`kernel_as_a_lib`) — a dependent binary (an
/// in-kernel test harness, a host tool) supplies its own instance of
/// this same type instead, since only one crate in the final binary
/// may claim the slot. Never registered under `cargo test` either: the
/// host `#[cfg(test)]` modules run under `std`, whose own allocator must
/// stay in place, since `Mapper::for_current`'s `mov cr3` is a
/// privileged instruction that would fault outside ring 0.
#[cfg_attr(not(any(test, feature = "kernel_as_a_lib")), global_allocator)]
pub static KERNEL_HEAP: KernelHeap = KernelHeap::new();

impl KernelHeap {
    pub const fn new() -> Self {
        KernelHeap { next: AtomicUsize::new(0), mapped_to: AtomicUsize::new(0) }
    }

    /// Reserve the heap's virtual window. Mapping of individual pages is
    /// deferred to first touch, the way `alloc` below grows `mapped_to`
    /// on demand; until `init` runs, `next` is zero and every allocation
    /// would start from address zero, so this must run once at boot
    /// before `alloc` is reachable.
    pub fn init(&self) {
        self.next.store(KHEAP_START, Ordering::Relaxed);
        self.mapped_to.store(KHEAP_START, Ordering::Relaxed);
    }

    fn ensure_mapped(&self, up_to: usize) {
        let mapper = Mapper::for_current();
        loop {
            let mapped = self.mapped_to.load(Ordering::Relaxed);
            if mapped >= up_to {
                break;
            }
            if mapped >= KHEAP_START + KHEAP_SIZE {
                panic!("kheap: virtual window exhausted");
            }
            let frame = PAGE_ALLOCATOR.alloc();
            mapper.map(
                mapped,
                crate::memlayout::v2p(frame as usize),
                Access::Kernel,
                MapMode::Panic,
            );
            self.mapped_to.store(mapped + PGSIZE, Ordering::Relaxed);
        }
    }
}

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        loop {
            let start = self.next.load(Ordering::Relaxed);
            let aligned = (start + layout.align() - 1) & !(layout.align() - 1);
            let end = aligned + layout.size();
            if end > KHEAP_START + KHEAP_SIZE {
                return core::ptr::null_mut();
            }
            if self
                .next
                .compare_exchange(start, end, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                self.ensure_mapped(crate::paging::pg_round_up(end));
                return aligned as *mut u8;
            }
        }
    }

    unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {
        // Bump allocator: no reclamation. See module docs.
    }
}
