//! ELF64 loader and process-image replacement.
//!
//! A per-segment walk over `PT_LOAD` headers, mapping each page through
//! [`crate::paging::Mapper`] as it goes. There is no separate "build a
//! fresh page table, commit it, free the old one" step: segments are
//! mapped with [`MapMode::Overwrite`] directly into the current address
//! space, so a partially-loaded image is already the live one.
//! `exec_into` is the one loader this kernel has, keyed off
//! [`crate::bootinfo`]'s module list rather than the VFS, since the
//! module list is always resident.

use crate::bootinfo;
use crate::elf::{ElfHeader, ProgramHeader, ELF_PROG_LOAD};
use crate::gdt::{SEL_UCODE, SEL_UDATA};
use crate::memlayout::{v2p, USER_STACK_PAGES, USER_STACK_TOP};
use crate::pagealloc::PAGE_ALLOCATOR;
use crate::paging::{pg_round_down, pg_round_up, Access, MapMode, Mapper, PGSIZE};
use crate::proc::Process;

/// `RFLAGS` with only the interrupt-enable bit set.
const RFLAGS_IF: u64 = 1 << 9;

/// Parse `path` out of the bootloader module list, map every `PT_LOAD`
/// segment into `p`'s address space with user access in `overwrite`
/// mode, and rewrite `p`'s trap frame to enter the image at its ELF
/// entry point. Leaves `p` unchanged on any parse or
/// range-check failure.
///
/// The previous image's frames (if any) are not reclaimed: this
/// kernel has no record of a process's prior mapped range to tear
/// down, so a
/// re-exec leaks the superseded frames exactly as `wait` leaks a
/// zombie's (documented, not silently different).
pub fn exec_into(p: &mut Process, path: &str) -> Result<(), ()> {
    let (_, module) = bootinfo::find_module_global(path).ok_or(())?;
    let data = module.bytes();
    let elf = ElfHeader::parse(data).ok_or(())?;

    let mapper = Mapper::for_pml4(p.pagetable_phys);

    for i in 0..elf.phnum {
        let ph = ProgramHeader::parse(data, elf, i).ok_or(())?;
        if ph.hdr_type != ELF_PROG_LOAD {
            continue;
        }
        load_segment(&mapper, data, ph)?;
    }

    map_user_stack(&mapper);

    p.set_name(path);
    let tf = p.trapframe_mut();
    unsafe { core::ptr::write_bytes(tf as *mut _ as *mut u8, 0, core::mem::size_of_val(tf)) };
    tf.rip = elf.entry;
    tf.rsp = USER_STACK_TOP as u64;
    tf.cs = SEL_UCODE as u64;
    tf.ss = SEL_UDATA as u64;
    tf.ds = SEL_UDATA as u64;
    tf.es = SEL_UDATA as u64;
    tf.rflags = RFLAGS_IF;

    Ok(())
}

/// Map one `PT_LOAD` segment's pages (zeroed, so the `[filesz, memsz)`
/// tail reads as zero) and copy in its file bytes.
fn load_segment(mapper: &Mapper, data: &[u8], ph: &ProgramHeader) -> Result<(), ()> {
    if ph.memsz < ph.filesz {
        return Err(());
    }
    let file_off = ph.off as usize;
    let file_len = ph.filesz as usize;
    if file_off.checked_add(file_len).ok_or(())? > data.len() {
        return Err(());
    }

    let seg_start = pg_round_down(ph.vaddr as usize);
    let seg_end = pg_round_up((ph.vaddr + ph.memsz) as usize);
    let mut va = seg_start;
    while va < seg_end {
        let frame = PAGE_ALLOCATOR.alloc_zeroed();
        mapper.map(va, v2p(frame as usize), Access::User, MapMode::Overwrite);
        va += PGSIZE;
    }

    copy_into_segment(mapper, ph.vaddr as usize, &data[file_off..file_off + file_len]);
    Ok(())
}

/// Copy `bytes` into the already-mapped pages starting at `vaddr`,
/// crossing page boundaries as needed via the kernel's own direct-map
/// view of each backing frame (the mapping was just installed with
/// user access, but the kernel can still reach it through the
/// physical-memory offset map).
fn copy_into_segment(mapper: &Mapper, vaddr: usize, bytes: &[u8]) {
    let mut written = 0;
    while written < bytes.len() {
        let va = vaddr + written;
        let page_va = pg_round_down(va);
        let page_off = va - page_va;
        let (phys, _) = mapper.translate(page_va).expect("exec: segment page not mapped");
        let n = core::cmp::min(PGSIZE - page_off, bytes.len() - written);
        unsafe {
            core::ptr::copy_nonoverlapping(
                bytes[written..written + n].as_ptr(),
                (crate::memlayout::p2v(phys) + page_off) as *mut u8,
                n,
            );
        }
        written += n;
    }
}

/// Map the fixed single-page user stack at [`USER_STACK_TOP`], with
/// `RSP` left pointing at the top of it.
fn map_user_stack(mapper: &Mapper) {
    let base = USER_STACK_TOP - USER_STACK_PAGES * PGSIZE;
    for i in 0..USER_STACK_PAGES {
        let frame = PAGE_ALLOCATOR.alloc_zeroed();
        mapper.map(base + i * PGSIZE, v2p(frame as usize), Access::User, MapMode::Overwrite);
    }
}
