//! GDT/TSS: a fixed 7-slot descriptor table per CPU —
//! null, kernel code, kernel data, user code, user data, and a 16-byte
//! TSS descriptor pair — plus the one TSS itself.
//!
//! Hand-rolled rather than built on the `x86_64` crate's
//! `GlobalDescriptorTable`/`TaskStateSegment` wrappers: the trap
//! protocol this kernel implements (full general-register capture on
//! every vector) needs raw control over entry layout that those
//! wrappers don't expose, so for consistency every descriptor table in
//! this kernel — GDT, TSS and IDT alike — is built the same way, as a
//! plain array of packed structs.

use core::arch::asm;
use core::mem::size_of;

pub const SEL_NULL: u16 = 0 << 3;
pub const SEL_KCODE: u16 = 1 << 3;
pub const SEL_KDATA: u16 = 2 << 3;
pub const SEL_UCODE: u16 = (3 << 3) | 3; // RPL=3
pub const SEL_UDATA: u16 = (4 << 3) | 3;
pub const SEL_TSS: u16 = 5 << 3;

const GDT_ENTRIES: usize = 7; // null, kcode, kdata, ucode, udata, tss(x2)

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        GdtEntry { limit_low: 0, base_low: 0, base_mid: 0, access: 0, granularity: 0, base_high: 0 }
    }

    const fn flat(access: u8, granularity: u8) -> Self {
        GdtEntry {
            limit_low: 0xFFFF,
            base_low: 0,
            base_mid: 0,
            access,
            granularity,
            base_high: 0,
        }
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct TssDescriptorLow {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct TssDescriptorHigh {
    base_upper: u32,
    reserved: u32,
}

#[repr(C, packed)]
struct GdtTable {
    null: GdtEntry,
    kcode: GdtEntry,
    kdata: GdtEntry,
    ucode: GdtEntry,
    udata: GdtEntry,
    tss_low: TssDescriptorLow,
    tss_high: TssDescriptorHigh,
}

#[repr(C, packed)]
pub struct Tss {
    reserved0: u32,
    pub rsp0: u64,
    rsp1: u64,
    rsp2: u64,
    reserved1: u64,
    ist: [u64; 7],
    reserved2: u64,
    reserved3: u16,
    iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        Tss {
            reserved0: 0,
            rsp0: 0,
            rsp1: 0,
            rsp2: 0,
            reserved1: 0,
            ist: [0; 7],
            reserved2: 0,
            reserved3: 0,
            iomap_base: size_of::<Tss>() as u16,
        }
    }
}

#[repr(C)]
struct DescriptorTablePointer {
    limit: u16,
    base: u64,
}

/// Per-CPU GDT+TSS pair.
/// Single logical CPU only, so one static instance.
pub struct CpuTables {
    gdt: GdtTable,
    tss: Tss,
}

unsafe impl Sync for CpuTables {}

pub static mut CPU0_TABLES: CpuTables = CpuTables {
    gdt: GdtTable {
        null: GdtEntry::null(),
        kcode: GdtEntry::flat(0x9A, 0x20), // present, ring0, code, long-mode (L bit)
        kdata: GdtEntry::flat(0x92, 0x00), // present, ring0, data
        ucode: GdtEntry::flat(0xFA, 0x20), // present, ring3, code, long-mode
        udata: GdtEntry::flat(0xF2, 0x00), // present, ring3, data
        tss_low: TssDescriptorLow { limit_low: 0, base_low: 0, base_mid: 0, access: 0x89, granularity: 0, base_high: 0 },
        tss_high: TssDescriptorHigh { base_upper: 0, reserved: 0 },
    },
    tss: Tss::new(),
};

/// Install the GDT, reload segment registers and load the TSS.
/// Must run once per CPU before interrupts are enabled.
pub fn init(kstack_top_for_cpu: usize) {
    unsafe {
        let tables = &mut CPU0_TABLES;
        let tss_addr = &tables.tss as *const Tss as u64;
        let tss_size = (size_of::<Tss>() - 1) as u16;

        tables.gdt.tss_low.limit_low = tss_size;
        tables.gdt.tss_low.base_low = tss_addr as u16;
        tables.gdt.tss_low.base_mid = (tss_addr >> 16) as u8;
        tables.gdt.tss_low.base_high = (tss_addr >> 24) as u8;
        tables.gdt.tss_high.base_upper = (tss_addr >> 32) as u32;

        tables.tss.rsp0 = kstack_top_for_cpu as u64;

        let ptr = DescriptorTablePointer {
            limit: (size_of::<GdtTable>() - 1) as u16,
            base: &tables.gdt as *const GdtTable as u64,
        };
        asm!("lgdt [{}]", in(reg) &ptr, options(readonly, nostack));

        reload_segments();

        asm!("ltr {:x}", in(reg) SEL_TSS, options(nostack));
    }
}

/// `CS` can only be reloaded via a far jump/return; the other segment
/// registers load directly.
unsafe fn reload_segments() {
    asm!(
        "push {sel}",
        "lea {tmp}, [55f + rip]",
        "push {tmp}",
        "retfq",
        "55:",
        "mov ax, {kdata:x}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "mov ss, ax",
        sel = in(reg) SEL_KCODE as u64,
        tmp = out(reg) _,
        kdata = in(reg) SEL_KDATA,
        out("ax") _,
    );
}

/// Update RSP0 so the next ring3->ring0 transition lands on `proc`'s
/// kernel stack. Called by the scheduler each time it switches in a
/// different process.
pub fn set_kernel_stack(top: usize) {
    unsafe {
        CPU0_TABLES.tss.rsp0 = top as u64;
    }
}
