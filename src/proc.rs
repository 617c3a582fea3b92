//! Process table, scheduler and process lifecycle.
//!
//! The classic allocproc/scheduler/sleep/wakeup/fork/exit/wait shape,
//! with one deliberate change: the parent link is a (slot, generation)
//! pair rather than a raw pointer, so a stale link into a reused slot
//! is detected instead of silently aliasing the wrong process. Context
//! switching goes through the x86 `switch_context` in
//! [`crate::context`].

use core::sync::atomic::{AtomicU64, Ordering};

use alloc::vec::Vec;

use crate::context::{fork_ret_entry, switch_context};
use crate::file::OpenFile;
use crate::gdt;
use crate::memlayout::{kstack_base, kstack_top, p2v};
use crate::pagealloc::PAGE_ALLOCATOR;
use crate::paging::{kernel_pml4_phys, Access, MapMode, Mapper, PGSIZE};
use crate::param::{KSTACK_PAGES, MAXPATH, NCPU, NOFILE, NPROC};
use crate::spinlock::Spinlock;
use crate::string::safestrcpy;
use crate::trap::TrapFrame;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
    Unused,
    Embryo,
    Runnable,
    Running,
    Zombie,
    Sleeping,
}

/// Weak reference to a process-table slot: an index plus the
/// generation the slot had when this id was taken, so a stale parent
/// link that lands on a reused slot is detected rather than silently
/// aliasing the wrong process.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ProcId {
    index: u16,
    generation: u32,
}

pub const NO_CHILD: u64 = u64::MAX;

#[derive(Clone, Copy)]
pub struct Process {
    pub name: [u8; 16],
    pub state: State,
    pub pid: u64,
    parent: Option<ProcId>,
    generation: u32,
    pub pagetable_phys: u64,
    pub trapframe: *mut TrapFrame,
    /// Saved `rsp` for this process while it is not `Running`. Meaningless while `Running`.
    pub context: u64,
    pub exit_status: i32,
    pub files: [Option<OpenFile>; NOFILE],
    pub wait_channel: u64,
    pub cwd: [u8; MAXPATH],
    kstack_slot: usize,
}

impl Process {
    const fn unused(slot: usize) -> Process {
        Process {
            name: [0; 16],
            state: State::Unused,
            pid: 0,
            parent: None,
            generation: 0,
            pagetable_phys: 0,
            trapframe: core::ptr::null_mut(),
            context: 0,
            exit_status: 0,
            files: [None; NOFILE],
            wait_channel: 0,
            cwd: [0; MAXPATH],
            kstack_slot: slot,
        }
    }

    fn id(&self) -> ProcId {
        ProcId { index: self.kstack_slot as u16, generation: self.generation }
    }

    pub fn trapframe_mut(&mut self) -> &mut TrapFrame {
        unsafe { &mut *self.trapframe }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = [0; 16];
        let n = core::cmp::min(15, name.len());
        self.name[..n].copy_from_slice(&name.as_bytes()[..n]);
    }

    pub fn cwd_str(&self) -> &str {
        let nul = self.cwd.iter().position(|&b| b == 0).unwrap_or(0);
        core::str::from_utf8(&self.cwd[..nul]).unwrap_or("/")
    }

    pub fn set_cwd(&mut self, path: &str) {
        safestrcpy(&mut self.cwd, path.as_bytes());
    }
}

struct ProcTable {
    procs: [Process; NPROC],
}

struct ProcTableCell {
    lock: Spinlock,
    inner: core::cell::UnsafeCell<ProcTable>,
}

unsafe impl Sync for ProcTableCell {}

static PTABLE: ProcTableCell = ProcTableCell {
    lock: Spinlock::new("ptable"),
    inner: core::cell::UnsafeCell::new(ProcTable { procs: build_unused_table() }),
};

const fn build_unused_table() -> [Process; NPROC] {
    let mut table = [Process::unused(0); NPROC];
    let mut i = 0;
    while i < NPROC {
        table[i] = Process::unused(i);
        i += 1;
    }
    table
}

impl ProcTableCell {
    fn get(&self) -> &'static mut ProcTable {
        unsafe { &mut *self.inner.get() }
    }
}

static NEXT_PID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy)]
pub struct Cpu {
    pub proc: Option<ProcId>,
    /// Saved `rsp` of the scheduler "thread".
    pub scheduler_context: u64,
    pub noff: u8,
    pub intena: bool,
}

impl Cpu {
    const fn new() -> Cpu {
        Cpu { proc: None, scheduler_context: 0, noff: 0, intena: false }
    }
}

struct CpusCell(core::cell::UnsafeCell<[Cpu; NCPU]>);
unsafe impl Sync for CpusCell {}

static CPUS: CpusCell = CpusCell(core::cell::UnsafeCell::new([Cpu::new(); NCPU]));

/// Single logical CPU: always 0.
pub fn cpuid() -> usize {
    0
}

pub fn mycpu() -> &'static mut Cpu {
    unsafe { &mut (*CPUS.0.get())[cpuid()] }
}

pub fn myproc() -> Option<&'static mut Process> {
    let id = mycpu().proc?;
    let table = PTABLE.get();
    let p = &mut table.procs[id.index as usize];
    if p.generation == id.generation {
        Some(p)
    } else {
        None
    }
}

fn resolve(id: ProcId) -> Option<&'static mut Process> {
    let table = PTABLE.get();
    let p = &mut table.procs[id.index as usize];
    if p.generation == id.generation {
        Some(p)
    } else {
        None
    }
}

/// Map this process's `KSTACK_PAGES`-page kernel stack into the
/// kernel's master table if it isn't already (first use of this
/// table slot). Subsequent reuses of the same slot share the same
/// backing frames — the kernel stack itself is never torn down, only
/// user memory is subject to the documented zombie-leak.
fn ensure_kstack_mapped(slot: usize) {
    let kmapper = Mapper::for_pml4(kernel_pml4_phys());
    let base = kstack_base(slot);
    if kmapper.translate(base).is_some() {
        return;
    }
    for i in 0..KSTACK_PAGES {
        let frame = PAGE_ALLOCATOR.alloc();
        kmapper.map(base + i * PGSIZE, crate::memlayout::v2p(frame as usize), Access::Kernel, MapMode::Panic);
    }
}

/// Allocate a process-table slot in state `Embryo`: its kernel stack is
/// mapped, a fresh user address space is built (kernel half copied
/// from the master table), and its trap frame / initial context are
/// laid out at the top of its kernel stack.
pub fn alloc_process() -> Option<&'static mut Process> {
    let table = PTABLE.get();
    PTABLE.lock.acquire();
    let slot = table.procs.iter().position(|p| p.state == State::Unused);
    let Some(slot) = slot else {
        PTABLE.lock.release();
        return None;
    };
    // Reserve the slot immediately so no other allocation (from an
    // interrupt-driven path) can pick it while we build its address
    // space below, outside the lock.
    table.procs[slot].state = State::Embryo;
    let generation = table.procs[slot].generation.wrapping_add(1);
    let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
    PTABLE.lock.release();

    ensure_kstack_mapped(slot);

    let top = kstack_top(slot);
    let trapframe_addr = top - core::mem::size_of::<TrapFrame>();
    let context_addr = trapframe_addr - core::mem::size_of::<crate::context::Context>();

    unsafe {
        core::ptr::write_bytes(trapframe_addr as *mut u8, 0, core::mem::size_of::<TrapFrame>());
        let ctx = &mut *(context_addr as *mut crate::context::Context);
        *ctx = crate::context::Context { r15: 0, r14: 0, r13: 0, r12: 0, rbp: 0, rbx: 0, rip: fork_ret_entry() };
    }

    let pagetable_phys = Mapper::new_user_address_space().phys_root();

    PTABLE.lock.acquire();
    let p = &mut table.procs[slot];
    p.state = State::Embryo;
    p.pid = pid;
    p.generation = generation;
    p.parent = None;
    p.pagetable_phys = pagetable_phys;
    p.trapframe = trapframe_addr as *mut TrapFrame;
    p.context = context_addr as u64;
    p.exit_status = 0;
    p.files = [None; NOFILE];
    p.wait_channel = 0;
    p.cwd = [0; MAXPATH];
    p.set_cwd("/");
    PTABLE.lock.release();
    Some(p)
}

/// Build the very first process by loading `path` from the boot
/// modules into a freshly allocated process.
pub fn userinit(path: &str) {
    let p = alloc_process().expect("userinit: process table full");
    p.set_name(path);
    crate::exec::exec_into(p, path).expect("userinit: failed to load init image");
    PTABLE.lock.acquire();
    p.state = State::Runnable;
    PTABLE.lock.release();
}

/// Deep-copy `parent`'s user address space and FD table into a new
/// `Embryo` process, return its PID to the caller.
pub fn fork() -> u64 {
    let Some(parent) = myproc() else { return NO_CHILD };
    let Some(child) = alloc_process() else { return NO_CHILD };

    let parent_mapper = Mapper::for_pml4(parent.pagetable_phys);
    let child_mapper = Mapper::for_pml4(child.pagetable_phys);
    let mappings: Vec<(usize, u64)> = parent_mapper.user_mappings();
    for (va, phys) in mappings {
        let frame = PAGE_ALLOCATOR.alloc();
        unsafe {
            core::ptr::copy_nonoverlapping(p2v(phys) as *const u8, frame, PGSIZE);
        }
        child_mapper.map(va, crate::memlayout::v2p(frame as usize), Access::User, MapMode::Panic);
    }

    child.files = parent.files;
    child.cwd = parent.cwd;
    child.name = parent.name;
    unsafe {
        *child.trapframe = *parent.trapframe;
    }
    child.trapframe_mut().rax = 0; // the child observes fork() as returning 0
    child.parent = Some(parent.id());

    let child_pid = child.pid;
    PTABLE.lock.acquire();
    child.state = State::Runnable;
    PTABLE.lock.release();
    child_pid
}

/// Set state `Zombie`, record `status`, and wake the parent if one is
/// waiting. Never returns: the process's own kernel stack is
/// abandoned the moment `switch_context` hands control back to the
/// scheduler.
pub fn exit(status: i32) -> ! {
    PTABLE.lock.acquire();
    let me = myproc().expect("exit: no current process");
    me.exit_status = status;
    me.state = State::Zombie;
    let parent = me.parent;
    // A parent blocked in `wait` sleeps on the address of its own
    // slot; wake that channel now that a zombie is
    // available for it to reap.
    if let Some(parent_id) = parent {
        wakeup_locked(wait_channel_for(parent_id));
    }
    sched();
    unreachable!("exit: switch_context returned into a zombie");
}

/// Reap one zombie child of the calling process, or block until one
/// appears.
pub fn wait() -> u64 {
    let Some(me) = myproc() else { return NO_CHILD };
    let me_id = me.id();
    let channel = wait_channel_for(me_id);

    loop {
        PTABLE.lock.acquire();
        let table = PTABLE.get();
        let mut have_children = false;
        let mut reaped = None;
        for p in table.procs.iter_mut() {
            if p.parent == Some(me_id) {
                have_children = true;
                if p.state == State::Zombie {
                    reaped = Some((p.pid, p.kstack_slot));
                    p.state = State::Unused;
                    p.parent = None;
                    break;
                }
            }
        }
        if let Some((pid, _slot)) = reaped {
            PTABLE.lock.release();
            return pid;
        }
        if !have_children {
            PTABLE.lock.release();
            return NO_CHILD;
        }
        sleep_locked(channel);
        PTABLE.lock.release();
    }
}

/// Log `(pid, name, state)` for every non-`Unused` table slot. Reachable
/// from a debug syscall path; changes nothing, just reports.
pub fn dump() {
    PTABLE.lock.acquire();
    let table = PTABLE.get();
    for p in table.procs.iter() {
        if p.state == State::Unused {
            continue;
        }
        let nul = p.name.iter().position(|&b| b == 0).unwrap_or(p.name.len());
        let name = core::str::from_utf8(&p.name[..nul]).unwrap_or("?");
        log::info!("  pid {} {} {:?}", p.pid, name, p.state);
    }
    PTABLE.lock.release();
}

fn wait_channel_for(id: ProcId) -> u64 {
    // Address of the slot itself: stable for the slot's lifetime and
    // unique enough as a wait-channel value.
    let table = PTABLE.get();
    &table.procs[id.index as usize] as *const Process as u64
}

/// Suspend the current process on `channel`, releasing `lock` while
/// asleep and reacquiring it before returning.
/// `lock` must not be the process-table lock itself.
pub fn sleep(channel: u64, lock: &Spinlock) {
    PTABLE.lock.acquire();
    lock.release();
    sleep_locked(channel);
    PTABLE.lock.release();
    lock.acquire();
}

fn sleep_locked(channel: u64) {
    let me = myproc().expect("sleep: no current process");
    me.wait_channel = channel;
    me.state = State::Sleeping;
    sched();
    let me = myproc().expect("sleep: no current process");
    me.wait_channel = 0;
}

/// Promote every `Sleeping` process waiting on `channel` to
/// `Runnable`. Spurious or duplicate wakes are
/// harmless.
pub fn wakeup(channel: u64) {
    PTABLE.lock.acquire();
    wakeup_locked(channel);
    PTABLE.lock.release();
}

fn wakeup_locked(channel: u64) {
    let table = PTABLE.get();
    for p in table.procs.iter_mut() {
        if p.state == State::Sleeping && p.wait_channel == channel {
            p.state = State::Runnable;
        }
    }
}

/// Demote self to `Runnable` and switch to the scheduler.
pub fn yield_() {
    PTABLE.lock.acquire();
    let me = myproc().expect("yield_: no current process");
    me.state = State::Runnable;
    sched();
    PTABLE.lock.release();
}

/// Called from the timer IRQ. A no-op on the idle scheduler "thread" itself.
pub fn yield_if_runnable() {
    if myproc().is_some() {
        yield_();
    }
}

/// Switch from the current process's context to the CPU's scheduler
/// context. Caller must already hold the process-table lock and have
/// set the process's new state. Saves this process's `rsp` into its own
/// `context` field and loads the scheduler's saved `rsp`, handing
/// control back to wherever the scheduler's own `switch_context` call
/// is blocked — the mirror image of the scheduler loop's switch into a
/// process.
///
/// `intena` is per-CPU, not per-context, and the scheduler and the
/// process being switched out disagree about it (the process's own
/// `push_off` masked interrupts to take the process-table lock); save
/// and restore it around the switch exactly as the teacher's `sched()`
/// does, so the scheduler sees its own value again once this returns.
fn sched() {
    let intena = mycpu().intena;
    let old = &mut myproc().expect("sched: no current process").context as *mut u64;
    let new = mycpu().scheduler_context;
    unsafe { switch_context(old, new) };
    mycpu().intena = intena;
}

/// Called once, with the process-table lock already held by the
/// scheduler, the first time a process is ever activated. Releases the lock the scheduler has been holding across the
/// switch, then falls into the trap-return epilogue shared with every
/// other return from a trap.
#[no_mangle]
pub extern "C" fn fork_ret() -> ! {
    PTABLE.lock.release();
    unsafe {
        core::arch::asm!("jmp {0}", sym crate::trap::trap_return, options(noreturn));
    }
}

/// The scheduler "thread": runs on the boot kernel stack, never
/// returns.
pub fn scheduler() -> ! {
    loop {
        crate::trap::enable();
        PTABLE.lock.acquire();
        let table = PTABLE.get();
        for p in table.procs.iter_mut() {
            if p.state != State::Runnable {
                continue;
            }
            p.state = State::Running;
            mycpu().proc = Some(p.id());
            gdt::set_kernel_stack(kstack_top(p.kstack_slot));
            unsafe { Mapper::for_pml4(p.pagetable_phys).activate() };

            let old = &mut mycpu().scheduler_context as *mut u64;
            let new = p.context;
            unsafe { switch_context(old, new) };

            unsafe { Mapper::for_pml4(kernel_pml4_phys()).activate() };
            mycpu().proc = None;
        }
        PTABLE.lock.release();
    }
}
