//! VFS interface consumed by the core.
//!
//! The dispatcher behind this trait — FAT16 driver, ATA PIO, GPT
//! discovery — is out of scope; this module only fixes the
//! shape the core calls through, the way `bootinfo.rs` fixes the
//! loader boundary.

use crate::param::MAXPATH;

/// One `getdirents` record: a NUL-terminated name in a fixed-width
/// slot.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirEntry {
    pub name: [u8; 256],
    pub kind: u8,
}

impl DirEntry {
    pub fn name_str(&self) -> &str {
        let nul = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..nul]).unwrap_or("")
    }
}

const _: () = assert!(core::mem::size_of::<DirEntry>() == 257);

/// A VFS-owned handle to an open file or directory. Opaque to the
/// core; stored by value inside [`crate::file::OpenFile`].
#[derive(Clone, Copy)]
pub struct VfsHandle {
    pub id: u64,
}

/// Implemented by whatever concrete VFS dispatcher is linked in.
/// The core only ever calls through this interface.
pub trait Vfs: Sync {
    fn open(&self, path: &str) -> Option<VfsHandle>;
    fn read(&self, handle: &mut VfsHandle, buf: &mut [u8]) -> usize;
    fn write(&self, handle: &VfsHandle, buf: &[u8]) -> usize;
    fn getdirents(&self, handle: &mut VfsHandle, buf: &mut [DirEntry]) -> Option<usize>;
    fn close(&self, handle: VfsHandle);
}

/// A VFS that never has anything mounted: `open` always fails. Used
/// until a real dispatcher registers itself with [`set_vfs`]; keeps
/// the syscall layer well-defined even with no filesystem driver
/// linked in, since the VFS dispatcher itself is out of scope here.
pub struct NullVfs;

impl Vfs for NullVfs {
    fn open(&self, _path: &str) -> Option<VfsHandle> {
        None
    }
    fn read(&self, _handle: &mut VfsHandle, _buf: &mut [u8]) -> usize {
        0
    }
    fn write(&self, _handle: &VfsHandle, _buf: &[u8]) -> usize {
        0
    }
    fn getdirents(&self, _handle: &mut VfsHandle, _buf: &mut [DirEntry]) -> Option<usize> {
        None
    }
    fn close(&self, _handle: VfsHandle) {}
}

static NULL_VFS: NullVfs = NullVfs;
static mut ACTIVE_VFS: &'static dyn Vfs = &NULL_VFS;

/// Install the real VFS dispatcher. Must be called at most once,
/// before any syscall can reach [`vfs`].
///
/// # Safety
/// Must run before any other CPU (or interrupt handler) can observe
/// `ACTIVE_VFS`; in this single-CPU kernel that means before
/// interrupts are enabled.
pub unsafe fn set_vfs(v: &'static dyn Vfs) {
    ACTIVE_VFS = v;
}

pub fn vfs() -> &'static dyn Vfs {
    unsafe { ACTIVE_VFS }
}

pub fn path_too_long(path: &str) -> bool {
    path.len() + 1 >= MAXPATH
}
