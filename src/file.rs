//! Per-process open-file handle.
//!
//! An enum tagged over the file kinds this kernel knows about, with
//! reads/writes forwarded to [`crate::vfs`] for everything that isn't
//! the console or a bootloader module.

use crate::vfs::{self, VfsHandle};

/// Tagged variant over the file kinds the core knows about.
/// Stored by value in a process's FD table; `fork` copies the table by
/// value, so every variant here must be plain data — no owned
/// allocations, no destructors to run twice.
#[derive(Clone, Copy)]
pub enum OpenFile {
    /// The console device; read/write go through the keyboard ring
    /// buffer and the framebuffer/UART text console (out of scope
    /// drivers).
    Tty,
    /// A bootloader-preloaded module file, read-only,
    /// with an independent byte offset per descriptor.
    ModuleFile { index: usize, offset: usize },
    /// A file opened through the VFS dispatcher (FAT16, etc.).
    Vfs(VfsHandle),
}

impl OpenFile {
    pub fn read(&mut self, buf: &mut [u8]) -> u64 {
        match self {
            OpenFile::Tty => crate::console::read(buf) as u64,
            OpenFile::ModuleFile { index, offset } => {
                let Some(module) = crate::bootinfo::module_by_index(*index) else {
                    return u64::MAX;
                };
                let bytes = module.bytes();
                if *offset >= bytes.len() {
                    return 0;
                }
                let n = core::cmp::min(buf.len(), bytes.len() - *offset);
                buf[..n].copy_from_slice(&bytes[*offset..*offset + n]);
                *offset += n;
                n as u64
            }
            OpenFile::Vfs(handle) => vfs::vfs().read(handle, buf) as u64,
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> u64 {
        match self {
            OpenFile::Tty => crate::console::write(buf) as u64,
            OpenFile::ModuleFile { .. } => u64::MAX, // module files are read-only
            OpenFile::Vfs(handle) => vfs::vfs().write(handle, buf) as u64,
        }
    }

    pub fn getdirents(&mut self, buf: &mut [u8]) -> u64 {
        match self {
            OpenFile::Vfs(handle) => {
                let entry_size = core::mem::size_of::<vfs::DirEntry>();
                let capacity = buf.len() / entry_size;
                let mut entries = [vfs::DirEntry { name: [0; 256], kind: 0 }; 32];
                let n = core::cmp::min(capacity, entries.len());
                match vfs::vfs().getdirents(handle, &mut entries[..n]) {
                    Some(count) => {
                        for i in 0..count {
                            let bytes = unsafe {
                                core::slice::from_raw_parts(
                                    &entries[i] as *const vfs::DirEntry as *const u8,
                                    entry_size,
                                )
                            };
                            buf[i * entry_size..(i + 1) * entry_size].copy_from_slice(bytes);
                        }
                        count as u64
                    }
                    None => u64::MAX,
                }
            }
            _ => u64::MAX,
        }
    }

    pub fn close(self) {
        if let OpenFile::Vfs(handle) = self {
            vfs::vfs().close(handle);
        }
    }
}
