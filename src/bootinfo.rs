//! The loader/kernel boundary.
//!
//! The multiboot-style loader is out of scope; this module only fixes
//! the shape of what it hands the kernel, so `main.rs` has a single,
//! typed `BootInfo` to read at `kmain` entry.

/// One entry of the bootloader-supplied memory map.
#[derive(Clone, Copy, Debug)]
pub struct MemoryRegion {
    pub start: u64,
    pub len: u64,
    pub usable: bool,
}

/// A pre-loaded module file: a kernel-addressable image with a size and
/// a NUL-terminated path, e.g. the `/init` binary baked into the boot
/// image.
#[derive(Clone, Copy)]
pub struct ModuleFile {
    /// Kernel-virtual address of the module's bytes (already mapped via
    /// the direct map by the time the kernel sees it).
    pub data: *const u8,
    pub len: usize,
    /// NUL-terminated; unused bytes beyond the terminator are zero.
    pub path: [u8; crate::param::MAXPATH],
}

impl ModuleFile {
    pub fn path_str(&self) -> &str {
        let nul = self.path.iter().position(|&b| b == 0).unwrap_or(self.path.len());
        core::str::from_utf8(&self.path[..nul]).unwrap_or("")
    }

    pub fn bytes(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.data, self.len) }
    }
}

/// BGR linear framebuffer description (out-of-scope console driver
/// consumes this; the core only forwards it).
#[derive(Clone, Copy, Debug)]
pub struct FramebufferInfo {
    pub addr: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub bytes_per_pixel: u8,
}

/// Everything the loader hands to `kmain`.
pub struct BootInfo<'a> {
    /// Offset O such that physical address P is readable at virtual
    /// address O+P.
    pub phys_mem_offset: u64,
    pub memory_map: &'a [MemoryRegion],
    pub rsdp_addr: Option<u64>,
    pub modules: &'a [ModuleFile],
    pub framebuffer: Option<FramebufferInfo>,
}

impl<'a> BootInfo<'a> {
    pub fn find_module(&self, path: &str) -> Option<&ModuleFile> {
        self.modules.iter().find(|m| m.path_str() == path)
    }
}

/// The module list outlives `kmain`'s stack frame in practice (it
/// points into memory the loader mapped once, for the life of the
/// boot), so a raw pointer+len pair stashed here at boot lets
/// [`module_by_index`]/[`find_module_global`] reach it from `exec` and
/// `open` without threading a `BootInfo` reference through the whole
/// kernel.
static mut MODULES_PTR: *const ModuleFile = core::ptr::null();
static mut MODULES_LEN: usize = 0;

/// # Safety
/// Must be called exactly once, at boot, before any other CPU context
/// (interrupt handler, process) can observe the module list.
pub unsafe fn set_modules(modules: &'static [ModuleFile]) {
    MODULES_PTR = modules.as_ptr();
    MODULES_LEN = modules.len();
}

fn modules() -> &'static [ModuleFile] {
    unsafe { core::slice::from_raw_parts(MODULES_PTR, MODULES_LEN) }
}

pub fn module_by_index(index: usize) -> Option<&'static ModuleFile> {
    modules().get(index)
}

pub fn find_module_global(path: &str) -> Option<(usize, &'static ModuleFile)> {
    modules().iter().enumerate().find(|(_, m)| m.path_str() == path)
}
