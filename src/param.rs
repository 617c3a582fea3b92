//! Compile-time kernel configuration.
//!
//! Build-time tuning constants referenced throughout `proc.rs`,
//! `exec.rs` and `file.rs` (`NPROC`, `NOFILE`, `NCPU`, ...). There is no
//! runtime configuration surface — a kernel image is configured once,
//! at compile time.

/// Single logical CPU — no SMP.
pub const NCPU: usize = 1;

/// Process table size.
pub const NPROC: usize = 64;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Max bytes in a current-working-directory / syscall path string,
/// including the NUL terminator.
pub const MAXPATH: usize = 256;

/// Pages making up one process's kernel stack.
pub const KSTACK_PAGES: usize = 4;
