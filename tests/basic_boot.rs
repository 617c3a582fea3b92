//! Boots bare, brings up the descriptor tables and exercises the
//! host-independent helpers the rest of the suite builds on.
//!
//! No custom test-case collection machinery: `_start` is the whole
//! test, a sequence of checks run serially, reporting over the serial
//! port and exiting QEMU with a status the build runner checks.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use tsukuyomi::qemu_exit::{exit_qemu, QemuExitCode};
use tsukuyomi::{gdt, idt, memlayout, path, pic};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    tsukuyomi::logger::init();
    log::info!("basic_boot: starting");

    test_descriptor_tables_install();
    test_path_resolution();

    log::info!("basic_boot: all tests passed");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("basic_boot: {}", info);
    exit_qemu(QemuExitCode::Failed)
}

/// A kernel that cannot install its own descriptor tables without
/// faulting cannot take a trap at all.
fn test_descriptor_tables_install() {
    gdt::init(memlayout::kstack_top(0));
    idt::init();
    pic::init();
    log::info!("  descriptor tables installed without fault");
}

/// Literal concat/resolve values, re-checked here so the freestanding
/// build path is exercised in addition to the host `#[cfg(test)]`
/// module in `path.rs`.
fn test_path_resolution() {
    assert_eq!(path::concat("a/b", "c").unwrap().as_str(), "a/b/c");
    assert_eq!(path::concat("a/b/", "/c").unwrap().as_str(), "a/b/c");
    assert_eq!(path::resolve("/a/b", "c").unwrap().as_str(), "/a/b/c");
    log::info!("  path resolution checks passed");
}
