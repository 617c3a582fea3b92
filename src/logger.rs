//! Kernel logging: a `log::Log` implementation over the serial port.
//!
//! Every fatal path in [`crate::trap`] and every diagnostic in the
//! scheduler/page allocator goes through `log::error!`/`log::debug!`
//! rather than a bespoke print macro, so call sites read like any
//! other `log`-based Rust service.

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::cpuops::{inb, outb};
use crate::spinlock::Spinlock;

const COM1: u16 = 0x3F8;

struct SerialPort;

impl SerialPort {
    fn init(&self) {
        unsafe {
            outb(COM1 + 1, 0x00); // disable interrupts
            outb(COM1 + 3, 0x80); // enable DLAB
            outb(COM1 + 0, 0x03); // divisor low: 38400 baud
            outb(COM1 + 1, 0x00); // divisor high
            outb(COM1 + 3, 0x03); // 8 bits, no parity, one stop bit
            outb(COM1 + 2, 0xC7); // enable FIFO, clear, 14-byte threshold
            outb(COM1 + 4, 0x0B); // IRQs enabled, RTS/DSR set
        }
    }

    fn write_byte(&self, b: u8) {
        unsafe {
            while inb(COM1 + 5) & 0x20 == 0 {}
            outb(COM1, b);
        }
    }
}

impl Write for SerialPort {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for b in s.bytes() {
            if b == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(b);
        }
        Ok(())
    }
}

static SERIAL_LOCK: Spinlock = Spinlock::new("serial");
static INITIALIZED: AtomicBool = AtomicBool::new(false);

struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        SERIAL_LOCK.acquire();
        let mut port = SerialPort;
        let _ = writeln!(port, "[{:<5} {}] {}", record.level(), record.target(), record.args());
        SERIAL_LOCK.release();
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Bring up the serial port and install the global logger. Must run
/// once, early in `kmain`, before anything calls `log::*!`.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::AcqRel) {
        return;
    }
    SerialPort.init();
    log::set_logger(&LOGGER).expect("logger: set_logger called twice");
    let level = if cfg!(debug_assertions) { log::LevelFilter::Trace } else { log::LevelFilter::Info };
    log::set_max_level(level);
}

/// Raw serial write, bypassing the `log` record framing — used by the
/// console device so TTY
/// writes show up as plain bytes rather than `[INFO ...]`-framed
/// records.
pub fn write_raw(bytes: &[u8]) {
    SERIAL_LOCK.acquire();
    let mut port = SerialPort;
    for &b in bytes {
        if b == b'\n' {
            port.write_byte(b'\r');
        }
        port.write_byte(b);
    }
    SERIAL_LOCK.release();
}
