//! Console device backing `OpenFile::Tty`.
//!
//! The PS/2 keyboard driver, scancode-to-ASCII translation and the
//! framebuffer/PSF text renderer are out of scope — this is
//! the minimal stand-in the core needs to exercise the sleep/wake and
//! trap-dispatch machinery end to end: a small ring buffer fed by the
//! keyboard IRQ, drained by `read`, and a `write` path that forwards to
//! the serial port until a real framebuffer console is linked in.

use crate::cpuops::inb;
use crate::proc::wakeup;
use crate::spinlock::Spinlock;

const KEYBOARD_DATA_PORT: u16 = 0x60;
const BUF_SIZE: usize = 128;

struct ConsoleBuffer {
    buf: [u8; BUF_SIZE],
    read_idx: usize,
    write_idx: usize,
}

struct ConsoleCell {
    lock: Spinlock,
    inner: core::cell::UnsafeCell<ConsoleBuffer>,
}

unsafe impl Sync for ConsoleCell {}

/// Address used as the wait channel for "console has input".
static CONSOLE: ConsoleCell = ConsoleCell {
    lock: Spinlock::new("console"),
    inner: core::cell::UnsafeCell::new(ConsoleBuffer { buf: [0; BUF_SIZE], read_idx: 0, write_idx: 0 }),
};

fn wait_channel() -> u64 {
    &CONSOLE as *const ConsoleCell as u64
}

/// Drain the keyboard controller's output port and translate very
/// coarsely (make-codes for printable ASCII only; break-codes and
/// extended/function keys are dropped). Called from
/// [`crate::trap::dispatch`] on the keyboard IRQ.
pub fn handle_keyboard_irq() {
    let scancode = unsafe { inb(KEYBOARD_DATA_PORT) };
    if scancode & 0x80 != 0 {
        return; // key release
    }
    if let Some(ch) = scancode_to_ascii(scancode) {
        let cell = unsafe { &mut *CONSOLE.inner.get() };
        CONSOLE.lock.acquire();
        let next = (cell.write_idx + 1) % BUF_SIZE;
        if next != cell.read_idx {
            cell.buf[cell.write_idx] = ch;
            cell.write_idx = next;
        }
        CONSOLE.lock.release();
        wakeup(wait_channel());
    }
}

/// US QWERTY set-1 make codes for the printable range. A real keyboard
/// driver (out of scope) would track shift/ctrl state; this doesn't.
fn scancode_to_ascii(code: u8) -> Option<u8> {
    const TABLE: &[u8; 0x3A] = b"\0\x1b1234567890-=\x08\tqwertyuiop[]\r\0asdfghjkl;'`\0\\zxcvbnm,./\0*\0 ";
    TABLE.get(code as usize).copied().filter(|&b| b != 0)
}

/// Block until at least one byte is available, then copy up to
/// `buf.len()` bytes out.
pub fn read(buf: &mut [u8]) -> usize {
    let cell = unsafe { &mut *CONSOLE.inner.get() };
    CONSOLE.lock.acquire();
    while cell.read_idx == cell.write_idx {
        // sleep() releases CONSOLE.lock, blocks, and reacquires it
        // before returning.
        crate::proc::sleep(wait_channel(), &CONSOLE.lock);
    }
    let mut n = 0;
    while n < buf.len() && cell.read_idx != cell.write_idx {
        buf[n] = cell.buf[cell.read_idx];
        cell.read_idx = (cell.read_idx + 1) % BUF_SIZE;
        n += 1;
    }
    CONSOLE.lock.release();
    n
}

pub fn write(buf: &[u8]) -> usize {
    crate::logger::write_raw(buf);
    buf.len()
}
