//! Early boot console
//!
//! Byte output for the loader's log, either through a memory-mapped PL011
//! or through the SBI legacy console. Output is serialised by a spin lock
//! so lines from different cores do not interleave.

use spin::mutex::SpinMutex;

/// PL011 UART registers
pub mod pl011 {
    /// Data register offset
    pub const DR: usize = 0x00;
    /// Flag register offset
    pub const FR: usize = 0x18;
    /// Flag: Transmit FIFO full
    pub const FR_TXFF: u32 = 1 << 5;
}

/// Where console bytes go
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sink {
    /// Output is discarded
    None,
    /// PL011 UART at the given MMIO base
    Pl011(u64),
    /// SBI legacy `console_putchar`
    Sbi,
}

struct Console {
    sink: Sink,
}

impl Console {
    const fn new() -> Self {
        Self { sink: Sink::None }
    }

    fn putc(&self, c: u8) {
        match self.sink {
            Sink::None => {}
            Sink::Pl011(0) => {}
            Sink::Pl011(base) => {
                // SAFETY: The base was provided at init as the PL011 MMIO base
                unsafe {
                    let fr_ptr = (base + pl011::FR as u64) as *const u32;
                    while core::ptr::read_volatile(fr_ptr) & pl011::FR_TXFF != 0 {
                        core::hint::spin_loop();
                    }
                    let dr_ptr = (base + pl011::DR as u64) as *mut u32;
                    core::ptr::write_volatile(dr_ptr, u32::from(c));
                }
            }
            Sink::Sbi => crate::sbi::console_putchar(c),
        }
    }

    fn puts(&self, s: &str) {
        for c in s.bytes() {
            if c == b'\n' {
                self.putc(b'\r');
            }
            self.putc(c);
        }
    }
}

/// Global console instance
static CONSOLE: SpinMutex<Console> = SpinMutex::new(Console::new());

/// Select the console output.
///
/// # Safety
///
/// For [`Sink::Pl011`] the base must be the MMIO address of a PL011 that
/// is accessible with the current translation.
pub unsafe fn init(sink: Sink) {
    CONSOLE.lock().sink = sink;
}

/// The currently selected output.
#[must_use]
pub fn sink() -> Sink {
    CONSOLE.lock().sink
}

/// Print a string to the console
pub fn puts(s: &str) {
    CONSOLE.lock().puts(s);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_selection() {
        assert_eq!(sink(), Sink::None);
        // Discarded output never touches a device
        puts("dropped\n");

        // SAFETY: A zero PL011 base is never dereferenced
        unsafe { init(Sink::Pl011(0)) };
        assert_eq!(sink(), Sink::Pl011(0));
        puts("dropped too\n");

        // SAFETY: Restores the discarding sink
        unsafe { init(Sink::None) };
    }
}
