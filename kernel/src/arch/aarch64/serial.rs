//! AArch64 serial backend using the PL011 UART at the QEMU `virt` base
//! address. Writes are unbuffered MMIO byte stores without checking the
//! FIFO-full status register, which keeps this safe to call from early
//! boot before interrupts exist, at the cost of not handling a backed-up
//! FIFO gracefully.

use core::fmt;

pub struct Pl011Uart {
    base_addr: usize,
}

impl Pl011Uart {
    pub const fn new(base_addr: usize) -> Self {
        Self { base_addr }
    }

    pub fn init(&mut self) {
        // QEMU's virt machine firmware already brings the PL011 up; nothing
        // to configure here.
    }
}

impl fmt::Write for Pl011Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        const UARTDR: usize = 0x000;

        for &byte in s.as_bytes() {
            // SAFETY: `base_addr` is the fixed PL011 MMIO base for the QEMU
            // `virt` machine; UARTDR is a byte-wide data register safe to
            // write unconditionally.
            unsafe {
                core::ptr::write_volatile((self.base_addr + UARTDR) as *mut u8, byte);
            }
        }
        Ok(())
    }
}

pub type SerialPort = Pl011Uart;

pub fn create_serial_port() -> SerialPort {
    Pl011Uart::new(0x0900_0000)
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    let mut uart = create_serial_port();
    let _ = uart.write_fmt(args);
}
