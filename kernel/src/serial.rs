//! Generic serial port wrapper used by [`crate::logger`].
//!
//! Wraps whichever architecture backend is active behind one `fmt::Write`
//! type so the logger doesn't need `cfg` blocks of its own.

use core::fmt;

pub struct SerialPort {
    #[cfg(target_arch = "x86_64")]
    inner: uart_16550::SerialPort,
    #[cfg(target_arch = "aarch64")]
    inner: crate::arch::aarch64::serial::Pl011Uart,
}

impl SerialPort {
    #[cfg(target_arch = "x86_64")]
    pub fn from_inner(inner: uart_16550::SerialPort) -> Self {
        Self { inner }
    }

    #[cfg(target_arch = "aarch64")]
    pub fn from_inner(inner: crate::arch::aarch64::serial::Pl011Uart) -> Self {
        Self { inner }
    }

    pub fn init() -> Self {
        Self::from_inner(crate::arch::serial_init())
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.inner.write_str(s)
    }
}

#[macro_export]
macro_rules! serial_debug_print {
    ($($arg:tt)*) => {
        $crate::serial::_serial_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_debug_println {
    () => ($crate::serial_debug_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial_debug_print!("{}\n", format_args!($($arg)*))
    };
}

#[doc(hidden)]
pub fn _serial_print(args: fmt::Arguments) {
    #[cfg(target_arch = "x86_64")]
    {
        crate::arch::x86_64::serial::_print(args);
    }

    #[cfg(target_arch = "aarch64")]
    {
        crate::arch::aarch64::serial::_print(args);
    }

    let _ = &args; // silence unused warning on host test builds
}
