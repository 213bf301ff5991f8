//! Boot-time raw print macros.
//!
//! These write directly to the architecture's serial console and exist for
//! the earliest boot messages, before [`crate::logger`] installs the `log`
//! backend. Everything past early boot should prefer the `log` macros.

#[cfg(target_arch = "x86_64")]
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::arch::x86_64::serial::_print(format_args!($($arg)*)));
}

#[cfg(target_arch = "aarch64")]
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::arch::aarch64::serial::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

#[cfg(test)]
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => ($crate::print!($($arg)*));
}

#[cfg(test)]
#[macro_export]
macro_rules! serial_println {
    () => ($crate::println!());
    ($($arg:tt)*) => ($crate::println!($($arg)*));
}
