//! `log` facade backed by the architecture serial console.
//!
//! Installed once at boot via [`init`]; every subsystem logs through the
//! `log` macros afterward rather than calling `println!` directly.

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::serial::SerialPort;

struct SerialLogger {
    port: Mutex<Option<SerialPort>>,
}

static LOGGER: SerialLogger = SerialLogger {
    port: Mutex::new(None),
};

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        use core::fmt::Write;

        let mut guard = self.port.lock();
        let port = guard.get_or_insert_with(SerialPort::init);
        let _ = writeln!(
            port,
            "[{:<5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Install the serial-backed logger as the global `log` sink. Idempotent;
/// safe to call once during boot.
pub fn init(level: LevelFilter) {
    // SAFETY-free: `set_logger` just stores a reference; it fails only if
    // called twice, which we ignore since re-init is harmless here.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
