//! Architecture-specific primitives: TLB control, CR3/page-table-root
//! access, serial console backends, and a monotonic tick source.
//!
//! Interrupt controllers, boot protocols, and context switching live
//! outside this crate; this module exposes only what the memory manager
//! and the monitor's timeout items need from the hardware.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use x86_64::*;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

#[cfg(target_arch = "aarch64")]
pub use aarch64::*;

pub mod barriers;
pub mod timer;
