//! x86_64 architecture support: MMU/TLB control and serial I/O.
//!
//! GDT/IDT/PIC setup, boot entry, and user-mode transitions belong to the
//! interrupt-controller and boot-protocol layers, which this crate does
//! not implement.

#![allow(clippy::missing_safety_doc)]

pub mod mmu;
pub mod serial;
pub mod timer;

/// Halt the CPU. Used by panic/shutdown paths.
#[allow(dead_code)]
pub fn halt() -> ! {
    use x86_64::instructions::{hlt, interrupts};
    interrupts::disable();
    loop {
        hlt();
    }
}

pub fn idle() {
    x86_64::instructions::hlt();
}

/// Speculation barrier to mitigate Spectre-style attacks.
/// Uses LFENCE which serializes instruction execution on Intel/AMD.
#[inline(always)]
pub fn speculation_barrier() {
    // SAFETY: lfence is a serializing instruction that prevents speculative
    // execution of subsequent instructions until all prior instructions
    // complete. No side effects beyond pipeline serialization.
    unsafe {
        core::arch::asm!("lfence", options(nostack, nomem, preserves_flags));
    }
}

pub fn serial_init() -> uart_16550::SerialPort {
    // SAFETY: SerialPort::new(0x3F8) creates a serial port handle for COM1
    // at the standard I/O base address. The address is well-known and the
    // port is initialized immediately after construction.
    let mut serial_port = unsafe { uart_16550::SerialPort::new(0x3F8) };
    serial_port.init();
    serial_port
}

/// Flush TLB for a specific virtual address.
pub fn tlb_flush_address(addr: u64) {
    mmu::flush_tlb_address(addr);
}

/// Flush entire TLB.
pub fn tlb_flush_all() {
    mmu::flush_tlb();
}

/// Whether interrupts are currently enabled on this core.
///
/// A no-op reporting `true` on the hosted test target, which runs in ring 3
/// and cannot read or change the real interrupt flag.
#[cfg(target_os = "none")]
pub fn interrupts_enabled() -> bool {
    x86_64::instructions::interrupts::are_enabled()
}

#[cfg(not(target_os = "none"))]
pub fn interrupts_enabled() -> bool {
    true
}

/// Disable interrupts on this core, returning whether they were enabled
/// beforehand so the caller can restore the prior state.
#[cfg(target_os = "none")]
pub fn interrupts_disable() -> bool {
    let were_enabled = interrupts_enabled();
    x86_64::instructions::interrupts::disable();
    were_enabled
}

#[cfg(not(target_os = "none"))]
pub fn interrupts_disable() -> bool {
    true
}

/// Restore interrupts to the state `were_enabled` describes.
#[cfg(target_os = "none")]
pub fn interrupts_restore(were_enabled: bool) {
    if were_enabled {
        x86_64::instructions::interrupts::enable();
    }
}

#[cfg(not(target_os = "none"))]
pub fn interrupts_restore(_were_enabled: bool) {}
