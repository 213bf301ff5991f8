//! AArch64 architecture support: TLB control and serial I/O.
//!
//! The GIC, boot entry, and user-mode transitions belong to the
//! interrupt-controller and boot-protocol layers, which this crate does
//! not implement.

pub mod mmu;
pub mod serial;
pub mod timer;

pub fn halt() -> ! {
    loop {
        // SAFETY: `wfe` suspends the core until woken by an event; no memory
        // side effects.
        unsafe {
            core::arch::asm!("wfe");
        }
    }
}

pub fn idle() {
    // SAFETY: `wfe` suspends the core until woken by an event.
    unsafe {
        core::arch::asm!("wfe");
    }
}

pub fn serial_init() -> serial::Pl011Uart {
    serial::Pl011Uart::new(0x0900_0000)
}

pub fn tlb_flush_address(addr: u64) {
    mmu::flush_tlb_address(addr);
}

pub fn tlb_flush_all() {
    mmu::flush_tlb_all();
}

/// Whether IRQs are currently unmasked on this core (DAIF.I clear).
pub fn interrupts_enabled() -> bool {
    let daif: u64;
    // SAFETY: reads the DAIF system register; no side effects.
    unsafe {
        core::arch::asm!("mrs {}, daif", out(reg) daif);
    }
    daif & (1 << 7) == 0
}

/// Mask IRQs on this core, returning whether they were unmasked beforehand.
pub fn interrupts_disable() -> bool {
    let were_enabled = interrupts_enabled();
    // SAFETY: `msr daifset, #2` sets the IRQ mask bit; reversible via
    // `interrupts_restore`.
    unsafe {
        core::arch::asm!("msr daifset, #2");
    }
    were_enabled
}

/// Restore IRQ masking to the state `were_enabled` describes.
pub fn interrupts_restore(were_enabled: bool) {
    if were_enabled {
        // SAFETY: `msr daifclr, #2` clears the IRQ mask bit.
        unsafe {
            core::arch::asm!("msr daifclr, #2");
        }
    }
}
