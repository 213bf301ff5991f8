//! AArch64 MMU primitives: TTBR/FAR access and TLB invalidation.

#![allow(dead_code)]

use crate::mm::{PhysicalAddress, VirtualAddress};

/// Read TTBR0_EL1 (the lower-half translation table base, used for the
/// process half of the address space).
pub fn read_ttbr0() -> PhysicalAddress {
    let ttbr0: u64;
    // SAFETY: reading TTBR0_EL1 is a privileged read with no side effects.
    unsafe {
        core::arch::asm!("mrs {}, TTBR0_EL1", out(reg) ttbr0);
    }
    PhysicalAddress::new(ttbr0 & 0x0000_FFFF_FFFF_F000)
}

/// Write TTBR0_EL1 and synchronize the pipeline so subsequent translations
/// observe the new table root.
pub fn write_ttbr0(addr: PhysicalAddress) {
    // SAFETY: writing TTBR0_EL1 switches the active lower-half page tables.
    // The caller must ensure `addr` points to a valid, aligned root table.
    // The isb ensures the write is visible before any dependent access.
    unsafe {
        core::arch::asm!(
            "msr TTBR0_EL1, {}",
            "isb",
            in(reg) addr.as_u64(),
        );
    }
}

/// Invalidate the TLB entry covering a virtual address (EL1, inner-shareable).
pub fn invlpg(virt: VirtualAddress) {
    let page = virt.as_u64() >> 12;
    // SAFETY: `tlbi vae1is` invalidates the stage-1 EL1 TLB entry for the
    // given page on all inner-shareable cores; dsb/isb order the effect.
    unsafe {
        core::arch::asm!(
            "dsb ishst",
            "tlbi vae1is, {}",
            "dsb ish",
            "isb",
            in(reg) page,
        );
    }
}

pub fn flush_tlb_address(addr: u64) {
    invlpg(VirtualAddress::new(addr));
}

/// Flush the entire stage-1 EL1 TLB on the inner-shareable domain.
pub fn flush_tlb_all() {
    // SAFETY: `tlbi vmalle1is` invalidates all EL1 stage-1 entries; the
    // surrounding barriers make it globally visible before continuing.
    unsafe {
        core::arch::asm!("dsb ishst", "tlbi vmalle1is", "dsb ish", "isb",);
    }
}

/// Read FAR_EL1 (faulting address of the last data/instruction abort).
pub fn read_far() -> VirtualAddress {
    let far: u64;
    // SAFETY: reading FAR_EL1 has no side effects.
    unsafe {
        core::arch::asm!("mrs {}, FAR_EL1", out(reg) far);
    }
    VirtualAddress::new(far)
}
