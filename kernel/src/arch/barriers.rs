//! Architecture-independent memory barrier abstractions.
//!
//! Centralizes memory barrier/fence operations so that non-arch code does not
//! need scattered `#[cfg(target_arch)]` blocks with inline assembly.
//!
//! # Barrier types
//!
//! * [`memory_fence`] -- full read/write fence (strongest).
//! * [`data_sync_barrier`] -- data synchronization barrier with instruction
//!   synchronization on AArch64; equivalent to a full fence on x86_64.
//! * [`instruction_sync_barrier`] -- instruction stream synchronization
//!   (AArch64 ISB; x86_64 no-op because of strong ordering).

/// Full memory fence -- all reads and writes issued before this barrier are
/// globally visible before any reads or writes issued after it.
///
/// * **x86_64**: `core::sync::atomic::fence(SeqCst)` -- MFENCE semantics.
/// * **AArch64**: `dsb sy` -- Data Synchronization Barrier (full system).
#[inline(always)]
pub fn memory_fence() {
    #[cfg(target_arch = "x86_64")]
    {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: `dsb sy` is a data synchronization barrier that ensures all
        // preceding memory accesses are complete before subsequent ones begin.
        // No side effects beyond ordering.
        unsafe {
            core::arch::asm!("dsb sy", options(nostack, nomem, preserves_flags));
        }
    }
}

/// Data synchronization barrier with instruction synchronization.
///
/// On AArch64 this issues `dsb sy` followed by `isb`, which is the standard
/// pattern used when a data store must be visible before instruction fetch
/// proceeds (e.g. a freshly written page-table entry that will be walked
/// immediately after).
///
/// On x86_64 this is equivalent to [`memory_fence`] because its memory model
/// already guarantees the necessary ordering.
#[inline(always)]
pub fn data_sync_barrier() {
    #[cfg(target_arch = "x86_64")]
    {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: `dsb sy` ensures all data accesses are complete; `isb`
        // flushes the instruction pipeline so subsequent instructions see
        // the updated data. Standard AArch64 barrier pair.
        unsafe {
            core::arch::asm!("dsb sy", "isb", options(nostack, nomem, preserves_flags));
        }
    }
}

/// Instruction synchronization barrier.
///
/// Ensures that all preceding instructions have completed and the instruction
/// pipeline is flushed before subsequent instructions execute. Needed on
/// AArch64 after modifying page tables and before relying on the new
/// mapping from straight-line code.
///
/// * **x86_64**: no-op -- x86_64's strong ordering model makes an explicit
///   instruction barrier unnecessary here.
/// * **AArch64**: `isb` -- Instruction Synchronization Barrier.
#[inline(always)]
pub fn instruction_sync_barrier() {
    #[cfg(target_arch = "x86_64")]
    {
        // x86_64 has a strongly ordered memory model; no explicit ISB needed.
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: `isb` flushes the instruction pipeline. No side effects
        // beyond pipeline synchronization.
        unsafe {
            core::arch::asm!("isb", options(nostack, nomem, preserves_flags));
        }
    }
}
