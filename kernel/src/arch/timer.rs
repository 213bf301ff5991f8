//! Architecture-independent monotonic tick source.
//!
//! The monitor's timeout item type needs a source of elapsed time; driving
//! `tick()` from a real timer interrupt is the job of the (out-of-scope)
//! interrupt-controller layer, so this module only exposes the counter.

/// Get the current tick count.
pub fn get_ticks() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        crate::arch::x86_64::timer::get_ticks()
    }

    #[cfg(target_arch = "aarch64")]
    {
        crate::arch::aarch64::timer::get_ticks()
    }
}

/// Advance the tick counter by one. Called by whatever owns the timer
/// interrupt; not wired to hardware by this crate.
pub fn tick() {
    #[cfg(target_arch = "x86_64")]
    {
        crate::arch::x86_64::timer::tick()
    }

    #[cfg(target_arch = "aarch64")]
    {
        crate::arch::aarch64::timer::tick()
    }
}
