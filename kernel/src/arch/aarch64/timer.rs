//! AArch64 monotonic tick counter.

use core::sync::atomic::{AtomicU64, Ordering};

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Get current timer ticks.
pub fn get_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Advance the tick counter. Called by the timer-interrupt owner.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}
