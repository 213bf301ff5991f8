//! Kernel heap: a static backing region handed to `linked_list_allocator`,
//! which backs the `#[global_allocator]` declared in `lib.rs`.

use crate::error::Result;

/// 16 MiB is comfortably more than this kernel's own bookkeeping needs;
/// user memory goes through the PMM/VMM directly, not this heap.
pub const HEAP_SIZE: usize = 16 * 1024 * 1024;

#[cfg(target_os = "none")]
static mut HEAP_MEMORY: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

/// Hand the static heap region to the global allocator. Called once during
/// `mm::init`, before any subsystem that allocates runs.
pub fn init() -> Result<()> {
    #[cfg(target_os = "none")]
    {
        // SAFETY: `HEAP_MEMORY` is a private static touched only here, and
        // `init` runs once during single-threaded boot before the
        // allocator is used.
        unsafe {
            let start = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8;
            crate::ALLOCATOR.lock().init(start, HEAP_SIZE);
        }
    }

    Ok(())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::{boxed::Box, vec::Vec};

    #[test]
    fn host_allocator_handles_normal_traffic() {
        let boxed = Box::new(42);
        assert_eq!(*boxed, 42);

        let mut v = Vec::new();
        for i in 0..256 {
            v.push(i);
        }
        assert_eq!(v.len(), 256);
    }
}
