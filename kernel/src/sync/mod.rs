//! Kernel-internal locking and blocking primitives.
//!
//! Every lock here blocks by spinning against a [`waitqueue::WaitQueue`]
//! rather than asking a scheduler to park the caller -- this crate owns
//! memory and IPC state, not thread scheduling.

pub mod mutex;
pub mod rwlock;
pub mod semaphore;
pub mod spinlock;
pub mod waitqueue;

pub use mutex::RecursiveMutex;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
pub use spinlock::{IrqSpinlock, IrqSpinlockGuard};
pub use waitqueue::WaitQueue;
