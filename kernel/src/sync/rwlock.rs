//! Reader/writer lock: any number of concurrent readers, or one exclusive
//! writer, encoded as a single `usize` state (`0` = free, `usize::MAX` =
//! write-locked, otherwise the live reader count).

use core::sync::atomic::{AtomicUsize, Ordering};

use super::waitqueue::WaitQueue;

const WRITE_LOCKED: usize = usize::MAX;

pub struct RwLock {
    state: AtomicUsize,
    read_waiters: WaitQueue,
    write_waiters: WaitQueue,
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RwLock {
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
            read_waiters: WaitQueue::new(),
            write_waiters: WaitQueue::new(),
        }
    }

    pub fn read_lock(&self) {
        self.read_waiters.wait_while(|| !self.try_read_lock());
    }

    pub fn try_read_lock(&self) -> bool {
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            if state == WRITE_LOCKED {
                return false;
            }
            match self.state.compare_exchange_weak(
                state,
                state + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => state = observed,
            }
        }
    }

    pub fn read_unlock(&self) {
        let prev = self.state.fetch_sub(1, Ordering::Release);
        if prev == 1 {
            self.write_waiters.wake_one();
        }
    }

    pub fn write_lock(&self) {
        self.write_waiters.wait_while(|| !self.try_write_lock());
    }

    pub fn try_write_lock(&self) -> bool {
        self.state
            .compare_exchange(0, WRITE_LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn write_unlock(&self) {
        self.state.store(0, Ordering::Release);
        self.read_waiters.wake_all();
        self.write_waiters.wake_one();
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn multiple_readers_allowed() {
        let lock = RwLock::new();
        assert!(lock.try_read_lock());
        assert!(lock.try_read_lock());
        assert!(!lock.try_write_lock());
        lock.read_unlock();
        lock.read_unlock();
        assert!(lock.try_write_lock());
    }

    #[test]
    fn writer_excludes_readers() {
        let lock = RwLock::new();
        assert!(lock.try_write_lock());
        assert!(!lock.try_read_lock());
        lock.write_unlock();
        assert!(lock.try_read_lock());
    }
}
