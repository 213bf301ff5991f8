//! Bidirectional channel IPC: a pair of peer endpoints, `c0` and `c1`,
//! each backed by a ring buffer the other side writes into.
//!
//! Every endpoint owns the queue its peer sends to, guarded by one mutex
//! plus a pair of counting semaphores -- `insertion` counts messages
//! available to receive, `removal` counts free ring slots -- so blocking
//! send/receive are just semaphore acquires around a `VecDeque` operation.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use super::message::Message;
use crate::error::{KernelError, Result};
use crate::process::{descriptor::DescriptorObject, DescriptorTable, Did};
use crate::sync::Semaphore;

/// Default number of messages a channel's ring buffer holds before `send`
/// blocks (or fails, under `no_wait`).
pub const DEFAULT_CAPACITY: usize = 64;

struct Queue {
    capacity: usize,
    messages: Mutex<VecDeque<Message>>,
    insertion: Semaphore,
    removal: Semaphore,
    /// Set once the owner of this queue has called `close`; a peer trying
    /// to send into a closed queue gets `PermanentOutage` instead of
    /// blocking forever.
    closed_receive: AtomicBool,
}

impl Queue {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            insertion: Semaphore::new(0, capacity as u32),
            removal: Semaphore::new(capacity as u32, capacity as u32),
            closed_receive: AtomicBool::new(false),
        })
    }
}

/// One side of a channel pair.
pub struct Endpoint {
    /// Messages sent to this endpoint land here.
    own_queue: Arc<Queue>,
    /// Sending from this endpoint writes into the peer's queue.
    peer_queue: Arc<Queue>,
    closed: AtomicBool,
    /// Set by whoever is canceling a blocked caller of this endpoint (e.g.
    /// a signal delivered to the thread waiting in `send`/`receive`).
    /// Checked by the interruptible wait paths; cleared before the next
    /// blocking call so a stale signal doesn't cancel it too.
    signaled: AtomicBool,
}

impl DescriptorObject for Endpoint {
    fn kind(&self) -> &'static str {
        "channel"
    }
}

/// A held receive slot: the message is known to be present and the queue
/// lock is conceptually still "checked out" until `receive_locked` or
/// `unlock_receive` resolves it.
pub struct ReceiveLock<'a> {
    endpoint: &'a Endpoint,
    resolved: bool,
}

impl Drop for ReceiveLock<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            // Caller never committed; give the permit back so a future
            // `lock_receive` sees the message again.
            self.endpoint.own_queue.insertion.release().ok();
        }
    }
}

impl Endpoint {
    /// Build a connected pair, `(c0, c1)`, each with its own inbound ring
    /// buffer of `capacity` messages.
    pub fn new_pair(capacity: usize) -> (Arc<Self>, Arc<Self>) {
        let q0 = Queue::new(capacity);
        let q1 = Queue::new(capacity);

        let c0 = Arc::new(Self {
            own_queue: q0.clone(),
            peer_queue: q1.clone(),
            closed: AtomicBool::new(false),
            signaled: AtomicBool::new(false),
        });
        let c1 = Arc::new(Self {
            own_queue: q1,
            peer_queue: q0,
            closed: AtomicBool::new(false),
            signaled: AtomicBool::new(false),
        });
        (c0, c1)
    }

    /// Mark this endpoint's caller signaled: the next (or current)
    /// interruptible wait on it returns `Err(KernelError::Signaled)`
    /// instead of blocking further.
    pub fn mark_signaled(&self) {
        self.signaled.store(true, Ordering::Release);
    }

    /// Clear the signaled flag before starting a new blocking call.
    pub fn clear_signaled(&self) {
        self.signaled.store(false, Ordering::Release);
    }

    /// Send `message`, blocking until ring capacity is free. Interruptible:
    /// returns `Err(KernelError::Signaled)` if `mark_signaled` is called
    /// while this is blocked.
    pub fn send(&self, message: Message) -> Result<()> {
        self.send_impl(message, true, true)
    }

    /// Send without blocking; fails with `TemporaryOutage` if the peer's
    /// ring is full.
    pub fn send_no_wait(&self, message: Message) -> Result<()> {
        self.send_impl(message, false, false)
    }

    fn send_impl(&self, message: Message, wait: bool, interruptible: bool) -> Result<()> {
        if self.peer_queue.closed_receive.load(Ordering::Acquire) {
            return Err(KernelError::PermanentOutage {
                reason: "peer channel closed",
            });
        }

        if wait && interruptible {
            self.peer_queue
                .removal
                .acquire_until(&self.signaled, || self.peer_queue.closed_receive.load(Ordering::Acquire))?;
        } else if wait {
            self.peer_queue.removal.acquire();
        } else if !self.peer_queue.removal.try_acquire() {
            return Err(KernelError::TemporaryOutage {
                reason: "channel ring full",
            });
        }

        self.peer_queue.messages.lock().push_back(message);
        self.peer_queue.insertion.release().ok();
        Ok(())
    }

    /// Receive the next message, blocking until one is available.
    /// Interruptible: returns `Err(KernelError::Signaled)` if
    /// `mark_signaled` is called while this is blocked. Also returns once
    /// the peer closes its side and the queue is drained, instead of
    /// blocking forever on a peer that will never send again.
    pub fn receive(&self) -> Result<Message> {
        self.own_queue
            .insertion
            .acquire_until(&self.signaled, || self.peer_closed())?;
        let message = self
            .own_queue
            .messages
            .lock()
            .pop_front()
            .expect("insertion permit implies a queued message");
        self.own_queue.removal.release().ok();
        Ok(message)
    }

    /// Receive without blocking.
    pub fn receive_no_wait(&self) -> Result<Message> {
        if !self.own_queue.insertion.try_acquire() {
            return Err(KernelError::TemporaryOutage {
                reason: "channel ring empty",
            });
        }
        let message = self
            .own_queue
            .messages
            .lock()
            .pop_front()
            .expect("insertion permit implies a queued message");
        self.own_queue.removal.release().ok();
        Ok(message)
    }

    /// Block until a message is available and reserve it, without
    /// removing it from the ring yet -- lets a caller inspect a message's
    /// size before committing to `receive_locked`.
    pub fn lock_receive(&self) -> ReceiveLock<'_> {
        self.own_queue.insertion.acquire();
        ReceiveLock {
            endpoint: self,
            resolved: false,
        }
    }

    /// Commit a [`ReceiveLock`], popping the reserved message.
    pub fn receive_locked(mut lock: ReceiveLock<'_>) -> Message {
        lock.resolved = true;
        let message = lock
            .endpoint
            .own_queue
            .messages
            .lock()
            .pop_front()
            .expect("lock_receive reserved a message");
        lock.endpoint.own_queue.removal.release().ok();
        message
    }

    /// Abandon a [`ReceiveLock`] without consuming the message.
    pub fn unlock_receive(mut lock: ReceiveLock<'_>) {
        lock.resolved = true;
        lock.endpoint.own_queue.insertion.release().ok();
    }

    /// Close this side: further peer sends fail, and any locally blocked
    /// receive should observe the peer as gone once its queue drains.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.own_queue.closed_receive.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn peer_closed(&self) -> bool {
        self.peer_queue.closed_receive.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> usize {
        self.own_queue.messages.lock().len()
    }
}

/// Install a channel endpoint in `table`, returning the assigned
/// descriptor.
pub fn install(table: &DescriptorTable, endpoint: Arc<Endpoint>) -> Result<Did> {
    table.install(endpoint)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn ping_pong_round_trip() {
        let (c0, c1) = Endpoint::new_pair(DEFAULT_CAPACITY);
        c0.send(Message::new(0, vec![1, 2, 3], vec![])).unwrap();
        let received = c1.receive().unwrap();
        assert_eq!(received.data(), &[1, 2, 3]);

        c1.send(Message::new(0, vec![9], vec![])).unwrap();
        let reply = c0.receive().unwrap();
        assert_eq!(reply.data(), &[9]);
    }

    #[test]
    fn receive_no_wait_on_empty_ring_fails() {
        let (c0, _c1) = Endpoint::new_pair(DEFAULT_CAPACITY);
        assert!(c0.receive_no_wait().is_err());
    }

    #[test]
    fn closing_peer_blocks_further_sends() {
        let (c0, c1) = Endpoint::new_pair(DEFAULT_CAPACITY);
        c1.close();
        assert!(c0.send_no_wait(Message::new(0, vec![], vec![])).is_err());
    }

    #[test]
    fn lock_receive_then_unlock_preserves_the_message() {
        let (c0, c1) = Endpoint::new_pair(DEFAULT_CAPACITY);
        c0.send(Message::new(0, vec![5], vec![])).unwrap();
        let lock = c1.lock_receive();
        Endpoint::unlock_receive(lock);
        assert_eq!(c1.pending(), 1);
        let lock = c1.lock_receive();
        let message = Endpoint::receive_locked(lock);
        assert_eq!(message.data(), &[5]);
        assert_eq!(c1.pending(), 0);
    }

    #[test]
    fn send_blocks_when_ring_is_full() {
        let (c0, _c1) = Endpoint::new_pair(1);
        c0.send_no_wait(Message::new(0, vec![], vec![])).unwrap();
        assert!(c0.send_no_wait(Message::new(0, vec![], vec![])).is_err());
    }

    #[test]
    fn closing_the_peer_unblocks_a_pending_receive() {
        let (c0, c1) = Endpoint::new_pair(DEFAULT_CAPACITY);
        c0.close();
        match c1.receive() {
            Err(KernelError::PermanentOutage { .. }) => {}
            other => panic!("expected PermanentOutage, got {:?}", other),
        }
    }

    #[test]
    fn marking_an_endpoint_signaled_cancels_a_pending_receive() {
        let (_c0, c1) = Endpoint::new_pair(DEFAULT_CAPACITY);
        c1.mark_signaled();
        match c1.receive() {
            Err(KernelError::Signaled) => {}
            other => panic!("expected Signaled, got {:?}", other),
        }
    }

    #[test]
    fn clearing_signaled_lets_a_later_receive_proceed_normally() {
        let (c0, c1) = Endpoint::new_pair(DEFAULT_CAPACITY);
        c1.mark_signaled();
        assert!(c1.receive().is_err());
        c1.clear_signaled();
        c0.send(Message::new(0, vec![4], vec![])).unwrap();
        assert_eq!(c1.receive().unwrap().data(), &[4]);
    }
}
