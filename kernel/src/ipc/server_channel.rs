//! Server channels: a listening endpoint that accepts connections instead
//! of exchanging messages itself. Each accepted connection hands the
//! server a fresh `c1` peer and the caller a `c0` peer, wired together
//! exactly like [`super::channel::Endpoint::new_pair`].

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use spin::Mutex;

use super::channel::{Endpoint, DEFAULT_CAPACITY};
use crate::error::{KernelError, Result};
use crate::process::descriptor::DescriptorObject;
use crate::sync::WaitQueue;

/// A listening channel endpoint. `connect` produces a new peer pair and
/// queues the server's half for `accept` to pick up; blocked `accept`
/// calls wake on the same wait queue a monitor's server-channel item
/// polls.
pub struct ServerChannel {
    pending: Mutex<VecDeque<Arc<Endpoint>>>,
    client_arrival: WaitQueue,
    backlog: usize,
}

impl DescriptorObject for ServerChannel {
    fn kind(&self) -> &'static str {
        "server-channel"
    }
}

impl ServerChannel {
    pub fn new(backlog: usize) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(VecDeque::with_capacity(backlog)),
            client_arrival: WaitQueue::new(),
            backlog,
        })
    }

    /// Connect a new client to this server, returning the client's `c0`
    /// peer. The server's `c1` peer is queued for `accept`.
    pub fn connect(&self) -> Result<Arc<Endpoint>> {
        let mut pending = self.pending.lock();
        if pending.len() >= self.backlog {
            return Err(KernelError::TemporaryOutage {
                reason: "server channel backlog full",
            });
        }
        let (c0, c1) = Endpoint::new_pair(DEFAULT_CAPACITY);
        pending.push_back(c1);
        drop(pending);
        self.client_arrival.wake_one();
        Ok(c0)
    }

    /// Block until a connection is pending, then return its server-side
    /// endpoint.
    pub fn accept(&self) -> Arc<Endpoint> {
        loop {
            if let Some(endpoint) = self.pending.lock().pop_front() {
                return endpoint;
            }
            self.client_arrival.wait_while(|| self.pending.lock().is_empty());
        }
    }

    /// Non-blocking accept.
    pub fn accept_no_wait(&self) -> Result<Arc<Endpoint>> {
        self.pending.lock().pop_front().ok_or(KernelError::TemporaryOutage {
            reason: "no pending connection",
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::ipc::message::Message;
    use alloc::vec;

    #[test]
    fn connect_then_accept_delivers_a_message() {
        let server = ServerChannel::new(4);
        let client = server.connect().unwrap();
        let accepted = server.accept();

        client.send(Message::new(0, vec![7], vec![])).unwrap();
        let received = accepted.receive().unwrap();
        assert_eq!(received.data(), &[7]);
    }

    #[test]
    fn backlog_limit_is_enforced() {
        let server = ServerChannel::new(1);
        server.connect().unwrap();
        assert!(server.connect().is_err());
    }

    #[test]
    fn accept_no_wait_fails_with_nothing_pending() {
        let server = ServerChannel::new(4);
        assert!(server.accept_no_wait().is_err());
    }
}
