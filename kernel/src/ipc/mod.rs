//! Inter-process communication: bidirectional channels (peer-pair `c0`/`c1`
//! endpoints) and server channels (listener-accept over the same wire
//! format), built on the descriptor table and the kernel's lock/waitqueue
//! primitives.

pub mod channel;
pub mod message;
pub mod server_channel;

pub use channel::{Endpoint, ReceiveLock, DEFAULT_CAPACITY};
pub use message::{attach_received, detach_for_transfer, wire_tag, Attachment, Message, MessageId};
pub use server_channel::ServerChannel;

/// Bring up whatever process-independent IPC state exists. Channels
/// themselves are created on demand by a process, not at boot, so there's
/// currently nothing to initialize eagerly; this exists as the hook future
/// global IPC state (rate limiting, perf counters) would attach to.
pub fn init() {
    log::info!(target: "ipc", "ipc subsystem ready");
}
