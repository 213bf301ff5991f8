//! The message carried over a channel: an inline byte payload plus moved-in
//! descriptor attachments, tagged with a monotonic id so a receiver can
//! match replies to requests.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::process::descriptor::DescriptorObject;
use crate::process::{Did, DescriptorTable};

/// Inline payload cap; larger transfers should go through a shared
/// mapping attached to the message instead of growing this further.
pub const MAX_INLINE_SIZE: usize = 4096;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// A monotonically increasing message id, unique for the life of the
/// kernel, assigned at send time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

impl MessageId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    fn next() -> Self {
        Self(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Wire-format type tag for an attachment, distinguishing what kind of
/// object the receiver gets back from `attach_received`.
pub mod wire_tag {
    pub const BYTE_BUFFER: u8 = 0;
    pub const CHANNEL: u8 = 1;
    pub const MAPPING: u8 = 2;
    pub const OTHER: u8 = 3;
}

/// Something a message carries alongside its inline payload: either a plain
/// byte buffer (no descriptor-table involvement) or a live descriptor whose
/// ownership moves from sender to receiver.
#[derive(Clone)]
pub enum Attachment {
    ByteBuffer(Vec<u8>),
    Descriptor(Arc<dyn DescriptorObject>),
}

impl Attachment {
    pub fn wire_tag(&self) -> u8 {
        match self {
            Attachment::ByteBuffer(_) => wire_tag::BYTE_BUFFER,
            Attachment::Descriptor(object) => match object.kind() {
                "channel" => wire_tag::CHANNEL,
                "mapping" => wire_tag::MAPPING,
                _ => wire_tag::OTHER,
            },
        }
    }

    fn wire_size(&self) -> usize {
        match self {
            Attachment::ByteBuffer(bytes) => bytes.len(),
            Attachment::Descriptor(_) => core::mem::size_of::<Did>(),
        }
    }
}

impl core::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Attachment::ByteBuffer(bytes) => f.debug_tuple("ByteBuffer").field(&bytes.len()).finish(),
            Attachment::Descriptor(object) => f.debug_tuple("Descriptor").field(&object.kind()).finish(),
        }
    }
}

/// Detach `did` from `table` so it can be carried by a [`Message`] instead.
/// The sender no longer holds this descriptor once this returns `Ok`.
pub fn detach_for_transfer(table: &DescriptorTable, did: Did) -> Result<Attachment> {
    let object = table.uninstall(did)?;
    Ok(Attachment::Descriptor(object))
}

/// Install every descriptor attachment from a received message into
/// `table`, returning the assigned `did` for each (`None` for attachments
/// that were plain byte buffers, which never touch a descriptor table).
pub fn attach_received(table: &DescriptorTable, attachments: Vec<Attachment>) -> Result<Vec<Option<Did>>> {
    let mut dids = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        match attachment {
            Attachment::ByteBuffer(_) => dids.push(None),
            Attachment::Descriptor(object) => dids.push(Some(table.install(object)?)),
        }
    }
    Ok(dids)
}

/// One message moving through a channel.
#[derive(Debug, Clone)]
pub struct Message {
    id: MessageId,
    /// Caller-supplied correlation id: a reply typically carries the
    /// request's `id` back as its own `conversation_id` so the sender can
    /// match the response to the request it answers.
    conversation_id: u64,
    data: Vec<u8>,
    attachments: Vec<Attachment>,
}

impl Message {
    /// Build a message, assigning it the next message id.
    pub fn new(conversation_id: u64, data: Vec<u8>, attachments: Vec<Attachment>) -> Self {
        Self {
            id: MessageId::next(),
            conversation_id,
            data,
            attachments,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn conversation_id(&self) -> u64 {
        self.conversation_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<Attachment>) {
        (self.data, self.attachments)
    }

    pub fn wire_size(&self) -> usize {
        self.data.len() + self.attachments.iter().map(Attachment::wire_size).sum::<usize>()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn messages_get_distinct_ids() {
        let a = Message::new(0, vec![1, 2, 3], vec![]);
        let b = Message::new(0, vec![], vec![]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn into_parts_preserves_payload() {
        let msg = Message::new(0, vec![9, 9], vec![]);
        let (data, attachments) = msg.into_parts();
        assert_eq!(data, vec![9, 9]);
        assert!(attachments.is_empty());
    }

    #[test]
    fn conversation_id_round_trips() {
        let request = Message::new(0, vec![], vec![]);
        let reply = Message::new(request.id().as_u64(), vec![], vec![]);
        assert_eq!(reply.conversation_id(), request.id().as_u64());
    }

    #[test]
    fn detach_and_attach_move_a_descriptor_between_tables() {
        use crate::ipc::Endpoint;

        let sender_table = DescriptorTable::new();
        let receiver_table = DescriptorTable::new();
        let (endpoint, _peer) = Endpoint::new_pair(4);
        let did = sender_table.install(endpoint).unwrap();

        let attachment = detach_for_transfer(&sender_table, did).unwrap();
        assert!(sender_table.lookup(did).is_err());
        assert_eq!(attachment.wire_tag(), wire_tag::CHANNEL);

        let installed = attach_received(&receiver_table, vec![attachment]).unwrap();
        assert_eq!(installed.len(), 1);
        assert!(receiver_table.lookup(installed[0].unwrap()).is_ok());
    }
}
