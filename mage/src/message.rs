//! Wire types: identifiers, the message header, endpoint descriptors,
//! and the handshake message bodies. Marshalling follows the manual
//! `bytes::{Buf, BufMut}` style `webrtc-sctp`'s chunk headers use, with
//! every integer written little-endian per the wire format.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::util::{generate_name, NAME_LEN};

/// A process's identity as seen by its peers. Random, 15 bytes, ASCII.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeName(pub [u8; NAME_LEN]);

/// An endpoint's identity within its owning node. Random, 15 bytes, ASCII.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointName(pub [u8; NAME_LEN]);

impl NodeName {
    pub fn generate() -> Self {
        Self(generate_name())
    }
}

impl EndpointName {
    pub fn generate() -> Self {
        Self(generate_name())
    }
}

/// The placeholder node name a freshly-accepted channel is keyed under
/// until the inviter's `SendInvitation` names it for real.
pub const INIT_NODE_NAME: NodeName = NodeName([
    b'I', b'N', b'I', b'T', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
]);

/// A globally-meaningful address: which node, and which endpoint on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub node_name: NodeName,
    pub endpoint_name: EndpointName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageKind {
    SendInvitation = 0,
    AcceptInvitation = 1,
    UserMessage = 2,
}

impl MessageKind {
    fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(Self::SendInvitation),
            1 => Ok(Self::AcceptInvitation),
            2 => Ok(Self::UserMessage),
            _ => Err(Error::Corrupt),
        }
    }
}

pub const HEADER_LEN: usize = 4 + NAME_LEN + 4 + 4;
pub const ENDPOINT_DESCRIPTOR_LEN: usize = NAME_LEN * 4;

#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub message_kind: MessageKind,
    pub target_endpoint: EndpointName,
    pub num_endpoint_descriptors: u32,
    pub total_size: u32,
}

impl MessageHeader {
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.message_kind as u32);
        buf.put_slice(&self.target_endpoint.0);
        buf.put_u32_le(self.num_endpoint_descriptors);
        buf.put_u32_le(self.total_size);
    }

    pub fn read_from(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < HEADER_LEN {
            return Err(Error::Corrupt);
        }
        let message_kind = MessageKind::from_u32(buf.get_u32_le())?;
        let mut target_endpoint = [0u8; NAME_LEN];
        buf.copy_to_slice(&mut target_endpoint);
        let num_endpoint_descriptors = buf.get_u32_le();
        let total_size = buf.get_u32_le();
        Ok(Self {
            message_kind,
            target_endpoint: EndpointName(target_endpoint),
            num_endpoint_descriptors,
            total_size,
        })
    }
}

/// Describes a handle being transferred inline with a user message. See
/// the send-message and recover operations for how each field is used.
#[derive(Debug, Clone, Copy)]
pub struct EndpointDescriptor {
    pub endpoint_name: EndpointName,
    pub cross_node_endpoint_name: EndpointName,
    pub peer_node_name: NodeName,
    pub peer_endpoint_name: EndpointName,
}

impl EndpointDescriptor {
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.endpoint_name.0);
        buf.put_slice(&self.cross_node_endpoint_name.0);
        buf.put_slice(&self.peer_node_name.0);
        buf.put_slice(&self.peer_endpoint_name.0);
    }

    pub fn read_from(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < ENDPOINT_DESCRIPTOR_LEN {
            return Err(Error::Corrupt);
        }
        let mut read_name = |b: &mut Bytes| {
            let mut name = [0u8; NAME_LEN];
            b.copy_to_slice(&mut name);
            name
        };
        Ok(Self {
            endpoint_name: EndpointName(read_name(buf)),
            cross_node_endpoint_name: EndpointName(read_name(buf)),
            peer_node_name: NodeName(read_name(buf)),
            peer_endpoint_name: EndpointName(read_name(buf)),
        })
    }
}

/// A fully parsed message: header, opaque payload, and any endpoint
/// descriptors carried alongside it.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Bytes,
    pub descriptors: Vec<EndpointDescriptor>,
    /// Handles recovered from `descriptors` by the receiving side, in
    /// the same order. Never serialized; populated only once a message
    /// has actually arrived at its destination process.
    pub attached_handles: Vec<crate::handles::MessagePipe>,
}

impl Message {
    pub fn user_message(target_endpoint: EndpointName, payload: Bytes) -> Self {
        Self::user_message_raw(MessageKind::UserMessage, target_endpoint, payload)
    }

    /// Builds a message of any kind with no endpoint descriptors, used
    /// for the handshake messages (`SendInvitation`/`AcceptInvitation`)
    /// whose "target" is meaningless since no endpoint has been agreed
    /// on yet.
    pub fn user_message_raw(kind: MessageKind, target_endpoint: EndpointName, payload: Bytes) -> Self {
        Self {
            header: MessageHeader {
                message_kind: kind,
                target_endpoint,
                num_endpoint_descriptors: 0,
                total_size: 0,
            },
            payload,
            descriptors: Vec::new(),
            attached_handles: Vec::new(),
        }
    }

    pub fn with_descriptors(mut self, descriptors: Vec<EndpointDescriptor>) -> Self {
        self.header.num_endpoint_descriptors = descriptors.len() as u32;
        self.descriptors = descriptors;
        self
    }

    pub fn encode(&self) -> Bytes {
        let body_len = self.payload.len() + self.descriptors.len() * ENDPOINT_DESCRIPTOR_LEN;
        let mut header = self.header;
        header.total_size = (HEADER_LEN + body_len) as u32;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
        header.write_to(&mut buf);
        buf.put_slice(&self.payload);
        for descriptor in &self.descriptors {
            descriptor.write_to(&mut buf);
        }
        buf.freeze()
    }

    /// Parses a complete framed message out of `buf`, which must contain
    /// at least `total_size` bytes (the `Channel` is responsible for
    /// accumulating short reads before calling this).
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        let header = MessageHeader::read_from(&mut buf)?;
        let descriptors_len = header.num_endpoint_descriptors as usize * ENDPOINT_DESCRIPTOR_LEN;
        if buf.remaining() < descriptors_len {
            return Err(Error::Corrupt);
        }
        let payload_len = buf.remaining() - descriptors_len;
        let payload = buf.copy_to_bytes(payload_len);
        let mut descriptors = Vec::with_capacity(header.num_endpoint_descriptors as usize);
        for _ in 0..header.num_endpoint_descriptors {
            descriptors.push(EndpointDescriptor::read_from(&mut buf)?);
        }
        Ok(Self {
            header,
            payload,
            descriptors,
            attached_handles: Vec::new(),
        })
    }
}

/// `SendInvitation` message body (§6).
#[derive(Debug, Clone, Copy)]
pub struct InvitationBody {
    pub inviter_name: NodeName,
    pub temporary_remote_node_name: NodeName,
    pub intended_endpoint_name: EndpointName,
    pub intended_peer_endpoint_name: EndpointName,
}

impl InvitationBody {
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.inviter_name.0);
        buf.put_slice(&self.temporary_remote_node_name.0);
        buf.put_slice(&self.intended_endpoint_name.0);
        buf.put_slice(&self.intended_peer_endpoint_name.0);
    }

    pub fn read_from(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < NAME_LEN * 4 {
            return Err(Error::Corrupt);
        }
        let mut read_name = |b: &mut Bytes| {
            let mut name = [0u8; NAME_LEN];
            b.copy_to_slice(&mut name);
            name
        };
        Ok(Self {
            inviter_name: NodeName(read_name(buf)),
            temporary_remote_node_name: NodeName(read_name(buf)),
            intended_endpoint_name: EndpointName(read_name(buf)),
            intended_peer_endpoint_name: EndpointName(read_name(buf)),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(NAME_LEN * 4);
        self.write_to(&mut buf);
        buf.freeze()
    }
}

/// `AcceptInvitation` message body (§6).
#[derive(Debug, Clone, Copy)]
pub struct AcceptInvitationBody {
    pub temporary_remote_node_name: NodeName,
    pub actual_node_name: NodeName,
}

impl AcceptInvitationBody {
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.temporary_remote_node_name.0);
        buf.put_slice(&self.actual_node_name.0);
    }

    pub fn read_from(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < NAME_LEN * 2 {
            return Err(Error::Corrupt);
        }
        let mut read_name = |b: &mut Bytes| {
            let mut name = [0u8; NAME_LEN];
            b.copy_to_slice(&mut name);
            name
        };
        Ok(Self {
            temporary_remote_node_name: NodeName(read_name(buf)),
            actual_node_name: NodeName(read_name(buf)),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(NAME_LEN * 2);
        self.write_to(&mut buf);
        buf.freeze()
    }
}

#[cfg(test)]
mod message_test {
    use super::*;

    fn name(b: u8) -> [u8; NAME_LEN] {
        [b; NAME_LEN]
    }

    #[test]
    fn header_round_trips() {
        let header = MessageHeader {
            message_kind: MessageKind::UserMessage,
            target_endpoint: EndpointName(name(7)),
            num_endpoint_descriptors: 2,
            total_size: 123,
        };
        let mut buf = BytesMut::new();
        header.write_to(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        let mut bytes = buf.freeze();
        let decoded = MessageHeader::read_from(&mut bytes).unwrap();
        assert_eq!(decoded.target_endpoint, header.target_endpoint);
        assert_eq!(decoded.num_endpoint_descriptors, 2);
        assert_eq!(decoded.total_size, 123);
    }

    #[test]
    fn message_with_descriptors_round_trips() {
        let target = EndpointName(name(1));
        let descriptor = EndpointDescriptor {
            endpoint_name: EndpointName(name(2)),
            cross_node_endpoint_name: EndpointName(name(3)),
            peer_node_name: NodeName(name(4)),
            peer_endpoint_name: EndpointName(name(5)),
        };
        let message = Message::user_message(target, Bytes::from_static(b"hello"))
            .with_descriptors(vec![descriptor]);
        let encoded = message.encode();
        let decoded = Message::decode(encoded).unwrap();
        assert_eq!(decoded.payload, Bytes::from_static(b"hello"));
        assert_eq!(decoded.descriptors.len(), 1);
        assert_eq!(decoded.descriptors[0].endpoint_name, descriptor.endpoint_name);
        assert_eq!(decoded.header.target_endpoint, target);
    }

    #[test]
    fn truncated_header_is_corrupt() {
        let bytes = Bytes::from_static(b"short");
        assert!(matches!(MessageHeader::read_from(&mut bytes.clone()), Err(Error::Corrupt)));
    }

    #[test]
    fn invitation_body_round_trips() {
        let body = InvitationBody {
            inviter_name: NodeName(name(1)),
            temporary_remote_node_name: NodeName(name(2)),
            intended_endpoint_name: EndpointName(name(3)),
            intended_peer_endpoint_name: EndpointName(name(4)),
        };
        let mut encoded = body.encode();
        let decoded = InvitationBody::read_from(&mut encoded).unwrap();
        assert_eq!(decoded.inviter_name, body.inviter_name);
        assert_eq!(decoded.intended_peer_endpoint_name, body.intended_peer_endpoint_name);
    }
}
