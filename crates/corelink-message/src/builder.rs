use std::net::SocketAddr;

use bytemuck::Pod;
use corelink_utils::PaddedStr;
use serde::Serialize;

use crate::{
    ArchiveKind, DEFAULT_MAGIC, MAGIC_LEN, MessageError, MessageHeader,
    codec::{encode_body, encode_raw},
};

/// Produces framed byte buffers: a [`MessageHeader`] stamped with the
/// configured magic, followed by the serialized body.
#[derive(Clone, Debug)]
pub struct MessageBuilder {
    magic: PaddedStr<MAGIC_LEN>,
    archive: ArchiveKind,
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self {
            magic: PaddedStr::from_str_truncate(DEFAULT_MAGIC),
            archive: ArchiveKind::PortableBinary,
        }
    }
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Truncates to the 15 bytes the header field can carry.
    pub fn with_magic(mut self, magic: &str) -> Self {
        self.magic = PaddedStr::from_str_truncate(magic);
        self
    }

    pub fn with_archive(mut self, archive: ArchiveKind) -> Self {
        self.archive = archive;
        self
    }

    pub fn magic(&self) -> PaddedStr<MAGIC_LEN> {
        self.magic
    }

    pub fn archive(&self) -> ArchiveKind {
        self.archive
    }

    /// Frames `message` with the builder's default archive kind.
    pub fn build<T: Serialize>(
        &self,
        message: &T,
        message_id: u32,
        response: SocketAddr,
    ) -> Result<Vec<u8>, MessageError> {
        self.build_with(message, message_id, response, self.archive)
    }

    /// Frames `message` with an explicit archive kind. `Raw` is
    /// rejected here; plain-old-data goes through [`build_raw`](Self::build_raw).
    pub fn build_with<T: Serialize>(
        &self,
        message: &T,
        message_id: u32,
        response: SocketAddr,
        archive: ArchiveKind,
    ) -> Result<Vec<u8>, MessageError> {
        let body = encode_body(message, archive)?;
        Ok(self.assemble(archive, message_id, response, body))
    }

    pub fn build_raw<T: Pod>(&self, message: &T, message_id: u32, response: SocketAddr) -> Vec<u8> {
        self.assemble(ArchiveKind::Raw, message_id, response, encode_raw(message))
    }

    /// Header-only frame; the id alone is the message.
    pub fn build_control(&self, message_id: u32, response: SocketAddr) -> Vec<u8> {
        self.assemble(self.archive, message_id, response, Vec::new())
    }

    fn assemble(
        &self,
        archive: ArchiveKind,
        message_id: u32,
        response: SocketAddr,
        body: Vec<u8>,
    ) -> Vec<u8> {
        let mut header = MessageHeader::new(self.magic, archive, message_id, response);
        header.total_length = (MessageHeader::WIRE_SIZE + body.len()) as u32;

        let mut frame = Vec::with_capacity(header.total_length as usize);
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(&body);
        frame
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping(u32);

    fn response() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 9000))
    }

    #[test]
    fn framed_buffer_carries_header_then_body() {
        let builder = MessageBuilder::new();
        let frame = builder.build(&Ping(9), 42, response()).unwrap();

        let header = MessageHeader::decode(&frame).unwrap();
        assert_eq!(header.message_id, 42);
        assert_eq!(header.archive, ArchiveKind::PortableBinary);
        assert_eq!(header.total_length as usize, frame.len());
        assert_eq!(header.response_endpoint(), Some(response()));

        let body: Ping = crate::decode_body(
            &frame[MessageHeader::WIRE_SIZE..],
            ArchiveKind::PortableBinary,
        )
        .unwrap();
        assert_eq!(body, Ping(9));
    }

    #[test]
    fn control_frame_is_header_only() {
        let frame = MessageBuilder::new().build_control(7, response());
        assert_eq!(frame.len(), MessageHeader::WIRE_SIZE);
        assert_eq!(MessageHeader::decode(&frame).unwrap().message_id, 7);
    }

    #[test]
    fn raw_archive_rejected_on_serde_path() {
        let result = MessageBuilder::new().build_with(&Ping(1), 1, response(), ArchiveKind::Raw);
        assert!(matches!(result, Err(MessageError::ArchiveKind)));
    }

    #[test]
    fn custom_magic_is_stamped_and_truncated() {
        let builder = MessageBuilder::new().with_magic("A_VERY_LONG_MAGIC_STRING");
        let frame = builder.build_control(1, response());
        let header = MessageHeader::decode(&frame).unwrap();
        assert_eq!(header.magic.as_str(), "A_VERY_LONG_MAG");
    }
}
