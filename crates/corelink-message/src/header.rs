use std::net::{IpAddr, SocketAddr};

use corelink_utils::PaddedStr;

use crate::MessageError;

pub const MAGIC_LEN: usize = 16;
pub const ADDRESS_LEN: usize = 16;

/// Magic prefix stamped on every frame unless overridden.
pub const DEFAULT_MAGIC: &str = "_BEGIN_MESSAGE_";

/// Encoding used for the frame body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArchiveKind {
    #[default]
    PortableBinary = 0,
    Text = 1,
    Binary = 2,
    Xml = 3,
    /// Byte-for-byte copy of a plain-old-data value.
    Raw = 4,
}

impl ArchiveKind {
    pub fn from_wire(byte: u8) -> Result<Self, MessageError> {
        match byte {
            0 => Ok(Self::PortableBinary),
            1 => Ok(Self::Text),
            2 => Ok(Self::Binary),
            3 => Ok(Self::Xml),
            4 => Ok(Self::Raw),
            _ => Err(MessageError::ArchiveKind),
        }
    }
}

/// Fixed-layout frame header.
///
/// Wire form is exactly [`WIRE_SIZE`](Self::WIRE_SIZE) bytes: the magic
/// and response-address fields NUL-padded to 16 bytes each (final byte
/// always NUL), then response port, message id, archive kind and total
/// frame length, multi-byte fields little-endian. `total_length` counts
/// header plus body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: PaddedStr<MAGIC_LEN>,
    pub response_address: PaddedStr<ADDRESS_LEN>,
    pub response_port: u16,
    pub message_id: u32,
    pub archive: ArchiveKind,
    pub total_length: u32,
}

impl MessageHeader {
    pub const WIRE_SIZE: usize = MAGIC_LEN + ADDRESS_LEN + 2 + 4 + 1 + 4;

    /// A header for an empty frame; `total_length` grows as the body is
    /// attached. IPv4 response addresses always fit the 16-byte field;
    /// longer textual forms are truncated.
    pub fn new(
        magic: PaddedStr<MAGIC_LEN>,
        archive: ArchiveKind,
        message_id: u32,
        response: SocketAddr,
    ) -> Self {
        Self {
            magic,
            response_address: PaddedStr::from_str_truncate(&response.ip().to_string()),
            response_port: response.port(),
            message_id,
            archive,
            total_length: Self::WIRE_SIZE as u32,
        }
    }

    /// The endpoint a reply should go to, when the address field parses
    /// as an IP address.
    pub fn response_endpoint(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.response_address.as_str().parse().ok()?;
        Some(SocketAddr::new(ip, self.response_port))
    }

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[..MAGIC_LEN].copy_from_slice(self.magic.as_wire());
        out[MAGIC_LEN..MAGIC_LEN + ADDRESS_LEN].copy_from_slice(self.response_address.as_wire());
        out[32..34].copy_from_slice(&self.response_port.to_le_bytes());
        out[34..38].copy_from_slice(&self.message_id.to_le_bytes());
        out[38] = self.archive as u8;
        out[39..43].copy_from_slice(&self.total_length.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.len() < Self::WIRE_SIZE {
            return Err(MessageError::Length);
        }

        let magic = PaddedStr::from_wire(bytes[..MAGIC_LEN].try_into().unwrap())
            .map_err(|_| MessageError::Magic)?;
        // The address field is informational; tolerate garbage in it.
        let response_address =
            PaddedStr::from_wire(bytes[MAGIC_LEN..MAGIC_LEN + ADDRESS_LEN].try_into().unwrap())
                .unwrap_or_default();
        let response_port = u16::from_le_bytes(bytes[32..34].try_into().unwrap());
        let message_id = u32::from_le_bytes(bytes[34..38].try_into().unwrap());
        let archive = ArchiveKind::from_wire(bytes[38])?;
        let total_length = u32::from_le_bytes(bytes[39..43].try_into().unwrap());
        if (total_length as usize) < Self::WIRE_SIZE {
            return Err(MessageError::Length);
        }

        Ok(Self { magic, response_address, response_port, message_id, archive, total_length })
    }
}
