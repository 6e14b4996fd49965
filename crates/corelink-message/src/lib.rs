mod builder;
mod codec;
mod demux;
mod error;
mod header;
mod typed;

pub use builder::MessageBuilder;
pub use codec::{decode_body, decode_raw, encode_body, encode_raw};
pub use demux::{DispatchQueue, MessageDemux, MessageDispatcher, ReceivedMessage};
pub use error::MessageError;
pub use header::{ADDRESS_LEN, ArchiveKind, DEFAULT_MAGIC, MAGIC_LEN, MessageHeader};
pub use typed::{TypedTcpClient, TypedTcpServer, TypedUdpReceiver, TypedUdpSender};
