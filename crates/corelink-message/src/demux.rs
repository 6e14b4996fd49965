use std::sync::Arc;

use bytemuck::Pod;
use corelink_network::{CheckBytesFn, FrameError, MessageReceivedFn};
use corelink_sync::{DrainPolicy, HandlerError, MessageQueueThread};
use corelink_utils::PaddedStr;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    ArchiveKind, MAGIC_LEN, MessageError, MessageHeader,
    codec::{decode_body, decode_raw},
};

/// A complete frame, split back into header and body.
#[derive(Debug)]
pub struct ReceivedMessage {
    pub header: MessageHeader,
    pub body: Vec<u8>,
}

impl ReceivedMessage {
    /// Deserializes the body with the archive kind the header declares.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        decode_body(&self.body, self.header.archive)
    }

    pub fn decode_raw<T: Pod>(&self) -> Result<T, MessageError> {
        if self.header.archive != ArchiveKind::Raw {
            return Err(MessageError::ArchiveKind);
        }
        decode_raw(&self.body)
    }
}

/// Consumes complete frames on behalf of user code.
pub type MessageDispatcher = Arc<dyn Fn(Arc<ReceivedMessage>) + Send + Sync>;

/// Received-frame side of the codec: validates headers for the framing
/// loop and demultiplexes complete frames into [`ReceivedMessage`]s for
/// the dispatcher.
pub struct MessageDemux {
    magic: PaddedStr<MAGIC_LEN>,
    dispatcher: MessageDispatcher,
}

impl MessageDemux {
    pub fn new(magic: PaddedStr<MAGIC_LEN>, dispatcher: MessageDispatcher) -> Arc<Self> {
        Arc::new(Self { magic, dispatcher })
    }

    /// Bytes the current frame still needs, judged by its header.
    pub fn check_bytes_remaining(&self, bytes: &[u8]) -> Result<usize, FrameError> {
        let header = MessageHeader::decode(bytes).map_err(|err| match err {
            MessageError::Magic => FrameError::Magic,
            _ => FrameError::Length,
        })?;
        if header.magic != self.magic {
            return Err(FrameError::Magic);
        }

        let total = header.total_length as usize;
        if total < bytes.len() {
            return Err(FrameError::Length);
        }
        Ok(total - bytes.len())
    }

    /// Packages a complete frame and hands it to the dispatcher.
    pub fn message_received(&self, bytes: &[u8]) {
        match MessageHeader::decode(bytes) {
            Ok(header) => {
                let body = bytes[MessageHeader::WIRE_SIZE..].to_vec();
                (self.dispatcher)(Arc::new(ReceivedMessage { header, body }));
            }
            Err(err) => debug!(%err, "discarding undecodable frame"),
        }
    }

    /// The hook pair a TCP or UDP endpoint needs to frame this
    /// protocol.
    pub fn framing_hooks(self: &Arc<Self>) -> (CheckBytesFn, MessageReceivedFn) {
        let demux = Arc::clone(self);
        let check: CheckBytesFn = Arc::new(move |bytes| demux.check_bytes_remaining(bytes));
        let demux = Arc::clone(self);
        let received: MessageReceivedFn = Arc::new(move |bytes| demux.message_received(bytes));
        (check, received)
    }
}

/// Message-queue thread keyed by header message id.
///
/// Handing its [`dispatcher`](Self::dispatcher) to a typed endpoint
/// moves user dispatch off the I/O workers onto this queue's own
/// thread.
pub struct DispatchQueue {
    queue: Arc<MessageQueueThread<u32, Arc<ReceivedMessage>>>,
}

impl DispatchQueue {
    pub fn new(drain: DrainPolicy) -> Self {
        Self {
            queue: Arc::new(MessageQueueThread::new(
                |msg: &Arc<ReceivedMessage>| Ok(msg.header.message_id),
                drain,
            )),
        }
    }

    pub fn register_handler(
        &self,
        message_id: u32,
        handler: impl Fn(Arc<ReceivedMessage>) -> Result<(), HandlerError> + Send + Sync + 'static,
    ) -> Result<(), HandlerError> {
        self.queue.register_handler(message_id, handler)
    }

    pub fn dispatcher(&self) -> MessageDispatcher {
        let queue = Arc::clone(&self.queue);
        Arc::new(move |msg| queue.push(msg))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::{Ipv4Addr, SocketAddr},
        sync::Mutex,
    };

    use super::*;
    use crate::MessageBuilder;

    fn collecting_demux() -> (Arc<MessageDemux>, Arc<Mutex<Vec<Arc<ReceivedMessage>>>>) {
        let seen: Arc<Mutex<Vec<Arc<ReceivedMessage>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let demux = MessageDemux::new(
            PaddedStr::from_str_truncate(crate::DEFAULT_MAGIC),
            Arc::new(move |msg| sink.lock().unwrap().push(msg)),
        );
        (demux, seen)
    }

    fn response() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 4000))
    }

    #[test]
    fn partial_header_reports_length_error() {
        let (demux, _) = collecting_demux();
        assert_eq!(demux.check_bytes_remaining(&[0u8; 10]), Err(FrameError::Length));
    }

    #[test]
    fn wrong_magic_reports_magic_error() {
        let (demux, _) = collecting_demux();
        let frame = MessageBuilder::new().with_magic("_OTHER_PROTO_").build_control(1, response());
        assert_eq!(demux.check_bytes_remaining(&frame), Err(FrameError::Magic));
    }

    #[test]
    fn remaining_counts_down_to_zero() {
        let (demux, _) = collecting_demux();
        let frame = MessageBuilder::new().build(&vec![1u32, 2, 3], 5, response()).unwrap();

        let header_only = &frame[..MessageHeader::WIRE_SIZE];
        let body_len = frame.len() - MessageHeader::WIRE_SIZE;
        assert_eq!(demux.check_bytes_remaining(header_only), Ok(body_len));
        assert_eq!(demux.check_bytes_remaining(&frame), Ok(0));
    }

    #[test]
    fn dispatches_header_and_body() {
        let (demux, seen) = collecting_demux();
        let frame = MessageBuilder::new().build(&String::from("payload"), 9, response()).unwrap();
        demux.message_received(&frame);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].header.message_id, 9);
        assert_eq!(seen[0].decode::<String>().unwrap(), "payload");
    }
}
