use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use thiserror::Error;

/// Endpoint marker for "no explicit address".
pub const NULL_ENDPOINT: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

/// Framing violation reported by a check-bytes-remaining hook. The read
/// loop drops the malformed bytes and goes back to reading a fresh
/// frame; the connection stays up.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length inconsistent with header")]
    Length,
    #[error("frame magic does not match")]
    Magic,
}

/// Inspects the bytes of the current frame read so far and returns how
/// many more bytes it still needs; 0 means the frame is complete.
pub type CheckBytesFn = Arc<dyn Fn(&[u8]) -> Result<usize, FrameError> + Send + Sync>;

/// Invoked once per complete frame with the frame's bytes.
pub type MessageReceivedFn = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Nagle policy for connection sockets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SendOption {
    #[default]
    NagleOn,
    /// Disable Nagle's algorithm: send small frames immediately.
    NagleOff,
}

impl SendOption {
    pub(crate) fn nodelay(self) -> bool {
        self == Self::NagleOff
    }
}

/// Framing hooks plus socket policy shared by every connection a server
/// or client creates.
#[derive(Clone)]
pub struct FramingConfig {
    /// Bytes to read before the first `check_bytes` call, typically the
    /// wire size of the frame header.
    pub min_read: usize,
    pub check_bytes: CheckBytesFn,
    pub on_message: MessageReceivedFn,
    pub send_option: SendOption,
    pub socket_buf_size: Option<usize>,
}

impl FramingConfig {
    pub fn new(min_read: usize, check_bytes: CheckBytesFn, on_message: MessageReceivedFn) -> Self {
        Self { min_read, check_bytes, on_message, send_option: SendOption::NagleOn, socket_buf_size: None }
    }

    pub fn with_send_option(mut self, send_option: SendOption) -> Self {
        self.send_option = send_option;
        self
    }

    /// Kernel SO_SNDBUF / SO_RCVBUF override for every socket created
    /// with this config.
    pub fn with_socket_buf_size(mut self, size: usize) -> Self {
        self.socket_buf_size = Some(size);
        self
    }
}
