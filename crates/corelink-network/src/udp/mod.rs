mod receiver;
mod sender;

pub use receiver::UdpReceiver;
pub use sender::{DEFAULT_UDP_SEND_BUF_SIZE, MAX_DATAGRAM_SIZE, UdpOption, UdpSender};
