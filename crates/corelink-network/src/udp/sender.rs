use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use corelink_runtime::{IoRuntime, Strand, UdpHandle, set_socket_buf_size};
use corelink_sync::SyncEvent;
use tracing::{debug, warn};

/// A UDP datagram can carry 65535 bytes total, less 8 bytes of UDP
/// header and 20 bytes of IP header.
pub const MAX_DATAGRAM_SIZE: usize = 65507;

pub const DEFAULT_UDP_SEND_BUF_SIZE: usize = 8192;

/// Whether a sender targets a broadcast or a unicast address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UdpOption {
    Broadcast,
    Unicast,
}

/// Datagram sender bound to one receiver endpoint.
///
/// Async sends are serialized through a per-socket strand, so frames
/// leave in submission order and each message buffer lives until its
/// send completes.
pub struct UdpSender {
    handle: UdpHandle,
    strand: Strand,
    receiver: SocketAddr,
}

impl UdpSender {
    pub fn new(runtime: &IoRuntime, receiver: SocketAddr, option: UdpOption) -> io::Result<Self> {
        Self::with_send_buf_size(runtime, receiver, option, DEFAULT_UDP_SEND_BUF_SIZE)
    }

    pub fn with_send_buf_size(
        runtime: &IoRuntime,
        receiver: SocketAddr,
        option: UdpOption,
        send_buf_size: usize,
    ) -> io::Result<Self> {
        let socket = std::net::UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
        if option == UdpOption::Broadcast {
            socket.set_broadcast(true)?;
        }
        set_socket_buf_size(&socket, send_buf_size);
        let handle = runtime.register_udp(socket)?;

        Ok(Self { handle, strand: Strand::new(runtime), receiver })
    }

    pub fn receiver_endpoint(&self) -> SocketAddr {
        self.receiver
    }

    /// Oversized datagrams are dropped with a warning; async sends
    /// report nothing else back.
    pub fn send_async(&self, data: Vec<u8>) {
        if data.len() > MAX_DATAGRAM_SIZE {
            warn!(len = data.len(), "datagram exceeds udp limit, dropped");
            return;
        }
        let handle = self.handle.clone();
        let target = self.receiver;
        self.strand.post(move || {
            handle.send_to(data, target, |res| {
                if let Err(err) = res
                    && !err.is_aborted()
                {
                    debug!(?err, "udp send failed");
                }
            });
        });
    }

    /// Waits on the caller's thread for the send completion.
    pub fn send_sync(&self, data: Vec<u8>) -> bool {
        if data.len() > MAX_DATAGRAM_SIZE {
            warn!(len = data.len(), "datagram exceeds udp limit, dropped");
            return false;
        }

        let done = Arc::new(SyncEvent::new());
        let sent = Arc::new(AtomicBool::new(false));
        {
            let handle = self.handle.clone();
            let target = self.receiver;
            let done = Arc::clone(&done);
            let sent = Arc::clone(&sent);
            self.strand.post(move || {
                handle.send_to(data, target, move |res| {
                    match res {
                        Ok(_) => sent.store(true, Ordering::Release),
                        Err(err) if err.is_aborted() => {}
                        Err(err) => debug!(?err, "udp send failed"),
                    }
                    done.signal();
                });
            });
        }
        done.wait();
        sent.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        let closed = Arc::new(SyncEvent::new());
        let ev = Arc::clone(&closed);
        self.handle.close(move || ev.signal());
        closed.wait();
    }
}
