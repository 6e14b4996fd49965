use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use corelink_runtime::{IoRuntime, UdpHandle};
use corelink_sync::SyncEvent;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::{CheckBytesFn, MessageReceivedFn, udp::UdpOption};

/// Datagram receiver bound to a port.
///
/// UDP preserves message boundaries, so the check hook runs once per
/// datagram and must report the frame complete; a datagram that still
/// "needs" bytes was truncated in flight and is dropped.
pub struct UdpReceiver {
    handle: UdpHandle,
    local: SocketAddr,
}

impl UdpReceiver {
    pub fn new(
        runtime: &IoRuntime,
        listen_port: u16,
        option: UdpOption,
        check_bytes: CheckBytesFn,
        on_message: MessageReceivedFn,
    ) -> io::Result<Self> {
        // Reuse-address must precede the bind, hence the raw socket.
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if option == UdpOption::Broadcast {
            socket.set_broadcast(true)?;
        }
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, listen_port));
        socket.bind(&bind_addr.into())?;
        let socket: std::net::UdpSocket = socket.into();
        let local = socket.local_addr()?;

        let handle = runtime.register_udp(socket)?;
        Self::arm_receive(handle.clone(), check_bytes, on_message);

        Ok(Self { handle, local })
    }

    fn arm_receive(handle: UdpHandle, check_bytes: CheckBytesFn, on_message: MessageReceivedFn) {
        let next = handle.clone();
        handle.recv_from(move |res| {
            match res {
                Ok((datagram, from)) => match check_bytes(&datagram) {
                    Ok(0) => on_message(&datagram),
                    Ok(needed) => {
                        debug!(needed, %from, "datagram shorter than its frame, dropped");
                    }
                    Err(err) => debug!(%err, %from, "dropping malformed datagram"),
                },
                // Receiver closed; stop re-arming.
                Err(err) if err.is_aborted() => return,
                Err(err) => debug!(?err, "udp receive failed"),
            }
            Self::arm_receive(next, check_bytes, on_message);
        });
    }

    pub fn local_endpoint(&self) -> SocketAddr {
        self.local
    }

    pub fn close(&self) {
        let closed = Arc::new(SyncEvent::new());
        let ev = Arc::clone(&closed);
        self.handle.close(move || ev.signal());
        closed.wait();
    }
}

impl Drop for UdpReceiver {
    fn drop(&mut self) {
        self.close();
    }
}
