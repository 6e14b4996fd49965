use std::{io, os::fd::AsRawFd};

/// Per-socket options applied when a stream enters the runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct SocketOptions {
    /// Disables Nagle's algorithm when set.
    pub nodelay: bool,
    /// Kernel SO_SNDBUF / SO_RCVBUF, when overridden.
    pub buf_size: Option<usize>,
}

impl SocketOptions {
    pub fn nodelay(nodelay: bool) -> Self {
        Self { nodelay, buf_size: None }
    }

    pub fn with_buf_size(mut self, size: usize) -> Self {
        self.buf_size = Some(size);
        self
    }
}

/// Sets kernel SO_SNDBUF and SO_RCVBUF on any socket-backed fd.
pub fn set_socket_buf_size(socket: &impl AsRawFd, size: usize) {
    let fd = socket.as_raw_fd();
    let size = size as libc::c_int;
    for opt in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                &size as *const _ as *const libc::c_void,
                core::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
    }
}

pub(crate) fn apply_tcp_options(
    stream: &mio::net::TcpStream,
    opts: SocketOptions,
) -> io::Result<()> {
    stream.set_nodelay(opts.nodelay)?;
    if let Some(size) = opts.buf_size {
        set_socket_buf_size(stream, size);
    }
    Ok(())
}
