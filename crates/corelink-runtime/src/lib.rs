mod error;
mod handles;
mod pool;
mod reactor;
mod runtime;
mod socket;
mod strand;

pub use error::IoFailure;
pub use handles::{ListenerHandle, SharedBuf, TcpHandle, UdpHandle};
pub use pool::PoolConfig;
pub use runtime::IoRuntime;
pub use socket::{SocketOptions, set_socket_buf_size};
pub use strand::Strand;

pub(crate) use corelink_utils::lock_unpoisoned as guard;

/// A completion or posted task scheduled onto the pool workers.
pub type Task = Box<dyn FnOnce() + Send>;
