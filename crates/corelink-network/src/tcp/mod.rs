mod client;
mod connection;
mod registry;
mod server;

pub use client::TcpClient;
pub use connection::{DEFAULT_RECV_RESERVE, TcpConnection};
pub use registry::{ConnectionRegistry, RegistryError};
pub use server::TcpServer;
