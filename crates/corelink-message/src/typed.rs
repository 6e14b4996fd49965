use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
};

use bytemuck::Pod;
use corelink_network::{
    FramingConfig, NULL_ENDPOINT, SendOption,
    tcp::{TcpClient, TcpServer},
    udp::{UdpOption, UdpReceiver, UdpSender},
};
use corelink_runtime::IoRuntime;
use serde::Serialize;

use crate::{MessageBuilder, MessageDemux, MessageDispatcher, MessageError, MessageHeader};

fn framing(
    builder: &MessageBuilder,
    dispatcher: MessageDispatcher,
    send_option: SendOption,
) -> FramingConfig {
    let demux = MessageDemux::new(builder.magic(), dispatcher);
    let (check_bytes, on_message) = demux.framing_hooks();
    FramingConfig::new(MessageHeader::WIRE_SIZE, check_bytes, on_message)
        .with_send_option(send_option)
}

/// [`TcpServer`] speaking the framed message protocol.
///
/// Received frames go to `dispatcher`; outgoing messages are framed by
/// the builder, with the response-address field defaulting to this
/// server's own endpoint for the addressed client.
pub struct TypedTcpServer {
    server: TcpServer,
    builder: MessageBuilder,
}

impl TypedTcpServer {
    pub fn new(
        runtime: IoRuntime,
        listen_port: u16,
        builder: MessageBuilder,
        dispatcher: MessageDispatcher,
        send_option: SendOption,
    ) -> io::Result<Self> {
        let config = framing(&builder, dispatcher, send_option);
        Ok(Self { server: TcpServer::new(runtime, listen_port, config)?, builder })
    }

    pub fn server(&self) -> &TcpServer {
        &self.server
    }

    fn response_for(&self, client: &SocketAddr, explicit: Option<SocketAddr>) -> SocketAddr {
        explicit
            .or_else(|| self.server.server_endpoint_for_client(client).ok())
            .unwrap_or(NULL_ENDPOINT)
    }

    pub fn send_to_client<T: Serialize>(
        &self,
        client: &SocketAddr,
        message: &T,
        message_id: u32,
        response: Option<SocketAddr>,
    ) -> Result<(), MessageError> {
        let response = self.response_for(client, response);
        let frame = self.builder.build(message, message_id, response)?;
        self.server.send_to_client_async(client, frame);
        Ok(())
    }

    pub fn send_to_client_sync<T: Serialize>(
        &self,
        client: &SocketAddr,
        message: &T,
        message_id: u32,
        response: Option<SocketAddr>,
    ) -> Result<bool, MessageError> {
        let response = self.response_for(client, response);
        let frame = self.builder.build(message, message_id, response)?;
        Ok(self.server.send_to_client_sync(client, frame))
    }

    pub fn send_raw_to_client<T: Pod>(
        &self,
        client: &SocketAddr,
        message: &T,
        message_id: u32,
        response: Option<SocketAddr>,
    ) {
        let response = self.response_for(client, response);
        let frame = self.builder.build_raw(message, message_id, response);
        self.server.send_to_client_async(client, frame);
    }

    /// Broadcasts one frame to every connected client. Without an
    /// explicit response endpoint the header advertises the wildcard
    /// listen endpoint.
    pub fn send_to_all<T: Serialize>(
        &self,
        message: &T,
        message_id: u32,
        response: Option<SocketAddr>,
    ) -> Result<(), MessageError> {
        let response = response
            .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.server.listen_port())));
        let frame = self.builder.build(message, message_id, response)?;
        self.server.send_to_all(&frame);
        Ok(())
    }

    pub fn close(&self) {
        self.server.close_acceptor();
    }
}

/// [`TcpClient`] speaking the framed message protocol.
pub struct TypedTcpClient {
    client: TcpClient,
    builder: MessageBuilder,
}

impl TypedTcpClient {
    pub fn new(
        runtime: IoRuntime,
        server: SocketAddr,
        builder: MessageBuilder,
        dispatcher: MessageDispatcher,
        send_option: SendOption,
    ) -> Self {
        let config = framing(&builder, dispatcher, send_option);
        Self { client: TcpClient::new(runtime, server, config), builder }
    }

    pub fn client(&self) -> &TcpClient {
        &self.client
    }

    /// Response address stamped on outgoing frames: the explicit one,
    /// or this client's own endpoint once connected.
    fn response_endpoint(&self, explicit: Option<SocketAddr>) -> SocketAddr {
        explicit.or_else(|| self.client.client_endpoint().ok()).unwrap_or(NULL_ENDPOINT)
    }

    pub fn send<T: Serialize>(
        &self,
        message: &T,
        message_id: u32,
        response: Option<SocketAddr>,
    ) -> Result<(), MessageError> {
        self.client.connect_if_needed();
        let frame = self.builder.build(message, message_id, self.response_endpoint(response))?;
        self.client.send_async(frame);
        Ok(())
    }

    pub fn send_sync<T: Serialize>(
        &self,
        message: &T,
        message_id: u32,
        response: Option<SocketAddr>,
    ) -> Result<bool, MessageError> {
        self.client.connect_if_needed();
        let frame = self.builder.build(message, message_id, self.response_endpoint(response))?;
        Ok(self.client.send_sync(frame))
    }

    pub fn send_raw_sync<T: Pod>(
        &self,
        message: &T,
        message_id: u32,
        response: Option<SocketAddr>,
    ) -> bool {
        self.client.connect_if_needed();
        let frame = self.builder.build_raw(message, message_id, self.response_endpoint(response));
        self.client.send_sync(frame)
    }

    pub fn close(&self) {
        self.client.close();
    }
}

/// [`UdpSender`] speaking the framed message protocol. Datagrams carry
/// [`NULL_ENDPOINT`] as their response address.
pub struct TypedUdpSender {
    sender: UdpSender,
    builder: MessageBuilder,
}

impl TypedUdpSender {
    pub fn new(
        runtime: &IoRuntime,
        receiver: SocketAddr,
        option: UdpOption,
        builder: MessageBuilder,
    ) -> io::Result<Self> {
        Ok(Self { sender: UdpSender::new(runtime, receiver, option)?, builder })
    }

    pub fn sender(&self) -> &UdpSender {
        &self.sender
    }

    pub fn send<T: Serialize>(&self, message: &T, message_id: u32) -> Result<(), MessageError> {
        let frame = self.builder.build(message, message_id, NULL_ENDPOINT)?;
        self.sender.send_async(frame);
        Ok(())
    }

    pub fn send_sync<T: Serialize>(&self, message: &T, message_id: u32) -> Result<bool, MessageError> {
        let frame = self.builder.build(message, message_id, NULL_ENDPOINT)?;
        Ok(self.sender.send_sync(frame))
    }

    pub fn send_raw_sync<T: Pod>(&self, message: &T, message_id: u32) -> bool {
        let frame = self.builder.build_raw(message, message_id, NULL_ENDPOINT);
        self.sender.send_sync(frame)
    }
}

/// [`UdpReceiver`] speaking the framed message protocol.
pub struct TypedUdpReceiver {
    receiver: UdpReceiver,
}

impl TypedUdpReceiver {
    pub fn new(
        runtime: &IoRuntime,
        listen_port: u16,
        option: UdpOption,
        builder: &MessageBuilder,
        dispatcher: MessageDispatcher,
    ) -> io::Result<Self> {
        let demux = MessageDemux::new(builder.magic(), dispatcher);
        let (check_bytes, on_message) = demux.framing_hooks();
        Ok(Self {
            receiver: UdpReceiver::new(runtime, listen_port, option, check_bytes, on_message)?,
        })
    }

    pub fn receiver(&self) -> &UdpReceiver {
        &self.receiver
    }
}
