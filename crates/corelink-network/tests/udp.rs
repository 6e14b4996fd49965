use std::{
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    sync::{Arc, mpsc},
    time::Duration,
};

use corelink_network::{
    CheckBytesFn, FrameError, MessageReceivedFn,
    udp::{MAX_DATAGRAM_SIZE, UdpOption, UdpReceiver, UdpSender},
};
use corelink_runtime::{IoRuntime, PoolConfig};

const PREFIX: usize = 4;

fn length_prefix_check() -> CheckBytesFn {
    Arc::new(|bytes: &[u8]| {
        if bytes.len() < PREFIX {
            return Err(FrameError::Length);
        }
        let total = PREFIX + u32::from_le_bytes(bytes[..PREFIX].try_into().unwrap()) as usize;
        if total < bytes.len() {
            return Err(FrameError::Length);
        }
        Ok(total - bytes.len())
    })
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREFIX + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn free_udp_port() -> u16 {
    let probe = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).expect("probe");
    let port = probe.local_addr().unwrap().port();
    drop(probe);
    port
}

#[test]
fn unicast_roundtrip() {
    let rt = IoRuntime::with_config(PoolConfig::with_workers(2)).unwrap();
    let port = free_udp_port();

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let on_message: MessageReceivedFn = Arc::new(move |bytes| {
        tx.send(bytes.to_vec()).unwrap();
    });
    let receiver =
        UdpReceiver::new(&rt, port, UdpOption::Unicast, length_prefix_check(), on_message)
            .unwrap();

    let sender = UdpSender::new(
        &rt,
        SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        UdpOption::Unicast,
    )
    .unwrap();

    assert!(sender.send_sync(frame(b"datagram one")));
    let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(got, frame(b"datagram one"));

    // Async sends are strand-serialized; a small burst arrives in order.
    for i in 0u8..5 {
        sender.send_async(frame(&[i]));
    }
    for i in 0u8..5 {
        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, frame(&[i]));
    }

    drop(receiver);
    rt.shutdown();
}

#[test]
fn broadcast_socket_option_delivers() {
    let rt = IoRuntime::with_config(PoolConfig::with_workers(2)).unwrap();
    let port = free_udp_port();

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let on_message: MessageReceivedFn = Arc::new(move |bytes| {
        tx.send(bytes.to_vec()).unwrap();
    });
    let receiver =
        UdpReceiver::new(&rt, port, UdpOption::Broadcast, length_prefix_check(), on_message)
            .unwrap();

    // Broadcast-enabled socket, loopback target so the test stays
    // routable inside sandboxed environments.
    let sender = UdpSender::new(
        &rt,
        SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        UdpOption::Broadcast,
    )
    .unwrap();

    let payload: Vec<u8> = (0..128u8).collect();
    assert!(sender.send_sync(frame(&payload)));
    let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(got, frame(&payload));

    drop(receiver);
    rt.shutdown();
}

#[test]
fn oversized_datagrams_are_rejected() {
    let rt = IoRuntime::with_config(PoolConfig::with_workers(1)).unwrap();
    let sender = UdpSender::new(
        &rt,
        SocketAddr::from((Ipv4Addr::LOCALHOST, free_udp_port())),
        UdpOption::Unicast,
    )
    .unwrap();

    assert!(!sender.send_sync(vec![0u8; MAX_DATAGRAM_SIZE + 1]));
    // At the cap itself the send is submitted (localhost loopback
    // usually accepts it, but success depends on the OS buffers).
    sender.send_async(vec![0u8; MAX_DATAGRAM_SIZE]);
    rt.shutdown();
}

#[test]
fn truncated_frame_is_dropped() {
    let rt = IoRuntime::with_config(PoolConfig::with_workers(2)).unwrap();
    let port = free_udp_port();

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let on_message: MessageReceivedFn = Arc::new(move |bytes| {
        tx.send(bytes.to_vec()).unwrap();
    });
    let receiver =
        UdpReceiver::new(&rt, port, UdpOption::Unicast, length_prefix_check(), on_message)
            .unwrap();

    let target = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let raw = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();

    // Claims 100 payload bytes but carries 3: check reports bytes
    // missing, the datagram is dropped.
    let mut bad = (100u32).to_le_bytes().to_vec();
    bad.extend_from_slice(b"abc");
    raw.send_to(&bad, target).unwrap();

    raw.send_to(&frame(b"good"), target).unwrap();
    let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(got, frame(b"good"));

    drop(receiver);
    rt.shutdown();
}
