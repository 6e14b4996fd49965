use std::{
    io::Write,
    net::{Ipv4Addr, SocketAddr, TcpListener},
    sync::{Arc, Mutex, mpsc},
    thread,
    time::{Duration, Instant},
};

use corelink_network::{
    CheckBytesFn, FrameError, FramingConfig, MessageReceivedFn, SendOption,
    tcp::{ConnectionRegistry, TcpClient, TcpConnection, TcpServer},
};
use corelink_runtime::{IoRuntime, PoolConfig};
use corelink_sync::SyncEvent;

const PREFIX: usize = 4;

/// Test protocol: 4-byte LE payload length, then the payload.
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

fn config(on_message: impl Fn(&[u8]) + Send + Sync + 'static) -> FramingConfig {
    let on_message: MessageReceivedFn = Arc::new(on_message);
    FramingConfig::new(PREFIX, length_prefix_check(), on_message)
        .with_send_option(SendOption::NagleOff)
}

fn free_port() -> u16 {
    let probe = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).expect("probe");
    let port = probe.local_addr().unwrap().port();
    drop(probe);
    port
}

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn roundtrip_and_broadcast_reply() {
    let rt = IoRuntime::with_config(PoolConfig::with_workers(2)).unwrap();
    let port = free_port();

    let (server_rx_tx, server_rx) = mpsc::channel::<Vec<u8>>();
    let server = TcpServer::new(
        rt.clone(),
        port,
        config(move |bytes| {
            server_rx_tx.send(bytes.to_vec()).unwrap();
        }),
    )
    .unwrap();

    let (client_rx_tx, client_rx) = mpsc::channel::<Vec<u8>>();
    let client = TcpClient::new(
        rt.clone(),
        localhost(port),
        config(move |bytes| {
            client_rx_tx.send(bytes.to_vec()).unwrap();
        }),
    );

    assert!(client.send_sync(frame(b"hello server")));
    let got = server_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(got, frame(b"hello server"));

    server.send_to_all(&frame(b"hello client"));
    let got = client_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(got, frame(b"hello client"));

    client.close();
    drop(server);
    rt.shutdown();
}

/// Any chunking of a concatenated byte stream yields exactly one
/// message-received call per frame.
#[test]
fn reassembles_frames_across_arbitrary_chunking() {
    let rt = IoRuntime::with_config(PoolConfig::with_workers(2)).unwrap();
    let port = free_port();

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let _server = TcpServer::new(
        rt.clone(),
        port,
        config(move |bytes| {
            tx.send(bytes.to_vec()).unwrap();
        }),
    )
    .unwrap();

    let frames: Vec<Vec<u8>> =
        vec![frame(b"a"), frame(&[7u8; 300]), frame(b""), frame(&[1, 2, 3, 4, 5])];
    let stream: Vec<u8> = frames.iter().flatten().copied().collect();

    // Feed the stream through a raw socket in deliberately awkward
    // chunks, with pauses so each chunk arrives alone.
    let mut raw = std::net::TcpStream::connect(localhost(port)).unwrap();
    raw.set_nodelay(true).unwrap();
    let mut sent = 0;
    for chunk in [1usize, 2, 3, 5, 150, 1, 7, 1000] {
        if sent >= stream.len() {
            break;
        }
        let end = (sent + chunk).min(stream.len());
        raw.write_all(&stream[sent..end]).unwrap();
        raw.flush().unwrap();
        sent = end;
        thread::sleep(Duration::from_millis(5));
    }
    raw.write_all(&stream[sent..]).unwrap();

    for expected in &frames {
        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(&got, expected);
    }
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    rt.shutdown();
}

#[test]
fn single_message_received_for_a_10_mib_frame() {
    let rt = IoRuntime::with_config(PoolConfig::with_workers(2)).unwrap();
    let port = free_port();

    let payload: Vec<u8> = (0..10 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = frame(&payload);

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let _server = TcpServer::new(
        rt.clone(),
        port,
        config(move |bytes| {
            tx.send(bytes.to_vec()).unwrap();
        }),
    )
    .unwrap();

    let client = TcpClient::new(rt.clone(), localhost(port), config(|_| {}));
    assert!(client.send_sync(expected.clone()));

    let got = rx.recv_timeout(Duration::from_secs(30)).unwrap();
    assert_eq!(got.len(), expected.len());
    assert_eq!(got, expected);
    rt.shutdown();
}

#[test]
fn broadcast_reaches_every_client_exactly_once() {
    let rt = IoRuntime::with_config(PoolConfig::with_workers(2)).unwrap();
    let port = free_port();

    let server = TcpServer::new(rt.clone(), port, config(|_| {})).unwrap();

    let receivers: Vec<(TcpClient, mpsc::Receiver<Vec<u8>>)> = (0..3)
        .map(|_| {
            let (tx, rx) = mpsc::channel::<Vec<u8>>();
            let client = TcpClient::new(
                rt.clone(),
                localhost(port),
                config(move |bytes| {
                    tx.send(bytes.to_vec()).unwrap();
                }),
            );
            (client, rx)
        })
        .collect();

    assert!(wait_until(Duration::from_secs(5), || server.registry().len() == 3));

    server.send_to_all(&frame(b"fan-out"));

    for (_, rx) in &receivers {
        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, frame(b"fan-out"));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
    rt.shutdown();
}

/// After the server drops the connection, the next client send
/// re-establishes it and the message arrives.
#[test]
fn client_reconnects_on_next_send() {
    let rt = IoRuntime::with_config(PoolConfig::with_workers(2)).unwrap();
    let port = free_port();

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let server = TcpServer::new(
        rt.clone(),
        port,
        config(move |bytes| {
            tx.send(bytes.to_vec()).unwrap();
        }),
    )
    .unwrap();

    let client = TcpClient::new(rt.clone(), localhost(port), config(|_| {}));
    assert!(client.send_sync(frame(b"first")));
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // Server side drops every connection; the client notices via the
    // failed read and empties its registry.
    server.registry().close_all();
    assert!(wait_until(Duration::from_secs(5), || !client.is_connected()));

    assert!(client.send_sync(frame(b"second")));
    let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(got, frame(b"second"));
    rt.shutdown();
}

#[test]
fn close_is_idempotent_and_safe_from_completions() {
    let rt = IoRuntime::with_config(PoolConfig::with_workers(2)).unwrap();
    let port = free_port();

    let _server = TcpServer::new(rt.clone(), port, config(|_| {})).unwrap();

    let registry = ConnectionRegistry::new();
    let conn =
        TcpConnection::connect(&rt, &registry, localhost(port), config(|_| {})).unwrap();

    // Close from a pool worker, i.e. from completion context.
    let done = Arc::new(SyncEvent::new());
    {
        let conn = Arc::clone(&conn);
        let done = Arc::clone(&done);
        rt.post(move || {
            conn.close();
            done.signal();
        });
    }
    assert!(done.wait_for(Duration::from_secs(5)));

    // And again from the test thread.
    conn.close();
    conn.close();
    rt.shutdown();
}

/// Server and client each owning their own runtime still interoperate.
#[test]
fn independent_runtimes_roundtrip() {
    let port = free_port();

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let _server = TcpServer::with_new_runtime(
        port,
        config(move |bytes| {
            tx.send(bytes.to_vec()).unwrap();
        }),
    )
    .unwrap();

    let client = TcpClient::with_new_runtime(localhost(port), config(|_| {})).unwrap();
    assert!(client.send_sync(frame(b"own runtimes")));
    let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(got, frame(b"own runtimes"));
}

#[test]
fn unknown_connection_lookup_fails() {
    let registry = ConnectionRegistry::new();
    let missing = localhost(1);
    assert!(registry.local_endpoint_for_remote(&missing).is_err());
    assert!(!registry.send_sync(&missing, b"x".to_vec()));
}

#[test]
fn send_option_controls_nagle() {
    // Smoke check that both options produce working connections.
    let rt = IoRuntime::with_config(PoolConfig::with_workers(2)).unwrap();
    let port = free_port();

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let shared_tx = Arc::new(Mutex::new(tx));
    let _server = TcpServer::new(
        rt.clone(),
        port,
        config(move |bytes| {
            shared_tx.lock().unwrap().send(bytes.to_vec()).unwrap();
        }),
    )
    .unwrap();

    for option in [SendOption::NagleOn, SendOption::NagleOff] {
        let on_message: MessageReceivedFn = Arc::new(|_| {});
        let cfg = FramingConfig::new(PREFIX, length_prefix_check(), on_message)
            .with_send_option(option);
        let client = TcpClient::new(rt.clone(), localhost(port), cfg);
        assert!(client.send_sync(frame(b"nagle")));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        client.close();
    }
    rt.shutdown();
}
