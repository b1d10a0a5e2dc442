//! End-to-end GT-06 sessions against a live listener on a loopback socket.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use fleet_model::{FleetStore, MemoryFleetStore};
use tracksrv::config::ListenerConfig;
use tracksrv::protocols::gt06::Gt06Listener;
use tracksrv::registry::ConnectionRegistry;

const IMEI: &str = "358899050198765";

fn login_frame() -> Vec<u8> {
    let mut frame = vec![0x78, 0x78, 0x0D, 0x01];
    frame.extend_from_slice(&[0x03, 0x58, 0x89, 0x90, 0x50, 0x19, 0x87, 0x65]);
    frame.extend_from_slice(&[0x32, 0x02, 0x00, 0x01]); // type + serial filler
    frame.extend_from_slice(&[0x0D, 0x0A]);
    frame
}

fn position_frame() -> Vec<u8> {
    let mut frame = vec![0x78, 0x78, 0x21, 0x22];
    frame.extend_from_slice(&[25, 8, 7, 14, 30, 5]); // 2025-08-07 14:30:05
    frame.push(0xC8);
    frame.extend_from_slice(&42_390_936u32.to_be_bytes()); // 23.550520 deg south
    frame.extend_from_slice(&83_939_954u32.to_be_bytes()); // 46.633308 deg west
    frame.push(42);
    frame.extend_from_slice(&(0x2400u16 | 90).to_be_bytes());
    frame.extend_from_slice(&[0x00; 14]);
    frame.extend_from_slice(&[0x0D, 0x0A]);
    assert_eq!(frame.len(), 38);
    frame
}

struct Harness {
    addr: std::net::SocketAddr,
    registry: Arc<ConnectionRegistry>,
    store: Arc<MemoryFleetStore>,
    shutdown: CancellationToken,
}

async fn start_listener() -> Harness {
    let store = Arc::new(MemoryFleetStore::new());
    store.add_device(IMEI, Some(7), "Truck 1", "truck");

    let registry = Arc::new(ConnectionRegistry::new());
    let config = ListenerConfig {
        enabled: true,
        bind: "127.0.0.1".to_string(),
        port: 0,
        idle_timeout_secs: None,
    };
    let listener = Gt06Listener::new(
        config,
        Arc::clone(&registry),
        Arc::clone(&store) as Arc<dyn FleetStore>,
    );

    let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(listener.serve(socket, shutdown.child_token()));

    Harness {
        addr,
        registry,
        store,
        shutdown,
    }
}

async fn read_ack(stream: &mut TcpStream) -> [u8; 8] {
    let mut ack = [0u8; 8];
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        stream.read_exact(&mut ack),
    )
    .await
    .expect("timed out waiting for ACK")
    .expect("connection closed before ACK");
    ack
}

#[tokio::test]
async fn login_and_position_cycle_updates_store_and_acks() {
    let harness = start_listener().await;
    let mut device = TcpStream::connect(harness.addr).await.unwrap();

    // Login
    device.write_all(&login_frame()).await.unwrap();
    let ack = read_ack(&mut device).await;
    assert_eq!(ack, [0x78, 0x78, 0x05, 0x01, 0x00, 0x00, 0x0D, 0x0A]);
    assert!(harness.registry.is_connected(IMEI).await);

    // Position
    let frame = position_frame();
    device.write_all(&frame).await.unwrap();
    let ack = read_ack(&mut device).await;
    // Echoes the packet type and the frame's serial byte (offset 1)
    assert_eq!(ack, [0x78, 0x78, 0x05, 0x22, frame[1], 0x00, 0x0D, 0x0A]);

    // ACK is written after persistence, so the store must be current
    let record = harness.store.device(IMEI).unwrap();
    let last = record.last_position.expect("last position missing");
    assert!((last.latitude - -23.550520).abs() < 1e-6);
    assert!((last.longitude - -46.633308).abs() < 1e-6);
    assert!(last.ignition);

    let history = harness.store.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].vehicle_id, 7);
    assert_eq!(history[0].raw_message, hex::encode_upper(&frame));

    harness.shutdown.cancel();
}

#[tokio::test]
async fn relogin_replaces_the_previous_connection() {
    let harness = start_listener().await;

    let mut first = TcpStream::connect(harness.addr).await.unwrap();
    first.write_all(&login_frame()).await.unwrap();
    read_ack(&mut first).await;
    let first_token = harness.registry.get(IMEI).await.unwrap().token();

    let mut second = TcpStream::connect(harness.addr).await.unwrap();
    second.write_all(&login_frame()).await.unwrap();
    read_ack(&mut second).await;

    // Exactly one registration, tracking the newest connection
    assert_eq!(harness.registry.connected_count().await, 1);
    let current_token = harness.registry.get(IMEI).await.unwrap().token();
    assert_ne!(current_token, first_token);

    // The superseded socket was shut down by the listener
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        first.read(&mut buf),
    )
    .await
    .expect("timed out waiting for superseded socket to close")
    .unwrap();
    assert_eq!(n, 0);

    harness.shutdown.cancel();
}

#[tokio::test]
async fn device_disconnect_unregisters() {
    let harness = start_listener().await;

    let mut device = TcpStream::connect(harness.addr).await.unwrap();
    device.write_all(&login_frame()).await.unwrap();
    read_ack(&mut device).await;
    assert!(harness.registry.is_connected(IMEI).await);

    drop(device);

    // Handler cleanup runs on EOF
    for _ in 0..50 {
        if !harness.registry.is_connected(IMEI).await {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(!harness.registry.is_connected(IMEI).await);

    harness.shutdown.cancel();
}
