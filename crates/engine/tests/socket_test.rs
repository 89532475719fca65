//! End-to-end tests of running nodes over an in-memory network.

use std::net::{IpAddr, SocketAddr};
use std::thread;
use std::time::{Duration, Instant};

use udp2p_core::{Keypair, PacketType};
use udp2p_engine::{EngineConfig, Error, MemoryNetwork, NodeHandle, P2PSocket};

const WAIT: Duration = Duration::from_secs(5);

fn config() -> EngineConfig {
    EngineConfig {
        recv_timeout_ms: 5,
        ..Default::default()
    }
}

fn start(net: &MemoryNetwork, ip: &str) -> NodeHandle {
    let ip: IpAddr = ip.parse().unwrap();
    let config = config();
    let transport = net.bind(SocketAddr::new(ip, config.overlay_port), config.recv_timeout());
    P2PSocket::spawn(config, Keypair::generate(), transport).unwrap()
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn knows(node: &NodeHandle, other: &NodeHandle) -> bool {
    node.peers().iter().any(|p| p.address() == other.address())
}

// ============================================================================
// Discovery Tests
// ============================================================================

#[test]
fn test_bootstrap_from_ip() {
    // a only knows b's IP; both end up in each other's table
    let net = MemoryNetwork::new();
    let a = start(&net, "10.0.0.1");
    let b = start(&net, "10.0.0.2");

    a.connect(b.local_addr().ip()).unwrap();
    assert!(wait_until(|| knows(&a, &b) && knows(&b, &a)));

    a.shutdown();
    b.shutdown();
    a.join().unwrap();
    b.join().unwrap();
}

#[test]
fn test_three_nodes_discover_each_other() {
    // c learns about a through b's peer list
    let net = MemoryNetwork::new();
    let a = start(&net, "10.0.0.1");
    let b = start(&net, "10.0.0.2");
    let c = start(&net, "10.0.0.3");

    a.connect(b.local_addr().ip()).unwrap();
    assert!(wait_until(|| knows(&b, &a)));
    c.connect(b.local_addr().ip()).unwrap();

    assert!(wait_until(|| knows(&c, &a) && knows(&a, &c)));
    assert!(wait_until(|| b.peers().len() == 2));
}

// ============================================================================
// Messaging Tests
// ============================================================================

#[test]
fn test_send_and_broadcast() {
    let net = MemoryNetwork::new();
    let a = start(&net, "10.0.0.1");
    let b = start(&net, "10.0.0.2");
    a.connect(b.local_addr().ip()).unwrap();
    assert!(wait_until(|| knows(&a, &b) && knows(&b, &a)));

    let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    a.send(*b.address(), PacketType::Application(42), payload.clone()).unwrap();
    let message = b.inbox().recv_timeout(WAIT).unwrap();
    assert_eq!(message.from, *a.address());
    assert_eq!(message.packet_type, PacketType::Application(42));
    assert_eq!(message.target, Some(*b.address()));
    assert_eq!(message.payload, payload);

    b.broadcast(PacketType::Application(7), b"hello".to_vec()).unwrap();
    let message = a.inbox().recv_timeout(WAIT).unwrap();
    assert_eq!(message.from, *b.address());
    assert_eq!(message.target, None);
    assert_eq!(message.payload, b"hello");

    // No duplicates once retransmissions settle
    assert!(b.inbox().recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_unreachable_peer_reports_failure() {
    // b vanishes after the handshake, so a's message is never acked
    let net = MemoryNetwork::new();
    let ip: IpAddr = "10.0.0.1".parse().unwrap();
    let config = EngineConfig {
        ack_timeout_ms: 200,
        ..config()
    };
    let transport = net.bind(SocketAddr::new(ip, config.overlay_port), config.recv_timeout());
    let a = P2PSocket::spawn(config, Keypair::generate(), transport).unwrap();
    let b = start(&net, "10.0.0.2");
    a.connect(b.local_addr().ip()).unwrap();
    assert!(wait_until(|| knows(&a, &b)));

    let gone = *b.address();
    b.shutdown();
    b.join().unwrap();

    a.send(gone, PacketType::Application(11), b"anyone?".to_vec()).unwrap();
    let failure = a.failures().recv_timeout(WAIT).unwrap();
    assert_eq!(failure.peer, gone);
    assert_eq!(failure.packet_type, PacketType::Application(11));
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[test]
fn test_requests_after_shutdown_are_refused() {
    let net = MemoryNetwork::new();
    let a = start(&net, "10.0.0.1");
    a.shutdown();
    assert!(wait_until(|| !a.is_running()));
    assert!(matches!(a.connect("10.0.0.2".parse().unwrap()), Err(Error::Closed)));
    a.join().unwrap();
}

#[test]
fn test_reserved_type_is_refused_by_handle() {
    let net = MemoryNetwork::new();
    let a = start(&net, "10.0.0.1");
    assert!(matches!(
        a.broadcast(PacketType::Join, vec![]),
        Err(Error::ProtocolViolation(_))
    ));
}
