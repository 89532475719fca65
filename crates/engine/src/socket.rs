//! The socket worker and its handle.
//!
//! One thread owns the transport and the [`Protocol`]. Each loop iteration:
//!
//! 1. applies requests handed over by [`NodeHandle`]s,
//! 2. runs maintenance if it is due,
//! 3. waits up to the receive timeout for one datagram and dispatches it,
//! 4. sends one queued packet,
//! 5. retransmits one unacknowledged packet,
//! 6. publishes delivered messages and failures to the handle's channels.
//!
//! Only receive errors stop the loop. Failed sends are logged and dropped.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;
use tracing::{debug, error, info, trace, warn};
use udp2p_core::{Address, Keypair, PacketType, MAX_DATAGRAM};
use udp2p_routing::Peer;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::message::{DeliveryFailure, InboundMessage, Message};
use crate::metrics;
use crate::protocol::{require_application, Protocol};
use crate::transport::{Transport, UdpTransport};

/// Requests from handles to the worker.
#[derive(Debug)]
enum Command {
    Send {
        to: Address,
        packet_type: PacketType,
        payload: Vec<u8>,
    },
    Broadcast {
        packet_type: PacketType,
        payload: Vec<u8>,
    },
    Connect(IpAddr),
    ConnectPeer(Peer),
    Disconnect(Address),
}

/// The worker side of a node.
pub struct P2PSocket<T: Transport> {
    protocol: Protocol,
    transport: T,
    commands: Receiver<Command>,
    inbox: Sender<InboundMessage>,
    failures: Sender<DeliveryFailure>,
    peers: Arc<RwLock<Vec<Peer>>>,
    running: Arc<AtomicBool>,
}

impl P2PSocket<UdpTransport> {
    /// Bind a UDP socket at `config.bind` and start a node on it.
    pub fn bind(config: EngineConfig, keypair: Keypair) -> Result<NodeHandle> {
        config.validate()?;
        let transport = UdpTransport::bind(config.bind, config.recv_timeout())?;
        Self::spawn(config, keypair, transport)
    }
}

impl<T: Transport + 'static> P2PSocket<T> {
    /// Start a node on an existing transport.
    pub fn spawn(config: EngineConfig, keypair: Keypair, transport: T) -> Result<NodeHandle> {
        let local_addr = transport.local_addr()?;
        let protocol = Protocol::new(config, keypair, Instant::now())?;
        let address = *protocol.local_address();

        let (command_tx, command_rx) = channel::unbounded();
        let (inbox_tx, inbox_rx) = channel::unbounded();
        let (failure_tx, failure_rx) = channel::unbounded();
        let peers = Arc::new(RwLock::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let socket = P2PSocket {
            protocol,
            transport,
            commands: command_rx,
            inbox: inbox_tx,
            failures: failure_tx,
            peers: Arc::clone(&peers),
            running: Arc::clone(&running),
        };
        let worker = thread::Builder::new()
            .name(format!("udp2p-{}", &address.to_string()[..8]))
            .spawn(move || socket.run())?;

        info!(%address, %local_addr, "node started");
        Ok(NodeHandle {
            address,
            local_addr,
            commands: command_tx,
            inbox: inbox_rx,
            failures: failure_rx,
            peers,
            running,
            worker: Some(worker),
        })
    }

    fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let result = loop {
            if !self.running.load(Ordering::Acquire) {
                break Ok(());
            }
            if let Err(err) = self.step(&mut buf) {
                error!(error = %err, "transport failure, stopping worker");
                break Err(err);
            }
        };
        self.running.store(false, Ordering::Release);
        info!(address = %self.protocol.local_address(), "node stopped");
        result
    }

    fn step(&mut self, buf: &mut [u8]) -> Result<()> {
        self.apply_commands();
        self.protocol.maintain(Instant::now());

        if let Some((n, from)) = self.transport.recv_from(buf)? {
            metrics::datagram_received();
            if let Err(err) = self.protocol.receive_datagram(&buf[..n], from, Instant::now()) {
                record_drop(from, &err);
            }
        }

        let now = Instant::now();
        if let Some(message) = self.protocol.next_outbound(now) {
            self.transmit(&message);
        }
        if let Some(message) = self.protocol.retransmit(now) {
            metrics::retransmission();
            self.transmit(&message);
        }

        self.publish();
        Ok(())
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            let result = match command {
                Command::Send {
                    to,
                    packet_type,
                    payload,
                } => self.protocol.send(&to, packet_type, &payload),
                Command::Broadcast {
                    packet_type,
                    payload,
                } => self.protocol.broadcast(packet_type, &payload).map(|n| {
                    debug!(recipients = n, "broadcast queued");
                }),
                Command::Connect(ip) => self.protocol.connect_ip(ip),
                Command::ConnectPeer(peer) => self.protocol.connect(peer).map(|_| ()),
                Command::Disconnect(address) => self.protocol.disconnect(&address),
            };
            if let Err(err) = result {
                warn!(error = %err, "request failed");
            }
        }
    }

    fn transmit(&mut self, message: &Message) {
        let to = self.protocol.destination(message);
        match self.transport.send_to(message.packet.encoded(), to) {
            Ok(()) => {
                metrics::packet_sent();
                trace!(%to, packet_type = %message.packet.packet_type(), "sent");
            }
            Err(err) => {
                metrics::datagram_dropped("send");
                warn!(%to, error = %err, "send failed");
            }
        }
    }

    fn publish(&mut self) {
        for message in self.protocol.take_inbound() {
            let _ = self.inbox.send(message);
        }
        for failure in self.protocol.take_failures() {
            let _ = self.failures.send(failure);
        }
        if self.protocol.take_membership_changed() {
            let snapshot = self.protocol.table().all_peers();
            metrics::table_size(snapshot.len());
            *self.peers.write() = snapshot;
        }
    }
}

fn record_drop(from: SocketAddr, err: &Error) {
    metrics::datagram_dropped(err.kind());
    match err {
        Error::PeerNotFound(_) => warn!(%from, error = %err, "dropped datagram"),
        _ => debug!(%from, error = %err, "dropped datagram"),
    }
}

/// Thread-safe handle to a running node.
///
/// Requests are queued to the worker and applied on its next iteration, so
/// their outcome is only visible through logs, the inbox and the failure
/// channel. Dropping the handle shuts the node down.
pub struct NodeHandle {
    address: Address,
    local_addr: SocketAddr,
    commands: Sender<Command>,
    inbox: Receiver<InboundMessage>,
    failures: Receiver<DeliveryFailure>,
    peers: Arc<RwLock<Vec<Peer>>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl NodeHandle {
    /// The node's overlay address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The socket address the transport is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send an application payload to a table member.
    pub fn send(&self, to: Address, packet_type: PacketType, payload: Vec<u8>) -> Result<()> {
        require_application(packet_type)?;
        self.submit(Command::Send {
            to,
            packet_type,
            payload,
        })
    }

    /// Send an application payload to every table member.
    pub fn broadcast(&self, packet_type: PacketType, payload: Vec<u8>) -> Result<()> {
        require_application(packet_type)?;
        self.submit(Command::Broadcast {
            packet_type,
            payload,
        })
    }

    /// Bootstrap from a bare IP address.
    pub fn connect(&self, ip: IpAddr) -> Result<()> {
        self.submit(Command::Connect(ip))
    }

    /// Join a peer whose address is already known.
    pub fn connect_peer(&self, peer: Peer) -> Result<()> {
        self.submit(Command::ConnectPeer(peer))
    }

    /// Leave a peer and drop it from the table.
    pub fn disconnect(&self, address: Address) -> Result<()> {
        self.submit(Command::Disconnect(address))
    }

    /// Reassembled application messages.
    pub fn inbox(&self) -> &Receiver<InboundMessage> {
        &self.inbox
    }

    /// Packets that were never acknowledged.
    pub fn failures(&self) -> &Receiver<DeliveryFailure> {
        &self.failures
    }

    /// Snapshot of the routing table as of the worker's last change.
    pub fn peers(&self) -> Vec<Peer> {
        self.peers.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the worker to stop. Queued sends and pending acks are abandoned.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Wait for the worker to exit, returning its fatal error if any.
    pub fn join(mut self) -> Result<()> {
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| {
                    Error::Transport(io::Error::new(io::ErrorKind::Other, "socket worker panicked"))
                })?,
            None => Ok(()),
        }
    }

    fn submit(&self, command: Command) -> Result<()> {
        if !self.is_running() {
            return Err(Error::Closed);
        }
        self.commands.send(command).map_err(|_| Error::Closed)
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
