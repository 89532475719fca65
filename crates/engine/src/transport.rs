//! Datagram transports.
//!
//! The worker only needs to receive with a timeout and send to an address.
//! [`UdpTransport`] does this over a real socket; [`MemoryTransport`] routes
//! datagrams between nodes in the same process for tests and simulations.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

/// A datagram socket as seen by the worker.
pub trait Transport: Send {
    /// Wait up to the transport's timeout for one datagram. `Ok(None)` means
    /// nothing arrived in time.
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn send_to(&mut self, bytes: &[u8], to: SocketAddr) -> io::Result<()>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Transport over a bound UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind(addr: impl ToSocketAddrs, recv_timeout: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(recv_timeout))?;
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((n, from)) => Ok(Some((n, from))),
            Err(e) if is_timeout(&e) => Ok(None),
            // ICMP port-unreachable from an earlier send on some platforms
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn send_to(&mut self, bytes: &[u8], to: SocketAddr) -> io::Result<()> {
        self.socket.send_to(bytes, to).map(|_| ())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

type Datagram = (Vec<u8>, SocketAddr);

/// An in-process datagram network. Cloning shares the network.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<Mutex<HashMap<SocketAddr, Sender<Datagram>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a transport at `addr`, replacing any previous endpoint there.
    pub fn bind(&self, addr: SocketAddr, recv_timeout: Duration) -> MemoryTransport {
        let (tx, rx) = channel::unbounded();
        self.endpoints.lock().insert(addr, tx.clone());
        MemoryTransport {
            network: self.clone(),
            addr,
            registration: tx,
            inbox: rx,
            recv_timeout,
        }
    }

    /// Deliver raw bytes to `to` as if sent from `from`. Datagrams to unbound
    /// addresses vanish, as they would on a real network.
    pub fn deliver(&self, from: SocketAddr, to: SocketAddr, bytes: &[u8]) {
        if let Some(tx) = self.endpoints.lock().get(&to) {
            let _ = tx.send((bytes.to_vec(), from));
        }
    }
}

/// One endpoint of a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    addr: SocketAddr,
    registration: Sender<Datagram>,
    inbox: Receiver<Datagram>,
    recv_timeout: Duration,
}

impl Transport for MemoryTransport {
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.inbox.recv_timeout(self.recv_timeout) {
            Ok((bytes, from)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(Some((n, from)))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "endpoint removed from memory network",
            )),
        }
    }

    fn send_to(&mut self, bytes: &[u8], to: SocketAddr) -> io::Result<()> {
        self.network.deliver(self.addr, to, bytes);
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let mut endpoints = self.network.endpoints.lock();
        // A later bind may have taken over the address.
        if endpoints.get(&self.addr).is_some_and(|tx| tx.same_channel(&self.registration)) {
            endpoints.remove(&self.addr);
        }
    }
}
