//! Queued messages and what the engine hands back to the application.

use std::net::{IpAddr, SocketAddr};

use udp2p_core::{Address, Packet, PacketType, Tag};
use udp2p_routing::Peer;

/// A packet paired with the peer it is going to or came from.
///
/// Two messages are equal when they carry the same packet content hash for
/// the same peer address.
#[derive(Debug, Clone)]
pub struct Message {
    pub peer: Peer,
    pub packet: Packet,
}

impl Message {
    pub fn new(peer: Peer, packet: Packet) -> Self {
        Self { peer, packet }
    }

    /// A message for a bare network address whose node address is unknown.
    pub fn to_ip(ip: IpAddr, packet: Packet) -> Self {
        Self::new(Peer::new(Address::ZERO, ip), packet)
    }

    /// Where the packet is sent; every node listens on `port`.
    pub fn destination(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.peer.ip(), port)
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.packet.hash() == other.packet.hash() && self.peer.address() == other.peer.address()
    }
}

impl Eq for Message {}

/// A reassembled application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Address of the signing sender.
    pub from: Address,
    pub packet_type: PacketType,
    /// Set when the sender addressed the message to a specific node.
    pub target: Option<Address>,
    pub payload: Vec<u8>,
}

/// A sent packet that was never acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub peer: Address,
    pub packet_type: PacketType,
    pub ack_tag: Tag,
}

#[cfg(test)]
mod tests {
    use super::*;
    use udp2p_core::Keypair;

    #[test]
    fn test_equality_is_hash_and_address() {
        let key = Keypair::generate();
        let packet = Packet::single(PacketType::Ping, vec![], 0, &key).unwrap();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        let a = Message::new(Peer::new(Address([1; 20]), ip), packet.clone());
        let b = Message::new(Peer::new(Address([1; 20]), "10.0.0.2".parse().unwrap()), packet.clone());
        let c = Message::new(Peer::new(Address([2; 20]), ip), packet);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.destination(30330), "10.0.0.1:30330".parse().unwrap());
    }
}
