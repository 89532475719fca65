//! The overlay protocol state machine.
//!
//! [`Protocol`] owns the routing table, the send queue, the pending-ack queue
//! and inbound reassembly. It performs no I/O: the socket worker feeds it
//! datagrams and asks it for the next packet to transmit, which keeps every
//! state transition testable without a network.
//!
//! # Dispatch
//!
//! | Type | Action | Awaits ack |
//! |---|---|---|
//! | join | add the sender if its bucket has room and reply yes, else reply no | no |
//! | leave | remove the sender | no |
//! | yes | request the sender's peer list | no |
//! | no | remove the sender and ack | yes |
//! | peer request | reply with a compressed peer sample | no |
//! | peer list | ack, then connect to listed peers that fit | yes |
//! | address request | reply with the local address | no |
//! | address response | connect to the sender | no |
//! | ping | reply pong | no |
//! | pong | witness only | no |
//! | ack | clear the matching pending packet | no |
//! | application | ack, reassemble, deliver to the inbox | yes |
//!
//! Strangers may only send join, address request and address response; any
//! other type from a sender outside the routing table is dropped.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use tracing::{debug, trace, warn};
use udp2p_core::compression;
use udp2p_core::crypto::TAG_LEN;
use udp2p_core::{Address, Keypair, Packet, PacketSet, PacketType, MAX_PAYLOAD};
use udp2p_routing::peer::decode_peers;
use udp2p_routing::{AddOutcome, Peer, RoutingTable};

use crate::ack::AckQueue;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::message::{DeliveryFailure, InboundMessage, Message};
use crate::metrics;
use crate::reassembly::{Reassembly, SeenCache};

/// Most peer records accepted from a single peer list.
pub const MAX_PEER_LIST_LEN: usize = 256;

pub struct Protocol {
    keypair: Keypair,
    local: Address,
    config: EngineConfig,
    table: RoutingTable,
    outbox: VecDeque<Message>,
    acks: AckQueue,
    reassembly: Reassembly,
    seen: SeenCache,
    inbound: Vec<InboundMessage>,
    failures: Vec<DeliveryFailure>,
    next_maintenance: Instant,
    membership_changed: bool,
}

impl Protocol {
    pub fn new(config: EngineConfig, keypair: Keypair, now: Instant) -> Result<Self> {
        config.validate()?;
        let local = keypair.address();
        Ok(Self {
            table: RoutingTable::with_liveness(
                local,
                config.k,
                config.stale_after(),
                config.dead_after(),
            ),
            acks: AckQueue::new(config.ack_timeout(), config.max_retries, config.retry_interval()),
            reassembly: Reassembly::new(config.reassembly_timeout(), config.max_set_size),
            seen: SeenCache::new(config.ack_timeout()),
            next_maintenance: now + config.maintenance_interval(),
            outbox: VecDeque::new(),
            inbound: Vec::new(),
            failures: Vec::new(),
            membership_changed: false,
            keypair,
            local,
            config,
        })
    }

    pub fn local_address(&self) -> &Address {
        &self.local
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn pending_acks(&self) -> &AckQueue {
        &self.acks
    }

    /// Number of packets waiting for their first transmission.
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Application messages completed since the last call.
    pub fn take_inbound(&mut self) -> Vec<InboundMessage> {
        std::mem::take(&mut self.inbound)
    }

    /// Delivery failures since the last call.
    pub fn take_failures(&mut self) -> Vec<DeliveryFailure> {
        std::mem::take(&mut self.failures)
    }

    /// Whether the set of table members changed since the last call.
    pub fn take_membership_changed(&mut self) -> bool {
        std::mem::replace(&mut self.membership_changed, false)
    }

    /// Where `message` is sent on the wire.
    pub fn destination(&self, message: &Message) -> SocketAddr {
        message.destination(self.config.overlay_port)
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Ask a bare network address for its node address.
    pub fn connect_ip(&mut self, ip: IpAddr) -> Result<()> {
        let packet = self.sign(PacketType::AddressRequest, Vec::new())?;
        debug!(%ip, "requesting address");
        self.outbox.push_back(Message::to_ip(ip, packet));
        Ok(())
    }

    /// Send a join request to `peer` and add it to the table ahead of the
    /// reply. Returns false without sending if the peer is already known or
    /// its bucket is full.
    pub fn connect(&mut self, peer: Peer) -> Result<bool> {
        let address = *peer.address();
        if address == self.local || self.table.contains(&address) || !self.table.has_space(&address) {
            return Ok(false);
        }
        self.reply(&peer, PacketType::Join, Vec::new())?;
        debug!(peer = %peer, "joining");
        if self.table.add(peer) == AddOutcome::Inserted {
            self.membership_changed = true;
        }
        Ok(true)
    }

    /// Queue an application payload for one table member, fragmenting as
    /// needed.
    pub fn send(&mut self, to: &Address, packet_type: PacketType, payload: &[u8]) -> Result<()> {
        require_application(packet_type)?;
        let peer = self.table.get(to).cloned().ok_or(Error::PeerNotFound(*to))?;
        let set = PacketSet::from_payload(packet_type, *to, payload, self.config.network_id, &self.keypair)?;
        for packet in set.packets() {
            self.outbox.push_back(Message::new(peer.clone(), packet.clone()));
        }
        Ok(())
    }

    /// Queue an application payload for every table member. Returns the
    /// number of recipients.
    pub fn broadcast(&mut self, packet_type: PacketType, payload: &[u8]) -> Result<usize> {
        require_application(packet_type)?;
        let peers = self.table.all_peers();
        if peers.is_empty() {
            return Ok(0);
        }
        let set = PacketSet::from_payload(
            packet_type,
            Address::ZERO,
            payload,
            self.config.network_id,
            &self.keypair,
        )?;
        for peer in &peers {
            for packet in set.packets() {
                self.outbox.push_back(Message::new(peer.clone(), packet.clone()));
            }
        }
        Ok(peers.len())
    }

    /// Send a leave request to a member and forget it.
    pub fn disconnect(&mut self, address: &Address) -> Result<()> {
        let peer = self.table.remove(address).ok_or(Error::PeerNotFound(*address))?;
        self.membership_changed = true;
        debug!(peer = %peer, "leaving");
        self.reply(&peer, PacketType::Leave, Vec::new())
    }

    // ------------------------------------------------------------------
    // Loop steps
    // ------------------------------------------------------------------

    /// Keepalive and cleanup, at most once per maintenance interval.
    pub fn maintain(&mut self, now: Instant) {
        if now < self.next_maintenance {
            return;
        }
        self.next_maintenance = now + self.config.maintenance_interval();

        let evicted = self.table.evict_dead(now);
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted dead peers");
            self.membership_changed = true;
        }
        for peer in self.table.stale_peers(now) {
            trace!(peer = %peer, "pinging stale peer");
            if let Err(err) = self.reply(&peer, PacketType::Ping, Vec::new()) {
                warn!(peer = %peer, error = %err, "failed to build ping");
            }
        }

        let expired = self.reassembly.expire(now);
        if expired > 0 {
            debug!(count = expired, "dropped incomplete messages");
        }
        self.seen.expire(now);
        metrics::table_size(self.table.len());
    }

    /// Parse, verify and dispatch one datagram received from `from`.
    pub fn receive_datagram(&mut self, bytes: &[u8], from: SocketAddr, now: Instant) -> Result<()> {
        let packet = Packet::parse(bytes).map_err(Error::StructuralDecode)?;
        let sender = packet.sender_address();
        if !packet.verify() {
            return Err(Error::Signature(sender));
        }
        if packet.network_id() != self.config.network_id {
            return Err(Error::violation(format!(
                "network id {} from {}",
                packet.network_id(),
                sender
            )));
        }
        if sender == self.local {
            return Err(Error::violation("packet signed with the local key"));
        }

        let packet_type = packet.packet_type();
        let peer = match self.table.get(&sender) {
            Some(peer) => peer.clone(),
            None if packet_type.is_bootstrap() => Peer::seen_at(sender, from.ip(), now),
            None => {
                return Err(Error::violation(format!(
                    "{} from unknown peer {}",
                    packet_type, sender
                )))
            }
        };
        trace!(peer = %peer, packet_type = %packet_type, len = bytes.len(), "received");
        self.handle(Message::new(peer, packet), now)
    }

    /// Dispatch a verified message from an admitted sender.
    pub fn handle(&mut self, message: Message, now: Instant) -> Result<()> {
        let Message { peer, packet } = message;
        match packet.packet_type() {
            PacketType::Join => self.on_join(peer),
            PacketType::Leave => self.on_leave(&peer),
            PacketType::Yes => self.on_yes(&peer, now),
            PacketType::No => self.on_no(&peer, &packet),
            PacketType::PeerRequest => self.on_peer_request(&peer, now),
            PacketType::PeerList => self.on_peer_list(&peer, &packet, now),
            PacketType::AddressRequest => self.on_address_request(&peer),
            PacketType::AddressResponse => self.on_address_response(peer, &packet),
            PacketType::Ping => self.on_ping(&peer, now),
            PacketType::Pong => self.witness(&peer, now),
            PacketType::Ack => self.on_ack(&peer, &packet, now),
            PacketType::Application(_) => self.on_application(&peer, packet, now),
        }
    }

    /// Dequeue the next packet to send. Packets whose type awaits an ack are
    /// mirrored into the pending-ack queue.
    pub fn next_outbound(&mut self, now: Instant) -> Option<Message> {
        let message = self.outbox.pop_front()?;
        if message.packet.packet_type().awaits_ack() {
            self.acks.push(message.clone(), now);
        }
        Some(message)
    }

    /// Expire pending acks, then return the pending packet due for
    /// retransmission, if any.
    pub fn retransmit(&mut self, now: Instant) -> Option<Message> {
        for message in self.acks.expire(now) {
            debug!(
                peer = %message.peer,
                packet_type = %message.packet.packet_type(),
                "delivery failed"
            );
            metrics::delivery_failure();
            self.failures.push(DeliveryFailure {
                peer: *message.peer.address(),
                packet_type: message.packet.packet_type(),
                ack_tag: message.packet.ack_tag(),
            });
        }
        self.acks.retransmit(now)
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    fn on_join(&mut self, peer: Peer) -> Result<()> {
        let address = *peer.address();
        if self.table.contains(&address) || self.table.has_space(&address) {
            if self.table.add(peer.clone()) == AddOutcome::Inserted {
                self.membership_changed = true;
            }
            debug!(peer = %peer, "join accepted");
            self.reply(&peer, PacketType::Yes, Vec::new())
        } else {
            debug!(peer = %peer, "join refused, bucket full");
            self.reply(&peer, PacketType::No, Vec::new())
        }
    }

    fn on_leave(&mut self, peer: &Peer) -> Result<()> {
        if self.table.remove(peer.address()).is_some() {
            debug!(peer = %peer, "peer left");
            self.membership_changed = true;
        }
        Ok(())
    }

    fn on_yes(&mut self, peer: &Peer, now: Instant) -> Result<()> {
        self.reply(peer, PacketType::PeerRequest, Vec::new())?;
        self.witness(peer, now)
    }

    fn on_no(&mut self, peer: &Peer, packet: &Packet) -> Result<()> {
        if self.table.remove(peer.address()).is_some() {
            self.membership_changed = true;
        }
        debug!(peer = %peer, "join rejected");
        self.reply(peer, PacketType::Ack, packet.ack_tag().to_vec())
    }

    fn on_peer_request(&mut self, peer: &Peer, now: Instant) -> Result<()> {
        let payload = self.table.encode_subset_within(
            self.config.peer_sample_size,
            MAX_PAYLOAD,
            &mut rand::thread_rng(),
        )?;
        self.reply(peer, PacketType::PeerList, payload)?;
        self.witness(peer, now)
    }

    fn on_peer_list(&mut self, peer: &Peer, packet: &Packet, now: Instant) -> Result<()> {
        self.reply(peer, PacketType::Ack, packet.ack_tag().to_vec())?;
        self.witness(peer, now)?;

        let records = compression::decompress(packet.payload()).map_err(Error::StructuralDecode)?;
        let listed = decode_peers(&records, MAX_PEER_LIST_LEN, now)?;
        let offered = listed.len();
        let mut joined = 0;
        for candidate in listed {
            if self.connect(candidate)? {
                joined += 1;
            }
        }
        debug!(peer = %peer, offered, joined, "peer list processed");
        Ok(())
    }

    fn on_address_request(&mut self, peer: &Peer) -> Result<()> {
        self.reply(peer, PacketType::AddressResponse, self.local.as_bytes().to_vec())
    }

    fn on_address_response(&mut self, peer: Peer, packet: &Packet) -> Result<()> {
        if packet.payload() != peer.address().as_bytes() {
            return Err(Error::violation("address response does not match its signer"));
        }
        self.connect(peer).map(|_| ())
    }

    fn on_ping(&mut self, peer: &Peer, now: Instant) -> Result<()> {
        self.reply(peer, PacketType::Pong, Vec::new())?;
        self.witness(peer, now)
    }

    fn on_ack(&mut self, peer: &Peer, packet: &Packet, now: Instant) -> Result<()> {
        let tag: [u8; TAG_LEN] = packet
            .payload()
            .try_into()
            .map_err(|_| Error::violation(format!("ack of {} bytes", packet.payload().len())))?;
        if self.acks.acknowledge(peer.address(), &tag) {
            trace!(peer = %peer, ack_tag = %hex::encode(tag), "acknowledged");
            Ok(())
        } else {
            self.witness(peer, now)
        }
    }

    fn on_application(&mut self, peer: &Peer, packet: Packet, now: Instant) -> Result<()> {
        self.reply(peer, PacketType::Ack, packet.ack_tag().to_vec())?;
        if !self.seen.insert(*packet.hash(), now) {
            trace!(peer = %peer, "duplicate fragment");
            return Ok(());
        }
        if packet.has_target() && packet.target() != &self.local {
            return Err(Error::violation(format!(
                "message addressed to {}",
                packet.target()
            )));
        }
        if let Some(message) = self.reassembly.insert(packet, now)? {
            debug!(
                peer = %peer,
                packet_type = %message.packet_type,
                len = message.payload.len(),
                "message delivered"
            );
            self.inbound.push(message);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn sign(&self, packet_type: PacketType, payload: Vec<u8>) -> Result<Packet> {
        Ok(Packet::single(packet_type, payload, self.config.network_id, &self.keypair)?)
    }

    fn reply(&mut self, peer: &Peer, packet_type: PacketType, payload: Vec<u8>) -> Result<()> {
        let packet = self.sign(packet_type, payload)?;
        self.outbox.push_back(Message::new(peer.clone(), packet));
        Ok(())
    }

    fn witness(&mut self, peer: &Peer, now: Instant) -> Result<()> {
        Ok(self.table.witness(peer.address(), now)?)
    }
}

pub(crate) fn require_application(packet_type: PacketType) -> Result<()> {
    if packet_type.is_application() {
        Ok(())
    } else {
        Err(Error::violation(format!(
            "{} is reserved for the overlay protocol",
            packet_type
        )))
    }
}
