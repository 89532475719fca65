//! Routing-table entries and their wire records.
//!
//! A peer record is a two-element list `[address (20), ip (4 or 16)]`. Every
//! node listens on the same overlay port, so records carry no port.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

use udp2p_core::codec::{self, Item};
use udp2p_core::Address;

use crate::error::{Result, RoutingError};

/// Number of elements in a peer record.
pub const RECORD_FIELDS: usize = 2;

/// A remote node known to the routing table.
///
/// Equality is address plus IP; liveness bookkeeping is ignored.
#[derive(Clone)]
pub struct Peer {
    address: Address,
    ip: IpAddr,
    last_seen: Instant,
    messages_seen: u64,
}

impl Peer {
    /// Create a peer seen just now.
    pub fn new(address: Address, ip: IpAddr) -> Self {
        Self::seen_at(address, ip, Instant::now())
    }

    /// Create a peer last seen at `now`.
    pub fn seen_at(address: Address, ip: IpAddr, now: Instant) -> Self {
        Self {
            address,
            ip,
            last_seen: now,
            messages_seen: 0,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn messages_seen(&self) -> u64 {
        self.messages_seen
    }

    /// Record that the peer was just heard from.
    pub fn witness(&mut self) {
        self.witness_at(Instant::now());
    }

    pub fn witness_at(&mut self, now: Instant) {
        self.last_seen = self.last_seen.max(now);
        self.messages_seen += 1;
    }

    /// Time since the peer was last heard from.
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    pub fn is_stale(&self, now: Instant, stale_after: Duration) -> bool {
        self.idle(now) > stale_after
    }

    pub fn is_dead(&self, now: Instant, dead_after: Duration) -> bool {
        self.idle(now) > dead_after
    }

    /// The two-element wire record of this peer.
    pub fn to_record(&self) -> udp2p_core::Result<Vec<u8>> {
        let ip = match self.ip {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        let fields: [&[u8]; RECORD_FIELDS] = [self.address.as_bytes(), &ip];
        codec::encode_bytes(fields)
    }

    /// Decode a wire record into a peer seen at `now`.
    pub fn from_record(bytes: &[u8], now: Instant) -> Result<Self> {
        let fields = codec::decode_flat(bytes, RECORD_FIELDS)?;
        let address = Address::from_slice(&fields[0])?;
        let ip = ip_from_bytes(&fields[1])?;
        Ok(Self::seen_at(address, ip, now))
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Result<IpAddr> {
    if let Ok(v4) = <[u8; 4]>::try_from(bytes) {
        return Ok(IpAddr::V4(Ipv4Addr::from(v4)));
    }
    if let Ok(v6) = <[u8; 16]>::try_from(bytes) {
        return Ok(IpAddr::V6(Ipv6Addr::from(v6)));
    }
    Err(RoutingError::IpLength(bytes.len()))
}

/// Encode a list of peers as a list of nested peer records.
pub fn encode_peers<'a>(peers: impl IntoIterator<Item = &'a Peer>) -> udp2p_core::Result<Vec<u8>> {
    let items = peers
        .into_iter()
        .map(|peer| peer.to_record().map(Item::List))
        .collect::<udp2p_core::Result<Vec<_>>>()?;
    codec::encode(&items)
}

/// Decode a peer list holding at most `max_peers` records.
pub fn decode_peers(bytes: &[u8], max_peers: usize, now: Instant) -> Result<Vec<Peer>> {
    codec::decode_bounded(bytes, max_peers)?
        .into_iter()
        .map(|item| match item {
            Item::List(record) => Peer::from_record(&record, now),
            Item::Bytes(_) => Err(RoutingError::InvalidRecord(udp2p_core::Error::Decode(
                "peer list entry is not a record".into(),
            ))),
        })
        .collect()
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.ip == other.ip
    }
}

impl Eq for Peer {}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("address", &self.address)
            .field("ip", &self.ip)
            .field("messages_seen", &self.messages_seen)
            .finish()
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address, self.ip)
    }
}
