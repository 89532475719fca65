//! Reassembly of inbound application messages.
//!
//! Fragments are grouped by `(sender address, message hash)`. Exact duplicates
//! are filtered by [`SeenCache`] before they get here, so a fragment whose
//! slot is already filled belongs to another send of the same payload and
//! opens a set of its own. A set that completes is checked against its
//! message hash before delivery; a set that stays incomplete for longer than
//! the timeout is discarded.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use udp2p_core::crypto::{self, Digest};
use udp2p_core::{Address, Packet, PacketSet, Tag};

use crate::error::{Error, Result};
use crate::message::InboundMessage;

#[derive(Debug)]
struct Partial {
    set: PacketSet,
    started: Instant,
}

#[derive(Debug)]
pub struct Reassembly {
    partial: HashMap<(Address, Tag), Vec<Partial>>,
    timeout: Duration,
    max_set_size: u32,
}

impl Reassembly {
    pub fn new(timeout: Duration, max_set_size: u32) -> Self {
        Self {
            partial: HashMap::new(),
            timeout,
            max_set_size,
        }
    }

    /// Number of incomplete messages being held.
    pub fn pending(&self) -> usize {
        self.partial.values().map(Vec::len).sum()
    }

    /// Add a verified application fragment. Returns the message once its
    /// last fragment has arrived.
    pub fn insert(&mut self, packet: Packet, now: Instant) -> Result<Option<InboundMessage>> {
        if packet.set_size() > self.max_set_size {
            return Err(Error::violation(format!(
                "set of {} fragments exceeds limit of {}",
                packet.set_size(),
                self.max_set_size
            )));
        }

        let from = packet.sender_address();
        let key = (from, *packet.message_hash());
        let target = packet.has_target().then(|| *packet.target());

        let sets = self.partial.entry(key).or_default();
        if !sets.is_empty() && !sets.iter().any(|p| p.set.accepts(&packet)) {
            return Err(Error::violation("fragment does not match its set"));
        }
        let open = sets
            .iter()
            .position(|p| p.set.accepts(&packet) && p.set.slots()[packet.set_index() as usize].is_none());

        let set = match open {
            Some(pos) => {
                sets[pos].set.add(packet);
                if !sets[pos].set.is_complete() {
                    return Ok(None);
                }
                sets.remove(pos).set
            }
            None => {
                let set = match PacketSet::from_first_packet(packet) {
                    Ok(set) => set,
                    Err(err) => {
                        if sets.is_empty() {
                            self.partial.remove(&key);
                        }
                        return Err(Error::StructuralDecode(err));
                    }
                };
                if !set.is_complete() {
                    sets.push(Partial { set, started: now });
                    return Ok(None);
                }
                set
            }
        };
        if sets.is_empty() {
            self.partial.remove(&key);
        }

        let payload = set
            .payload()
            .ok_or_else(|| Error::violation("complete set without payload"))?;
        if &crypto::tag(&payload) != set.message_hash() {
            return Err(Error::violation("reassembled payload does not match message hash"));
        }
        Ok(Some(InboundMessage {
            from,
            packet_type: set.packet_type(),
            target,
            payload,
        }))
    }

    /// Drop incomplete messages older than the timeout. Returns how many were
    /// dropped.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.pending();
        let timeout = self.timeout;
        self.partial.retain(|_, sets| {
            sets.retain(|p| now.saturating_duration_since(p.started) < timeout);
            !sets.is_empty()
        });
        before - self.pending()
    }
}

/// Short-lived memory of packet hashes already processed, so retransmitted
/// fragments are acknowledged again but not delivered twice.
#[derive(Debug)]
pub struct SeenCache {
    seen: HashMap<Digest, Instant>,
    ttl: Duration,
}

impl SeenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            ttl,
        }
    }

    /// Record `hash`; returns false if it was already present.
    pub fn insert(&mut self, hash: Digest, now: Instant) -> bool {
        self.seen.insert(hash, now).is_none()
    }

    pub fn contains(&self, hash: &Digest) -> bool {
        self.seen.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn expire(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.seen
            .retain(|_, at| now.saturating_duration_since(*at) < ttl);
    }
}
