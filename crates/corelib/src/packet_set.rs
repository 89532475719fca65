//! Fragmentation of payloads into packets and reassembly from partial arrivals.

use rand::Rng;

use crate::address::Address;
use crate::crypto::{self, Keypair, Tag};
use crate::error::{Error, Result};
use crate::packet::{Header, Packet, MAX_PAYLOAD};
use crate::packet_type::PacketType;

/// A message split across one or more signed packets.
///
/// # Invariants
///
/// - Slot `i` is either empty or holds the packet whose `set_index` is `i`.
/// - `complete` flips to true exactly when the last empty slot is filled, and
///   no slot changes afterwards.
#[derive(Clone, Debug)]
pub struct PacketSet {
    packet_type: PacketType,
    message_hash: Tag,
    slots: Vec<Option<Packet>>,
    received: usize,
    complete: bool,
}

impl PacketSet {
    /// Fragment `payload` into signed packets of at most [`MAX_PAYLOAD`] bytes.
    ///
    /// Every fragment shares the set size, message hash, network id, target and
    /// type; they differ only in index and magic byte. An empty payload yields
    /// a single empty fragment.
    pub fn from_payload(
        packet_type: PacketType,
        target: Address,
        payload: &[u8],
        network_id: u32,
        keypair: &Keypair,
    ) -> Result<Self> {
        let message_hash = crypto::tag(payload);
        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![&[][..]]
        } else {
            payload.chunks(MAX_PAYLOAD).collect()
        };
        let set_size = u32::try_from(chunks.len()).map_err(|_| Error::PayloadTooLarge(payload.len()))?;

        let mut rng = rand::thread_rng();
        let slots = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let header = Header {
                    set_index: i as u32,
                    set_size,
                    magic: rng.gen(),
                    target,
                    packet_type,
                    network_id,
                    message_hash,
                };
                Packet::new(header, chunk.to_vec(), keypair).map(Some)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            packet_type,
            message_hash,
            received: slots.len(),
            slots,
            complete: true,
        })
    }

    /// Start reassembly from the first fragment seen on the network.
    pub fn from_first_packet(packet: Packet) -> Result<Self> {
        let size = packet.set_size();
        if size == 0 {
            return Err(Error::EmptySet);
        }
        if packet.set_index() >= size {
            return Err(Error::InvalidFragment {
                index: packet.set_index(),
                size,
            });
        }

        let mut set = Self {
            packet_type: packet.packet_type(),
            message_hash: *packet.message_hash(),
            slots: vec![None; size as usize],
            received: 0,
            complete: false,
        };
        set.add(packet);
        Ok(set)
    }

    /// Whether `packet` belongs in this set: same size, type and message hash,
    /// and an index inside the allocation.
    pub fn accepts(&self, packet: &Packet) -> bool {
        packet.set_size() as usize == self.slots.len()
            && (packet.set_index() as usize) < self.slots.len()
            && packet.packet_type() == self.packet_type
            && packet.message_hash() == &self.message_hash
    }

    /// Place a fragment in its slot. Returns true if the slot was filled by
    /// this call; duplicates, foreign fragments and adds to a complete set are
    /// ignored.
    pub fn add(&mut self, packet: Packet) -> bool {
        if self.complete || !self.accepts(&packet) {
            return false;
        }
        let slot = &mut self.slots[packet.set_index() as usize];
        if slot.is_some() {
            return false;
        }
        *slot = Some(packet);
        self.received += 1;
        self.complete = self.received == self.slots.len();
        true
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn message_hash(&self) -> &Tag {
        &self.message_hash
    }

    /// Declared number of fragments.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of fragments present.
    pub fn received(&self) -> usize {
        self.received
    }

    /// Slots in index order; gaps are `None` while incomplete.
    pub fn slots(&self) -> &[Option<Packet>] {
        &self.slots
    }

    /// Present fragments in index order.
    pub fn packets(&self) -> impl Iterator<Item = &Packet> {
        self.slots.iter().flatten()
    }

    /// The reassembled payload, once every fragment has arrived.
    pub fn payload(&self) -> Option<Vec<u8>> {
        if !self.complete {
            return None;
        }
        Some(self.packets().flat_map(|p| p.payload().iter().copied()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound(len: usize) -> (PacketSet, Vec<u8>) {
        let key = Keypair::generate();
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let set = PacketSet::from_payload(PacketType::Application(20), Address::ZERO, &payload, 3, &key)
            .unwrap();
        (set, payload)
    }

    #[test]
    fn test_from_payload_fragment_count() {
        assert_eq!(outbound(1).0.size(), 1);
        assert_eq!(outbound(MAX_PAYLOAD).0.size(), 1);
        assert_eq!(outbound(MAX_PAYLOAD + 1).0.size(), 2);
        assert_eq!(outbound(3 * MAX_PAYLOAD).0.size(), 3);
    }

    #[test]
    fn test_empty_payload_is_one_empty_fragment() {
        let (set, _) = outbound(0);
        assert_eq!(set.size(), 1);
        assert!(set.is_complete());
        assert_eq!(set.payload(), Some(vec![]));
    }

    #[test]
    fn test_fragments_share_header_fields() {
        let (set, payload) = outbound(2 * MAX_PAYLOAD + 10);
        let tag = crypto::tag(&payload);
        for (i, packet) in set.packets().enumerate() {
            assert_eq!(packet.set_index() as usize, i);
            assert_eq!(packet.set_size(), 3);
            assert_eq!(packet.message_hash(), &tag);
            assert_eq!(packet.network_id(), 3);
            assert!(packet.verify());
        }
        assert_eq!(set.payload().unwrap(), payload);
    }

    #[test]
    fn test_reassembly_completes_on_last_fragment() {
        let (outbound, payload) = outbound(2 * MAX_PAYLOAD + 1);
        let packets: Vec<Packet> = outbound.packets().cloned().collect();

        let mut inbound = PacketSet::from_first_packet(packets[2].clone()).unwrap();
        assert!(!inbound.is_complete());
        assert!(inbound.add(packets[0].clone()));
        assert!(!inbound.is_complete());
        assert!(inbound.payload().is_none());
        assert!(inbound.add(packets[1].clone()));
        assert!(inbound.is_complete());
        assert_eq!(inbound.payload().unwrap(), payload);
    }

    #[test]
    fn test_duplicate_fragment_is_ignored() {
        let (outbound, _) = outbound(2 * MAX_PAYLOAD);
        let first = outbound.slots()[0].clone().unwrap();

        let mut inbound = PacketSet::from_first_packet(first.clone()).unwrap();
        assert!(!inbound.add(first));
        assert_eq!(inbound.received(), 1);
    }

    #[test]
    fn test_foreign_fragment_is_rejected() {
        let (a, _) = outbound(2 * MAX_PAYLOAD);
        let (b, _) = outbound(2 * MAX_PAYLOAD + 5);

        let mut inbound = PacketSet::from_first_packet(a.slots()[0].clone().unwrap()).unwrap();
        let foreign = b.slots()[1].clone().unwrap();
        assert!(!inbound.accepts(&foreign));
        assert!(!inbound.add(foreign));
    }

    #[test]
    fn test_from_first_packet_rejects_bad_index() {
        let key = Keypair::generate();
        let mut header = Header::single(PacketType::Application(11), 0, b"x");
        header.set_index = 4;
        header.set_size = 4;
        let packet = Packet::new(header.clone(), b"x".to_vec(), &key).unwrap();
        assert_eq!(
            PacketSet::from_first_packet(packet).unwrap_err(),
            Error::InvalidFragment { index: 4, size: 4 }
        );

        header.set_index = 0;
        header.set_size = 0;
        let packet = Packet::new(header, b"x".to_vec(), &key).unwrap();
        assert_eq!(PacketSet::from_first_packet(packet).unwrap_err(), Error::EmptySet);
    }
}
