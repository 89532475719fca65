//! Tests for signed packets and fragment sets.
//!
//! # Test Strategy
//!
//! 1. **Signing**: Parsed packets verify; any tampered signed field does not
//! 2. **Parsing**: Arbitrary datagrams never panic the decoder
//! 3. **Fragmentation**: Sets reassemble in any arrival order

use proptest::prelude::*;

use udp2p_core::codec;
use udp2p_core::packet::PACKET_FIELDS;
use udp2p_core::{Address, Header, Keypair, Packet, PacketSet, PacketType, MAX_PAYLOAD};

fn signed_packet(key: &Keypair, payload: Vec<u8>) -> Packet {
    let mut header = Header::single(PacketType::Application(17), 9, &payload);
    header.target = Address([0x42; 20]);
    Packet::new(header, payload, key).unwrap()
}

// ============================================================================
// Signing Tests
// ============================================================================

#[test]
fn test_parsed_packet_verifies() {
    // A packet that survives the wire unchanged still verifies
    let key = Keypair::generate();
    let packet = signed_packet(&key, b"hello overlay".to_vec());
    let parsed = Packet::parse(packet.encoded()).unwrap();
    assert!(parsed.verify());
    assert_eq!(parsed.sender_address(), key.address());
    assert_eq!(parsed.ack_tag(), packet.ack_tag());
}

#[test]
fn test_swapped_sender_key_fails_verification() {
    // Re-attributing a packet to another key breaks the signature
    let key = Keypair::generate();
    let other = Keypair::generate();
    let packet = signed_packet(&key, b"data".to_vec());

    let mut fields = codec::decode_flat(packet.encoded(), PACKET_FIELDS).unwrap();
    fields[7] = other.public_key().as_bytes().to_vec();
    let forged = Packet::parse(&codec::encode_bytes(&fields).unwrap()).unwrap();

    assert_eq!(forged.sender_address(), other.address());
    assert!(!forged.verify());
}

#[test]
fn test_widened_count_prefix_is_rejected() {
    // The same fields behind a non-minimal varint count still verify after
    // decoding, so they must not parse as a second wire form
    let key = Keypair::generate();
    let packet = signed_packet(&key, b"once only".to_vec());
    let bytes = packet.encoded();
    assert_eq!(bytes[0], PACKET_FIELDS as u8);

    let mut widened = vec![0xfb, PACKET_FIELDS as u8, 0x00];
    widened.extend_from_slice(&bytes[1..]);
    assert_eq!(
        codec::decode_flat(&widened, PACKET_FIELDS).unwrap(),
        codec::decode_flat(bytes, PACKET_FIELDS).unwrap()
    );
    assert!(Packet::parse(&widened).is_err());
    assert!(Packet::parse(bytes).is_ok());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn proptest_tampered_field_fails_verification(
        payload in prop::collection::vec(any::<u8>(), 1..256),
        field in prop::sample::select(vec![3usize, 4, 5, 8, 9]),
        position in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let key = Keypair::generate();
        let packet = signed_packet(&key, payload);

        let mut fields = codec::decode_flat(packet.encoded(), PACKET_FIELDS).unwrap();
        let at = position.index(fields[field].len());
        fields[field][at] ^= flip;

        let tampered = Packet::parse(&codec::encode_bytes(&fields).unwrap()).unwrap();
        prop_assert!(!tampered.verify(), "tampering field {} must break the signature", field);
    }

    #[test]
    fn proptest_parse_arbitrary_bytes_never_panics(
        bytes in prop::collection::vec(any::<u8>(), 0..1500),
    ) {
        let _ = Packet::parse(&bytes);
    }
}

// ============================================================================
// Fragmentation Tests
// ============================================================================

#[test]
fn test_fragment_boundaries() {
    // Exactly MAX_PAYLOAD bytes is one fragment, one more spills into a second
    let key = Keypair::generate();
    let exact = vec![1u8; MAX_PAYLOAD];
    let set = PacketSet::from_payload(PacketType::Application(11), Address::ZERO, &exact, 0, &key)
        .unwrap();
    assert_eq!(set.size(), 1);

    let spill = vec![1u8; MAX_PAYLOAD + 1];
    let set = PacketSet::from_payload(PacketType::Application(11), Address::ZERO, &spill, 0, &key)
        .unwrap();
    assert_eq!(set.size(), 2);
    assert_eq!(set.slots()[1].as_ref().unwrap().payload().len(), 1);
}

#[test]
fn test_fragments_parse_back_into_set() {
    // Fragments reassembled from their wire encodings reproduce the payload
    let key = Keypair::generate();
    let payload: Vec<u8> = (0..2000u32).map(|i| (i * 7) as u8).collect();
    let outbound =
        PacketSet::from_payload(PacketType::Application(30), Address::ZERO, &payload, 5, &key)
            .unwrap();

    let mut wire = outbound.packets().map(|p| Packet::parse(p.encoded()).unwrap());
    let mut inbound = PacketSet::from_first_packet(wire.next().unwrap()).unwrap();
    for packet in wire {
        assert!(packet.verify());
        inbound.add(packet);
    }
    assert_eq!(inbound.payload().unwrap(), payload);
}

fn payload_and_order() -> impl Strategy<Value = (Vec<u8>, Vec<usize>)> {
    prop::collection::vec(any::<u8>(), 1..(4 * MAX_PAYLOAD)).prop_flat_map(|payload| {
        let fragments = (payload.len() + MAX_PAYLOAD - 1) / MAX_PAYLOAD;
        let order = Just((0..fragments).collect::<Vec<_>>()).prop_shuffle();
        (Just(payload), order)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn proptest_reassembly_in_any_order((payload, order) in payload_and_order()) {
        let key = Keypair::generate();
        let outbound = PacketSet::from_payload(
            PacketType::Application(12), Address::ZERO, &payload, 1, &key,
        ).unwrap();
        let fragments: Vec<Packet> = outbound.packets().cloned().collect();
        prop_assert_eq!(fragments.len(), order.len());

        let mut inbound = PacketSet::from_first_packet(fragments[order[0]].clone()).unwrap();
        for (n, &i) in order.iter().enumerate().skip(1) {
            prop_assert!(!inbound.is_complete(), "complete after {} of {}", n, order.len());
            prop_assert!(inbound.add(fragments[i].clone()));
        }
        prop_assert!(inbound.is_complete());
        prop_assert_eq!(inbound.payload().unwrap(), payload);
    }
}
