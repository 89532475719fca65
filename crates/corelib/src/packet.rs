//! Signed wire packets.
//!
//! A packet is the list encoding of exactly ten byte strings:
//!
//! ```text
//! set_index (4 BE) || set_size (4 BE) || magic (1) || target (20) || packet_type (4 BE)
//! || payload (<= 872) || signature (64) || sender_public_key (33) || network_id (4 BE)
//! || message_hash (4)
//! ```
//!
//! The signature covers the digest of the same encoding with the signature
//! field replaced by a single zero byte. The content hash covers the final
//! encoding, so two packets that differ only in their magic byte have
//! different hashes and ack tags.

use std::fmt;

use rand::Rng;

use crate::address::{Address, ADDRESS_LEN};
use crate::codec;
use crate::crypto::{
    self, Digest, Keypair, PublicKey, SignatureBytes, Tag, SIGNATURE_LEN, TAG_LEN,
};
use crate::error::{Error, Result};
use crate::packet_type::PacketType;

/// Largest payload a single packet may carry.
pub const MAX_PAYLOAD: usize = 872;

/// Number of top-level elements in a packet encoding.
pub const PACKET_FIELDS: usize = 10;

/// Receive buffer size; comfortably above the largest packet encoding.
pub const MAX_DATAGRAM: usize = 2048;

/// Placeholder stored in the signature slot while signing.
const SIGNATURE_PLACEHOLDER: [u8; 1] = [0];

/// Every packet field except the payload and the signature material.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub set_index: u32,
    pub set_size: u32,
    /// Per-packet nonce that tells retransmissions of equal content apart.
    pub magic: u8,
    /// Zero when the packet has no specific target.
    pub target: Address,
    pub packet_type: PacketType,
    pub network_id: u32,
    /// Tag of the whole message this packet is a fragment of.
    pub message_hash: Tag,
}

impl Header {
    /// Header for a message that fits in one packet.
    pub fn single(packet_type: PacketType, network_id: u32, payload: &[u8]) -> Self {
        Self {
            set_index: 0,
            set_size: 1,
            magic: rand::thread_rng().gen(),
            target: Address::ZERO,
            packet_type,
            network_id,
            message_hash: crypto::tag(payload),
        }
    }
}

/// An immutable, signed packet.
#[derive(Clone)]
pub struct Packet {
    header: Header,
    payload: Vec<u8>,
    signature: SignatureBytes,
    sender: PublicKey,
    encoded: Vec<u8>,
    hash: Digest,
}

impl Packet {
    /// Sign a new packet with `keypair`.
    pub fn new(header: Header, payload: Vec<u8>, keypair: &Keypair) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge(payload.len()));
        }
        let sender = *keypair.public_key();
        let unsigned = encode_fields(&header, &payload, &SIGNATURE_PLACEHOLDER, &sender)?;
        let signature = keypair.sign(&crypto::digest(&unsigned));
        let encoded = encode_fields(&header, &payload, &signature, &sender)?;
        let hash = crypto::digest(&encoded);

        Ok(Self {
            header,
            payload,
            signature,
            sender,
            encoded,
            hash,
        })
    }

    /// Sign a single-packet message with no target.
    pub fn single(
        packet_type: PacketType,
        payload: Vec<u8>,
        network_id: u32,
        keypair: &Keypair,
    ) -> Result<Self> {
        let header = Header::single(packet_type, network_id, &payload);
        Self::new(header, payload, keypair)
    }

    /// Decode a packet from the wire.
    ///
    /// Only structure is checked here; call [`Packet::verify`] before
    /// trusting the contents. The bytes must be the canonical encoding of
    /// the decoded fields, so a signed packet has exactly one wire form and
    /// one content hash.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let fields = codec::decode_flat(bytes, PACKET_FIELDS)?;

        let payload = fields[5].clone();
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge(payload.len()));
        }

        let header = Header {
            set_index: u32::from_be_bytes(fixed("set_index", &fields[0])?),
            set_size: u32::from_be_bytes(fixed("set_size", &fields[1])?),
            magic: fixed::<1>("magic", &fields[2])?[0],
            target: Address(fixed::<ADDRESS_LEN>("target", &fields[3])?),
            packet_type: PacketType::from(u32::from_be_bytes(fixed("packet_type", &fields[4])?)),
            network_id: u32::from_be_bytes(fixed("network_id", &fields[8])?),
            message_hash: fixed::<TAG_LEN>("message_hash", &fields[9])?,
        };
        let signature = fixed::<SIGNATURE_LEN>("signature", &fields[6])?;
        let sender = PublicKey::from_slice(&fields[7])?;

        let encoded = encode_fields(&header, &payload, &signature, &sender)?;
        if encoded != bytes {
            return Err(Error::Decode("non-canonical packet encoding".into()));
        }
        let hash = crypto::digest(&encoded);

        Ok(Self {
            header,
            payload,
            signature,
            sender,
            encoded,
            hash,
        })
    }

    /// Check the signature against the sender key carried in the packet.
    pub fn verify(&self) -> bool {
        match encode_fields(&self.header, &self.payload, &SIGNATURE_PLACEHOLDER, &self.sender) {
            Ok(unsigned) => {
                crypto::verify(&self.signature, &self.sender, &crypto::digest(&unsigned))
            }
            Err(_) => false,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn set_index(&self) -> u32 {
        self.header.set_index
    }

    pub fn set_size(&self) -> u32 {
        self.header.set_size
    }

    pub fn magic(&self) -> u8 {
        self.header.magic
    }

    pub fn target(&self) -> &Address {
        &self.header.target
    }

    pub fn has_target(&self) -> bool {
        !self.header.target.is_zero()
    }

    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    pub fn network_id(&self) -> u32 {
        self.header.network_id
    }

    pub fn message_hash(&self) -> &Tag {
        &self.header.message_hash
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn signature(&self) -> &SignatureBytes {
        &self.signature
    }

    pub fn sender_public_key(&self) -> &PublicKey {
        &self.sender
    }

    /// Address of the node that signed this packet.
    pub fn sender_address(&self) -> Address {
        self.sender.address()
    }

    /// The wire encoding.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// Digest of the full encoding, signature included.
    pub fn hash(&self) -> &Digest {
        &self.hash
    }

    /// Last four bytes of the content hash; correlates acks with sends.
    pub fn ack_tag(&self) -> Tag {
        crypto::tail_tag(&self.hash)
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.encoded == other.encoded
    }
}

impl Eq for Packet {}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("type", &self.header.packet_type)
            .field("set", &(self.header.set_index, self.header.set_size))
            .field("network_id", &self.header.network_id)
            .field("payload_len", &self.payload.len())
            .field("ack_tag", &hex::encode(self.ack_tag()))
            .finish()
    }
}

fn encode_fields(
    header: &Header,
    payload: &[u8],
    signature: &[u8],
    sender: &PublicKey,
) -> Result<Vec<u8>> {
    let fields: [&[u8]; PACKET_FIELDS] = [
        &header.set_index.to_be_bytes(),
        &header.set_size.to_be_bytes(),
        &[header.magic],
        header.target.as_bytes(),
        &header.packet_type.code().to_be_bytes(),
        payload,
        signature,
        sender.as_bytes(),
        &header.network_id.to_be_bytes(),
        &header.message_hash,
    ];
    codec::encode_bytes(fields)
}

fn fixed<const N: usize>(field: &'static str, bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| Error::FieldWidth {
        field,
        expected: N,
        actual: bytes.len(),
    })
}
