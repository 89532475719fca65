//! Core wire types for the udp2p overlay.
//!
//! This crate provides everything that travels on the wire:
//! - The generic list encoding and snappy block compression
//! - Hashing, signing and 160-bit node addresses
//! - Signed packets and the packet type vocabulary
//! - Fragmentation of messages into packet sets and their reassembly

pub mod address;
pub mod codec;
pub mod compression;
pub mod crypto;
pub mod error;
pub mod packet;
pub mod packet_set;
pub mod packet_type;

pub use address::Address;
pub use codec::Item;
pub use crypto::{Keypair, PublicKey, Tag};
pub use error::{Error, Result};
pub use packet::{Header, Packet, MAX_DATAGRAM, MAX_PAYLOAD};
pub use packet_set::PacketSet;
pub use packet_type::PacketType;
