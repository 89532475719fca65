//! Peer bookkeeping for the udp2p overlay.
//!
//! This crate provides:
//! - Peers with liveness tracking and their wire records
//! - A Kademlia-style routing table of 160 XOR-distance buckets

pub mod error;
pub mod peer;
pub mod table;

pub use error::{Result, RoutingError};
pub use peer::Peer;
pub use table::{AddOutcome, RoutingTable};
