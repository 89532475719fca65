//! Protocol engine for the udp2p overlay.
//!
//! This crate provides:
//! - The protocol state machine for the eleven overlay packet types
//! - Pending-ack tracking with bounded retransmission
//! - Reassembly of fragmented application messages
//! - A single-threaded socket worker and the thread-safe handle that drives it

pub mod ack;
pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod protocol;
pub mod reassembly;
pub mod socket;
pub mod transport;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use message::{DeliveryFailure, InboundMessage, Message};
pub use protocol::Protocol;
pub use socket::{NodeHandle, P2PSocket};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, UdpTransport};
