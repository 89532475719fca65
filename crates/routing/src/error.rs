//! Error types for the routing table.

use thiserror::Error;
use udp2p_core::Address;

/// Result type alias for routing operations.
pub type Result<T> = std::result::Result<T, RoutingError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// A peer expected to be in the table is not there.
    #[error("peer {0} is not in the routing table")]
    PeerNotFound(Address),

    /// The local address was used where a remote peer is required.
    #[error("the local address has no bucket")]
    SelfAddress,

    /// A peer record could not be decoded.
    #[error("invalid peer record: {0}")]
    InvalidRecord(#[from] udp2p_core::Error),

    /// A peer record carried an IP address that is neither v4 nor v6.
    #[error("ip address must be 4 or 16 bytes, found {0}")]
    IpLength(usize),
}
