//! Error types for the protocol engine.
//!
//! Only [`Error::Transport`] is fatal to the socket worker. Every other kind
//! describes a single dropped datagram or a refused request; the worker logs
//! and counts it, then carries on.

use std::io;

use thiserror::Error;
use udp2p_core::Address;
use udp2p_routing::RoutingError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The datagram is not a well-formed packet.
    #[error("malformed packet: {0}")]
    StructuralDecode(#[source] udp2p_core::Error),

    /// The packet parsed but its signature does not verify.
    #[error("bad signature from {0}")]
    Signature(Address),

    /// The packet is well-formed but not allowed here.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A peer expected to be in the routing table is missing.
    #[error("peer {0} is not in the routing table")]
    PeerNotFound(Address),

    /// Socket failure. Ends the worker.
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),

    /// Invalid engine configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The node has shut down and no longer accepts requests.
    #[error("node is shut down")]
    Closed,

    /// A core operation such as signing or encoding failed.
    #[error(transparent)]
    Core(#[from] udp2p_core::Error),
}

impl Error {
    /// Whether this error ends the socket worker.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::StructuralDecode(_) => "structural_decode",
            Error::Signature(_) => "signature",
            Error::ProtocolViolation(_) => "protocol_violation",
            Error::PeerNotFound(_) => "peer_not_found",
            Error::Transport(_) => "transport",
            Error::Config(_) => "config",
            Error::Closed => "closed",
            Error::Core(_) => "core",
        }
    }

    pub(crate) fn violation(msg: impl Into<String>) -> Self {
        Error::ProtocolViolation(msg.into())
    }
}

impl From<RoutingError> for Error {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::PeerNotFound(address) => Error::PeerNotFound(address),
            RoutingError::SelfAddress => Error::violation("packet refers to the local address"),
            RoutingError::InvalidRecord(inner) => Error::StructuralDecode(inner),
            RoutingError::IpLength(len) => {
                Error::violation(format!("peer record ip address of {} bytes", len))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_fatal() {
        assert!(Error::Transport(io::Error::new(io::ErrorKind::Other, "boom")).is_fatal());
        assert!(!Error::Signature(Address::ZERO).is_fatal());
        assert!(!Error::PeerNotFound(Address::ZERO).is_fatal());
        assert!(!Error::violation("x").is_fatal());
        assert!(!Error::StructuralDecode(udp2p_core::Error::EmptySet).is_fatal());
    }

    #[test]
    fn test_routing_errors_map_to_taxonomy() {
        let err: Error = RoutingError::PeerNotFound(Address([1; 20])).into();
        assert!(matches!(err, Error::PeerNotFound(a) if a == Address([1; 20])));
        let err: Error = RoutingError::IpLength(3).into();
        assert_eq!(err.kind(), "protocol_violation");
    }
}
