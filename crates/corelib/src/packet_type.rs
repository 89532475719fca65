//! Packet type vocabulary.
//!
//! Codes 0 through 10 are reserved for the overlay protocol and never reach
//! the application; every code from 11 upward carries an application payload.

use std::fmt;

/// First packet type code available to applications.
pub const FIRST_APPLICATION_TYPE: u32 = 11;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PacketType {
    Join,
    Leave,
    Yes,
    No,
    PeerRequest,
    PeerList,
    AddressRequest,
    AddressResponse,
    Ping,
    Pong,
    Ack,
    /// Application payload with a code of at least 11.
    Application(u32),
}

impl PacketType {
    /// Application type for `code`, or `None` if the code is reserved.
    pub fn application(code: u32) -> Option<Self> {
        (code >= FIRST_APPLICATION_TYPE).then_some(PacketType::Application(code))
    }

    pub fn code(self) -> u32 {
        match self {
            PacketType::Join => 0,
            PacketType::Leave => 1,
            PacketType::Yes => 2,
            PacketType::No => 3,
            PacketType::PeerRequest => 4,
            PacketType::PeerList => 5,
            PacketType::AddressRequest => 6,
            PacketType::AddressResponse => 7,
            PacketType::Ping => 8,
            PacketType::Pong => 9,
            PacketType::Ack => 10,
            PacketType::Application(code) => code,
        }
    }

    pub fn is_application(self) -> bool {
        matches!(self, PacketType::Application(_))
    }

    /// Types a stranger may send: join, address request and address response.
    pub fn is_bootstrap(self) -> bool {
        matches!(
            self,
            PacketType::Join | PacketType::AddressRequest | PacketType::AddressResponse
        )
    }

    /// Whether a sent packet of this type stays queued until acknowledged.
    pub fn awaits_ack(self) -> bool {
        matches!(
            self,
            PacketType::No | PacketType::PeerList | PacketType::Application(_)
        )
    }
}

impl From<u32> for PacketType {
    fn from(code: u32) -> Self {
        match code {
            0 => PacketType::Join,
            1 => PacketType::Leave,
            2 => PacketType::Yes,
            3 => PacketType::No,
            4 => PacketType::PeerRequest,
            5 => PacketType::PeerList,
            6 => PacketType::AddressRequest,
            7 => PacketType::AddressResponse,
            8 => PacketType::Ping,
            9 => PacketType::Pong,
            10 => PacketType::Ack,
            other => PacketType::Application(other),
        }
    }
}

impl From<PacketType> for u32 {
    fn from(ty: PacketType) -> Self {
        ty.code()
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketType::Application(code) => write!(f, "application({})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for code in 0..64u32 {
            assert_eq!(PacketType::from(code).code(), code);
        }
        assert_eq!(PacketType::from(u32::MAX).code(), u32::MAX);
    }

    #[test]
    fn test_reserved_codes_are_not_application() {
        for code in 0..FIRST_APPLICATION_TYPE {
            assert!(!PacketType::from(code).is_application());
            assert_eq!(PacketType::application(code), None);
        }
        assert_eq!(PacketType::application(11), Some(PacketType::Application(11)));
    }

    #[test]
    fn test_ack_policy() {
        let awaiting: Vec<u32> = (0..=12)
            .filter(|c| PacketType::from(*c).awaits_ack())
            .collect();
        assert_eq!(awaiting, vec![3, 5, 11, 12]);
    }

    #[test]
    fn test_bootstrap_types() {
        let bootstrap: Vec<u32> = (0..=11)
            .filter(|c| PacketType::from(*c).is_bootstrap())
            .collect();
        assert_eq!(bootstrap, vec![0, 6, 7]);
    }
}
