//! Error types for the core library.

use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding, decoding or building wire records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The generic list encoding could not be decoded.
    #[error("malformed list encoding: {0}")]
    Decode(String),
    /// A record decoded to the wrong number of elements.
    #[error("expected {expected} elements, found {actual}")]
    Arity { expected: usize, actual: usize },
    /// A record element was itself a list.
    #[error("element {0} is a nested list")]
    NestedList(usize),
    /// A fixed-width field had the wrong length.
    #[error("field `{field}` must be {expected} bytes, found {actual}")]
    FieldWidth {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A single packet payload was larger than the wire allows.
    #[error("payload of {0} bytes exceeds the {max} byte packet limit", max = crate::packet::MAX_PAYLOAD)]
    PayloadTooLarge(usize),
    /// Key material could not be parsed.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// Block compression or decompression failed.
    #[error("compression failed: {0}")]
    Compression(String),
    /// A fragment set was declared with zero fragments.
    #[error("fragment set size must be non-zero")]
    EmptySet,
    /// A fragment does not belong in the set it was offered to.
    #[error("fragment {index} does not fit a set of {size}")]
    InvalidFragment { index: u32, size: u32 },
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<snap::Error> for Error {
    fn from(err: snap::Error) -> Self {
        Error::Compression(err.to_string())
    }
}
