//! Generic list encoding used by packets and peer records.
//!
//! A record is a flat, ordered list of [`Item`]s. Each item is either a byte
//! string or a nested list; nested lists travel as the encoding of the inner
//! list behind a list marker and are only decoded when asked for, so decoding
//! a record never recurses.
//!
//! The byte layout is the bincode varint encoding of `Vec<Item>`:
//!
//! ```text
//! count (varint) || item*        item = marker (0 = bytes, 1 = list) || len (varint) || data
//! ```

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on the size of an encoding accepted by [`decode`].
pub const MAX_ENCODED_LEN: u64 = 64 * 1024;

/// One element of an encoded list.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Item {
    /// A plain byte string.
    Bytes(Vec<u8>),
    /// The encoding of a nested list.
    List(Vec<u8>),
}

impl Item {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Item::Bytes(data.into())
    }

    /// Wrap a nested list.
    pub fn list(items: &[Item]) -> Result<Self> {
        Ok(Item::List(encode(items)?))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Item::List(_))
    }

    /// Raw data of the item; for a list this is its encoding.
    pub fn data(&self) -> &[u8] {
        match self {
            Item::Bytes(data) | Item::List(data) => data,
        }
    }

    /// Decode a nested list. Fails for plain byte strings.
    pub fn as_list(&self) -> Result<Vec<Item>> {
        match self {
            Item::List(data) => decode(data),
            Item::Bytes(_) => Err(Error::Decode("item is not a list".into())),
        }
    }
}

fn encoder() -> impl Options {
    bincode::DefaultOptions::new().with_varint_encoding()
}

fn decoder() -> impl Options {
    bincode::DefaultOptions::new()
        .with_varint_encoding()
        .with_limit(MAX_ENCODED_LEN)
        .reject_trailing_bytes()
}

/// Encode an ordered list of items.
pub fn encode(items: &[Item]) -> Result<Vec<u8>> {
    Ok(encoder().serialize(items)?)
}

/// Decode a list. Trailing bytes and oversized inputs are rejected.
pub fn decode(bytes: &[u8]) -> Result<Vec<Item>> {
    if bytes.len() as u64 > MAX_ENCODED_LEN {
        return Err(Error::Decode(format!(
            "encoding of {} bytes exceeds {} byte limit",
            bytes.len(),
            MAX_ENCODED_LEN
        )));
    }
    Ok(decoder().deserialize(bytes)?)
}

/// Decode a list holding at most `max_items` top-level elements.
pub fn decode_bounded(bytes: &[u8], max_items: usize) -> Result<Vec<Item>> {
    let items = decode(bytes)?;
    if items.len() > max_items {
        return Err(Error::Arity {
            expected: max_items,
            actual: items.len(),
        });
    }
    Ok(items)
}

/// Encode a list of plain byte strings.
pub fn encode_bytes<I, B>(fields: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let items: Vec<Item> = fields
        .into_iter()
        .map(|f| Item::Bytes(f.as_ref().to_vec()))
        .collect();
    encode(&items)
}

/// Decode a list that must hold exactly `arity` plain byte strings.
pub fn decode_flat(bytes: &[u8], arity: usize) -> Result<Vec<Vec<u8>>> {
    let items = decode_bounded(bytes, arity)?;
    if items.len() != arity {
        return Err(Error::Arity {
            expected: arity,
            actual: items.len(),
        });
    }
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Item::Bytes(data) => Ok(data),
            Item::List(_) => Err(Error::NestedList(i)),
        })
        .collect()
}
