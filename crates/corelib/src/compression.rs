//! Snappy block compression for peer lists.

use snap::raw::{decompress_len, Decoder, Encoder};

use crate::codec::MAX_ENCODED_LEN;
use crate::error::{Error, Result};

/// Compress a block.
pub fn compress(input: &[u8]) -> Result<Vec<u8>> {
    Ok(Encoder::new().compress_vec(input)?)
}

/// Decompress a block. Blocks that claim to expand past the list encoding
/// limit are refused before any allocation.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    let len = decompress_len(input)?;
    if len as u64 > MAX_ENCODED_LEN {
        return Err(Error::Compression(format!(
            "block expands to {} bytes, limit is {}",
            len, MAX_ENCODED_LEN
        )));
    }
    Ok(Decoder::new().decompress_vec(input)?)
}
