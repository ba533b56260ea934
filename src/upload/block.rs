//! Block identifiers and block-sized chunks.

use base64ct::{Base64, Encoding};

/// Length of a base64-encoded block id (six decimal digits → eight chars).
pub const BLOCK_ID_LEN: usize = 8;

/// Identifier of one uploaded block.
///
/// Blob storage requires all ids of a blob to have the same length, so the
/// block index is rendered as six zero-padded digits and base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockId(heapless::String<BLOCK_ID_LEN>);

impl BlockId {
    /// Builds the id of the block at `index` (0-based, below 1 000 000).
    pub fn for_index(index: u32) -> Option<Self> {
        if index >= 1_000_000 {
            return None;
        }
        let mut digits = [b'0'; 6];
        let mut rest = index;
        for slot in digits.iter_mut().rev() {
            *slot = b'0' + (rest % 10) as u8;
            rest /= 10;
        }
        let mut encoded = [0u8; BLOCK_ID_LEN];
        let text = Base64::encode(&digits, &mut encoded).ok()?;
        heapless::String::try_from(text).ok().map(BlockId)
    }

    /// The encoded id.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// One block handed to the upload service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block<'a> {
    /// Position of the block in the blob.
    pub index: u32,
    /// Encoded block id.
    pub id: &'a BlockId,
    /// Block contents.
    pub data: &'a [u8],
    /// CRC-32 of `data`, for integrity checking by the upload service.
    pub crc32: u32,
}

impl<'a> Block<'a> {
    /// Wraps `data` as block `index`.
    pub fn new(index: u32, id: &'a BlockId, data: &'a [u8]) -> Self {
        Self {
            index,
            id,
            data,
            crc32: crc32fast::hash(data),
        }
    }
}
