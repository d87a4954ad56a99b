// src/core/cluster/slot.rs

//! Implements the cluster hash slot algorithm.

use crc::{CRC_16_XMODEM, Crc};

/// The total number of hash slots in a cluster.
pub const NUM_SLOTS: usize = 16384;

/// CRC16-XMODEM, the checksum cluster nodes use for key hashing.
const CRC16_ALGO: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculates the hash slot for a key.
///
/// If the key contains a hash tag (a `{...}` substring with non-empty
/// content), only the tag content is hashed, which lets callers co-locate
/// related keys in one slot. An empty tag (`{}`) or an unterminated brace is
/// treated literally and the whole key is hashed.
///
/// The slot is `CRC16(key) % 16384`.
pub fn hash_slot(key: &[u8]) -> u16 {
    if let Some(open) = key.iter().position(|&b| b == b'{')
        && let Some(close_offset) = key[open + 1..].iter().position(|&b| b == b'}')
        && close_offset > 0
    {
        let tag = &key[open + 1..open + 1 + close_offset];
        return CRC16_ALGO.checksum(tag) % (NUM_SLOTS as u16);
    }
    CRC16_ALGO.checksum(key) % (NUM_SLOTS as u16)
}

/// Computes the single slot shared by all `keys`, failing `CrossSlot` when
/// they disagree. The wildcard key list `["*"]` is handled by the router
/// before this point; an empty key list has no slot constraint.
pub fn common_slot<'a, I>(keys: I) -> Result<Option<u16>, crate::core::ClientError>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut found: Option<u16> = None;
    for key in keys {
        let slot = hash_slot(key);
        match found {
            None => found = Some(slot),
            Some(prev) if prev != slot => return Err(crate::core::ClientError::CrossSlot),
            Some(_) => {}
        }
    }
    Ok(found)
}
