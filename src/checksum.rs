//! The sfnt checksum algorithm
//!
//! <https://learn.microsoft.com/en-us/typography/opentype/spec/otff#calculating-checksums>

use crate::error::Result;
use crate::source::ReadAt;
use crate::table_tags::HEAD;
use font_types::Tag;

/// The whole-file checksum plus `head.checksumAdjustment` must equal this.
pub const CHECKSUM_MAGIC: u32 = 0xB1B0AFBA;

/// Offset of `checksumAdjustment` within the `head` table.
pub const CHECKSUM_ADJUSTMENT_OFFSET: usize = 8;

const CHUNK_SIZE: usize = 64 * 1024;

/// Sum of `data` read as big-endian u32 words, zero padded to a multiple of 4.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut checksum: u32 = 0;
    let mut iter = data.chunks_exact(4);
    for chunk in &mut iter {
        checksum = checksum.wrapping_add(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    // The zero padding only matters in that it lets the trailing bytes count.
    match *iter.remainder() {
        [a, b, c] => checksum.wrapping_add(u32::from_be_bytes([a, b, c, 0])),
        [a, b] => checksum.wrapping_add(u32::from_be_bytes([a, b, 0, 0])),
        [a] => checksum.wrapping_add(u32::from_be_bytes([a, 0, 0, 0])),
        _ => checksum,
    }
}

/// Read the `checksumAdjustment` field from `head` table data, if present.
pub fn checksum_adjustment(head: &[u8]) -> Option<u32> {
    let bytes = head.get(CHECKSUM_ADJUSTMENT_OFFSET..CHECKSUM_ADJUSTMENT_OFFSET + 4)?;
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}

/// Checksum of a table's data as recorded in the table directory.
///
/// For `head` the `checksumAdjustment` field counts as zero. The field sits on
/// a word boundary, so subtracting it is the same as zeroing it.
pub fn table_checksum(tag: Tag, data: &[u8]) -> u32 {
    let checksum = compute_checksum(data);
    if tag != HEAD {
        return checksum;
    }
    match checksum_adjustment(data) {
        Some(adjustment) => checksum.wrapping_sub(adjustment),
        // A truncated field still contributes through the zero padding
        None => match data.get(CHECKSUM_ADJUSTMENT_OFFSET..) {
            Some(partial) => checksum.wrapping_sub(compute_checksum(partial)),
            None => checksum,
        },
    }
}

/// Checksum of a whole source, streamed in chunks.
///
/// Bytes in `zeroed` (absolute offsets) are treated as zero, which is how the
/// whole-file sum excludes `head.checksumAdjustment`.
pub fn source_checksum<S: ReadAt + ?Sized>(
    source: &S,
    zeroed: Option<std::ops::Range<u64>>,
) -> Result<u32> {
    let mut buf = vec![0; CHUNK_SIZE];
    let mut checksum: u32 = 0;
    let mut offset: u64 = 0;
    let len = source.len();
    while offset < len {
        let n = (len - offset).min(CHUNK_SIZE as u64) as usize;
        let chunk = &mut buf[..n];
        source.read_exact_at(chunk, offset)?;
        if let Some(range) = &zeroed {
            for (i, byte) in chunk.iter_mut().enumerate() {
                if range.contains(&(offset + i as u64)) {
                    *byte = 0;
                }
            }
        }
        // CHUNK_SIZE is a multiple of 4, so only the last chunk can be ragged
        checksum = checksum.wrapping_add(compute_checksum(chunk));
        offset += n as u64;
    }
    Ok(checksum)
}
