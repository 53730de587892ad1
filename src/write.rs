//! Canonical sfnt serialization
//!
//! Tables are written in tag order, each padded to a 4-byte boundary, with
//! recomputed checksums and a fresh `head.checksumAdjustment`.

use std::io::Write;

use bytes::{BufMut, Bytes};
use font_types::Tag;

use crate::checksum::{CHECKSUM_ADJUSTMENT_OFFSET, CHECKSUM_MAGIC, compute_checksum, table_checksum};
use crate::error::{Error, Result, bail_if};
use crate::font::{Font, SFNT_ENTRY_SIZE, SFNT_HEADER_SIZE};
use crate::table_tags::HEAD;

/// `(searchRange, entrySelector, rangeShift)` for a directory of `num_tables`.
pub(crate) fn search_fields(num_tables: u16) -> (u16, u16, u16) {
    let mut max_pow2: u16 = 0;
    while 1u32 << (max_pow2 + 1) <= (num_tables as u32) {
        max_pow2 += 1;
    }
    let entry_selector = max_pow2;
    // Both fields saturate once a directory has 4096 or more tables.
    let search_range = (1u32 << max_pow2) << 4;
    let range_shift = ((num_tables as u32) << 4).saturating_sub(search_range);
    (
        u16::try_from(search_range).unwrap_or(u16::MAX),
        entry_selector,
        u16::try_from(range_shift).unwrap_or(u16::MAX),
    )
}

/// Writes an OpenType table directory header
///
/// <https://learn.microsoft.com/en-us/typography/opentype/spec/otff#table-directory>
pub(crate) fn write_table_directory_header(output: &mut impl BufMut, flavor: Tag, num_tables: u16) {
    let (search_range, entry_selector, range_shift) = search_fields(num_tables);
    output.put_slice(&flavor.to_be_bytes()); // sfnt version
    output.put_u16(num_tables);
    output.put_u16(search_range);
    output.put_u16(entry_selector);
    output.put_u16(range_shift);
}

pub(crate) fn write_table_record(
    output: &mut impl BufMut,
    tag: Tag,
    checksum: u32,
    offset: u32,
    length: u32,
) {
    output.put_slice(&tag.to_be_bytes());
    output.put_u32(checksum);
    output.put_u32(offset);
    output.put_u32(length);
}

/// Serialize `tables` as a canonical sfnt stream into `sink`.
///
/// Returns the number of bytes written. Tags must be unique.
pub(crate) fn write_sfnt<W: Write + ?Sized>(
    flavor: Tag,
    mut tables: Vec<(Tag, Bytes)>,
    sink: &mut W,
) -> Result<u64> {
    tables.sort_by_key(|(tag, _)| *tag);
    bail_if!(
        tables.windows(2).any(|pair| pair[0].0 == pair[1].0),
        Error::directory("duplicate table tags")
    );
    let num_tables = u16::try_from(tables.len())
        .map_err(|_| Error::directory(format!("{} tables do not fit a directory", tables.len())))?;

    // Lay out the tables and compute their checksums
    let directory_size = SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * tables.len();
    let mut header: Vec<u8> = Vec::with_capacity(directory_size);
    write_table_directory_header(&mut header, flavor, num_tables);

    let mut offset = directory_size as u64;
    let mut font_checksum: u32 = 0;
    for (tag, data) in &tables {
        bail_if!(
            *tag == HEAD && data.len() < CHECKSUM_ADJUSTMENT_OFFSET + 4,
            Error::directory(format!("'head' table is only {} bytes", data.len()))
        );
        let length = u32::try_from(data.len())
            .map_err(|_| Error::directory(format!("'{tag}' table is too large")))?;
        let table_offset = u32::try_from(offset)
            .map_err(|_| Error::directory("font exceeds the 4GiB sfnt limit"))?;
        let checksum = table_checksum(*tag, data);
        write_table_record(&mut header, *tag, checksum, table_offset, length);
        font_checksum = font_checksum.wrapping_add(checksum);
        offset += Round4!(length as u64);
    }

    // Every table is padded to a whole number of words, so the sum over the
    // file is the header's sum plus each table's.
    font_checksum = font_checksum.wrapping_add(compute_checksum(&header));
    let checksum_adjustment = CHECKSUM_MAGIC.wrapping_sub(font_checksum);

    let mut written: u64 = 0;
    let mut emit = |bytes: &[u8], written: &mut u64| -> Result<()> {
        sink.write_all(bytes).map_err(|e| Error::io(*written, e))?;
        *written += bytes.len() as u64;
        Ok(())
    };

    emit(&header, &mut written)?;
    for (tag, data) in &tables {
        if *tag == HEAD {
            emit(&data[..CHECKSUM_ADJUSTMENT_OFFSET], &mut written)?;
            emit(&checksum_adjustment.to_be_bytes(), &mut written)?;
            emit(&data[CHECKSUM_ADJUSTMENT_OFFSET + 4..], &mut written)?;
        } else {
            emit(data, &mut written)?;
        }
        let padding = Round4!(data.len()) - data.len();
        emit(&[0u8; 3][..padding], &mut written)?;
    }
    log::debug!("wrote sfnt {flavor}: {num_tables} tables, {written} bytes");

    Ok(written)
}

/// Write `font` as a canonical sfnt (the WriteOTF operation).
pub fn write_otf<W: Write + ?Sized>(font: &Font<'_>, sink: &mut W) -> Result<u64> {
    let tables = font
        .tables()
        .iter()
        .map(|record| Ok((record.tag(), font.read_table(record)?)))
        .collect::<Result<Vec<_>>>()?;
    write_sfnt(font.sfnt_version(), tables, sink)
}

impl Font<'_> {
    /// Write this font as a canonical sfnt into `sink`, returning the byte count.
    pub fn write_otf<W: Write + ?Sized>(&self, sink: &mut W) -> Result<u64> {
        write_otf(self, sink)
    }

    /// Serialize this font as a canonical sfnt.
    pub fn to_otf(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_otf(&mut out)?;
        Ok(out)
    }
}
