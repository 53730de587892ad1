use bytes::Buf;
use font_types::Tag;

use crate::decompress::Decoders;
use crate::error::{Error, Result, bail_malformed_if};
use crate::font::{SFNT_ENTRY_SIZE, SFNT_HEADER_SIZE};
use crate::woff::{WOFF1_FORMAT, WoffHeader, WoffVersion, eof_is_malformed};
use crate::write::{write_table_directory_header, write_table_record};

const WOFF1_ENTRY_SIZE: usize = 20;

/// <https://www.w3.org/TR/WOFF/#TableDirectory>
struct TableDirectoryEntry {
    tag: Tag,
    /// Offset of the (possibly compressed) table data from the start of the WOFF.
    woff_offset: u32,
    /// Length of the (possibly compressed) table data.
    woff_length: u32,
    orig_length: u32,
    orig_checksum: u32,
}

impl TableDirectoryEntry {
    fn parse(input: &mut impl Buf) -> Result<Self> {
        Ok(Self {
            tag: Tag::from_u32(input.try_get_u32()?),
            woff_offset: input.try_get_u32()?,
            woff_length: input.try_get_u32()?,
            orig_length: input.try_get_u32()?,
            orig_checksum: input.try_get_u32()?,
        })
    }

    fn data_as_slice<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        let start = self.woff_offset as usize;
        let end = start + self.woff_length as usize;
        data.get(start..end).ok_or_else(|| {
            Error::malformed(
                WOFF1_FORMAT,
                format!("'{}' table extends past the end of the file", self.tag),
            )
        })
    }
}

/// Decompress a WOFF1 file using the default zlib decoder
pub fn decompress_woff1(raw_woff_data: &[u8]) -> Result<Vec<u8>> {
    decompress_woff1_with(raw_woff_data, &Decoders::default())
}

/// Decompress a WOFF1 file into an sfnt stream using the zlib decoder from `decoders`
///
/// The table directory of the output is in tag order, the tables themselves
/// keep the order they had in the WOFF. Table checksums are carried over from
/// the WOFF directory.
pub fn decompress_woff1_with(raw_woff_data: &[u8], decoders: &Decoders) -> Result<Vec<u8>> {
    decode(raw_woff_data, decoders).map_err(eof_is_malformed(WOFF1_FORMAT))
}

fn decode(raw_woff_data: &[u8], decoders: &Decoders) -> Result<Vec<u8>> {
    let header = WoffHeader::parse(raw_woff_data)?;
    bail_malformed_if!(
        header.woff_version != WoffVersion::Woff1,
        WOFF1_FORMAT,
        "not a WOFF 1.0 file"
    );

    let num_tables = header.num_tables as usize;
    let directory_end = header.header_size() + num_tables * WOFF1_ENTRY_SIZE;
    let mut input = raw_woff_data
        .get(header.header_size()..directory_end)
        .ok_or_else(|| Error::malformed(WOFF1_FORMAT, "truncated table directory"))?;

    let mut tables = Vec::with_capacity(num_tables);
    let mut sfnt_size = (SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * num_tables) as u64;
    for _ in 0..num_tables {
        let table = TableDirectoryEntry::parse(&mut input)?;
        bail_malformed_if!(
            table.woff_length > table.orig_length,
            WOFF1_FORMAT,
            "'{}' table has compLength {} > origLength {}",
            table.tag,
            table.woff_length,
            table.orig_length
        );
        bail_malformed_if!(
            (table.woff_offset as usize) < directory_end
                || table.woff_offset as u64 + table.woff_length as u64
                    > raw_woff_data.len() as u64,
            WOFF1_FORMAT,
            "'{}' table ({} bytes at {}) is outside the file",
            table.tag,
            table.woff_length,
            table.woff_offset
        );
        log::trace!(
            "WOFF table '{}': {} -> {} bytes at {}",
            table.tag,
            table.woff_length,
            table.orig_length,
            table.woff_offset
        );
        sfnt_size += Round4!(table.orig_length as u64);
        tables.push(table);
    }
    bail_malformed_if!(
        sfnt_size > u32::MAX as u64,
        WOFF1_FORMAT,
        "decoded font would be {sfnt_size} bytes"
    );

    // Table directory entries are stored in tag order.
    tables.sort_by_key(|t| t.tag);

    let mut out: Vec<u8> = Vec::with_capacity(sfnt_size as usize);
    write_table_directory_header(&mut out, header.flavor, header.num_tables);
    let table_directory_start = out.len();
    out.resize(table_directory_start + num_tables * SFNT_ENTRY_SIZE, 0);

    // Tables themselves are stored in woff_offset order
    let mut tables_by_offset: Vec<(usize, &TableDirectoryEntry)> =
        tables.iter().enumerate().collect();
    tables_by_offset.sort_by_key(|(_, table)| table.woff_offset);

    for (tag_index, table) in tables_by_offset {
        let table_offset = out.len();

        let dir_entry_start = table_directory_start + tag_index * SFNT_ENTRY_SIZE;
        let mut dir_entry_writer = &mut out[dir_entry_start..dir_entry_start + SFNT_ENTRY_SIZE];
        write_table_record(
            &mut dir_entry_writer,
            table.tag,
            table.orig_checksum,
            table_offset as u32,
            table.orig_length,
        );

        let data = table.data_as_slice(raw_woff_data)?;
        if table.woff_length < table.orig_length {
            let decompressed = decoders.zlib(data, table.orig_length as usize)?;
            if decompressed.len() != table.orig_length as usize {
                return Err(Error::decompression(format!(
                    "'{}' table inflated to {} bytes, expected {}",
                    table.tag,
                    decompressed.len(),
                    table.orig_length
                )));
            }
            out.extend_from_slice(&decompressed);
        } else {
            out.extend_from_slice(data);
        }

        out.resize(Round4!(out.len()), 0);
    }

    if out.len() as u64 != header.total_sfnt_size as u64 {
        log::debug!(
            "WOFF: totalSfntSize is {}, decoded {} bytes",
            header.total_sfnt_size,
            out.len()
        );
    }

    Ok(out)
}
