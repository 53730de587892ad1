use std::collections::HashSet;

use bytes::{Buf, Bytes};
use font_types::Tag;

use crate::decompress::Decoders;
use crate::error::{Error, Result, bail_if, bail_malformed_if, usize_will_overflow};
use crate::table_tags::{GLYF, HHEA, HMTX, KNOWN_TABLE_TAGS, LOCA};
use crate::variable_length::BufVariableExt as _;
use crate::woff::glyf_decoder::{GlyfAndLocaData, transform_glyf_table};
use crate::woff::hmtx_decoder::{decode_hmtx_table, generate_hmtx_table, read_num_hmetrics};
use crate::woff::{WOFF2_FORMAT, WOFF2_HEADER_SIZE, WoffHeader, WoffVersion, eof_is_malformed};
use crate::write::write_sfnt;

// Over 14k test fonts the max compression ratio seen to date was ~20.
// >100 suggests you wrote a bad uncompressed size.
const MAX_PLAUSIBLE_COMPRESSION_RATIO: f64 = 100.0;

/// <https://www.w3.org/TR/WOFF2/#table_dir_format>
#[derive(Debug)]
struct Woff2TableDirectoryEntry {
    tag: Tag,
    /// Transformation version (0-3)
    format: u8,
    /// Length of the original table
    orig_length: u32,
    /// Length of the table within the decompressed data block
    woff_length: u32,
    /// Offset of the table within the decompressed data block
    woff_offset: usize,
}

impl Woff2TableDirectoryEntry {
    fn parse(input: &mut impl Buf) -> Result<Self> {
        let flags = input.try_get_u8()?;
        let (known_tag, format) = Self::parse_flags(flags);
        // The tag is only stored explicitly when it is not a known tag
        let tag = match known_tag {
            Some(tag) => tag,
            None => Tag::from_u32(input.try_get_u32()?),
        };
        let orig_length = input.try_get_variable_128_u32()?;
        let woff_length = if is_transformed(tag, format) {
            input.try_get_variable_128_u32()?
        } else {
            orig_length
        };

        bail_malformed_if!(
            tag == LOCA && is_transformed(tag, format) && woff_length != 0,
            WOFF2_FORMAT,
            "transformed loca table has transformLength {woff_length}"
        );

        Ok(Self {
            tag,
            format,
            orig_length,
            woff_length,
            woff_offset: 0,
        })
    }

    /// Split the flags byte into "known tag" (bits 0-5, 63 meaning an
    /// explicit tag follows) and transformation version (bits 6-7).
    fn parse_flags(flags: u8) -> (Option<Tag>, u8) {
        const TAG_MASK: u8 = 0b0011_1111;
        let tag = KNOWN_TABLE_TAGS.get((flags & TAG_MASK) as usize).copied();
        (tag, flags >> 6)
    }

    fn is_transformed(&self) -> bool {
        is_transformed(self.tag, self.format)
    }

    fn data(&self, block: &Bytes) -> Bytes {
        block.slice(self.woff_offset..self.woff_offset + self.woff_length as usize)
    }
}

/// Transformation version 0 is the null transform for every table except
/// glyf and loca, for which version 3 is.
fn is_transformed(tag: Tag, format: u8) -> bool {
    if tag == GLYF || tag == LOCA {
        format == 0
    } else {
        format != 0
    }
}

struct Woff2TableDirectory {
    tables: Vec<Woff2TableDirectoryEntry>,
    /// Size of the table directory (in the WOFF) in bytes
    size: usize,
    /// Total size of the decompressed data block
    uncompressed_size: usize,
}

impl Woff2TableDirectory {
    fn parse(mut input: &[u8], num_tables: usize) -> Result<Self> {
        let initial_remaining = input.remaining();

        // Tables in the decompressed data block are stored directly after each
        // other in directory order, so offsets are running sums of lengths.
        let mut offset_in_woff: usize = 0;
        let mut seen = HashSet::with_capacity(num_tables);
        let mut tables = Vec::with_capacity(num_tables);
        for _ in 0..num_tables {
            let mut table = Woff2TableDirectoryEntry::parse(&mut input)?;
            bail_malformed_if!(
                !seen.insert(table.tag),
                WOFF2_FORMAT,
                "duplicate '{}' table",
                table.tag
            );
            table.woff_offset = offset_in_woff;
            bail_if!(
                usize_will_overflow(offset_in_woff, table.woff_length as usize),
                Error::malformed(WOFF2_FORMAT, "table lengths overflow")
            );
            offset_in_woff += table.woff_length as usize;
            log::trace!("WOFF2 {table:?}");
            tables.push(table);
        }

        Ok(Self {
            tables,
            size: initial_remaining - input.remaining(),
            uncompressed_size: offset_in_woff,
        })
    }

    fn find(&self, tag: Tag) -> Option<&Woff2TableDirectoryEntry> {
        self.tables.iter().find(|table| table.tag == tag)
    }
}

/// Decompress a WOFF2 file using the default Brotli decoder
pub fn decompress_woff2(raw_woff_data: &[u8]) -> Result<Vec<u8>> {
    decompress_woff2_with(raw_woff_data, &Decoders::default())
}

/// Decompress a WOFF2 file into an sfnt stream using the Brotli decoder from `decoders`
///
/// Transformed glyf, loca and hmtx tables are reconstructed, and the result is
/// written as a canonical sfnt with freshly computed checksums.
/// Font collections are not supported.
pub fn decompress_woff2_with(raw_woff_data: &[u8], decoders: &Decoders) -> Result<Vec<u8>> {
    decode(raw_woff_data, decoders).map_err(eof_is_malformed(WOFF2_FORMAT))
}

fn decode(raw_woff_data: &[u8], decoders: &Decoders) -> Result<Vec<u8>> {
    let header = WoffHeader::parse(raw_woff_data)?;
    bail_malformed_if!(
        header.woff_version != WoffVersion::Woff2,
        WOFF2_FORMAT,
        "not a WOFF 2.0 file"
    );
    if header.is_collection() {
        log::debug!("WOFF2: font collections are not supported");
        return Err(Error::UnsupportedFormat);
    }

    let directory = Woff2TableDirectory::parse(
        &raw_woff_data[WOFF2_HEADER_SIZE..],
        header.num_tables as usize,
    )?;

    let compressed_offset = WOFF2_HEADER_SIZE + directory.size;
    let compressed_end = compressed_offset as u64 + header.total_compressed_size as u64;
    bail_malformed_if!(
        compressed_end > raw_woff_data.len() as u64,
        WOFF2_FORMAT,
        "compressed data block extends past the end of the file"
    );
    bail_malformed_if!(
        directory.uncompressed_size == 0,
        WOFF2_FORMAT,
        "all tables are empty"
    );

    let compression_ratio = directory.uncompressed_size as f64 / raw_woff_data.len() as f64;
    bail_malformed_if!(
        compression_ratio > MAX_PLAUSIBLE_COMPRESSION_RATIO,
        WOFF2_FORMAT,
        "implausible compression ratio {compression_ratio:.01}"
    );

    let compressed = &raw_woff_data[compressed_offset..compressed_end as usize];
    let block = decoders.brotli(compressed, directory.uncompressed_size)?;
    if block.len() != directory.uncompressed_size {
        return Err(Error::decompression(format!(
            "data block decompressed to {} bytes, expected {}",
            block.len(),
            directory.uncompressed_size
        )));
    }

    let tables = reconstruct_tables(&directory, Bytes::from(block))?;
    let mut out = Vec::with_capacity(directory.uncompressed_size);
    write_sfnt(header.flavor, tables, &mut out)?;
    Ok(out)
}

/// Undo the table transforms, returning every table of the font
fn reconstruct_tables(directory: &Woff2TableDirectory, block: Bytes) -> Result<Vec<(Tag, Bytes)>> {
    let glyf = directory.find(GLYF);
    let loca = directory.find(LOCA);

    let mut glyf_and_loca: Option<GlyfAndLocaData> = match (glyf, loca) {
        (Some(glyf), Some(loca)) => {
            bail_malformed_if!(
                glyf.is_transformed() != loca.is_transformed(),
                WOFF2_FORMAT,
                "cannot transform just one of glyf/loca"
            );
            if glyf.is_transformed() {
                let decoded = transform_glyf_table(&glyf.data(&block))?;
                // https://www.w3.org/TR/WOFF2/#conform-mustRejectLoca
                let offset_size = if decoded.index_format != 0 { 4 } else { 2 };
                let expected_loca_length = offset_size * (decoded.num_glyphs as u32 + 1);
                bail_malformed_if!(
                    loca.orig_length != expected_loca_length,
                    WOFF2_FORMAT,
                    "loca origLength is {}, expected {expected_loca_length}",
                    loca.orig_length
                );
                Some(decoded)
            } else {
                None
            }
        }
        (Some(_), None) | (None, Some(_)) => {
            return Err(Error::malformed(
                WOFF2_FORMAT,
                "cannot have just one of glyf/loca",
            ));
        }
        (None, None) => None,
    };

    let mut tables = Vec::with_capacity(directory.tables.len());
    for table in &directory.tables {
        let data = if !table.is_transformed() {
            table.data(&block)
        } else if table.format == 0 && (table.tag == GLYF || table.tag == LOCA) {
            let decoded = glyf_and_loca.as_mut().ok_or_else(|| {
                Error::malformed(WOFF2_FORMAT, "transformed glyf/loca without glyph data")
            })?;
            if table.tag == GLYF {
                Bytes::from(std::mem::take(&mut decoded.glyf_table))
            } else {
                Bytes::from(std::mem::take(&mut decoded.loca_table))
            }
        } else if table.tag == HMTX && table.format == 1 {
            let x_mins = glyf_and_loca
                .as_ref()
                .map(|decoded| decoded.x_mins.as_slice())
                .ok_or_else(|| {
                    Error::malformed(WOFF2_FORMAT, "transformed hmtx requires a transformed glyf")
                })?;
            let hhea = directory
                .find(HHEA)
                .ok_or_else(|| Error::malformed(WOFF2_FORMAT, "transformed hmtx without hhea"))?;
            let num_hmetrics = read_num_hmetrics(&hhea.data(&block))?;
            let hmtx = decode_hmtx_table(&table.data(&block), num_hmetrics, x_mins)?;
            Bytes::from(generate_hmtx_table(&hmtx))
        } else {
            return Err(Error::malformed(
                WOFF2_FORMAT,
                format!(
                    "unknown transform version {} for '{}' table",
                    table.format, table.tag
                ),
            ));
        };
        tables.push((table.tag, data));
    }

    Ok(tables)
}
