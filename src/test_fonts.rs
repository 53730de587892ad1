//! Hand-built fonts and containers for unit tests

use std::io::Write as _;

use brotlic::CompressorWriter;
use bytes::BufMut;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use font_types::Tag;

use crate::checksum::{CHECKSUM_ADJUSTMENT_OFFSET, CHECKSUM_MAGIC, compute_checksum, table_checksum};
use crate::decompress::Decoders;
use crate::font::Font;
use crate::sniff::ContainerFormat;
use crate::table_tags::{GLYF, HEAD, KNOWN_TABLE_TAGS, LOCA};
use crate::variable_length::write_base128;
use crate::write::search_fields;

/// Writes an sfnt with the tables in insertion order, duplicates included.
pub(crate) struct SfntBuilder {
    version: [u8; 4],
    tables: Vec<([u8; 4], Vec<u8>)>,
    stored_checksums: bool,
}

impl SfntBuilder {
    pub(crate) fn new(version: [u8; 4]) -> Self {
        Self {
            version,
            tables: Vec::new(),
            stored_checksums: true,
        }
    }

    pub(crate) fn truetype() -> Self {
        Self::new([0, 1, 0, 0])
    }

    pub(crate) fn table(mut self, tag: [u8; 4], data: Vec<u8>) -> Self {
        self.tables.push((tag, data));
        self
    }

    /// With `false`, directory checksums are zero and `head` is left alone.
    pub(crate) fn with_stored_checksums(mut self, stored: bool) -> Self {
        self.stored_checksums = stored;
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let num_tables = self.tables.len() as u16;
        let (search_range, entry_selector, range_shift) = search_fields(num_tables);

        let mut out = Vec::new();
        out.put_slice(&self.version);
        out.put_u16(num_tables);
        out.put_u16(search_range);
        out.put_u16(entry_selector);
        out.put_u16(range_shift);

        let mut offset = 12 + 16 * self.tables.len();
        for (tag, data) in &self.tables {
            let checksum = if self.stored_checksums {
                table_checksum(Tag::new(tag), data)
            } else {
                0
            };
            out.put_slice(tag);
            out.put_u32(checksum);
            out.put_u32(offset as u32);
            out.put_u32(data.len() as u32);
            offset += Round4!(data.len());
        }

        let mut head_offset = None;
        for (tag, data) in &self.tables {
            if Tag::new(tag) == HEAD && data.len() >= 12 {
                head_offset = Some(out.len());
            }
            out.extend_from_slice(data);
            out.resize(Round4!(out.len()), 0);
        }

        if let (Some(head), true) = (head_offset, self.stored_checksums) {
            let field = head + CHECKSUM_ADJUSTMENT_OFFSET..head + CHECKSUM_ADJUSTMENT_OFFSET + 4;
            out[field.clone()].fill(0);
            let adjustment = CHECKSUM_MAGIC.wrapping_sub(compute_checksum(&out));
            out[field].copy_from_slice(&adjustment.to_be_bytes());
        }
        out
    }
}

/// A 54-byte `head` table.
pub(crate) fn head_table(adjustment: u32) -> Vec<u8> {
    let mut head = Vec::with_capacity(54);
    head.put_u32(0x0001_0000); // version
    head.put_u32(0x0001_0000); // fontRevision
    head.put_u32(adjustment);
    head.put_u32(0x5F0F_3CF5); // magicNumber
    head.put_u16(0x000B); // flags
    head.put_u16(1000); // unitsPerEm
    head.put_u64(0); // created
    head.put_u64(0); // modified
    head.put_i16(0);
    head.put_i16(-200);
    head.put_i16(1000);
    head.put_i16(800);
    head.put_u16(0); // macStyle
    head.put_u16(8); // lowestRecPPEM
    head.put_i16(2); // fontDirectionHint
    head.put_i16(0); // indexToLocFormat
    head.put_i16(0); // glyphDataFormat
    head
}

fn name_table() -> Vec<u8> {
    let names = ["Test Sans", "Regular", "Test Sans Regular", "Version 1.0", "TestSans-Regular"];
    let strings: Vec<Vec<u8>> = names
        .iter()
        .map(|name| name.encode_utf16().flat_map(u16::to_be_bytes).collect())
        .collect();

    let mut name = Vec::new();
    name.put_u16(0);
    name.put_u16(names.len() as u16);
    name.put_u16(6 + 12 * names.len() as u16);
    let mut string_offset = 0;
    for (name_id, string) in [1u16, 2, 4, 5, 6].into_iter().zip(&strings) {
        name.put_u16(3); // Windows
        name.put_u16(1); // Unicode BMP
        name.put_u16(0x0409);
        name.put_u16(name_id);
        name.put_u16(string.len() as u16);
        name.put_u16(string_offset);
        string_offset += string.len() as u16;
    }
    for string in strings {
        name.extend_from_slice(&string);
    }
    name
}

fn cmap_table() -> Vec<u8> {
    let mut cmap = Vec::new();
    cmap.put_u16(0);
    cmap.put_u16(1);
    cmap.put_u16(3);
    cmap.put_u16(1);
    cmap.put_u32(12);
    // format 6 trimmed table mapping 0x20..0x60 to glyph 0
    cmap.put_u16(6);
    cmap.put_u16(10 + 2 * 64);
    cmap.put_u16(0);
    cmap.put_u16(0x20);
    cmap.put_u16(64);
    cmap.extend(std::iter::repeat_n(0u8, 2 * 64));
    cmap
}

/// A small TrueType font: `OS/2 cmap head hhea maxp name post`, in that
/// order on disk, with valid checksums and `checksumAdjustment`.
pub(crate) fn simple_ttf() -> Vec<u8> {
    let mut os2 = vec![0u8; 96];
    os2[0..2].copy_from_slice(&4u16.to_be_bytes());
    os2[4..6].copy_from_slice(&400u16.to_be_bytes());
    os2[6..8].copy_from_slice(&5u16.to_be_bytes());

    let mut hhea = vec![0u8; 36];
    hhea[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    hhea[4..6].copy_from_slice(&800i16.to_be_bytes());
    hhea[6..8].copy_from_slice(&(-200i16).to_be_bytes());
    hhea[34..36].copy_from_slice(&1u16.to_be_bytes());

    let mut maxp = vec![0u8; 6];
    maxp[0..4].copy_from_slice(&0x0000_5000u32.to_be_bytes());
    maxp[4..6].copy_from_slice(&1u16.to_be_bytes());

    let mut post = vec![0u8; 32];
    post[0..4].copy_from_slice(&0x0003_0000u32.to_be_bytes());

    SfntBuilder::truetype()
        .table(*b"OS/2", os2)
        .table(*b"cmap", cmap_table())
        .table(*b"head", head_table(0))
        .table(*b"hhea", hhea)
        .table(*b"maxp", maxp)
        .table(*b"name", name_table())
        .table(*b"post", post)
        .build()
}

/// A small CFF-flavoured font.
pub(crate) fn simple_otf() -> Vec<u8> {
    let mut maxp = vec![0u8; 6];
    maxp[0..4].copy_from_slice(&0x0000_5000u32.to_be_bytes());
    maxp[4..6].copy_from_slice(&1u16.to_be_bytes());
    SfntBuilder::new(*b"OTTO")
        .table(*b"CFF ", vec![1, 0, 4, 1, 0, 0, 0, 0, 0])
        .table(*b"head", head_table(0))
        .table(*b"maxp", maxp)
        .table(*b"name", name_table())
        .build()
}

/// Writes an EOT file around `payload`, version 2.2 unless told otherwise.
pub(crate) struct EotBuilder {
    payload: Vec<u8>,
    version: u32,
    flags: u32,
}

impl EotBuilder {
    pub(crate) fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            version: 0x0002_0002,
            flags: 0,
        }
    }

    pub(crate) fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub(crate) fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u32_le(0); // EOTSize, patched below
        out.put_u32_le(self.payload.len() as u32);
        out.put_u32_le(self.version);
        out.put_u32_le(self.flags);
        out.put_slice(&[2, 0, 5, 3, 0, 0, 0, 0, 0, 0]); // panose
        out.put_u8(1); // charset
        out.put_u8(0); // italic
        out.put_u32_le(400);
        out.put_u16_le(0); // fsType
        out.put_u16_le(crate::eot::EOT_MAGIC);
        for range in [1u32, 0, 0, 0, 1, 0] {
            out.put_u32_le(range);
        }
        out.put_u32_le(0); // checksumAdjustment
        out.put_slice(&[0; 16]);

        for name in ["Test Sans", "Regular", "Version 1.0", "Test Sans Regular"] {
            put_padded_utf16(&mut out, name);
        }
        if self.version != 0x0001_0000 {
            put_padded_utf16(&mut out, "https://example.com/");
        }
        if self.version != 0x0001_0000 && self.version != 0x0002_0001 {
            out.put_u32_le(0x1234_5678); // RootStringCheckSum
            out.put_u32_le(1252); // EUDCCodePage
            out.put_u16_le(0);
            out.put_u16_le(3);
            out.put_slice(&[1, 2, 3]);
            out.put_u32_le(0); // EUDCFlags
            out.put_u32_le(5);
            out.put_slice(&[9; 5]);
        }

        if self.flags & crate::eot::EotFlags::XOR_ENCRYPT_DATA != 0 {
            out.extend(self.payload.iter().map(|b| b ^ 0x50));
        } else {
            out.extend_from_slice(&self.payload);
        }
        let len = out.len() as u32;
        out[0..4].copy_from_slice(&len.to_le_bytes());
        out
    }
}

fn put_padded_utf16(out: &mut Vec<u8>, s: &str) {
    let units: Vec<u8> = s.encode_utf16().flat_map(u16::to_le_bytes).collect();
    out.put_u16_le(0);
    out.put_u16_le(units.len() as u16);
    out.extend_from_slice(&units);
}

fn sfnt_tables(sfnt: &[u8]) -> (Tag, Vec<(Tag, Vec<u8>, u32)>) {
    let font = Font::parse_directory(Box::new(sfnt), ContainerFormat::Sfnt).unwrap();
    let tables = font
        .tables()
        .iter()
        .map(|t| (t.tag(), font.read_table(t).unwrap().to_vec(), t.checksum()))
        .collect();
    (font.sfnt_version(), tables)
}

/// Wraps an sfnt in WOFF 1.0, deflating each table that gets smaller.
pub(crate) struct Woff1Builder {
    flavor: Tag,
    /// In the source font's directory order.
    tables: Vec<(Tag, Vec<u8>, u32)>,
    compress: bool,
}

impl Woff1Builder {
    pub(crate) fn new(sfnt: &[u8]) -> Self {
        let (flavor, tables) = sfnt_tables(sfnt);
        Self {
            flavor,
            tables,
            compress: true,
        }
    }

    pub(crate) fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let num_tables = self.tables.len();
        let total_sfnt_size = 12
            + 16 * num_tables
            + self.tables.iter().map(|(_, data, _)| Round4!(data.len())).sum::<usize>();

        struct Entry {
            tag: Tag,
            offset: u32,
            comp_length: u32,
            orig_length: u32,
            checksum: u32,
        }

        let mut data_block = Vec::new();
        let mut entries = Vec::with_capacity(num_tables);
        let data_start = 44 + 20 * num_tables;
        for (tag, data, checksum) in &self.tables {
            let stored = if self.compress {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
                encoder.write_all(data).unwrap();
                let deflated = encoder.finish().unwrap();
                if deflated.len() < data.len() {
                    deflated
                } else {
                    data.clone()
                }
            } else {
                data.clone()
            };
            entries.push(Entry {
                tag: *tag,
                offset: (data_start + data_block.len()) as u32,
                comp_length: stored.len() as u32,
                orig_length: data.len() as u32,
                checksum: *checksum,
            });
            data_block.extend_from_slice(&stored);
            data_block.resize(Round4!(data_block.len()), 0);
        }
        entries.sort_by_key(|e| e.tag);

        let mut out = Vec::new();
        out.put_slice(b"wOFF");
        out.put_slice(&self.flavor.to_be_bytes());
        out.put_u32((data_start + data_block.len()) as u32);
        out.put_u16(num_tables as u16);
        out.put_u16(0);
        out.put_u32(total_sfnt_size as u32);
        out.put_u16(1);
        out.put_u16(0);
        out.put_slice(&[0; 20]); // no metadata or private data
        for entry in &entries {
            out.put_slice(&entry.tag.to_be_bytes());
            out.put_u32(entry.offset);
            out.put_u32(entry.comp_length);
            out.put_u32(entry.orig_length);
            out.put_u32(entry.checksum);
        }
        out.extend_from_slice(&data_block);
        out
    }
}

struct Woff2Entry {
    tag: Tag,
    version: u8,
    orig_length: u32,
    transform_length: Option<u32>,
    data: Vec<u8>,
}

/// Writes a WOFF2 file with a Brotli compressed data block.
pub(crate) struct Woff2Builder {
    flavor: Tag,
    tables: Vec<Woff2Entry>,
    compressed_block: Option<Vec<u8>>,
}

impl Woff2Builder {
    pub(crate) fn new(flavor: [u8; 4]) -> Self {
        Self {
            flavor: Tag::new(&flavor),
            tables: Vec::new(),
            compressed_block: None,
        }
    }

    /// Every table of `sfnt` with the null transform.
    pub(crate) fn from_sfnt(sfnt: &[u8]) -> Self {
        let (flavor, tables) = sfnt_tables(sfnt);
        let mut builder = Self::new(flavor.to_be_bytes());
        for (tag, data, _) in tables {
            builder = builder.table(tag.to_be_bytes(), data);
        }
        builder
    }

    pub(crate) fn table(mut self, tag: [u8; 4], data: Vec<u8>) -> Self {
        let tag = Tag::new(&tag);
        self.tables.push(Woff2Entry {
            tag,
            version: if tag == GLYF || tag == LOCA { 3 } else { 0 },
            orig_length: data.len() as u32,
            transform_length: None,
            data,
        });
        self
    }

    pub(crate) fn transformed(
        mut self,
        tag: [u8; 4],
        version: u8,
        orig_length: u32,
        data: Vec<u8>,
    ) -> Self {
        self.tables.push(Woff2Entry {
            tag: Tag::new(&tag),
            version,
            orig_length,
            transform_length: Some(data.len() as u32),
            data,
        });
        self
    }

    /// Use `block` verbatim instead of compressing the table data.
    pub(crate) fn compressed_block(mut self, block: Vec<u8>) -> Self {
        self.compressed_block = Some(block);
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let mut directory = Vec::new();
        let mut block = Vec::new();
        let mut total_sfnt_size = 12 + 16 * self.tables.len();
        for table in &self.tables {
            match KNOWN_TABLE_TAGS.iter().position(|&known| known == table.tag) {
                Some(index) => directory.put_u8(index as u8 | table.version << 6),
                None => {
                    directory.put_u8(63 | table.version << 6);
                    directory.put_slice(&table.tag.to_be_bytes());
                }
            }
            write_base128(table.orig_length, &mut directory);
            if let Some(length) = table.transform_length {
                write_base128(length, &mut directory);
            }
            block.extend_from_slice(&table.data);
            total_sfnt_size += Round4!(table.orig_length as usize);
        }

        let compressed = self.compressed_block.unwrap_or_else(|| brotli_compress(&block));
        let padded_compressed_len = Round4!(compressed.len());
        let length = 48 + directory.len() + padded_compressed_len;

        let mut out = Vec::with_capacity(length);
        out.put_slice(b"wOF2");
        out.put_slice(&self.flavor.to_be_bytes());
        out.put_u32(length as u32);
        out.put_u16(self.tables.len() as u16);
        out.put_u16(0);
        out.put_u32(total_sfnt_size as u32);
        out.put_u32(compressed.len() as u32);
        out.put_u16(1);
        out.put_u16(0);
        out.put_slice(&[0; 20]); // no metadata or private data
        out.extend_from_slice(&directory);
        out.extend_from_slice(&compressed);
        out.resize(length, 0);
        out
    }
}

/// Brotli-compress `data` at the encoder's default quality.
pub(crate) fn brotli_compress(data: &[u8]) -> Vec<u8> {
    let mut compressor = CompressorWriter::new(Vec::new());
    compressor.write_all(data).unwrap();
    compressor.into_inner().unwrap()
}

/// Decoders holding only a Brotli decoder, available with or without the
/// `brotli` feature.
pub(crate) fn brotli_decoders() -> Decoders {
    Decoders::none().with_brotli(|data, size_hint| {
        let mut input = data;
        let mut output = Vec::with_capacity(size_hint);
        brotli_decompressor::BrotliDecompress(&mut input, &mut output)?;
        Ok(output)
    })
}

/// A transformed glyf table holding an empty glyph, a two-point simple glyph
/// and a composite glyph, with the glyf and loca tables it decodes to.
pub(crate) struct TransformedGlyf {
    pub(crate) transformed: Vec<u8>,
    pub(crate) glyf: Vec<u8>,
    pub(crate) loca: Vec<u8>,
    pub(crate) x_mins: Vec<i16>,
}

pub(crate) fn transformed_glyf() -> TransformedGlyf {
    let n_contour = [0x00, 0x00, 0x00, 0x01, 0xFF, 0xFF];
    let n_points = [0x03];
    let flags = [0x0B, 0x01, 0x0B];
    let glyph = [0x03, 0x0A, 0x0A, 0x00];
    let composite = [0x00, 0x00, 0x00, 0x01, 0x05, 0x05];
    let bbox = [
        0x20, 0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x05, 0x00, 0x0F, 0x00, 0x0F,
    ];
    let instructions: [u8; 0] = [];

    let mut transformed = Vec::new();
    transformed.put_u16(0); // version
    transformed.put_u16(0); // optionFlags
    transformed.put_u16(3); // numGlyphs
    transformed.put_u16(0); // indexFormat
    let streams: [&[u8]; 7] = [
        &n_contour,
        &n_points,
        &flags,
        &glyph,
        &composite,
        &bbox,
        &instructions,
    ];
    for stream in streams {
        transformed.put_u32(stream.len() as u32);
    }
    for stream in streams {
        transformed.extend_from_slice(stream);
    }

    let simple = [
        0x00, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00, 0x0D, 0x00, 0x0A, 0x00, 0x02, 0x00, 0x00,
        0x33, 0x35, 0x33, 0x03, 0x0A, 0x0A,
    ];
    let composite_glyph = [
        0xFF, 0xFF, 0x00, 0x05, 0x00, 0x05, 0x00, 0x0F, 0x00, 0x0F, 0x00, 0x00, 0x00, 0x01,
        0x05, 0x05,
    ];
    let mut glyf = simple.to_vec();
    glyf.extend_from_slice(&composite_glyph);

    TransformedGlyf {
        transformed,
        glyf,
        loca: vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x12],
        x_mins: vec![0, 3, 0],
    }
}
