//! The canonical in-memory font: an sfnt table directory over a byte source

use std::cell::OnceCell;
use std::collections::HashSet;
use std::fmt;

use bytes::{Buf, Bytes};
use font_types::Tag;

use crate::checksum::{
    CHECKSUM_ADJUSTMENT_OFFSET, CHECKSUM_MAGIC, source_checksum, table_checksum,
};
use crate::eot::EotContainer;
use crate::error::{Error, Result, bail_if};
use crate::sniff::ContainerFormat;
use crate::source::ReadAt;
use crate::table_tags::{HEAD, is_sfnt_version};
use crate::write::search_fields;

pub const SFNT_HEADER_SIZE: usize = 12;
pub const SFNT_ENTRY_SIZE: usize = 16;

/// One entry of the table directory.
///
/// The table's bytes are not read until first requested through
/// [`Font::read_table`], after which they are cached on the record.
pub struct TableRecord {
    tag: Tag,
    checksum: u32,
    offset: u32,
    length: u32,
    data: OnceCell<Bytes>,
}

impl TableRecord {
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Checksum as stored in the directory.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Offset of the table within the sfnt stream.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    fn parse(input: &mut impl Buf) -> Result<Self> {
        Ok(Self {
            tag: Tag::from_u32(input.try_get_u32()?),
            checksum: input.try_get_u32()?,
            offset: input.try_get_u32()?,
            length: input.try_get_u32()?,
            data: OnceCell::new(),
        })
    }
}

impl fmt::Debug for TableRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableRecord")
            .field("tag", &self.tag)
            .field("checksum", &format_args!("0x{:08X}", self.checksum))
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("loaded", &self.data.get().is_some())
            .finish()
    }
}

/// A parsed font, regardless of the container it arrived in.
///
/// The table directory is held in on-disk order. Table data is read lazily
/// from the byte source the font was parsed from; the source is borrowed for
/// `'a` (or owned, when a decoder had to materialize the sfnt in memory).
pub struct Font<'a> {
    sfnt_version: Tag,
    tables: Vec<TableRecord>,
    source: Box<dyn ReadAt + 'a>,
    container: ContainerFormat,
    eot: Option<EotContainer>,
}

impl<'a> Font<'a> {
    /// Parse the sfnt header and table directory at the start of `source`.
    pub(crate) fn parse_directory(
        source: Box<dyn ReadAt + 'a>,
        container: ContainerFormat,
    ) -> Result<Self> {
        let source_len = source.len();

        let mut header = [0u8; SFNT_HEADER_SIZE];
        source
            .read_exact_at(&mut header, 0)
            .map_err(|e| truncated(e, "sfnt header"))?;
        let mut input = &header[..];
        let sfnt_version = Tag::from_u32(input.try_get_u32()?);
        let num_tables = input.try_get_u16()?;
        let search_range = input.try_get_u16()?;
        let entry_selector = input.try_get_u16()?;
        let range_shift = input.try_get_u16()?;

        bail_if!(
            !is_sfnt_version(sfnt_version),
            Error::directory(format!("unknown sfnt version {sfnt_version}"))
        );
        bail_if!(num_tables == 0, Error::directory("font has no tables"));
        if (search_range, entry_selector, range_shift) != search_fields(num_tables) {
            log::debug!(
                "sfnt: search fields ({search_range}, {entry_selector}, {range_shift}) do not match {num_tables} tables"
            );
        }

        let mut directory = vec![0u8; num_tables as usize * SFNT_ENTRY_SIZE];
        source
            .read_exact_at(&mut directory, SFNT_HEADER_SIZE as u64)
            .map_err(|e| truncated(e, "table directory"))?;

        let mut input = &directory[..];
        let mut tables = Vec::with_capacity(num_tables as usize);
        let mut seen = HashSet::with_capacity(num_tables as usize);
        for _ in 0..num_tables {
            let record = TableRecord::parse(&mut input)?;
            bail_if!(
                !seen.insert(record.tag),
                Error::directory(format!("duplicate '{}' table", record.tag))
            );
            let end = record.offset as u64 + record.length as u64;
            bail_if!(
                end > source_len,
                Error::directory(format!(
                    "'{}' table ({} bytes at {}) extends past the end of the data ({source_len} bytes)",
                    record.tag, record.length, record.offset
                ))
            );
            log::trace!("{record:?}");
            tables.push(record);
        }
        log::debug!("sfnt {sfnt_version}: {num_tables} tables");

        Ok(Self {
            sfnt_version,
            tables,
            source,
            container,
            eot: None,
        })
    }

    pub(crate) fn with_eot(mut self, eot: EotContainer) -> Self {
        self.eot = Some(eot);
        self
    }

    /// `0x00010000` for TrueType outlines, `OTTO` for CFF.
    pub fn sfnt_version(&self) -> Tag {
        self.sfnt_version
    }

    /// The container the font was decoded from.
    pub fn container_format(&self) -> ContainerFormat {
        self.container
    }

    /// The EOT headers, when the font came from an EOT file.
    pub fn eot(&self) -> Option<&EotContainer> {
        self.eot.as_ref()
    }

    /// Table records in the order they appear in the directory.
    pub fn tables(&self) -> &[TableRecord] {
        &self.tables
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn table(&self, tag: Tag) -> Option<&TableRecord> {
        self.tables.iter().find(|table| table.tag == tag)
    }

    /// The bytes of the table tagged `tag`, if the font has one.
    pub fn table_data(&self, tag: Tag) -> Result<Option<Bytes>> {
        self.table(tag).map(|record| self.read_table(record)).transpose()
    }

    /// The bytes of `record`, read from the source on first access.
    pub fn read_table(&self, record: &TableRecord) -> Result<Bytes> {
        if let Some(data) = record.data.get() {
            return Ok(data.clone());
        }
        let data = self
            .source
            .read_bytes_at(record.offset as u64, record.length as usize)?;
        let _ = record.data.set(data.clone());
        Ok(data)
    }

    /// Verify every table against the checksum stored in the directory.
    pub fn validate_checksums(&self) -> Result<()> {
        for record in &self.tables {
            let data = self.read_table(record)?;
            let computed = table_checksum(record.tag, &data);
            bail_if!(
                computed != record.checksum,
                Error::ChecksumMismatch {
                    tag: record.tag,
                    stored: record.checksum,
                    computed,
                }
            );
        }
        Ok(())
    }

    /// Verify `head.checksumAdjustment` against the checksum of the whole
    /// sfnt stream. Fonts without a `head` table have nothing to check.
    pub fn validate_file_checksum(&self) -> Result<()> {
        let Some(head) = self.table(HEAD) else {
            return Ok(());
        };
        bail_if!(
            (head.length as usize) < CHECKSUM_ADJUSTMENT_OFFSET + 4,
            Error::directory(format!("'head' table is only {} bytes", head.length))
        );
        let field = head.offset as u64 + CHECKSUM_ADJUSTMENT_OFFSET as u64;
        let mut stored = [0u8; 4];
        self.source.read_exact_at(&mut stored, field)?;
        let stored = u32::from_be_bytes(stored);

        let file_checksum = source_checksum(&self.source, Some(field..field + 4))?;
        let expected = CHECKSUM_MAGIC.wrapping_sub(file_checksum);
        bail_if!(
            stored != expected,
            Error::ChecksumMismatch {
                tag: HEAD,
                stored,
                computed: expected,
            }
        );
        Ok(())
    }
}

impl fmt::Debug for Font<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Font")
            .field("sfnt_version", &self.sfnt_version)
            .field("container", &self.container)
            .field("tables", &self.tables)
            .field("eot", &self.eot)
            .finish_non_exhaustive()
    }
}

fn truncated(error: Error, what: &str) -> Error {
    if error.is_eof() {
        Error::directory(format!("truncated {what}"))
    } else {
        error
    }
}
