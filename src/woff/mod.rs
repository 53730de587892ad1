//! WOFF 1.0 and WOFF 2.0 containers
//!
//! Both decoders materialize the wrapped sfnt in memory; the result is then
//! parsed like any other sfnt stream.

use bytes::Buf;
use font_types::Tag;

use crate::error::{Error, Result, bail_malformed_if};
use crate::table_tags::COLLECTION_TAG;

pub(crate) mod glyf_decoder;
pub(crate) mod hmtx_decoder;
mod woff1;
mod woff2;

pub use woff1::{decompress_woff1, decompress_woff1_with};
pub use woff2::{decompress_woff2, decompress_woff2_with};

pub const WOFF1_SIG: Tag = Tag::new(b"wOFF");
pub const WOFF2_SIG: Tag = Tag::new(b"wOF2");

pub(crate) const WOFF1_FORMAT: &str = "WOFF";
pub(crate) const WOFF2_FORMAT: &str = "WOFF2";

pub const WOFF1_HEADER_SIZE: usize = 44;
pub const WOFF2_HEADER_SIZE: usize = 48;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WoffVersion {
    Woff1 = 1,
    Woff2 = 2,
}

impl WoffVersion {
    pub(crate) fn format_name(self) -> &'static str {
        match self {
            WoffVersion::Woff1 => WOFF1_FORMAT,
            WoffVersion::Woff2 => WOFF2_FORMAT,
        }
    }
}

/// WOFF header that can represent either a WOFF1 or WOFF2 header
///
/// <https://www.w3.org/TR/WOFF/#WOFFHeader>
/// <https://www.w3.org/TR/WOFF2/#woff20Header>
#[derive(Clone, Debug)]
pub struct WoffHeader {
    /// Derived from the signature.
    pub woff_version: WoffVersion,
    /// The "sfnt version" of the input font.
    pub flavor: Tag,
    /// Total size of the WOFF file.
    pub length: u32,
    /// Number of entries in directory of font tables.
    pub num_tables: u16,
    pub reserved: u16,
    /// Total size needed for the uncompressed font data, including the sfnt
    /// header, directory, and font tables (including padding).
    pub total_sfnt_size: u32,
    /// (WOFF2 only) Total length of the compressed data block.
    pub total_compressed_size: u32,
    pub major_version: u16,
    pub minor_version: u16,
    /// Offset to metadata block, from beginning of WOFF file.
    pub meta_offset: u32,
    /// Length of compressed metadata block.
    pub meta_length: u32,
    /// Uncompressed size of metadata block.
    pub meta_orig_length: u32,
    /// Offset to private data block, from beginning of WOFF file.
    pub priv_offset: u32,
    pub priv_length: u32,
}

impl WoffHeader {
    /// Parse and validate the header at the start of `input`, which must hold
    /// the whole file.
    pub fn parse(mut input: &[u8]) -> Result<Self> {
        let input_len = input.len() as u64;

        let signature = Tag::from_u32(input.try_get_u32()?);
        let woff_version = match signature {
            WOFF1_SIG => WoffVersion::Woff1,
            WOFF2_SIG => WoffVersion::Woff2,
            _ => return Err(Error::UnsupportedFormat),
        };
        let format = woff_version.format_name();

        let header = Self {
            woff_version,
            flavor: Tag::from_u32(input.try_get_u32()?),
            length: input.try_get_u32()?,
            num_tables: input.try_get_u16()?,
            reserved: input.try_get_u16()?,
            total_sfnt_size: input.try_get_u32()?,
            // totalCompressedSize only exists in WOFF2 headers
            total_compressed_size: match woff_version {
                WoffVersion::Woff1 => 0,
                WoffVersion::Woff2 => input.try_get_u32()?,
            },
            major_version: input.try_get_u16()?,
            minor_version: input.try_get_u16()?,
            meta_offset: input.try_get_u32()?,
            meta_length: input.try_get_u32()?,
            meta_orig_length: input.try_get_u32()?,
            priv_offset: input.try_get_u32()?,
            priv_length: input.try_get_u32()?,
        };

        bail_malformed_if!(
            header.length as u64 != input_len,
            format,
            "header length {} does not match the {input_len}-byte file",
            header.length
        );
        bail_malformed_if!(header.num_tables == 0, format, "no tables");
        bail_malformed_if!(header.reserved != 0, format, "reserved field is {}", header.reserved);
        if header.meta_offset != 0 {
            bail_malformed_if!(
                header.meta_offset as u64 + header.meta_length as u64 > input_len,
                format,
                "metadata block extends past the end of the file"
            );
        }
        if header.priv_offset != 0 {
            bail_malformed_if!(
                header.priv_offset as u64 + header.priv_length as u64 > input_len,
                format,
                "private data block extends past the end of the file"
            );
        }

        log::debug!(
            "{format} {}.{}: flavor {}, {} tables",
            header.major_version,
            header.minor_version,
            header.flavor,
            header.num_tables
        );
        Ok(header)
    }

    pub fn header_size(&self) -> usize {
        match self.woff_version {
            WoffVersion::Woff1 => WOFF1_HEADER_SIZE,
            WoffVersion::Woff2 => WOFF2_HEADER_SIZE,
        }
    }

    pub fn is_collection(&self) -> bool {
        self.flavor == COLLECTION_TAG
    }
}

/// Running out of input inside an in-memory WOFF means the file is truncated.
pub(crate) fn eof_is_malformed(format: &'static str) -> impl Fn(Error) -> Error {
    move |error| {
        if error.is_eof() {
            Error::malformed(format, "unexpected end of data")
        } else {
            error
        }
    }
}
