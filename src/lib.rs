//! Pure-rust decoding of font containers
//!
//! `fontwrap` recognizes the wrappers font programs are shipped in (a bare
//! sfnt, WOFF, WOFF2 or Embedded OpenType), strips them, and exposes the sfnt
//! inside as a [`Font`]: a table directory whose table bytes are read lazily
//! from the underlying source. A `Font` can be written back out as a canonical
//! sfnt with [`Font::write_otf`].
//!
//! ```no_run
//! # fn main() -> fontwrap::Result<()> {
//! let file = std::fs::File::open("font.woff2").map_err(|e| fontwrap::Error::Io { offset: 0, source: e })?;
//! let source = fontwrap::ReaderSource::new(file)?;
//! let font = fontwrap::strict_parse(&source)?;
//! for table in font.tables() {
//!     println!("{} ({} bytes)", table.tag(), table.length());
//! }
//! # Ok(())
//! # }
//! ```

// Round a value up to the nearest multiple of 4. Don't round the value in the
// case that rounding up overflows.
//
// Implemented as a macro to make it generic over the type without horrible type bounds
macro_rules! Round4 {
    ($value:expr) => {
        match $value.checked_add(3) {
            Some(value_plus_3) => value_plus_3 & !3,
            None => $value,
        }
    };
}

mod checksum;
mod decompress;
pub mod eot;
mod error;
mod font;
mod sniff;
pub mod source;
pub mod table_tags;
mod variable_length;
pub mod woff;
mod write;

#[cfg(test)]
mod test_fonts;

use bytes::Bytes;

pub use checksum::{CHECKSUM_MAGIC, compute_checksum, table_checksum};
pub use decompress::{DecompressFn, Decoders};
pub use error::{BoxError, Error, Result};
pub use font::{Font, TableRecord};
pub use sniff::{ContainerFormat, sniff};
pub use source::{ByteSource, MemorySource, ReadAt, ReaderSource, Window, XorView};
pub use woff::{decompress_woff1, decompress_woff1_with, decompress_woff2, decompress_woff2_with};
pub use write::write_otf;

use crate::source::read_all;

/// How table checksums are treated while parsing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChecksumPolicy {
    /// Checksums are not verified and no table data is read.
    #[default]
    Lenient,
    /// Every table checksum is verified. For a bare sfnt or an uncompressed
    /// EOT payload the whole-file checksum (`head.checksumAdjustment`) is
    /// verified as well.
    Strict,
}

/// Options for [`parse_with`].
#[derive(Debug, Default)]
pub struct ParseOptions {
    pub checksums: ChecksumPolicy,
    pub decoders: Decoders,
}

impl ParseOptions {
    pub fn strict() -> Self {
        Self {
            checksums: ChecksumPolicy::Strict,
            ..Self::default()
        }
    }

    pub fn with_decoders(mut self, decoders: Decoders) -> Self {
        self.decoders = decoders;
        self
    }
}

/// Parse a font in any supported container without verifying checksums.
pub fn parse<'a, S: ReadAt + ?Sized>(source: &'a S) -> Result<Font<'a>> {
    parse_with(source, &ParseOptions::default())
}

/// Parse a font in any supported container and verify its checksums.
pub fn strict_parse<'a, S: ReadAt + ?Sized>(source: &'a S) -> Result<Font<'a>> {
    parse_with(source, &ParseOptions::strict())
}

/// Parse a font in any supported container.
///
/// A bare sfnt or an uncompressed EOT payload is read in place from `source`,
/// table by table. WOFF, WOFF2 and MTX compressed EOT payloads are decoded into
/// memory first.
pub fn parse_with<'a, S: ReadAt + ?Sized>(source: &'a S, options: &ParseOptions) -> Result<Font<'a>> {
    let format = sniff(source)?;
    log::debug!("sniffed {format} container ({} bytes)", source.len());

    let font = match format {
        ContainerFormat::Sfnt => Font::parse_directory(Box::new(source), format)?,
        ContainerFormat::Eot => {
            let (container, sfnt) = eot::decode(source, &options.decoders)?;
            Font::parse_directory(sfnt, format)?.with_eot(container)
        }
        ContainerFormat::Woff => {
            let sfnt = decompress_woff1_with(&read_all(source)?, &options.decoders)?;
            Font::parse_directory(Box::new(Bytes::from(sfnt)), format)?
        }
        ContainerFormat::Woff2 => {
            let sfnt = decompress_woff2_with(&read_all(source)?, &options.decoders)?;
            Font::parse_directory(Box::new(Bytes::from(sfnt)), format)?
        }
        ContainerFormat::Unrecognized => return Err(Error::UnsupportedFormat),
    };

    if options.checksums == ChecksumPolicy::Strict {
        font.validate_checksums()?;
        if holds_original_sfnt(&font) {
            font.validate_file_checksum()?;
        }
    }
    Ok(font)
}

/// Whether the sfnt stream behind `font` is byte for byte the one its producer
/// wrote, so that `head.checksumAdjustment` still describes it.
///
/// WOFF decoders lay the tables out afresh and MTX rebuilds the font, so the
/// stored adjustment describes a different byte stream.
fn holds_original_sfnt(font: &Font<'_>) -> bool {
    match font.container_format() {
        ContainerFormat::Sfnt => true,
        ContainerFormat::Eot => font
            .eot()
            .is_some_and(|eot| !eot.header.flags.is_compressed()),
        ContainerFormat::Woff | ContainerFormat::Woff2 | ContainerFormat::Unrecognized => false,
    }
}

#[cfg(test)]
mod tests {
    use font_types::Tag;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::eot::EotFlags;
    use crate::test_fonts::{
        EotBuilder, Woff1Builder, Woff2Builder, brotli_decoders, simple_otf, simple_ttf,
    };

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn table_bytes(font: &Font<'_>) -> Vec<(Tag, Vec<u8>)> {
        let mut tables: Vec<_> = font
            .tables()
            .iter()
            .map(|t| (t.tag(), font.read_table(t).unwrap().to_vec()))
            .collect();
        tables.sort_by_key(|(tag, _)| *tag);
        tables
    }

    #[test]
    fn every_container_yields_the_same_tables() {
        init_logging();
        let ttf = simple_ttf();
        let expected = table_bytes(&strict_parse(ttf.as_slice()).unwrap());

        let woff1 = Woff1Builder::new(&ttf).compress(false).build();
        let eot = EotBuilder::new(ttf.clone()).build();
        let xor_eot = EotBuilder::new(ttf.clone())
            .flags(EotFlags::XOR_ENCRYPT_DATA)
            .build();
        for (data, format) in [
            (woff1, ContainerFormat::Woff),
            (eot, ContainerFormat::Eot),
            (xor_eot, ContainerFormat::Eot),
        ] {
            let font = strict_parse(data.as_slice()).unwrap();
            assert_eq!(font.container_format(), format);
            assert_eq!(table_bytes(&font), expected);
        }
    }

    #[test]
    fn woff2_goes_through_configured_brotli() {
        let ttf = simple_ttf();
        let woff2 = Woff2Builder::from_sfnt(&ttf).build();
        let options = ParseOptions::strict().with_decoders(brotli_decoders());
        let font = parse_with(woff2.as_slice(), &options).unwrap();
        assert_eq!(font.container_format(), ContainerFormat::Woff2);
        assert_eq!(font.num_tables(), 7);
        let written = strict_parse(font.to_otf().unwrap().as_slice()).map(|f| f.num_tables());
        assert_eq!(written.unwrap(), 7);
    }

    #[test]
    fn lenient_parse_ignores_checksums() {
        let mut ttf = simple_ttf();
        let name_offset = {
            let font = parse(ttf.as_slice()).unwrap();
            font.table(Tag::new(b"name")).unwrap().offset() as usize
        };
        ttf[name_offset + 1] ^= 0x55;

        assert!(parse(ttf.as_slice()).is_ok());
        match strict_parse(ttf.as_slice()) {
            Err(Error::ChecksumMismatch { tag, .. }) => assert_eq!(tag, Tag::new(b"name")),
            other => panic!("expected a checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn strict_eot_checks_the_file_checksum() {
        let mut ttf = simple_ttf();
        let adjustment = {
            let font = parse(ttf.as_slice()).unwrap();
            font.table(Tag::new(b"head")).unwrap().offset() as usize + 8
        };
        ttf[adjustment] ^= 0x01;

        let bare_sfnt = ttf.clone();
        let eot = EotBuilder::new(ttf.clone()).build();
        let xor_eot = EotBuilder::new(ttf.clone())
            .flags(EotFlags::XOR_ENCRYPT_DATA)
            .build();
        for data in [bare_sfnt, eot, xor_eot] {
            assert!(parse(data.as_slice()).is_ok());
            match strict_parse(data.as_slice()) {
                Err(Error::ChecksumMismatch { tag, .. }) => assert_eq!(tag, Tag::new(b"head")),
                other => panic!("expected a head checksum mismatch, got {other:?}"),
            }
        }

        // The MTX decoder's output is not the producer's byte stream.
        let mut reversed = ttf;
        reversed.reverse();
        let compressed = EotBuilder::new(reversed).flags(EotFlags::COMPRESSED).build();
        let options = ParseOptions::strict().with_decoders(
            Decoders::none().with_mtx(|data, _| Ok(data.iter().rev().copied().collect())),
        );
        assert!(parse_with(compressed.as_slice(), &options).is_ok());
    }

    #[test]
    fn eot_headers_are_kept() {
        let eot = EotBuilder::new(simple_otf()).flags(EotFlags::SUBSET).build();
        let font = parse(eot.as_slice()).unwrap();
        let container = font.eot().unwrap();
        assert!(container.header.flags.is_subset());
        assert_eq!(container.dynamic_header.family_name, "Test Sans");
        assert_eq!(font.sfnt_version(), Tag::new(b"OTTO"));
    }

    #[test]
    fn compressed_eot_needs_an_mtx_decoder() {
        let mut reversed = simple_ttf();
        reversed.reverse();
        let eot = EotBuilder::new(reversed).flags(EotFlags::COMPRESSED).build();
        assert!(matches!(
            parse(eot.as_slice()),
            Err(Error::DecompressionFailure(_))
        ));

        let options = ParseOptions::strict().with_decoders(
            Decoders::none().with_mtx(|data, _| Ok(data.iter().rev().copied().collect())),
        );
        let font = parse_with(eot.as_slice(), &options).unwrap();
        assert_eq!(font.num_tables(), 7);
    }

    #[test]
    fn unrecognized_input_is_unsupported() {
        assert!(matches!(
            parse(&b"not a font at all"[..]),
            Err(Error::UnsupportedFormat)
        ));
    }
}
