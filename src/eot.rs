//! Embedded OpenType containers
//!
//! <https://www.w3.org/Submission/EOT/#FileFormat>
//!
//! An EOT file is a little-endian fixed header, a dynamic header whose shape
//! depends on the version, and then the font payload. The payload may be
//! XOR-obfuscated and/or MicroType Express compressed; once both are undone it
//! is a plain sfnt stream.

use std::io::SeekFrom;
use std::ops::Range;

use bytes::{Buf, Bytes};

use crate::decompress::Decoders;
use crate::error::{Error, Result, bail, bail_if};
use crate::source::{ByteSource, EOT_XOR_KEY, ReadAt, Window, XorView, read_all};

/// `MagicNumber` value identifying an EOT header.
pub const EOT_MAGIC: u16 = 0x504C;

/// Size of the fixed header fields, up to and including `Reserved4`.
///
/// The W3C layout counts `Padding1` as part of the fixed portion (82 bytes);
/// here it is read as the padding word of the family name string.
pub const EOT_HEADER_SIZE: usize = 80;

const FORMAT: &str = "EOT";

/// The `Flags` bitset of an EOT header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EotFlags(u32);

impl EotFlags {
    /// `TTEMBED_SUBSET`: the payload holds a subset of the original font.
    pub const SUBSET: u32 = 0x0000_0001;
    /// `TTEMBED_TTCOMPRESSED`: the payload is MTX compressed.
    pub const COMPRESSED: u32 = 0x0000_0004;
    /// `TTEMBED_XORENCRYPTDATA`: the payload is XORed with 0x50.
    pub const XOR_ENCRYPT_DATA: u32 = 0x1000_0000;

    /// Bits near `XOR_ENCRYPT_DATA` that would denote obfuscation we cannot undo.
    const UNKNOWN_ENCRYPTION: u32 = 0xE000_0000;

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_subset(self) -> bool {
        self.0 & Self::SUBSET != 0
    }

    pub const fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    pub const fn is_xor_encrypted(self) -> bool {
        self.0 & Self::XOR_ENCRYPT_DATA != 0
    }
}

/// The EOT versions with a known dynamic header layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EotVersion {
    V1_0,
    V2_1,
    V2_2,
}

impl EotVersion {
    pub const fn to_u32(self) -> u32 {
        match self {
            EotVersion::V1_0 => 0x0001_0000,
            EotVersion::V2_1 => 0x0002_0001,
            EotVersion::V2_2 => 0x0002_0002,
        }
    }
}

impl TryFrom<u32> for EotVersion {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0x0001_0000 => Ok(EotVersion::V1_0),
            0x0002_0001 => Ok(EotVersion::V2_1),
            0x0002_0002 => Ok(EotVersion::V2_2),
            other => Err(Error::UnsupportedVersion(other)),
        }
    }
}

/// The fixed-size EOT header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EotHeader {
    /// Total size of the EOT file in bytes.
    pub eot_size: u32,
    /// Size of the (possibly compressed) font payload at the end of the file.
    pub font_data_size: u32,
    /// Raw version; selects the dynamic header layout.
    pub version: u32,
    pub flags: EotFlags,
    pub font_panose: [u8; 10],
    pub charset: u8,
    pub italic: u8,
    pub weight: u32,
    pub fs_type: u16,
    /// Must be [`EOT_MAGIC`].
    pub magic_number: u16,
    pub unicode_range: [u32; 4],
    pub code_page_range: [u32; 2],
    /// Copy of `head.checksumAdjustment` from the embedded font.
    pub checksum_adjustment: u32,
    pub reserved: [u32; 4],
}

impl EotHeader {
    /// Parse the fixed header fields from the start of `input`.
    pub fn parse(input: &mut impl Buf) -> Result<Self> {
        let mut header = Self {
            eot_size: input.try_get_u32_le()?,
            font_data_size: input.try_get_u32_le()?,
            version: input.try_get_u32_le()?,
            flags: EotFlags(input.try_get_u32_le()?),
            font_panose: [0; 10],
            charset: 0,
            italic: 0,
            weight: 0,
            fs_type: 0,
            magic_number: 0,
            unicode_range: [0; 4],
            code_page_range: [0; 2],
            checksum_adjustment: 0,
            reserved: [0; 4],
        };
        input.try_copy_to_slice(&mut header.font_panose)?;
        header.charset = input.try_get_u8()?;
        header.italic = input.try_get_u8()?;
        header.weight = input.try_get_u32_le()?;
        header.fs_type = input.try_get_u16_le()?;
        header.magic_number = input.try_get_u16_le()?;
        for range in &mut header.unicode_range {
            *range = input.try_get_u32_le()?;
        }
        for range in &mut header.code_page_range {
            *range = input.try_get_u32_le()?;
        }
        header.checksum_adjustment = input.try_get_u32_le()?;
        for reserved in &mut header.reserved {
            *reserved = input.try_get_u32_le()?;
        }
        Ok(header)
    }

    /// Read the fixed header from the start of `source`.
    ///
    /// Returns `Ok(None)` when the source is too short to hold a header or the
    /// magic number does not match: that just means "not an EOT file".
    pub fn read<S: ReadAt + ?Sized>(source: &S) -> Result<Option<Self>> {
        let mut raw = [0u8; EOT_HEADER_SIZE];
        match source.read_exact_at(&mut raw, 0) {
            Ok(()) => {}
            Err(e) if e.is_eof() => return Ok(None),
            Err(e) => return Err(e),
        }
        let header = Self::parse(&mut &raw[..])?;
        if header.magic_number != EOT_MAGIC {
            log::trace!("EOT magic mismatch: 0x{:04X}", header.magic_number);
            return Ok(None);
        }
        Ok(Some(header))
    }

    /// Byte range of the font payload, derived only from the two size fields.
    pub fn payload_range(&self) -> Result<Range<u64>> {
        let Some(start) = self.eot_size.checked_sub(self.font_data_size) else {
            bail!(Error::malformed(
                FORMAT,
                format!(
                    "FontDataSize {} exceeds EOTSize {}",
                    self.font_data_size, self.eot_size
                ),
            ));
        };
        Ok(start as u64..self.eot_size as u64)
    }
}

/// The variable-length header following [`EotHeader`].
///
/// Fields are appended with each version; the doc comment of each field names
/// the version in which it first appears. Fields from later versions than
/// `version` keep their default (empty/zero) values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EotDynamicHeader {
    pub version: Option<EotVersion>,
    /// 1.0
    pub family_name: String,
    /// 1.0
    pub style_name: String,
    /// 1.0
    pub version_name: String,
    /// 1.0
    pub full_name: String,
    /// 2.1: semicolon separated list of URLs the font may be used on.
    pub root_string: String,
    /// 2.2
    pub root_string_checksum: u32,
    /// 2.2
    pub eudc_code_page: u32,
    /// 2.2
    pub signature: Vec<u8>,
    /// 2.2
    pub eudc_flags: u32,
    /// 2.2: size of the EUDC font data, which is skipped.
    pub eudc_font_size: u32,
}

impl EotDynamicHeader {
    /// Read the dynamic header for `version` from the cursor of `source`.
    pub fn read(source: &mut impl ByteSource, version: EotVersion) -> Result<Self> {
        let mut header = Self {
            version: Some(version),
            family_name: read_padded_utf16(source)?,
            style_name: read_padded_utf16(source)?,
            version_name: read_padded_utf16(source)?,
            full_name: read_padded_utf16(source)?,
            ..Self::default()
        };
        if version == EotVersion::V1_0 {
            return Ok(header);
        }

        header.root_string = read_padded_utf16(source)?;
        if version == EotVersion::V2_1 {
            return Ok(header);
        }

        header.root_string_checksum = source.read_u32_le()?;
        header.eudc_code_page = source.read_u32_le()?;
        header.signature = read_padded_bytes(source)?;
        header.eudc_flags = source.read_u32_le()?;
        header.eudc_font_size = source.read_u32_le()?;
        source.seek(SeekFrom::Current(header.eudc_font_size as i64))?;
        Ok(header)
    }
}

/// Both EOT headers, kept on the decoded [`Font`](crate::Font).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EotContainer {
    pub header: EotHeader,
    pub dynamic_header: EotDynamicHeader,
}

fn read_padded_size(source: &mut impl ByteSource) -> Result<u16> {
    let padding = source.read_u16_le()?;
    if padding != 0 {
        log::warn!("EOT: non-zero padding word 0x{padding:04X}");
    }
    source.read_u16_le()
}

fn read_padded_bytes(source: &mut impl ByteSource) -> Result<Vec<u8>> {
    let size = read_padded_size(source)?;
    let mut bytes = vec![0; size as usize];
    source.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_padded_utf16(source: &mut impl ByteSource) -> Result<String> {
    let size = read_padded_size(source)?;
    bail_if!(
        size % 2 != 0,
        Error::malformed(FORMAT, format!("UTF-16 string has odd byte length {size}"))
    );
    let mut bytes = vec![0; size as usize];
    source.read_exact(&mut bytes)?;
    let units = bytes
        .chunks_exact(2)
        .map(|unit| u16::from_le_bytes([unit[0], unit[1]]));
    Ok(char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect())
}

/// Decode an EOT container, returning its headers and the embedded sfnt.
///
/// The sfnt is a view into `source` unless the payload was compressed, in
/// which case it is the in-memory output of the MTX decoder.
pub(crate) fn decode<'a, S: ReadAt + ?Sized>(
    source: &'a S,
    decoders: &Decoders,
) -> Result<(EotContainer, Box<dyn ReadAt + 'a>)> {
    let Some(header) = EotHeader::read(source)? else {
        bail!(Error::UnsupportedFormat);
    };

    let flags = header.flags;
    bail_if!(
        flags.bits() & EotFlags::UNKNOWN_ENCRYPTION != 0,
        Error::UnsupportedEncryption(flags.bits())
    );
    let version = EotVersion::try_from(header.version)?;
    log::debug!(
        "EOT {version:?}: size {}, font data {}, flags 0x{:08X}",
        header.eot_size,
        header.font_data_size,
        flags.bits()
    );
    if header.eot_size as u64 != source.len() {
        log::warn!(
            "EOT: EOTSize {} does not match file length {}",
            header.eot_size,
            source.len()
        );
    }

    let mut cursor = Window::whole(source);
    cursor.seek(SeekFrom::Start(EOT_HEADER_SIZE as u64))?;
    let dynamic_header = EotDynamicHeader::read(&mut cursor, version)?;
    log::debug!("EOT: embedded font {:?}", dynamic_header.full_name);

    let range = header.payload_range()?;
    let window = Window::new(source, range.start, range.end - range.start).map_err(|e| match e {
        Error::OutOfRange { .. } => Error::malformed(
            FORMAT,
            format!(
                "font data {}..{} extends past the end of the file ({} bytes)",
                range.start,
                range.end,
                source.len()
            ),
        ),
        other => other,
    })?;

    let payload: Box<dyn ReadAt + 'a> = if flags.is_xor_encrypted() {
        Box::new(XorView::new(window, EOT_XOR_KEY))
    } else {
        Box::new(window)
    };

    let sfnt: Box<dyn ReadAt + 'a> = if flags.is_compressed() {
        let compressed = read_all(&payload)?;
        let data = decoders.mtx(&compressed, compressed.len())?;
        log::debug!(
            "EOT: MTX payload {} -> {} bytes",
            compressed.len(),
            data.len()
        );
        Box::new(Bytes::from(data))
    } else {
        payload
    };

    Ok((
        EotContainer {
            header,
            dynamic_header,
        },
        sfnt,
    ))
}
