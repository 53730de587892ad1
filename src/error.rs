use std::borrow::Cow;

use font_types::Tag;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error returned by pluggable decompressors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while decoding or re-encoding a font container.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying reader or writer failed.
    #[error("I/O error at offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    /// The source ended before a fixed-size structure was complete.
    #[error("unexpected end of data at offset {offset} (wanted {wanted} more bytes)")]
    UnexpectedEof { offset: u64, wanted: usize },

    /// A read or seek addressed a position outside of a window.
    #[error("offset {offset} is outside of the {limit}-byte range")]
    OutOfRange { offset: u64, limit: u64 },

    /// None of the known container formats matched.
    #[error("unsupported font container format")]
    UnsupportedFormat,

    /// The EOT header carries a version we cannot decode.
    #[error("unsupported EOT version 0x{0:08X}")]
    UnsupportedVersion(u32),

    /// Structural corruption of the sfnt table directory.
    #[error("invalid table directory: {0}")]
    InvalidTableDirectory(Cow<'static, str>),

    /// A table (or, for `head`, the whole file) failed its checksum.
    #[error("checksum mismatch in '{tag}' table: stored 0x{stored:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch { tag: Tag, stored: u32, computed: u32 },

    /// A decompressor rejected its input or produced the wrong amount of data.
    #[error("decompression failed: {0}")]
    DecompressionFailure(Cow<'static, str>),

    /// EOT obfuscation flags we do not know how to undo.
    #[error("unsupported EOT encryption flags 0x{0:08X}")]
    UnsupportedEncryption(u32),

    /// A container header or directory is internally inconsistent.
    #[error("malformed {format} container: {reason}")]
    MalformedContainer {
        format: &'static str,
        reason: Cow<'static, str>,
    },
}

impl From<bytes::TryGetError> for Error {
    fn from(value: bytes::TryGetError) -> Self {
        Error::UnexpectedEof {
            offset: 0,
            wanted: value.requested - value.available,
        }
    }
}

impl Error {
    pub(crate) fn io(offset: u64, source: std::io::Error) -> Self {
        Error::Io { offset, source }
    }

    pub(crate) fn malformed(format: &'static str, reason: impl Into<Cow<'static, str>>) -> Self {
        Error::MalformedContainer {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn directory(reason: impl Into<Cow<'static, str>>) -> Self {
        Error::InvalidTableDirectory(reason.into())
    }

    pub(crate) fn decompression(reason: impl Into<Cow<'static, str>>) -> Self {
        Error::DecompressionFailure(reason.into())
    }

    /// True for errors caused by running off the end of the data.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::UnexpectedEof { .. })
    }
}

pub(crate) fn usize_will_overflow(a: usize, b: usize) -> bool {
    a.checked_add(b).is_none()
}

pub(crate) fn u32_will_overflow(a: u32, b: u32) -> bool {
    a.checked_add(b).is_none()
}

macro_rules! bail {
    ($err: expr) => {
        return Err($err)
    };
}
pub(crate) use bail;

macro_rules! bail_if {
    ($cond: expr, $err: expr) => {
        if $cond {
            return Err($err);
        }
    };
}
pub(crate) use bail_if;

/// Fail with a `MalformedContainer` error for `$format` when `$cond` holds.
macro_rules! bail_malformed_if {
    ($cond: expr, $format: expr, $($msg:tt)*) => {
        if $cond {
            return Err($crate::error::Error::malformed($format, format!($($msg)*)));
        }
    };
}
pub(crate) use bail_malformed_if;
