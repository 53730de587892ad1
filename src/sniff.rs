//! Container format detection

use std::fmt;

use font_types::Tag;

use crate::eot::EotHeader;
use crate::error::Result;
use crate::source::ReadAt;
use crate::table_tags::is_sfnt_version;
use crate::woff::{WOFF1_SIG, WOFF2_SIG};

/// The container wrapped around a font program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerFormat {
    /// A bare sfnt (TrueType, OpenType/CFF, Apple `true`, `typ1`).
    Sfnt,
    Woff,
    Woff2,
    /// Embedded OpenType.
    Eot,
    Unrecognized,
}

impl ContainerFormat {
    pub fn name(self) -> &'static str {
        match self {
            ContainerFormat::Sfnt => "sfnt",
            ContainerFormat::Woff => "WOFF",
            ContainerFormat::Woff2 => "WOFF2",
            ContainerFormat::Eot => "EOT",
            ContainerFormat::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Work out which container `source` holds by looking at its leading bytes.
///
/// The source is only read positionally, so nothing is consumed. Running out
/// of data is a negative answer, not an error; only I/O failures propagate.
pub fn sniff<S: ReadAt + ?Sized>(source: &S) -> Result<ContainerFormat> {
    let mut magic = [0u8; 4];
    let n = source.read_at(&mut magic, 0)?;
    if n == magic.len() {
        let tag = Tag::new(&magic);
        if is_sfnt_version(tag) {
            return Ok(ContainerFormat::Sfnt);
        }
        if tag == WOFF1_SIG {
            return Ok(ContainerFormat::Woff);
        }
        if tag == WOFF2_SIG {
            return Ok(ContainerFormat::Woff2);
        }
    }

    Ok(match EotHeader::read(source)? {
        Some(_) => ContainerFormat::Eot,
        None => ContainerFormat::Unrecognized,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_fonts::{EotBuilder, SfntBuilder, simple_otf, simple_ttf};

    #[test]
    fn sfnt_versions() {
        assert_eq!(sniff(simple_ttf().as_slice()).unwrap(), ContainerFormat::Sfnt);
        assert_eq!(sniff(simple_otf().as_slice()).unwrap(), ContainerFormat::Sfnt);
        let apple = SfntBuilder::new(*b"true").table(*b"head", vec![0; 54]).build();
        assert_eq!(sniff(apple.as_slice()).unwrap(), ContainerFormat::Sfnt);
        assert_eq!(sniff(&b"typ1"[..]).unwrap(), ContainerFormat::Sfnt);
    }

    #[test]
    fn woff_signatures() {
        assert_eq!(sniff(&b"wOFF\0\0\0\0"[..]).unwrap(), ContainerFormat::Woff);
        assert_eq!(sniff(&b"wOF2\0\0\0\0"[..]).unwrap(), ContainerFormat::Woff2);
    }

    #[test]
    fn eot_needs_magic() {
        let eot = EotBuilder::new(simple_ttf()).build();
        assert_eq!(sniff(eot.as_slice()).unwrap(), ContainerFormat::Eot);

        let mut not_eot = eot.clone();
        not_eot[35] = 0;
        assert_eq!(sniff(not_eot.as_slice()).unwrap(), ContainerFormat::Unrecognized);
    }

    #[test]
    fn short_or_unknown_input_is_unrecognized() {
        assert_eq!(sniff(&b""[..]).unwrap(), ContainerFormat::Unrecognized);
        assert_eq!(sniff(&b"OT"[..]).unwrap(), ContainerFormat::Unrecognized);
        assert_eq!(sniff(&b"ttcf\0\x01\0\0"[..]).unwrap(), ContainerFormat::Unrecognized);
        assert_eq!(sniff(&[0xAB; 200][..]).unwrap(), ContainerFormat::Unrecognized);
    }
}
