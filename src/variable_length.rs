//! WOFF2 variable length integers (255UInt16 and UIntBase128) read from a [`Buf`]

use bytes::Buf;

use crate::error::{Error, Result, bail_if};
use crate::woff::WOFF2_FORMAT;

const WORD_CODE: u8 = 253;
const ONE_MORE_BYTE_CODE_2: u8 = 254;
const ONE_MORE_BYTE_CODE_1: u8 = 255;
const LOWEST_U_CODE: u16 = 253;

pub(crate) trait BufVariableExt: Buf {
    /// Read a `255UInt16`
    ///
    /// <https://www.w3.org/TR/WOFF2/#255UInt16>
    fn try_get_variable_255_u16(&mut self) -> Result<u16> {
        let code = self.try_get_u8()?;
        Ok(match code {
            WORD_CODE => self.try_get_u16()?,
            ONE_MORE_BYTE_CODE_1 => self.try_get_u8()? as u16 + LOWEST_U_CODE,
            ONE_MORE_BYTE_CODE_2 => self.try_get_u8()? as u16 + LOWEST_U_CODE * 2,
            _ => code as u16,
        })
    }

    /// Read a `UIntBase128`
    ///
    /// <https://www.w3.org/TR/WOFF2/#DataTypes>
    fn try_get_variable_128_u32(&mut self) -> Result<u32> {
        let mut result: u32 = 0;
        for i in 0..5 {
            let code = self.try_get_u8()?;
            bail_if!(
                i == 0 && code == 0x80,
                Error::malformed(WOFF2_FORMAT, "UIntBase128 with leading zeros")
            );
            // If any of the top seven bits are set then we're about to overflow.
            bail_if!(
                result & 0xFE00_0000 != 0,
                Error::malformed(WOFF2_FORMAT, "UIntBase128 overflows 32 bits")
            );
            result = (result << 7) | (code & 0x7F) as u32;
            if code & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(Error::malformed(WOFF2_FORMAT, "UIntBase128 longer than 5 bytes"))
    }

    /// Like [`Buf::advance`], but fails instead of panicking on short input.
    fn try_advance(&mut self, count: usize) -> Result<()> {
        bail_if!(
            self.remaining() < count,
            Error::UnexpectedEof {
                offset: 0,
                wanted: count - self.remaining(),
            }
        );
        self.advance(count);
        Ok(())
    }

    /// Move `count` bytes from `self` onto the end of `out`.
    fn try_read_bytes_into(&mut self, count: usize, out: &mut Vec<u8>) -> Result<()> {
        bail_if!(
            self.remaining() < count,
            Error::UnexpectedEof {
                offset: 0,
                wanted: count - self.remaining(),
            }
        );
        out.reserve(count);
        let mut rest = count;
        while rest > 0 {
            let chunk = self.chunk();
            let n = chunk.len().min(rest);
            out.extend_from_slice(&chunk[..n]);
            self.advance(n);
            rest -= n;
        }
        Ok(())
    }
}

impl<B: Buf> BufVariableExt for B {}

#[cfg(test)]
pub(crate) fn write_255_u16(value: u16, out: &mut Vec<u8>) {
    if value < 253 {
        out.push(value as u8);
    } else if value < 506 {
        out.push(ONE_MORE_BYTE_CODE_1);
        out.push((value - 253) as u8);
    } else if value < 762 {
        out.push(ONE_MORE_BYTE_CODE_2);
        out.push((value - 506) as u8);
    } else {
        out.push(WORD_CODE);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

#[cfg(test)]
pub(crate) fn write_base128(value: u32, out: &mut Vec<u8>) {
    let mut size = 1;
    while size < 5 && value >> (7 * size) != 0 {
        size += 1;
    }
    for i in 0..size {
        let mut byte = ((value >> (7 * (size - i - 1))) & 0x7F) as u8;
        if i < size - 1 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}
