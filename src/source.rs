//! Byte sources and the views layered on top of them.
//!
//! [`ReadAt`] is the positional capability: read bytes at an absolute offset
//! without any notion of a cursor. [`ByteSource`] adds a sequential cursor
//! (`read` and `seek`). Views ([`Window`], [`XorView`]) wrap another source
//! without copying its bytes, and because they hold their parent by value the
//! parent can be a reference, so a view can never outlive the buffer or
//! reader it was derived from.
//!
//! Concurrency: positional reads through `&self` are only as thread safe as the
//! implementing type. [`ReaderSource`] uses a `RefCell` and is therefore
//! `!Sync`; slices and [`Bytes`] may be shared freely. Sequential reads take
//! `&mut self` and so can never race.

use std::cell::{Cell, RefCell};
use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;

use crate::error::{Error, Result, bail_if};

/// Key used by the EOT `XOREncryptData` obfuscation.
pub const EOT_XOR_KEY: u8 = 0x50;

/// Positional read access to a range of bytes.
pub trait ReadAt {
    /// Total number of bytes addressable through this source.
    fn len(&self) -> u64;

    /// Read up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read, which is smaller than requested only
    /// when the end of the source is reached.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` completely from `offset`, failing with
    /// [`Error::UnexpectedEof`] if the source is too short.
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                return Err(Error::UnexpectedEof {
                    offset: offset + filled as u64,
                    wanted: buf.len() - filled,
                });
            }
            filled += n;
        }
        Ok(())
    }

    /// Read `len` bytes at `offset` into a fresh buffer.
    fn read_bytes_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        let mut buf = vec![0; len];
        self.read_exact_at(&mut buf, offset)?;
        Ok(Bytes::from(buf))
    }
}

/// A [`ReadAt`] source that also has a sequential cursor.
pub trait ByteSource: ReadAt {
    /// Read from the cursor, advancing it by the number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Move the cursor, returning its new absolute position.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    fn position(&mut self) -> Result<u64> {
        self.seek(SeekFrom::Current(0))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let start = self.position()?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::UnexpectedEof {
                    offset: start + filled as u64,
                    wanted: buf.len() - filled,
                });
            }
            filled += n;
        }
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut bytes = [0; N];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }
}

/// Resolve a `SeekFrom` against a cursor and a length.
///
/// Negative results are rejected; positions past `len` are left to the caller.
fn resolve_seek(pos: SeekFrom, current: u64, len: u64) -> Result<u64> {
    let (base, delta) = match pos {
        SeekFrom::Start(offset) => return Ok(offset),
        SeekFrom::End(delta) => (len, delta),
        SeekFrom::Current(delta) => (current, delta),
    };
    base.checked_add_signed(delta).ok_or(Error::OutOfRange {
        offset: base,
        limit: len,
    })
}

impl ReadAt for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let Some(available) = usize::try_from(offset)
            .ok()
            .and_then(|offset| self.get(offset..))
        else {
            return Ok(0);
        };
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }
}

impl ReadAt for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.as_slice().read_at(buf, offset)
    }
}

impl ReadAt for Bytes {
    fn len(&self) -> u64 {
        self.as_ref().len() as u64
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.as_ref().read_at(buf, offset)
    }
}

impl<S: ReadAt + ?Sized> ReadAt for &S {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        (**self).read_at(buf, offset)
    }
}

impl<S: ReadAt + ?Sized> ReadAt for Box<S> {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        (**self).read_at(buf, offset)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        (**self).seek(pos)
    }
}

/// An owned in-memory source with a cursor.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    data: Bytes,
    pos: u64,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl ReadAt for MemorySource {
    fn len(&self) -> u64 {
        self.data.as_ref().len() as u64
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.data.as_ref().read_at(buf, offset)
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.pos = resolve_seek(pos, self.pos, ReadAt::len(self))?;
        Ok(self.pos)
    }
}

/// Adapts any `Read + Seek` (typically a `File`) into a byte source.
///
/// Both the sequential cursor and positional reads share the one underlying
/// reader, so every read seeks it first. The logical cursor lives here, which
/// keeps positional reads from disturbing sequential ones.
#[derive(Debug)]
pub struct ReaderSource<R> {
    inner: RefCell<R>,
    len: u64,
    pos: Cell<u64>,
}

impl<R: Read + Seek> ReaderSource<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0)).map_err(|e| Error::io(0, e))?;
        Ok(Self {
            inner: RefCell::new(inner),
            len,
            pos: Cell::new(0),
        })
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R: Read + Seek> ReadAt for ReaderSource<R> {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.borrow_mut();
        inner
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io(offset, e))?;
        loop {
            match inner.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(offset, e)),
            }
        }
    }
}

impl<R: Read + Seek> ByteSource for ReaderSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_at(buf, self.pos.get())?;
        self.pos.set(self.pos.get() + n as u64);
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let new_pos = resolve_seek(pos, self.pos.get(), self.len)?;
        self.pos.set(new_pos);
        Ok(new_pos)
    }
}

/// A sub-range `[offset, offset + length)` of a parent source.
///
/// All addresses are relative to the start of the window. The window keeps
/// its own cursor and only uses the parent's positional reads.
#[derive(Clone, Debug)]
pub struct Window<S> {
    inner: S,
    offset: u64,
    length: u64,
    pos: u64,
}

impl<S: ReadAt> Window<S> {
    /// Create a window, failing if the range does not fit inside `inner`.
    pub fn new(inner: S, offset: u64, length: u64) -> Result<Self> {
        let limit = inner.len();
        let end = offset.checked_add(length).ok_or(Error::OutOfRange { offset, limit })?;
        bail_if!(
            end > limit,
            Error::OutOfRange {
                offset: end,
                limit
            }
        );
        Ok(Self {
            inner,
            offset,
            length,
            pos: 0,
        })
    }

    /// A window covering the whole of `inner`.
    pub fn whole(inner: S) -> Self {
        let length = inner.len();
        Self {
            inner,
            offset: 0,
            length,
            pos: 0,
        }
    }

    /// Offset of the window within its parent.
    pub fn start(&self) -> u64 {
        self.offset
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: ReadAt> ReadAt for Window<S> {
    fn len(&self) -> u64 {
        self.length
    }

    /// Reading at `offset == len()` is the end of the window and returns
    /// `Ok(0)`, as it does for every other source. Offsets beyond it are
    /// `OutOfRange`.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        bail_if!(
            offset > self.length,
            Error::OutOfRange {
                offset,
                limit: self.length
            }
        );
        let available = (self.length - offset).min(buf.len() as u64) as usize;
        self.inner.read_at(&mut buf[..available], self.offset + offset)
    }
}

impl<S: ReadAt> ByteSource for Window<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let new_pos = resolve_seek(pos, self.pos, self.length)?;
        bail_if!(
            new_pos > self.length,
            Error::OutOfRange {
                offset: new_pos,
                limit: self.length
            }
        );
        self.pos = new_pos;
        Ok(new_pos)
    }
}

/// XORs every byte read through it with a fixed key.
///
/// Applying the same key twice is the identity, and the transform does not
/// depend on position, so seeking passes straight through to the parent.
#[derive(Clone, Debug)]
pub struct XorView<S> {
    inner: S,
    key: u8,
}

impl<S> XorView<S> {
    pub fn new(inner: S, key: u8) -> Self {
        Self { inner, key }
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn apply(&self, buf: &mut [u8]) {
        for byte in buf {
            *byte ^= self.key;
        }
    }
}

impl<S: ReadAt> ReadAt for XorView<S> {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let n = self.inner.read_at(buf, offset)?;
        self.apply(&mut buf[..n]);
        Ok(n)
    }
}

impl<S: ByteSource> ByteSource for XorView<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.inner.read(buf)?;
        self.apply(&mut buf[..n]);
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.inner.seek(pos)
    }
}

/// Read the whole of `source` into memory.
pub(crate) fn read_all<S: ReadAt + ?Sized>(source: &S) -> Result<Vec<u8>> {
    let len = usize::try_from(source.len()).map_err(|_| Error::OutOfRange {
        offset: source.len(),
        limit: usize::MAX as u64,
    })?;
    let mut data = vec![0; len];
    source.read_exact_at(&mut data, 0)?;
    Ok(data)
}
