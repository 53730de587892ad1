//! Pluggable decompressors
//!
//! Each container compression scheme is an external primitive with the same
//! shape: compressed bytes and a size hint in, decompressed bytes out. Brotli
//! (WOFF2) and zlib (WOFF1) have built-in defaults behind the `brotli` and `z`
//! features. MicroType Express (compressed EOT) has no default and must be
//! supplied by the caller.

use std::fmt;

use crate::error::{BoxError, Error, Result};

/// Signature of a decompressor: `(compressed_data, size_hint) -> data`.
pub type DecompressFn = dyn Fn(&[u8], usize) -> Result<Vec<u8>, BoxError> + Send + Sync;

#[cfg(feature = "brotli")]
fn decompress_brotli(compressed_data: &[u8], size_hint: usize) -> Result<Vec<u8>, BoxError> {
    use std::io::Write as _;

    use brotli_decompressor::DecompressorWriter;

    let mut output: Vec<u8> = Vec::with_capacity(size_hint);
    let mut decompressor = DecompressorWriter::new(&mut output, 4096);
    decompressor.write_all(compressed_data)?;
    decompressor.close()?;
    drop(decompressor);
    Ok(output)
}

#[cfg(feature = "z")]
fn decompress_z(compressed_data: &[u8], size_hint: usize) -> Result<Vec<u8>, BoxError> {
    use flate2::{Decompress, FlushDecompress, Status};

    let mut output: Vec<u8> = Vec::with_capacity(size_hint);
    let mut decompressor = Decompress::new(true);
    let status =
        decompressor.decompress_vec(compressed_data, &mut output, FlushDecompress::Finish)?;
    if status != Status::StreamEnd {
        return Err("zlib stream is truncated or larger than its declared size".into());
    }
    Ok(output)
}

/// The set of decompressors used while decoding containers.
pub struct Decoders {
    mtx: Option<Box<DecompressFn>>,
    brotli: Option<Box<DecompressFn>>,
    zlib: Option<Box<DecompressFn>>,
}

impl Default for Decoders {
    /// Built-in Brotli and zlib decoders (when their features are enabled), no MTX.
    fn default() -> Self {
        let decoders = Self::none();
        #[cfg(feature = "brotli")]
        let decoders = decoders.with_brotli(decompress_brotli);
        #[cfg(feature = "z")]
        let decoders = decoders.with_zlib(decompress_z);
        decoders
    }
}

impl fmt::Debug for Decoders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoders")
            .field("mtx", &self.mtx.is_some())
            .field("brotli", &self.brotli.is_some())
            .field("zlib", &self.zlib.is_some())
            .finish()
    }
}

impl Decoders {
    /// No decompressors at all; every compressed container fails to decode.
    pub fn none() -> Self {
        Self {
            mtx: None,
            brotli: None,
            zlib: None,
        }
    }

    /// Decoder for MicroType Express compressed EOT payloads.
    pub fn with_mtx(
        mut self,
        f: impl Fn(&[u8], usize) -> Result<Vec<u8>, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.mtx = Some(Box::new(f));
        self
    }

    /// Decoder for the WOFF2 compressed data block.
    pub fn with_brotli(
        mut self,
        f: impl Fn(&[u8], usize) -> Result<Vec<u8>, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.brotli = Some(Box::new(f));
        self
    }

    /// Decoder for individually compressed WOFF1 tables.
    pub fn with_zlib(
        mut self,
        f: impl Fn(&[u8], usize) -> Result<Vec<u8>, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.zlib = Some(Box::new(f));
        self
    }

    pub(crate) fn mtx(&self, data: &[u8], size_hint: usize) -> Result<Vec<u8>> {
        run("MTX", self.mtx.as_deref(), data, size_hint)
    }

    pub(crate) fn brotli(&self, data: &[u8], size_hint: usize) -> Result<Vec<u8>> {
        run("Brotli", self.brotli.as_deref(), data, size_hint)
    }

    pub(crate) fn zlib(&self, data: &[u8], size_hint: usize) -> Result<Vec<u8>> {
        run("zlib", self.zlib.as_deref(), data, size_hint)
    }
}

fn run(
    name: &'static str,
    decoder: Option<&DecompressFn>,
    data: &[u8],
    size_hint: usize,
) -> Result<Vec<u8>> {
    let Some(decoder) = decoder else {
        return Err(Error::decompression(format!("no {name} decoder is configured")));
    };
    log::trace!("{name}: decompressing {} bytes", data.len());
    decoder(data, size_hint).map_err(|e| Error::decompression(format!("{name}: {e}")))
}
