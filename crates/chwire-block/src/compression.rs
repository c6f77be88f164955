//! Compressor collaborators for the checksum envelope.

use chwire_error::{ChError, Result};
use serde::{Deserialize, Serialize};

/// Method byte of an uncompressed envelope.
pub const METHOD_NONE: u8 = 0x02;
/// Method byte of an LZ4 block-format envelope.
pub const METHOD_LZ4: u8 = 0x82;
/// Method byte of a ZSTD envelope.
pub const METHOD_ZSTD: u8 = 0x90;

/// Default ZSTD level used by the server.
pub const DEFAULT_ZSTD_LEVEL: i32 = 1;

/// Envelope compression method, selected per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    None,
    #[default]
    Lz4,
    Zstd,
}

impl CompressionMethod {
    #[must_use]
    pub const fn method_byte(self) -> u8 {
        match self {
            Self::None => METHOD_NONE,
            Self::Lz4 => METHOD_LZ4,
            Self::Zstd => METHOD_ZSTD,
        }
    }

    pub fn from_method_byte(byte: u8) -> Result<Self> {
        match byte {
            METHOD_NONE => Ok(Self::None),
            METHOD_LZ4 => Ok(Self::Lz4),
            METHOD_ZSTD => Ok(Self::Zstd),
            other => Err(ChError::corrupt(format!(
                "unknown compression method byte {other:#04x}"
            ))),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// Compressor implementing this method.
    #[must_use]
    pub fn compressor(self) -> Box<dyn Compressor> {
        match self {
            Self::None => Box::new(NoCompression),
            Self::Lz4 => Box::new(Lz4Compressor),
            Self::Zstd => Box::new(ZstdCompressor::default()),
        }
    }
}

/// Byte-block compressor.
///
/// `decompress` must return exactly `expected_len` bytes or fail.
pub trait Compressor: Send + Sync {
    fn method(&self) -> CompressionMethod;

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>>;
}

fn compression_error(method: CompressionMethod, detail: impl ToString) -> ChError {
    ChError::Compression {
        method: method.name().to_owned(),
        detail: detail.to_string(),
    }
}

fn check_len(method: CompressionMethod, output: Vec<u8>, expected_len: usize) -> Result<Vec<u8>> {
    if output.len() == expected_len {
        Ok(output)
    } else {
        Err(compression_error(
            method,
            format!(
                "decompressed {} bytes, envelope declares {expected_len}",
                output.len()
            ),
        ))
    }
}

/// Pass-through for method `0x02`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::None
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        check_len(self.method(), input.to_vec(), expected_len)
    }
}

/// LZ4 block format without a size prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::Lz4
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::block::compress(input))
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let output = lz4_flex::block::decompress(input, expected_len)
            .map_err(|e| compression_error(self.method(), e))?;
        check_len(self.method(), output, expected_len)
    }
}

/// ZSTD frames via the bulk API.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    pub level: i32,
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self {
            level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

impl Compressor for ZstdCompressor {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::Zstd
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        zstd::bulk::compress(input, self.level).map_err(|e| compression_error(self.method(), e))
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let output = zstd::bulk::decompress(input, expected_len)
            .map_err(|e| compression_error(self.method(), e))?;
        check_len(self.method(), output, expected_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Vec<u8> {
        b"abcabcabc-column-data-"
            .iter()
            .cycle()
            .take(10_000)
            .copied()
            .collect()
    }

    #[test]
    fn every_method_roundtrips() {
        let data = payload();
        for method in [CompressionMethod::None, CompressionMethod::Lz4, CompressionMethod::Zstd] {
            let compressor = method.compressor();
            assert_eq!(compressor.method(), method);
            let packed = compressor.compress(&data).expect("compress");
            if method != CompressionMethod::None {
                assert!(packed.len() < data.len(), "{method:?} did not shrink input");
            }
            let unpacked = compressor.decompress(&packed, data.len()).expect("decompress");
            assert_eq!(unpacked, data);
        }
    }

    #[test]
    fn wrong_expected_length_is_rejected() {
        let data = payload();
        for method in [CompressionMethod::None, CompressionMethod::Lz4, CompressionMethod::Zstd] {
            let compressor = method.compressor();
            let packed = compressor.compress(&data).expect("compress");
            let err = compressor.decompress(&packed, data.len() + 1).unwrap_err();
            assert!(err.is_fatal_to_connection(), "{method:?}: {err}");
        }
    }

    #[test]
    fn method_bytes() {
        for method in [CompressionMethod::None, CompressionMethod::Lz4, CompressionMethod::Zstd] {
            assert_eq!(
                CompressionMethod::from_method_byte(method.method_byte()).expect("known"),
                method
            );
        }
        assert!(CompressionMethod::from_method_byte(0x00).is_err());
    }
}
