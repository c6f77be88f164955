//! Checksum envelope around one compressed frame.
//!
//! Layout:
//! ```text
//! Offset  Size  Description
//!   0       8   CityHash128 low word (LE), over bytes 16..end
//!   8       8   CityHash128 high word (LE)
//!  16       1   Compression method byte
//!  17       4   Compressed size (LE), header bytes 16..25 included
//!  21       4   Uncompressed size (LE)
//!  25       n   Compressed payload
//! ```
//!
//! The checksum is verified before the payload reaches a decompressor. A
//! mismatch leaves the stream unusable: nothing in the framing lets a reader
//! find the next envelope boundary with confidence.

use chwire_error::{ChError, Result};
use chwire_types::limits::MAX_DECOMPRESSED_FRAME_SIZE;
use chwire_types::{WireRead, WireWrite, WireWriteExt};
use tracing::{error, trace};

use crate::cityhash::CityHash128;
use crate::compression::{CompressionMethod, Compressor};

/// Size of the checksum prefix.
pub const CHECKSUM_SIZE: usize = 16;
/// Size of the method byte and the two length fields.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Parsed envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub checksum: CityHash128,
    pub method_byte: u8,
    /// Header plus payload, as written on the wire.
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

impl FrameHeader {
    pub fn from_bytes(bytes: &[u8; CHECKSUM_SIZE + FRAME_HEADER_SIZE]) -> Result<Self> {
        let mut checksum = [0u8; CHECKSUM_SIZE];
        checksum.copy_from_slice(&bytes[..CHECKSUM_SIZE]);
        let header = Self {
            checksum: CityHash128::from_le_bytes(checksum),
            method_byte: bytes[16],
            compressed_size: u32_at(bytes, 17),
            uncompressed_size: u32_at(bytes, 21),
        };
        if (header.compressed_size as usize) < FRAME_HEADER_SIZE {
            return Err(ChError::corrupt(format!(
                "envelope compressed size {} is smaller than its header",
                header.compressed_size
            )));
        }
        if header.payload_len() > MAX_DECOMPRESSED_FRAME_SIZE {
            return Err(ChError::corrupt(format!(
                "envelope declares {} compressed bytes, limit is {MAX_DECOMPRESSED_FRAME_SIZE}",
                header.payload_len()
            )));
        }
        if header.uncompressed_size as usize > MAX_DECOMPRESSED_FRAME_SIZE {
            return Err(ChError::corrupt(format!(
                "envelope declares {} uncompressed bytes, limit is {MAX_DECOMPRESSED_FRAME_SIZE}",
                header.uncompressed_size
            )));
        }
        Ok(header)
    }

    #[must_use]
    pub const fn payload_len(&self) -> usize {
        self.compressed_size as usize - FRAME_HEADER_SIZE
    }
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

fn frame_size(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| ChError::internal(format!("{what} of {len} bytes exceeds u32")))
}

/// Compress `input` into one envelope appended to `out`.
pub fn write_frame(compressor: &dyn Compressor, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let payload = compressor.compress(input)?;
    let compressed_size = frame_size(payload.len() + FRAME_HEADER_SIZE, "compressed frame")?;
    let uncompressed_size = frame_size(input.len(), "uncompressed frame")?;

    let mut body = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    body.put_u8(compressor.method().method_byte());
    body.put_u32_le(compressed_size);
    body.put_u32_le(uncompressed_size);
    body.put_bytes(&payload);

    let checksum = CityHash128::compute(&body);
    out.put_bytes(&checksum.to_le_bytes());
    out.put_bytes(&body);
    trace!(
        method = compressor.method().name(),
        compressed_len = payload.len(),
        uncompressed_len = input.len(),
        "frame written"
    );
    Ok(())
}

/// Read one envelope, verify its checksum, and return the decompressed bytes.
pub fn read_frame(reader: &mut dyn WireRead) -> Result<Vec<u8>> {
    let mut raw_header = [0u8; CHECKSUM_SIZE + FRAME_HEADER_SIZE];
    reader.read_exact(&mut raw_header)?;
    let header = FrameHeader::from_bytes(&raw_header)?;

    // The declared size is untrusted until the checksum matches.
    let mut body = raw_header[CHECKSUM_SIZE..].to_vec();
    reader.read_append(&mut body, header.payload_len())?;

    let actual = CityHash128::compute(&body);
    if actual != header.checksum {
        error!(
            expected_lo = header.checksum.low,
            expected_hi = header.checksum.high,
            actual_lo = actual.low,
            actual_hi = actual.high,
            compressed_len = header.payload_len(),
            "frame checksum mismatch"
        );
        return Err(ChError::ChecksumMismatch {
            expected_lo: header.checksum.low,
            expected_hi: header.checksum.high,
            actual_lo: actual.low,
            actual_hi: actual.high,
        });
    }

    let method = CompressionMethod::from_method_byte(header.method_byte)?;
    let output = method
        .compressor()
        .decompress(&body[FRAME_HEADER_SIZE..], header.uncompressed_size as usize)?;
    trace!(
        method = method.name(),
        compressed_len = header.payload_len(),
        uncompressed_len = output.len(),
        "frame verified"
    );
    Ok(output)
}
