//! Block framing: native encoding, optional compression, checksum envelopes.

use std::sync::Arc;

use chwire_error::{ChError, Result};
use chwire_types::limits::MAX_COMPRESSED_FRAME_INPUT;
use chwire_types::{SliceReader, TypeRegistry, WireRead};

use crate::block::{Block, BlockDecoder, BlockEncoder};
use crate::compression::{CompressionMethod, Compressor};
use crate::frame::{read_frame, write_frame};

/// Split `data` into envelopes of at most [`MAX_COMPRESSED_FRAME_INPUT`]
/// uncompressed bytes each.
pub fn write_compressed(compressor: &dyn Compressor, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
    if data.is_empty() {
        return write_frame(compressor, data, out);
    }
    for chunk in data.chunks(MAX_COMPRESSED_FRAME_INPUT) {
        write_frame(compressor, chunk, out)?;
    }
    Ok(())
}

/// [`WireRead`] over a sequence of envelopes, pulling the next one from the
/// underlying reader only when the current one is used up.
pub struct CompressedReader<'a> {
    inner: &'a mut dyn WireRead,
    buffer: Vec<u8>,
    pos: usize,
    frames_read: usize,
}

impl<'a> CompressedReader<'a> {
    pub fn new(inner: &'a mut dyn WireRead) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            pos: 0,
            frames_read: 0,
        }
    }

    #[must_use]
    pub const fn frames_read(&self) -> usize {
        self.frames_read
    }

    /// Decompressed bytes not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.pos
    }

    /// Require that a block ended exactly on an envelope boundary.
    pub fn finish(self) -> Result<()> {
        if self.buffered() == 0 {
            Ok(())
        } else {
            Err(ChError::corrupt(format!(
                "{} decompressed bytes left after block",
                self.buffered()
            )))
        }
    }
}

impl WireRead for CompressedReader<'_> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.pos == self.buffer.len() {
                self.buffer = read_frame(&mut *self.inner)?;
                self.pos = 0;
                self.frames_read += 1;
                continue;
            }
            let take = (buf.len() - filled).min(self.buffer.len() - self.pos);
            buf[filled..filled + take].copy_from_slice(&self.buffer[self.pos..self.pos + take]);
            self.pos += take;
            filled += take;
        }
        Ok(())
    }
}

/// Turns blocks into wire bytes and back for one operation.
///
/// Compression is optional per connection; without it blocks travel as
/// plain native encodings.
pub struct BlockFramer {
    compressor: Option<Box<dyn Compressor>>,
    encoder: BlockEncoder,
    decoder: BlockDecoder,
}

impl std::fmt::Debug for BlockFramer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockFramer")
            .field("compression", &self.compression())
            .field("encoder", &self.encoder)
            .field("decoder", &self.decoder)
            .finish()
    }
}

impl BlockFramer {
    #[must_use]
    pub fn new(revision: u64, compression: Option<CompressionMethod>, registry: Arc<TypeRegistry>) -> Self {
        Self::with_compressor(revision, compression.map(CompressionMethod::compressor), registry)
    }

    /// Framer using a caller-supplied compressor.
    #[must_use]
    pub fn with_compressor(
        revision: u64,
        compressor: Option<Box<dyn Compressor>>,
        registry: Arc<TypeRegistry>,
    ) -> Self {
        Self {
            compressor,
            encoder: BlockEncoder::new(revision),
            decoder: BlockDecoder::new(revision, registry),
        }
    }

    #[must_use]
    pub fn compression(&self) -> Option<CompressionMethod> {
        self.compressor.as_ref().map(|c| c.method())
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compressor.is_some()
    }

    /// Encode `block` completely, then wrap it.
    ///
    /// Nothing is returned unless the whole block encoded.
    pub fn frame(&mut self, block: &Block) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        self.encoder.encode(block, &mut raw)?;
        match &self.compressor {
            None => Ok(raw),
            Some(compressor) => {
                let mut out = Vec::with_capacity(raw.len() / 2 + 64);
                write_compressed(compressor.as_ref(), &raw, &mut out)?;
                Ok(out)
            }
        }
    }

    /// Decode one framed block from `envelope`, which must hold exactly one.
    pub fn unframe(&mut self, envelope: &[u8]) -> Result<Block> {
        let mut reader = SliceReader::new(envelope);
        let block = self.read_block(&mut reader)?;
        if !reader.is_empty() {
            return Err(ChError::corrupt(format!(
                "{} bytes trail the framed block",
                reader.remaining().len()
            )));
        }
        Ok(block)
    }

    /// Decode the next block from a byte stream.
    pub fn read_block(&mut self, reader: &mut dyn WireRead) -> Result<Block> {
        if self.compressor.is_none() {
            return self.decoder.decode(reader);
        }
        let mut compressed = CompressedReader::new(reader);
        let block = self.decoder.decode(&mut compressed)?;
        compressed.finish()?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockColumn;
    use chwire_types::limits::DEFAULT_PROTOCOL_REVISION;
    use chwire_types::{ColumnType, Value, parse_type};

    fn framer(compression: Option<CompressionMethod>) -> BlockFramer {
        BlockFramer::new(DEFAULT_PROTOCOL_REVISION, compression, Arc::new(TypeRegistry::new()))
    }

    fn block(rows: usize) -> Block {
        let ty: Arc<ColumnType> = Arc::new(parse_type("String").expect("type"));
        let values = (0..rows).map(|i| Value::from(format!("row-{i:08}"))).collect();
        Block::new(vec![BlockColumn::new("s", ty, values)]).expect("block")
    }

    #[test]
    fn unframe_inverts_frame_for_every_method() {
        for compression in [
            None,
            Some(CompressionMethod::None),
            Some(CompressionMethod::Lz4),
            Some(CompressionMethod::Zstd),
        ] {
            let original = block(100);
            let bytes = framer(compression).frame(&original).expect("frame");
            let decoded = framer(compression).unframe(&bytes).expect("unframe");
            assert_eq!(decoded, original, "{compression:?}");
        }
    }

    #[test]
    fn large_blocks_span_several_envelopes() {
        let original = block(120_000);
        let bytes = framer(Some(CompressionMethod::None)).frame(&original).expect("frame");
        let mut source = SliceReader::new(&bytes);
        let mut reader = CompressedReader::new(&mut source);
        let decoded = BlockDecoder::new(DEFAULT_PROTOCOL_REVISION, Arc::new(TypeRegistry::new()))
            .decode(&mut reader)
            .expect("decode");
        assert!(reader.frames_read() > 1, "{} frames", reader.frames_read());
        reader.finish().expect("aligned");
        assert_eq!(decoded, original);
    }

    #[test]
    fn flipped_checksum_bit_never_yields_values() {
        let mut bytes = framer(Some(CompressionMethod::Lz4)).frame(&block(10)).expect("frame");
        bytes[3] ^= 0x04;
        let err = framer(Some(CompressionMethod::Lz4)).unframe(&bytes).unwrap_err();
        assert!(matches!(err, ChError::ChecksumMismatch { .. }), "{err:?}");
        assert!(err.is_fatal_to_connection());
    }

    #[test]
    fn trailing_bytes_after_block_are_corrupt() {
        let mut bytes = framer(None).frame(&block(3)).expect("frame");
        bytes.push(0);
        assert!(framer(None).unframe(&bytes).is_err());
    }
}
