//! Block integrity and framing for the ClickHouse native protocol.
//!
//! - [`cityhash`]: the CityHash v1.0.2 128-bit checksum the server verifies.
//! - [`compression`]: pluggable compressors (none, LZ4, ZSTD).
//! - [`frame`]: the checksum envelope around one compressed frame.
//! - [`block`]: native block layout and per-operation encoder/decoder state.
//! - [`framer`]: [`BlockFramer`], tying the above together.

pub mod block;
pub mod cityhash;
pub mod compression;
pub mod frame;
pub mod framer;

pub use block::{Block, BlockColumn, BlockDecoder, BlockEncoder, BlockInfo};
pub use cityhash::{CityHash128, hash128, hash128_with_seed};
pub use compression::{CompressionMethod, Compressor, Lz4Compressor, NoCompression, ZstdCompressor};
pub use frame::{read_frame, write_frame};
pub use framer::{BlockFramer, CompressedReader, write_compressed};
