//! Public API facade for chwire.
//!
//! A column engine for the ClickHouse native protocol:
//!
//! - type descriptors parsed from server type text ([`parse_type`],
//!   [`TypeRegistry`]),
//! - byte-exact column codecs ([`ColumnCodec`]),
//! - CityHash128-checksummed, optionally compressed block framing
//!   ([`BlockFramer`]),
//! - a streaming, transactional insert writer ([`ColumnWriter`]),
//! - a reader for multiplexed query results ([`BlockReader`]).
//!
//! ```
//! use chwire::{ColumnWriter, Cx, MemoryTransport, ProtocolSettings, TypeRegistry, Value, WriterOptions};
//!
//! let cx = Cx::new();
//! let transport = MemoryTransport::new();
//! let registry = TypeRegistry::new();
//! let mut writer = ColumnWriter::open_with_types(
//!     transport.clone(),
//!     &cx,
//!     ProtocolSettings::default(),
//!     &registry,
//!     &[("id", "UInt32"), ("tag", "LowCardinality(String)")],
//!     WriterOptions::default(),
//! )?;
//! writer.write_row(vec![Value::UInt32(1), Value::from("a")])?;
//! writer.close()?;
//! assert!(!transport.committed().is_empty());
//! # Ok::<(), chwire::ChError>(())
//! ```

pub use chwire_block::{
    Block, BlockColumn, BlockFramer, CityHash128, CompressionMethod, Compressor, hash128,
    hash128_with_seed,
};
pub use chwire_codec::ColumnCodec;
pub use chwire_core::{
    BlockReader, ColumnConverter, ColumnSource, ColumnWriter, EnumAsString, FnConverter,
    IterSource, NullAsDefault, ProtocolSettings, QueryProgress, ReaderOptions, ReaderState,
    SliceSource, StreamSource, TransactionMode, TryIterSource, Utf16Source, VecSource,
    WriterOptions, WriterState, WriterStats,
};
pub use chwire_error::{ChError, ErrorKind, Result};
pub use chwire_transport::{BlockAcknowledger, BlockId, MemoryTransport, TcpTransport, Transport};
pub use chwire_types::{ColumnType, Cx, TypeRegistry, Value, parse_type};

pub use chwire_block as block;
pub use chwire_codec as codec;
pub use chwire_core::packet;
pub use chwire_transport as transport;
pub use chwire_types as types;
