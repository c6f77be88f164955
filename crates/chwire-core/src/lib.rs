//! Streaming writer and multiplexed reader over the ClickHouse native
//! protocol.
//!
//! Both sides drive a [`chwire_transport::Transport`] directly and do no
//! work of their own between calls. Cancellation is cooperative through
//! [`chwire_types::Cx`]: it is checked at every packet and block boundary,
//! and a block flush is never split.

pub mod config;
pub mod converter;
pub mod io;
pub mod packet;
pub mod reader;
pub mod source;
pub mod writer;

pub use config::{MAX_BLOCK_SIZE_CEILING, ProtocolSettings, ReaderOptions, TransactionMode, WriterOptions};
pub use converter::{ColumnConverter, EnumAsString, FnConverter, NullAsDefault};
pub use io::TransportReader;
pub use packet::{PacketReader, ProfileInfo, QueryProgress, ServerException, ServerPacket, write_data_packet};
pub use reader::{BlockReader, ReaderState};
pub use source::{ColumnSource, IterSource, SliceSource, StreamSource, TryIterSource, Utf16Source, VecSource};
pub use writer::{ColumnWriter, WriterState, WriterStats};
