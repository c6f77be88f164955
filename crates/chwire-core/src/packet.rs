//! Server packets consumed by the reader and client Data packets produced
//! by the writer.
//!
//! Every packet starts with a varint code:
//!
//! | Code | Packet        | Body                                              |
//! |------|---------------|---------------------------------------------------|
//! | 1    | Data          | table name, block (compressed when enabled)       |
//! | 2    | Exception     | code i32, name, message, stack trace, nested flag |
//! | 3    | Progress      | varints, fields gated by revision                 |
//! | 4    | Pong          | empty                                             |
//! | 5    | EndOfStream   | empty                                             |
//! | 6    | ProfileInfo   | rows, blocks, bytes, limit flags                  |
//! | 7    | Totals        | as Data                                           |
//! | 8    | Extremes      | as Data                                           |
//! | 10   | Log           | table name, uncompressed block                    |
//! | 11   | TableColumns  | external table name, columns description          |
//! | 14   | ProfileEvents | table name, uncompressed block                    |

use std::sync::Arc;

use chwire_block::{Block, BlockDecoder, BlockFramer};
use chwire_error::{ChError, Result};
use chwire_types::limits::{
    DBMS_MIN_REVISION_WITH_CLIENT_WRITE_INFO, DBMS_MIN_REVISION_WITH_SERVER_QUERY_TIME_IN_PROGRESS,
};
use chwire_types::{TypeRegistry, WireRead, WireReadExt, WireWrite};
use tracing::trace;

use crate::config::ProtocolSettings;

pub mod server {
    pub const DATA: u64 = 1;
    pub const EXCEPTION: u64 = 2;
    pub const PROGRESS: u64 = 3;
    pub const PONG: u64 = 4;
    pub const END_OF_STREAM: u64 = 5;
    pub const PROFILE_INFO: u64 = 6;
    pub const TOTALS: u64 = 7;
    pub const EXTREMES: u64 = 8;
    pub const LOG: u64 = 10;
    pub const TABLE_COLUMNS: u64 = 11;
    pub const PROFILE_EVENTS: u64 = 14;
}

pub mod client {
    pub const DATA: u64 = 2;
}

/// Nested exceptions beyond this depth are corrupt.
const MAX_EXCEPTION_DEPTH: usize = 64;

/// Query progress counters, accumulated across Progress packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryProgress {
    pub rows: u64,
    pub bytes: u64,
    pub total_rows: u64,
    pub written_rows: u64,
    pub written_bytes: u64,
    pub elapsed_ns: u64,
}

impl QueryProgress {
    pub fn read(reader: &mut dyn WireRead, revision: u64) -> Result<Self> {
        let mut progress = Self {
            rows: reader.read_varint()?,
            bytes: reader.read_varint()?,
            total_rows: reader.read_varint()?,
            ..Self::default()
        };
        if revision >= DBMS_MIN_REVISION_WITH_CLIENT_WRITE_INFO {
            progress.written_rows = reader.read_varint()?;
            progress.written_bytes = reader.read_varint()?;
        }
        if revision >= DBMS_MIN_REVISION_WITH_SERVER_QUERY_TIME_IN_PROGRESS {
            progress.elapsed_ns = reader.read_varint()?;
        }
        Ok(progress)
    }

    /// Fold an increment into the running totals.
    pub fn accumulate(&mut self, delta: &Self) {
        self.rows = self.rows.saturating_add(delta.rows);
        self.bytes = self.bytes.saturating_add(delta.bytes);
        self.total_rows = self.total_rows.saturating_add(delta.total_rows);
        self.written_rows = self.written_rows.saturating_add(delta.written_rows);
        self.written_bytes = self.written_bytes.saturating_add(delta.written_bytes);
        self.elapsed_ns = self.elapsed_ns.max(delta.elapsed_ns);
    }
}

/// Execution summary sent after the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileInfo {
    pub rows: u64,
    pub blocks: u64,
    pub bytes: u64,
    pub applied_limit: bool,
    pub rows_before_limit: u64,
    pub calculated_rows_before_limit: bool,
}

impl ProfileInfo {
    pub fn read(reader: &mut dyn WireRead) -> Result<Self> {
        Ok(Self {
            rows: reader.read_varint()?,
            blocks: reader.read_varint()?,
            bytes: reader.read_varint()?,
            applied_limit: reader.read_u8()? != 0,
            rows_before_limit: reader.read_varint()?,
            calculated_rows_before_limit: reader.read_u8()? != 0,
        })
    }
}

/// Exception chain reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerException {
    pub code: i32,
    pub name: String,
    pub message: String,
    pub stack_trace: String,
    pub nested: Option<Box<ServerException>>,
}

impl ServerException {
    pub fn read(reader: &mut dyn WireRead) -> Result<Self> {
        Self::read_at_depth(reader, 0)
    }

    fn read_at_depth(reader: &mut dyn WireRead, depth: usize) -> Result<Self> {
        if depth >= MAX_EXCEPTION_DEPTH {
            return Err(ChError::corrupt("server exception chain too deep"));
        }
        let code = reader.read_i32_le()?;
        let name = reader.read_string()?;
        let message = reader.read_string()?;
        let stack_trace = reader.read_string()?;
        let nested = if reader.read_u8()? != 0 {
            Some(Box::new(Self::read_at_depth(reader, depth + 1)?))
        } else {
            None
        };
        Ok(Self {
            code,
            name,
            message,
            stack_trace,
            nested,
        })
    }

    /// Error for the outermost exception, nested messages folded in.
    #[must_use]
    pub fn into_error(self) -> ChError {
        let mut message = self.message;
        let mut next = self.nested;
        while let Some(inner) = next {
            message.push_str(": ");
            message.push_str(&inner.message);
            next = inner.nested;
        }
        ChError::ServerException {
            code: self.code,
            name: self.name,
            message,
        }
    }
}

/// One decoded server packet.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    Data(Block),
    Totals(Block),
    Extremes(Block),
    ProfileEvents(Block),
    Log(Block),
    Exception(ServerException),
    Progress(QueryProgress),
    ProfileInfo(ProfileInfo),
    TableColumns { table: String, description: String },
    Pong,
    EndOfStream,
}

impl ServerPacket {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Data(_) => "Data",
            Self::Totals(_) => "Totals",
            Self::Extremes(_) => "Extremes",
            Self::ProfileEvents(_) => "ProfileEvents",
            Self::Log(_) => "Log",
            Self::Exception(_) => "Exception",
            Self::Progress(_) => "Progress",
            Self::ProfileInfo(_) => "ProfileInfo",
            Self::TableColumns { .. } => "TableColumns",
            Self::Pong => "Pong",
            Self::EndOfStream => "EndOfStream",
        }
    }
}

/// Decodes the server packet stream of one query.
///
/// Data, Totals and Extremes share the connection's compression setting and
/// one set of column states; Log and ProfileEvents blocks always arrive
/// uncompressed and get their own.
#[derive(Debug)]
pub struct PacketReader {
    revision: u64,
    data: BlockFramer,
    log: BlockDecoder,
    profile_events: BlockDecoder,
}

impl PacketReader {
    #[must_use]
    pub fn new(settings: ProtocolSettings, registry: Arc<TypeRegistry>) -> Self {
        Self {
            revision: settings.revision,
            data: BlockFramer::new(settings.revision, settings.compression, Arc::clone(&registry)),
            log: BlockDecoder::new(settings.revision, Arc::clone(&registry)),
            profile_events: BlockDecoder::new(settings.revision, registry),
        }
    }

    pub fn read_packet(&mut self, reader: &mut dyn WireRead) -> Result<ServerPacket> {
        let code = reader.read_varint()?;
        let packet = match code {
            server::DATA | server::TOTALS | server::EXTREMES => {
                let _table = reader.read_string()?;
                let block = self.data.read_block(reader)?;
                match code {
                    server::DATA => ServerPacket::Data(block),
                    server::TOTALS => ServerPacket::Totals(block),
                    _ => ServerPacket::Extremes(block),
                }
            }
            server::LOG => {
                let _table = reader.read_string()?;
                ServerPacket::Log(self.log.decode(reader)?)
            }
            server::PROFILE_EVENTS => {
                let _table = reader.read_string()?;
                ServerPacket::ProfileEvents(self.profile_events.decode(reader)?)
            }
            server::EXCEPTION => ServerPacket::Exception(ServerException::read(reader)?),
            server::PROGRESS => ServerPacket::Progress(QueryProgress::read(reader, self.revision)?),
            server::PROFILE_INFO => ServerPacket::ProfileInfo(ProfileInfo::read(reader)?),
            server::TABLE_COLUMNS => ServerPacket::TableColumns {
                table: reader.read_string()?,
                description: reader.read_string()?,
            },
            server::PONG => ServerPacket::Pong,
            server::END_OF_STREAM => ServerPacket::EndOfStream,
            other => {
                return Err(ChError::corrupt(format!("unexpected server packet code {other}")));
            }
        };
        trace!(packet = packet.name(), "server packet");
        Ok(packet)
    }
}

/// Append a client Data packet carrying `block`.
pub fn write_data_packet(framer: &mut BlockFramer, block: &Block, out: &mut Vec<u8>) -> Result<()> {
    let framed = framer.frame(block)?;
    out.put_varint(client::DATA);
    out.put_str("");
    out.put_bytes(&framed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chwire_types::{SliceReader, WireWriteExt};

    fn write_exception(out: &mut Vec<u8>, code: i32, message: &str, nested: bool) {
        out.put_i32_le(code);
        out.put_str("DB::Exception");
        out.put_str(message);
        out.put_str("");
        out.put_u8(u8::from(nested));
    }

    #[test]
    fn nested_exceptions_fold_into_one_error() {
        let mut data = Vec::new();
        data.put_varint(server::EXCEPTION);
        write_exception(&mut data, 60, "Table x doesn't exist", true);
        write_exception(&mut data, 1000, "while reading", false);
        let mut reader = PacketReader::new(ProtocolSettings::default(), Arc::new(TypeRegistry::new()));
        let packet = reader.read_packet(&mut SliceReader::new(&data)).expect("packet");
        let ServerPacket::Exception(exception) = packet else {
            panic!("expected exception, got {packet:?}");
        };
        let err = exception.into_error();
        assert!(matches!(
            &err,
            ChError::ServerException { code: 60, message, .. } if message == "Table x doesn't exist: while reading"
        ), "{err:?}");
    }

    #[test]
    fn progress_fields_follow_revision() {
        let mut full = Vec::new();
        for v in [10u64, 2000, 50, 1, 2, 999] {
            full.put_varint(v);
        }
        let progress = QueryProgress::read(&mut SliceReader::new(&full), 54_460).expect("progress");
        assert_eq!(progress.elapsed_ns, 999);
        assert_eq!(progress.written_rows, 1);

        let old = QueryProgress::read(&mut SliceReader::new(&full[..4]), 54_000).expect("old");
        assert_eq!(old.rows, 10);
        assert_eq!(old.written_rows, 0);

        let mut total = QueryProgress::default();
        total.accumulate(&progress);
        total.accumulate(&progress);
        assert_eq!(total.rows, 20);
        assert_eq!(total.elapsed_ns, 999);
    }

    #[test]
    fn unknown_packet_code_is_corrupt() {
        let data = [99u8];
        let mut reader = PacketReader::new(ProtocolSettings::default(), Arc::new(TypeRegistry::new()));
        let err = reader.read_packet(&mut SliceReader::new(&data)).unwrap_err();
        assert!(err.is_fatal_to_connection());
    }
}
