//! Multiplexed block reader.
//!
//! One query answers with several result segments on a single packet
//! stream: the main Data rows, then optional Totals, Extremes and
//! ProfileEvents blocks. The reader exposes them one segment at a time.
//!
//! ```text
//! Data --rows exhausted--> NextResultPending --advance--> Totals
//!                                   ^                      | rows exhausted
//!                                   +----------------------+
//!                          NextResultPending --advance--> Extremes ...
//!                          NextResultPending --advance--> Closed
//! ```
//!
//! Non-data packets met while Data is streaming are queued in the fixed
//! order Totals, Extremes, ProfileEvents. Progress and ProfileInfo packets
//! are folded into counters; Log packets are skipped.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chwire_block::Block;
use chwire_error::{ChError, Result};
use chwire_transport::Transport;
use chwire_types::{ColumnType, Cx, TypeRegistry, Value};
use tracing::{debug, warn};

use crate::config::{ProtocolSettings, ReaderOptions};
use crate::converter::ColumnConverter;
use crate::io::TransportReader;
use crate::packet::{PacketReader, ProfileInfo, QueryProgress, ServerPacket};

/// Position of a [`BlockReader`] in the result sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderState {
    Data,
    /// Current segment exhausted; `advance` moves to the next one.
    NextResultPending,
    Totals,
    Extremes,
    ProfileEvents,
    Closed,
}

/// Secondary result segments, in delivery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Segment {
    Totals,
    Extremes,
    ProfileEvents,
}

impl Segment {
    const fn state(self) -> ReaderState {
        match self {
            Self::Totals => ReaderState::Totals,
            Self::Extremes => ReaderState::Extremes,
            Self::ProfileEvents => ReaderState::ProfileEvents,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Totals => "totals",
            Self::Extremes => "extremes",
            Self::ProfileEvents => "profile_events",
        }
    }
}

/// Why the reader stopped doing I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Cancelled,
    Failed,
}

/// Per-column decode plan, frozen once the first row is read.
struct ColumnPlan {
    name: String,
    wire_type: Arc<ColumnType>,
    output_type: Arc<ColumnType>,
    converter: Option<Arc<dyn ColumnConverter>>,
}

/// Reads the result of one query from a transport.
pub struct BlockReader<T: Transport> {
    transport: T,
    cx: Cx,
    packets: PacketReader,
    options: ReaderOptions,
    state: ReaderState,
    plan: Vec<ColumnPlan>,
    plan_frozen: bool,
    /// Blocks of the current secondary segment not yet exposed.
    segment_blocks: VecDeque<Block>,
    current: Option<Block>,
    /// Index of the current row within `current`.
    row: Option<usize>,
    queued: BTreeMap<Segment, VecDeque<Block>>,
    end_of_stream: bool,
    halt: Option<Halt>,
    progress: QueryProgress,
    profile_info: Option<ProfileInfo>,
    rows_read: u64,
    blocks_read: usize,
}

impl<T: Transport> std::fmt::Debug for BlockReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockReader")
            .field("transport", &self.transport.name())
            .field("state", &self.state)
            .field("columns", &self.plan.len())
            .field("rows_read", &self.rows_read)
            .field("end_of_stream", &self.end_of_stream)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> BlockReader<T> {
    /// Wait for the result header of a query already sent on `transport`.
    ///
    /// An operation that produces no rows ends the stream before any Data
    /// packet; the reader then starts in [`ReaderState::Closed`] with zero
    /// columns.
    pub fn open(
        transport: T,
        cx: &Cx,
        settings: ProtocolSettings,
        registry: Arc<TypeRegistry>,
        options: ReaderOptions,
    ) -> Result<Self> {
        let settings = settings.validated();
        let mut reader = Self {
            transport,
            cx: cx.clone(),
            packets: PacketReader::new(settings, registry),
            options,
            state: ReaderState::Data,
            plan: Vec::new(),
            plan_frozen: false,
            segment_blocks: VecDeque::new(),
            current: None,
            row: None,
            queued: BTreeMap::new(),
            end_of_stream: false,
            halt: None,
            progress: QueryProgress::default(),
            profile_info: None,
            rows_read: 0,
            blocks_read: 0,
        };
        match reader.next_data_block()? {
            Some(header) if header.column_count() > 0 => {
                reader.plan = header
                    .schema()
                    .into_iter()
                    .map(|(name, ty)| ColumnPlan {
                        name,
                        output_type: Arc::clone(&ty),
                        wire_type: ty,
                        converter: None,
                    })
                    .collect();
                if header.rows() > 0 {
                    reader.current = Some(header);
                    reader.blocks_read = 1;
                }
            }
            _ => {
                reader.drain_to_end()?;
                reader.state = ReaderState::Closed;
            }
        }
        debug!(
            transport = reader.transport.name(),
            columns = reader.plan.len(),
            state = ?reader.state,
            "block reader opened"
        );
        Ok(reader)
    }

    #[must_use]
    pub const fn state(&self) -> ReaderState {
        self.state
    }

    /// Progress accumulated from every Progress packet so far.
    #[must_use]
    pub const fn progress(&self) -> QueryProgress {
        self.progress
    }

    #[must_use]
    pub const fn profile_info(&self) -> Option<ProfileInfo> {
        self.profile_info
    }

    #[must_use]
    pub const fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Columns of the current segment.
    #[must_use]
    pub fn column_count(&self) -> usize {
        match self.state {
            ReaderState::ProfileEvents => self.current.as_ref().map_or(0, Block::column_count),
            _ => self.plan.len(),
        }
    }

    #[must_use]
    pub fn column_name(&self, ordinal: usize) -> Option<&str> {
        match self.state {
            ReaderState::ProfileEvents => self
                .current
                .as_ref()
                .and_then(|b| b.column(ordinal))
                .map(|c| c.name.as_str()),
            _ => self.plan.get(ordinal).map(|p| p.name.as_str()),
        }
    }

    /// Column type as seen by the caller, after any converter.
    #[must_use]
    pub fn column_type(&self, ordinal: usize) -> Option<&Arc<ColumnType>> {
        match self.state {
            ReaderState::ProfileEvents => self
                .current
                .as_ref()
                .and_then(|b| b.column(ordinal))
                .map(|c| &c.ty),
            _ => self.plan.get(ordinal).map(|p| &p.output_type),
        }
    }

    /// Ordinal of the column called `name`.
    #[must_use]
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        (0..self.column_count()).find(|&i| self.column_name(i) == Some(name))
    }

    /// Attach `converter` to column `ordinal`.
    ///
    /// Only allowed before the first row is read, and only for a column whose
    /// type the converter accepts.
    pub fn register_converter(&mut self, ordinal: usize, converter: Arc<dyn ColumnConverter>) -> Result<()> {
        if self.plan_frozen {
            return Err(ChError::reader_config(format!(
                "converter '{}' registered after rows were read",
                converter.name()
            )));
        }
        let column_count = self.plan.len();
        let Some(plan) = self.plan.get_mut(ordinal) else {
            return Err(ChError::reader_config(format!(
                "no column {ordinal}; the result has {column_count} columns"
            )));
        };
        if !converter.accepts(&plan.wire_type) {
            return Err(ChError::reader_config(format!(
                "converter '{}' does not accept column '{}' of type {}",
                converter.name(),
                plan.name,
                plan.wire_type
            )));
        }
        plan.output_type = converter
            .output_type(&plan.wire_type)
            .map_or_else(|| Arc::clone(&plan.wire_type), Arc::new);
        debug!(column = %plan.name, converter = converter.name(), "converter registered");
        plan.converter = Some(converter);
        Ok(())
    }

    /// [`BlockReader::register_converter`] by column name.
    pub fn register_converter_by_name(&mut self, name: &str, converter: Arc<dyn ColumnConverter>) -> Result<()> {
        let ordinal = self
            .plan
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| ChError::reader_config(format!("no column named '{name}'")))?;
        self.register_converter(ordinal, converter)
    }

    /// Move to the next row of the current segment.
    ///
    /// Returns `false` once the segment is exhausted; the state is then
    /// [`ReaderState::NextResultPending`]. Reading while pending or closed
    /// yields no rows.
    pub fn read_row(&mut self) -> Result<bool> {
        match self.state {
            ReaderState::NextResultPending | ReaderState::Closed => return Ok(false),
            _ => {}
        }
        self.plan_frozen = true;
        loop {
            if let Some(block) = &self.current {
                let next = self.row.map_or(0, |r| r + 1);
                if next < block.rows() {
                    self.row = Some(next);
                    self.rows_read += 1;
                    return Ok(true);
                }
            }
            // The exhausted block stays readable until a replacement arrives.
            let next = if self.state == ReaderState::Data {
                self.next_data_block()?
            } else {
                self.segment_blocks.pop_front()
            };
            self.row = None;
            self.current = next;
            if self.current.is_none() {
                debug!(state = ?self.state, rows_read = self.rows_read, "segment exhausted");
                self.state = ReaderState::NextResultPending;
                return Ok(false);
            }
            self.blocks_read += 1;
        }
    }

    /// Alias of [`BlockReader::read_row`] for loop-style callers.
    pub fn next_row(&mut self) -> Result<bool> {
        self.read_row()
    }

    /// Move past the current segment to the next one.
    ///
    /// Unread rows of the current segment are skipped. Returns `false` when
    /// no segment is left; the state is then [`ReaderState::Closed`].
    pub fn advance(&mut self) -> Result<bool> {
        if self.state == ReaderState::Closed {
            return Ok(false);
        }
        self.current = None;
        self.row = None;
        self.segment_blocks.clear();
        if !self.end_of_stream {
            self.drain_to_end()?;
        }
        let Some((segment, blocks)) = self.queued.pop_first() else {
            self.state = ReaderState::Closed;
            debug!(rows_read = self.rows_read, "reader closed");
            return Ok(false);
        };
        debug!(segment = segment.name(), blocks = blocks.len(), "next result segment");
        self.segment_blocks = blocks;
        self.state = segment.state();
        Ok(true)
    }

    /// Value of column `ordinal` in the current row, converted.
    pub fn get(&self, ordinal: usize) -> Result<Value> {
        let (Some(block), Some(row)) = (&self.current, self.row) else {
            return Err(ChError::invalid_state("no current row"));
        };
        let column = block.column(ordinal).ok_or_else(|| {
            ChError::invalid_state(format!(
                "no column {ordinal}; the result has {} columns",
                block.column_count()
            ))
        })?;
        let value = column.values[row].clone();
        let converter = match self.state {
            ReaderState::ProfileEvents => None,
            _ => self.plan.get(ordinal).and_then(|p| p.converter.as_ref()),
        };
        match converter {
            Some(converter) => converter
                .convert(value)
                .map_err(|e| e.at_row(row).in_column(&column.name, self.blocks_read.saturating_sub(1))),
            None => Ok(value),
        }
    }

    pub fn get_by_name(&self, name: &str) -> Result<Value> {
        let ordinal = self
            .ordinal(name)
            .ok_or_else(|| ChError::invalid_state(format!("no column named '{name}'")))?;
        self.get(ordinal)
    }

    /// Every value of the current row, converted.
    pub fn row_values(&self) -> Result<Vec<Value>> {
        (0..self.column_count()).map(|i| self.get(i)).collect()
    }

    fn check_io(&self) -> Result<()> {
        match self.halt {
            None => Ok(()),
            Some(Halt::Cancelled) => Err(ChError::Cancelled),
            Some(Halt::Failed) => Err(ChError::invalid_state(
                "reader stopped after a stream error",
            )),
        }
    }

    /// Read one packet, halting the reader on cancellation or failure.
    fn read_packet(&mut self) -> Result<ServerPacket> {
        self.check_io()?;
        if let Err(err) = self.cx.checkpoint() {
            warn!(rows_read = self.rows_read, "reader cancelled");
            self.halt = Some(Halt::Cancelled);
            return Err(err);
        }
        let mut wire = TransportReader::new(&mut self.transport, &self.cx);
        match self.packets.read_packet(&mut wire) {
            Ok(packet) => Ok(packet),
            Err(err) => {
                self.halt = Some(if matches!(err, ChError::Cancelled) {
                    Halt::Cancelled
                } else {
                    Halt::Failed
                });
                Err(err)
            }
        }
    }

    /// Next Data block carrying rows (or the header, before one is known).
    ///
    /// Returns `None` at end of stream.
    fn next_data_block(&mut self) -> Result<Option<Block>> {
        while !self.end_of_stream {
            let packet = self.read_packet()?;
            if let Some(block) = self.absorb(packet)? {
                if self.plan.is_empty() {
                    return Ok(Some(block));
                }
                self.check_header(&block)?;
                if block.rows() > 0 {
                    return Ok(Some(block));
                }
            }
        }
        Ok(None)
    }

    fn drain_to_end(&mut self) -> Result<()> {
        while !self.end_of_stream {
            let packet = self.read_packet()?;
            if let Some(block) = self.absorb(packet)? {
                if !self.plan.is_empty() {
                    self.check_header(&block)?;
                }
            }
        }
        Ok(())
    }

    /// Fold a non-data packet into reader state; hand back Data blocks.
    fn absorb(&mut self, packet: ServerPacket) -> Result<Option<Block>> {
        match packet {
            ServerPacket::Data(block) => return Ok(Some(block)),
            ServerPacket::Totals(block) => {
                self.check_segment(&block)?;
                self.enqueue(Segment::Totals, block);
            }
            ServerPacket::Extremes(block) => {
                self.check_segment(&block)?;
                self.enqueue(Segment::Extremes, block);
            }
            ServerPacket::ProfileEvents(block) => {
                if self.options.surface_profile_events {
                    self.enqueue(Segment::ProfileEvents, block);
                }
            }
            ServerPacket::Progress(delta) => self.progress.accumulate(&delta),
            ServerPacket::ProfileInfo(info) => self.profile_info = Some(info),
            ServerPacket::Exception(exception) => {
                self.end_of_stream = true;
                self.halt = Some(Halt::Failed);
                let err = exception.into_error();
                warn!(error = %err, "server exception");
                return Err(err);
            }
            ServerPacket::EndOfStream => self.end_of_stream = true,
            ServerPacket::Log(_) | ServerPacket::Pong | ServerPacket::TableColumns { .. } => {}
        }
        Ok(None)
    }

    fn enqueue(&mut self, segment: Segment, block: Block) {
        if block.rows() == 0 {
            return;
        }
        self.queued.entry(segment).or_default().push_back(block);
    }

    /// Totals and Extremes rows are read through the main result plan.
    fn check_segment(&mut self, block: &Block) -> Result<()> {
        if block.rows() == 0 || self.plan.is_empty() {
            return Ok(());
        }
        self.check_header(block)
    }

    fn check_header(&mut self, block: &Block) -> Result<()> {
        let matches = block.column_count() == self.plan.len()
            && block
                .columns()
                .iter()
                .zip(&self.plan)
                .all(|(column, plan)| column.name == plan.name && column.ty == plan.wire_type);
        if matches {
            Ok(())
        } else {
            self.halt = Some(Halt::Failed);
            Err(ChError::corrupt(format!(
                "block columns {:?} do not match the result header",
                block.schema().iter().map(|(n, t)| format!("{n} {t}")).collect::<Vec<_>>()
            )))
        }
    }
}
