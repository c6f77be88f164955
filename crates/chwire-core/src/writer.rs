//! Streaming column writer.
//!
//! Rows arrive one at a time ([`ColumnWriter::write_row`]) or column-wise
//! from [`ColumnSource`]s ([`ColumnWriter::write_block`]). They are buffered
//! until a block fills, then the whole block is encoded, framed and sent as
//! one client Data packet.
//!
//! State machine:
//!
//! ```text
//! Open --row--> Buffering --flush--> Flushed --row--> Buffering ...
//!   \______________________________________________--close--> Closed
//! ```
//!
//! Transaction modes decide when a sent block becomes durable. On a
//! transport with a [`BlockAcknowledger`] every sent block is acknowledged;
//! `Auto` and `Block` commit it immediately, `Manual` holds it provisional
//! until [`ColumnWriter::commit`].
//!
//! Every accepted row is accounted for in [`WriterStats`]:
//! `committed + provisional + buffered + discarded` equals the rows accepted
//! so far. A block cancelled before any byte left stays buffered; a block that
//! fails to encode is discarded; a send that fails part way leaves the
//! connection torn and the writer [`WriterState::Failed`].
//!
//! [`BlockAcknowledger`]: chwire_transport::BlockAcknowledger

use std::mem;
use std::sync::Arc;

use chwire_block::{Block, BlockColumn, BlockFramer};
use chwire_error::{ChError, Result};
use chwire_transport::{BlockId, Transport};
use chwire_types::{ColumnType, Cx, TypeRegistry, Value};
use tracing::{debug, warn};

use crate::config::{ProtocolSettings, TransactionMode, WriterOptions};
use crate::packet::write_data_packet;
use crate::source::ColumnSource;

/// Lifecycle of a [`ColumnWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Nothing written yet.
    Open,
    /// Rows are buffered and not yet sent.
    Buffering,
    /// Every accepted row has been sent or discarded.
    Flushed,
    Closed,
    /// A send failed after bytes reached the transport; only drop remains.
    Failed,
}

/// Row counters, observable at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriterStats {
    /// Rows in blocks that are durable.
    pub committed_rows: u64,
    /// Rows in sent blocks awaiting `commit` (manual mode only).
    pub provisional_rows: u64,
    /// Rows accepted but not yet sent.
    pub buffered_rows: u64,
    /// Rows dropped by a failed block or a rollback.
    pub discarded_rows: u64,
    /// Data blocks sent, terminator excluded.
    pub blocks_sent: u64,
}

/// Where a block send stopped.
enum SendFailure {
    /// Nothing reached the transport.
    Unsent(ChError),
    /// The block could not be encoded.
    Rejected(ChError),
    /// Some bytes may have reached the transport.
    Torn(ChError),
}

#[derive(Debug, Clone, Copy)]
struct ProvisionalBlock {
    id: BlockId,
    rows: usize,
}

/// Streams rows of a fixed schema to one transport.
pub struct ColumnWriter<T: Transport> {
    transport: T,
    cx: Cx,
    schema: Vec<(String, Arc<ColumnType>)>,
    options: WriterOptions,
    framer: BlockFramer,
    buffer: Vec<Vec<Value>>,
    buffered_rows: usize,
    /// Row limit of the block currently being filled.
    block_limit: usize,
    provisional: Vec<ProvisionalBlock>,
    state: WriterState,
    stats: WriterStats,
}

impl<T: Transport> std::fmt::Debug for ColumnWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnWriter")
            .field("transport", &self.transport.name())
            .field("columns", &self.schema.len())
            .field("options", &self.options)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ColumnWriter<T> {
    /// Start an insert of `columns` over `transport`.
    ///
    /// Manual mode needs a transport that acknowledges blocks.
    pub fn open(
        mut transport: T,
        cx: &Cx,
        settings: ProtocolSettings,
        columns: Vec<(String, Arc<ColumnType>)>,
        options: WriterOptions,
    ) -> Result<Self> {
        cx.checkpoint()?;
        if columns.is_empty() {
            return Err(ChError::invalid_state("an insert needs at least one column"));
        }
        let options = options.validated();
        if options.mode == TransactionMode::Manual && transport.block_acknowledger().is_none() {
            return Err(ChError::TransactionUnsupported);
        }
        let settings = settings.validated();
        debug!(
            transport = transport.name(),
            columns = columns.len(),
            mode = options.mode.as_str(),
            block_size = options.effective_block_size(),
            "column writer opened"
        );
        Ok(Self {
            transport,
            cx: cx.clone(),
            buffer: vec![Vec::new(); columns.len()],
            schema: columns,
            framer: BlockFramer::new(settings.revision, settings.compression, Arc::default()),
            buffered_rows: 0,
            block_limit: options.effective_block_size(),
            options,
            provisional: Vec::new(),
            state: WriterState::Open,
            stats: WriterStats::default(),
        })
    }

    /// Like [`ColumnWriter::open`], with column types given as type text.
    pub fn open_with_types(
        transport: T,
        cx: &Cx,
        settings: ProtocolSettings,
        registry: &TypeRegistry,
        columns: &[(&str, &str)],
        options: WriterOptions,
    ) -> Result<Self> {
        let schema = columns
            .iter()
            .map(|(name, ty)| Ok(((*name).to_owned(), registry.get(ty)?)))
            .collect::<Result<Vec<_>>>()?;
        Self::open(transport, cx, settings, schema, options)
    }

    #[must_use]
    pub const fn state(&self) -> WriterState {
        self.state
    }

    #[must_use]
    pub const fn stats(&self) -> WriterStats {
        self.stats
    }

    #[must_use]
    pub const fn mode(&self) -> TransactionMode {
        self.options.mode
    }

    #[must_use]
    pub fn schema(&self) -> &[(String, Arc<ColumnType>)] {
        &self.schema
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Change the rows-per-block limit; `None` or `Some(0)` restores the
    /// default. The block being filled keeps its limit.
    pub fn set_max_block_size(&mut self, max_block_size: Option<usize>) {
        self.options.max_block_size = max_block_size;
        self.options = self.options.validated();
        if self.buffered_rows == 0 {
            self.block_limit = self.options.effective_block_size();
        }
    }

    /// Append one row; sends a block once the current one is full.
    pub fn write_row(&mut self, values: Vec<Value>) -> Result<()> {
        self.ensure_open()?;
        self.cx.checkpoint()?;
        if values.len() != self.schema.len() {
            return Err(ChError::ColumnLengthMismatch {
                column: None,
                expected: self.schema.len(),
                actual: values.len(),
            });
        }
        for (column, value) in self.buffer.iter_mut().zip(values) {
            column.push(value);
        }
        self.row_accepted()
    }

    /// Pull `rows` rows from one source per column.
    ///
    /// Every block that fills along the way is sent. When a source fails or
    /// runs dry, the unsent rows are discarded and the error names the
    /// column; blocks already sent keep their transaction state.
    pub fn write_block(&mut self, sources: &mut [&mut dyn ColumnSource], rows: usize) -> Result<()> {
        self.ensure_open()?;
        if sources.len() != self.schema.len() {
            return Err(ChError::invalid_state(format!(
                "{} sources given, insert has {} columns",
                sources.len(),
                self.schema.len()
            )));
        }
        for row in 0..rows {
            if let Err(err) = self.pull_row(sources, row, rows) {
                let dropped = self.discard_buffer();
                warn!(
                    rows = dropped,
                    block = self.stats.blocks_sent,
                    error = %err,
                    "partial block discarded"
                );
                return Err(err);
            }
            self.row_accepted()?;
        }
        Ok(())
    }

    fn pull_row(&mut self, sources: &mut [&mut dyn ColumnSource], row: usize, rows: usize) -> Result<()> {
        let block_index = self.block_index();
        for (index, source) in sources.iter_mut().enumerate() {
            let name = &self.schema[index].0;
            match source.pull(&self.cx) {
                Ok(Some(value)) => self.buffer[index].push(value),
                Ok(None) => {
                    return Err(ChError::ColumnLengthMismatch {
                        column: Some(name.clone()),
                        expected: rows,
                        actual: row,
                    });
                }
                Err(err) => return Err(err.in_column(name, block_index)),
            }
        }
        Ok(())
    }

    /// Send buffered rows, then flush the transport.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.send_buffer()?;
        self.transport.flush(&self.cx)
    }

    /// Make every accepted row durable.
    ///
    /// Sends buffered rows first. In manual mode this commits every
    /// provisional block; elsewhere sent blocks are already committed.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.send_buffer()?;
        self.transport.flush(&self.cx)?;
        let Some(last) = self.provisional.last().copied() else {
            return Ok(());
        };
        let acknowledger = self
            .transport
            .block_acknowledger()
            .ok_or(ChError::TransactionUnsupported)?;
        acknowledger.commit(&self.cx, last.id)?;
        let rows: usize = self.provisional.drain(..).map(|b| b.rows).sum();
        self.stats.provisional_rows = 0;
        self.stats.committed_rows += rows as u64;
        debug!(through = last.id.0, rows, "provisional blocks committed");
        Ok(())
    }

    /// Discard buffered rows and, in manual mode, every provisional block.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.rollback_inner()
    }

    fn rollback_inner(&mut self) -> Result<()> {
        let buffered = self.discard_buffer();
        if self.provisional.is_empty() {
            debug!(buffered, "rollback discarded buffered rows");
            return Ok(());
        }
        let acknowledger = self
            .transport
            .block_acknowledger()
            .ok_or(ChError::TransactionUnsupported)?;
        let blocks = acknowledger.rollback(&self.cx)?;
        let rows: usize = self.provisional.drain(..).map(|b| b.rows).sum();
        self.stats.provisional_rows = 0;
        self.stats.discarded_rows += rows as u64;
        debug!(buffered, blocks, rows, "rolled back");
        Ok(())
    }

    /// Finish the insert.
    ///
    /// Auto and block modes send and commit buffered rows. Manual mode rolls
    /// back whatever was not committed. The terminating empty block is sent
    /// in every mode.
    pub fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        match self.options.mode {
            TransactionMode::Manual => self.rollback_inner()?,
            TransactionMode::Auto | TransactionMode::Block => self.send_buffer()?,
        }
        let terminator = self.send_block(&Block::empty(), 0);
        self.settle(terminator)?;
        self.transport.flush(&self.cx)?;
        self.state = WriterState::Closed;
        debug!(
            committed_rows = self.stats.committed_rows,
            blocks = self.stats.blocks_sent,
            "column writer closed"
        );
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            WriterState::Closed => Err(ChError::invalid_state("writer is closed")),
            WriterState::Failed => Err(ChError::invalid_state(
                "writer failed mid-send; the connection must be discarded",
            )),
            _ => Ok(()),
        }
    }

    /// Turn a send outcome into the caller's error, marking the writer
    /// failed when the stream may be torn.
    fn settle(&mut self, outcome: std::result::Result<(), SendFailure>) -> Result<()> {
        match outcome {
            Ok(()) => Ok(()),
            Err(SendFailure::Unsent(err) | SendFailure::Rejected(err)) => Err(err),
            Err(SendFailure::Torn(err)) => {
                self.state = WriterState::Failed;
                Err(err)
            }
        }
    }

    fn block_index(&self) -> usize {
        usize::try_from(self.stats.blocks_sent).unwrap_or(usize::MAX)
    }

    fn row_accepted(&mut self) -> Result<()> {
        self.buffered_rows += 1;
        self.stats.buffered_rows = self.buffered_rows as u64;
        self.state = WriterState::Buffering;
        if self.buffered_rows >= self.block_limit {
            self.send_buffer()?;
        }
        Ok(())
    }

    fn discard_buffer(&mut self) -> usize {
        let dropped = self.buffered_rows;
        for column in &mut self.buffer {
            column.clear();
        }
        self.buffered_rows = 0;
        self.stats.buffered_rows = 0;
        self.stats.discarded_rows += dropped as u64;
        self.block_limit = self.options.effective_block_size();
        if self.state == WriterState::Buffering {
            self.state = WriterState::Flushed;
        }
        dropped
    }

    /// Send the buffered rows as one block.
    ///
    /// The buffer is cleared only once the block has left; a block that
    /// never reached the transport goes back into the buffer.
    fn send_buffer(&mut self) -> Result<()> {
        if self.buffered_rows == 0 {
            return Ok(());
        }
        let rows = self.buffered_rows;
        let columns = self
            .schema
            .iter()
            .zip(self.buffer.iter_mut())
            .map(|((name, ty), values)| BlockColumn::new(name.clone(), Arc::clone(ty), mem::take(values)))
            .collect();
        let block = match Block::new(columns) {
            Ok(block) => block,
            Err(err) => {
                self.discard_buffer();
                return Err(err);
            }
        };
        match self.send_block(&block, rows) {
            Ok(()) => {
                self.buffered_rows = 0;
                self.stats.buffered_rows = 0;
                self.stats.blocks_sent += 1;
                self.block_limit = self.options.effective_block_size();
                self.state = WriterState::Flushed;
                Ok(())
            }
            Err(SendFailure::Unsent(err)) => {
                for (column, sent) in self.buffer.iter_mut().zip(block.into_columns()) {
                    *column = sent.values;
                }
                debug!(rows, error = %err, "block kept in buffer");
                Err(err)
            }
            Err(failure) => {
                self.discard_buffer();
                warn!(rows, block = self.stats.blocks_sent, "block discarded after failed send");
                self.settle(Err(failure))
            }
        }
    }

    /// Encode `block` completely, then hand it to the transport in one
    /// masked section.
    fn send_block(&mut self, block: &Block, rows: usize) -> std::result::Result<(), SendFailure> {
        let span = tracing::debug_span!("send_block", block = self.stats.blocks_sent, rows);
        let _entered = span.enter();
        self.cx.checkpoint().map_err(SendFailure::Unsent)?;
        let mut packet = Vec::new();
        write_data_packet(&mut self.framer, block, &mut packet).map_err(SendFailure::Rejected)?;

        let _masked = self.cx.masked();
        self.transport
            .write_all(&self.cx, &packet)
            .map_err(SendFailure::Torn)?;
        let mode = self.options.mode;
        let Some(acknowledger) = self.transport.block_acknowledger() else {
            self.stats.committed_rows += rows as u64;
            debug!(bytes = packet.len(), "block sent");
            return Ok(());
        };
        let id = acknowledger.acknowledge(&self.cx).map_err(SendFailure::Torn)?;
        match mode {
            TransactionMode::Manual if rows > 0 => {
                self.provisional.push(ProvisionalBlock { id, rows });
                self.stats.provisional_rows += rows as u64;
            }
            _ => {
                acknowledger
                    .commit(&self.cx, id)
                    .map_err(SendFailure::Torn)?;
                self.stats.committed_rows += rows as u64;
            }
        }
        debug!(bytes = packet.len(), ack = id.0, "block sent");
        Ok(())
    }
}

impl<T: Transport> Drop for ColumnWriter<T> {
    /// A writer dropped without `close` sends nothing further; provisional
    /// blocks are rolled back and buffered rows are lost.
    fn drop(&mut self) {
        if self.state == WriterState::Closed {
            return;
        }
        let cx = self.cx.clone();
        let _masked = cx.masked();
        if let Err(err) = self.rollback_inner() {
            warn!(error = %err, "rollback on drop failed");
        }
    }
}
