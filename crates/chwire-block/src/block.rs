//! Native block layout.
//!
//! ```text
//! block info      (revision >= 51903)
//!   varint 1, u8  is_overflows
//!   varint 2, i32 bucket_num
//!   varint 0      end of fields
//! varint          column count
//! varint          row count
//! per column:
//!   string        name
//!   string        type text
//!   u8            has custom serialization   (revision >= 54454)
//!   ...           serialization kinds        (only when the flag is 1)
//!   ...           state prefix and data      (only when rows > 0)
//! ```

use std::sync::Arc;

use chwire_codec::{ColumnCodec, SerializationKinds};
use chwire_error::{ChError, Result};
use chwire_types::limits::{
    DBMS_MIN_REVISION_WITH_BLOCK_INFO, DBMS_MIN_REVISION_WITH_CUSTOM_SERIALIZATION,
};
use chwire_types::{ColumnType, TypeRegistry, Value, WireRead, WireReadExt, WireWrite, WireWriteExt};
use tracing::debug;

/// Upper bound on the column count accepted from the wire.
pub const MAX_BLOCK_COLUMNS: usize = 1 << 20;
/// Upper bound on the row count accepted from the wire.
pub const MAX_BLOCK_ROWS: usize = u32::MAX as usize;

/// Per-block metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Set on the overflow row of `GROUP BY ... WITH TOTALS` under
    /// `max_rows_to_group_by`.
    pub is_overflows: bool,
    /// Two-level aggregation bucket, `-1` when unused.
    pub bucket_num: i32,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self {
            is_overflows: false,
            bucket_num: -1,
        }
    }
}

impl BlockInfo {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.put_varint(1);
        out.put_u8(u8::from(self.is_overflows));
        out.put_varint(2);
        out.put_i32_le(self.bucket_num);
        out.put_varint(0);
    }

    pub fn read(reader: &mut dyn WireRead) -> Result<Self> {
        let mut info = Self::default();
        loop {
            match reader.read_varint()? {
                0 => return Ok(info),
                1 => info.is_overflows = reader.read_u8()? != 0,
                2 => info.bucket_num = reader.read_i32_le()?,
                other => {
                    return Err(ChError::corrupt(format!("unknown block info field {other}")));
                }
            }
        }
    }
}

/// One named, typed column of a block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockColumn {
    pub name: String,
    pub ty: Arc<ColumnType>,
    pub values: Vec<Value>,
}

impl BlockColumn {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Arc<ColumnType>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            ty,
            values,
        }
    }
}

/// Unit of columnar rows exchanged over the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub info: BlockInfo,
    columns: Vec<BlockColumn>,
    rows: usize,
}

impl Block {
    /// Build a block, requiring every column to hold the same row count.
    pub fn new(columns: Vec<BlockColumn>) -> Result<Self> {
        let rows = columns.first().map_or(0, |c| c.values.len());
        for column in &columns {
            if column.values.len() != rows {
                return Err(ChError::ColumnLengthMismatch {
                    column: Some(column.name.clone()),
                    expected: rows,
                    actual: column.values.len(),
                });
            }
        }
        Ok(Self {
            info: BlockInfo::default(),
            columns,
            rows,
        })
    }

    /// Zero-row block describing a result or insert schema.
    #[must_use]
    pub fn header(columns: &[(String, Arc<ColumnType>)]) -> Self {
        Self {
            info: BlockInfo::default(),
            columns: columns
                .iter()
                .map(|(name, ty)| BlockColumn::new(name.clone(), Arc::clone(ty), Vec::new()))
                .collect(),
            rows: 0,
        }
    }

    /// Block with no columns and no rows; terminates an insert.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows == 0
    }

    #[must_use]
    pub fn columns(&self) -> &[BlockColumn] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, index: usize) -> Option<&BlockColumn> {
        self.columns.get(index)
    }

    #[must_use]
    pub fn column_by_name(&self, name: &str) -> Option<&BlockColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names and types, in order.
    #[must_use]
    pub fn schema(&self) -> Vec<(String, Arc<ColumnType>)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), Arc::clone(&c.ty)))
            .collect()
    }

    #[must_use]
    pub fn into_columns(self) -> Vec<BlockColumn> {
        self.columns
    }
}

fn codec_for<'a>(codecs: &'a mut Vec<ColumnCodec>, index: usize, ty: &Arc<ColumnType>) -> &'a mut ColumnCodec {
    if index >= codecs.len() {
        codecs.push(ColumnCodec::new(Arc::clone(ty)));
    } else if codecs[index].column_type() != ty {
        codecs[index] = ColumnCodec::new(Arc::clone(ty));
    }
    &mut codecs[index]
}

/// Serializes blocks of one operation, keeping per-column codec state.
#[derive(Debug, Clone)]
pub struct BlockEncoder {
    revision: u64,
    codecs: Vec<ColumnCodec>,
    blocks_written: usize,
}

impl BlockEncoder {
    #[must_use]
    pub fn new(revision: u64) -> Self {
        Self {
            revision,
            codecs: Vec::new(),
            blocks_written: 0,
        }
    }

    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub const fn blocks_written(&self) -> usize {
        self.blocks_written
    }

    /// Append the native encoding of `block` to `out`.
    ///
    /// On error `out` is left as it was.
    pub fn encode(&mut self, block: &Block, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        let result = self.encode_inner(block, out);
        if result.is_err() {
            out.truncate(start);
        } else {
            self.blocks_written += 1;
        }
        result
    }

    fn encode_inner(&mut self, block: &Block, out: &mut Vec<u8>) -> Result<()> {
        if self.revision >= DBMS_MIN_REVISION_WITH_BLOCK_INFO {
            block.info.write(out);
        }
        out.put_varint(block.column_count() as u64);
        out.put_varint(block.rows() as u64);
        for (index, column) in block.columns().iter().enumerate() {
            out.put_str(&column.name);
            out.put_str(&column.ty.to_string());
            if self.revision >= DBMS_MIN_REVISION_WITH_CUSTOM_SERIALIZATION {
                out.put_u8(0);
            }
            codec_for(&mut self.codecs, index, &column.ty)
                .encode(&column.values, out)
                .map_err(|e| e.in_column(&column.name, self.blocks_written))?;
        }
        debug!(
            rows = block.rows(),
            columns = block.column_count(),
            block_index = self.blocks_written,
            "block encoded"
        );
        Ok(())
    }
}

/// Deserializes blocks of one operation, keeping per-column codec state.
#[derive(Debug, Clone)]
pub struct BlockDecoder {
    revision: u64,
    registry: Arc<TypeRegistry>,
    codecs: Vec<ColumnCodec>,
    blocks_read: usize,
}

impl BlockDecoder {
    #[must_use]
    pub fn new(revision: u64, registry: Arc<TypeRegistry>) -> Self {
        Self {
            revision,
            registry,
            codecs: Vec::new(),
            blocks_read: 0,
        }
    }

    #[must_use]
    pub const fn blocks_read(&self) -> usize {
        self.blocks_read
    }

    pub fn decode(&mut self, reader: &mut dyn WireRead) -> Result<Block> {
        let info = if self.revision >= DBMS_MIN_REVISION_WITH_BLOCK_INFO {
            BlockInfo::read(reader)?
        } else {
            BlockInfo::default()
        };
        let column_count = reader.read_len(MAX_BLOCK_COLUMNS)?;
        let rows = reader.read_len(MAX_BLOCK_ROWS)?;
        let block_index = self.blocks_read;

        let mut columns = Vec::with_capacity(column_count.min(1024));
        for index in 0..column_count {
            let name = reader.read_string()?;
            let type_text = reader.read_string()?;
            let ty = self.registry.get(&type_text).map_err(|e| {
                ChError::corrupt(format!("column '{name}' has an unusable type: {e}"))
            })?;
            let kinds = if self.revision >= DBMS_MIN_REVISION_WITH_CUSTOM_SERIALIZATION
                && reader.read_u8()? != 0
            {
                Some(SerializationKinds::read(&ty, reader)?)
            } else {
                None
            };
            let values = codec_for(&mut self.codecs, index, &ty)
                .decode_with_kinds(reader, rows, kinds.as_ref())
                .map_err(|e| e.in_column(&name, block_index))?;
            columns.push(BlockColumn::new(name, ty, values));
        }
        self.blocks_read += 1;
        debug!(rows, columns = column_count, block_index, "block decoded");

        let mut block = if column_count == 0 {
            Block::empty()
        } else {
            Block::new(columns)?
        };
        block.rows = rows;
        block.info = info;
        Ok(block)
    }
}
