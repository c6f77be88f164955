//! Sparse serialization of mostly-default columns.
//!
//! The server may mark a column (or a tuple element) as sparse in the block
//! header. The data then starts with run lengths instead of dense values:
//!
//! ```text
//! varint  defaults before the 1st non-default row
//! varint  defaults before the 2nd non-default row
//! ...
//! varint  trailing defaults | END_OF_GRANULE
//! ...     the non-default values, densely encoded
//! ```

use chwire_error::{ChError, Result};
use chwire_types::limits::MAX_PREALLOC_ROWS;
use chwire_types::{ColumnType, Value, WireRead, WireWrite};

/// Flag on the final run of a granule.
pub const END_OF_GRANULE: u64 = 1 << 62;

/// Serialization kind advertised per column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationKind {
    #[default]
    Default,
    Sparse,
}

impl SerializationKind {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Default),
            1 => Ok(Self::Sparse),
            other => Err(ChError::corrupt(format!(
                "unknown serialization kind {other}"
            ))),
        }
    }
}

/// Serialization kinds for a column, nested per tuple element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SerializationKinds {
    pub kind: SerializationKind,
    pub elements: Vec<SerializationKinds>,
}

impl SerializationKinds {
    /// All-default kinds shaped like `ty`.
    #[must_use]
    pub fn dense(ty: &ColumnType) -> Self {
        Self {
            kind: SerializationKind::Default,
            elements: match ty {
                ColumnType::Tuple(elements) => elements.iter().map(|e| Self::dense(&e.ty)).collect(),
                _ => Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn is_dense(&self) -> bool {
        self.kind == SerializationKind::Default && self.elements.iter().all(Self::is_dense)
    }

    /// Read kinds shaped like `ty`.
    pub fn read(ty: &ColumnType, reader: &mut dyn WireRead) -> Result<Self> {
        let kind = SerializationKind::from_byte(reader.read_u8()?)?;
        let elements = match ty {
            ColumnType::Tuple(elements) => elements
                .iter()
                .map(|e| Self::read(&e.ty, reader))
                .collect::<Result<_>>()?,
            _ => Vec::new(),
        };
        Ok(Self { kind, elements })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.put_u8(match self.kind {
            SerializationKind::Default => 0,
            SerializationKind::Sparse => 1,
        });
        for element in &self.elements {
            element.write(out);
        }
    }
}

/// Read the run-length section and return the row indexes of non-default
/// values.
pub fn read_sparse_offsets(reader: &mut dyn WireRead, rows: usize) -> Result<Vec<usize>> {
    let mut offsets = Vec::new();
    let mut position = 0usize;
    loop {
        let raw = reader.read_varint()?;
        let end = raw & END_OF_GRANULE != 0;
        let run = usize::try_from(raw & !END_OF_GRANULE)
            .map_err(|_| ChError::corrupt("sparse run length overflows usize"))?;
        let next = position
            .checked_add(run)
            .filter(|n| *n <= rows)
            .ok_or_else(|| {
                ChError::corrupt(format!(
                    "sparse runs exceed block of {rows} rows"
                ))
            })?;
        if end {
            if next != rows {
                return Err(ChError::corrupt(format!(
                    "sparse runs cover {next} rows, block has {rows}"
                )));
            }
            return Ok(offsets);
        }
        if next >= rows {
            return Err(ChError::corrupt(
                "sparse non-default value past the end of the block",
            ));
        }
        offsets.push(next);
        position = next + 1;
    }
}

/// Write the run-length section for `offsets` (strictly increasing).
pub fn write_sparse_offsets(offsets: &[usize], rows: usize, out: &mut Vec<u8>) {
    let mut position = 0usize;
    for &offset in offsets {
        out.put_varint((offset - position) as u64);
        position = offset + 1;
    }
    out.put_varint(rows.saturating_sub(position) as u64 | END_OF_GRANULE);
}

/// Expand non-default `values` at `offsets` into a dense column.
pub fn expand_sparse(
    ty: &ColumnType,
    offsets: &[usize],
    values: Vec<Value>,
    rows: usize,
) -> Result<Vec<Value>> {
    if offsets.len() != values.len() {
        return Err(ChError::corrupt(format!(
            "sparse column has {} offsets but {} values",
            offsets.len(),
            values.len()
        )));
    }
    let default = ty.default_value();
    let mut dense = Vec::with_capacity(rows.min(MAX_PREALLOC_ROWS));
    let mut values = values.into_iter();
    let mut next_offsets = offsets.iter().peekable();
    for row in 0..rows {
        if next_offsets.peek() == Some(&&row) {
            next_offsets.next();
            dense.push(values.next().unwrap_or_else(|| default.clone()));
        } else {
            dense.push(default.clone());
        }
    }
    Ok(dense)
}
