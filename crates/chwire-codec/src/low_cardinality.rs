//! `LowCardinality(T)` dictionary encoding.
//!
//! State prefix (once per column per block, before any data):
//!
//! ```text
//! u64  key serialization version (always 1: shared dictionaries with additional keys)
//! ```
//!
//! Per block:
//!
//! ```text
//! u64  flags: index width code (low byte) | HAS_ADDITIONAL_KEYS | NEED_UPDATE_DICTIONARY
//! u64  key count        \ only when HAS_ADDITIONAL_KEYS
//! ...  keys encoded as T /
//! u64  row count
//! ...  one index per row, 1/2/4/8 bytes wide
//! ```
//!
//! For `LowCardinality(Nullable(T))` the keys are encoded as `T` and slot 0
//! stands for NULL. A column with zero rows writes nothing at all.
//!
//! The writer's dictionary keeps slots stable across blocks until it holds
//! more than its key limit; the next block then starts a fresh dictionary and
//! flags `NEED_UPDATE_DICTIONARY`.

use std::collections::HashMap;

use chwire_error::{ChError, Result};
use chwire_types::limits::{MAX_LOW_CARDINALITY_SHARED_KEYS, MAX_PREALLOC_ROWS};
use chwire_types::{ColumnType, Value, WireRead, WireReadExt, WireWrite, WireWriteExt};
use tracing::trace;

use crate::scalar::{read_scalar_column, write_scalar};

pub const KEY_SERIALIZATION_VERSION: u64 = 1;
pub const INDEX_WIDTH_MASK: u64 = 0xff;
pub const NEED_GLOBAL_DICTIONARY: u64 = 1 << 8;
pub const HAS_ADDITIONAL_KEYS: u64 = 1 << 9;
pub const NEED_UPDATE_DICTIONARY: u64 = 1 << 10;

/// Width of the per-row index, as coded in the low byte of the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWidth {
    U8 = 0,
    U16 = 1,
    U32 = 2,
    U64 = 3,
}

impl IndexWidth {
    /// Smallest width able to address `dictionary_len` slots.
    #[must_use]
    pub const fn for_dictionary_len(dictionary_len: u64) -> Self {
        if dictionary_len <= 1 << 8 {
            Self::U8
        } else if dictionary_len <= 1 << 16 {
            Self::U16
        } else if dictionary_len <= 1 << 32 {
            Self::U32
        } else {
            Self::U64
        }
    }

    fn from_code(code: u64) -> Result<Self> {
        match code {
            0 => Ok(Self::U8),
            1 => Ok(Self::U16),
            2 => Ok(Self::U32),
            3 => Ok(Self::U64),
            other => Err(ChError::corrupt(format!(
                "unknown LowCardinality index width code {other}"
            ))),
        }
    }

    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }
}

/// Key-to-slot index owned by one column for the span of one write operation.
///
/// A key keeps its slot for every later block and each block resends the
/// full key set, until the dictionary outgrows its key limit and is reset.
#[derive(Debug, Clone)]
pub struct LowCardinalityDictionary {
    key_type: ColumnType,
    nullable: bool,
    keys: Vec<u8>,
    slots: HashMap<Vec<u8>, u64>,
    len: u64,
    sent_len: u64,
    /// Slots and key bytes of the NULL placeholder, kept across resets.
    base: (u64, usize),
    key_limit: u64,
    resets: u64,
}

impl LowCardinalityDictionary {
    /// Dictionary for `LowCardinality(inner)`.
    #[must_use]
    pub fn new(inner: &ColumnType) -> Self {
        Self::with_key_limit(inner, MAX_LOW_CARDINALITY_SHARED_KEYS)
    }

    /// Dictionary that starts over once it holds more than `key_limit` keys.
    #[must_use]
    pub fn with_key_limit(inner: &ColumnType, key_limit: usize) -> Self {
        let nullable = inner.is_nullable();
        let key_type = inner.non_nullable().clone();
        let mut dictionary = Self {
            key_type,
            nullable,
            keys: Vec::new(),
            slots: HashMap::new(),
            len: 0,
            sent_len: 0,
            base: (0, 0),
            key_limit: key_limit.max(1) as u64,
            resets: 0,
        };
        if nullable {
            // Slot 0 is the NULL placeholder; it carries the key type's default.
            let mut placeholder = Vec::new();
            if write_scalar(
                &dictionary.key_type,
                &dictionary.key_type.default_value(),
                &mut placeholder,
            )
            .is_ok()
            {
                dictionary.keys.extend_from_slice(&placeholder);
                dictionary.len = 1;
                dictionary.base = (1, placeholder.len());
            }
        }
        dictionary
    }

    /// Times the dictionary was started over after outgrowing its limit.
    #[must_use]
    pub const fn resets(&self) -> u64 {
        self.resets
    }

    /// Drop every slot at or above `len`.
    fn truncate(&mut self, len: u64, key_bytes: usize) {
        self.keys.truncate(key_bytes);
        self.slots.retain(|_, slot| *slot < len);
        self.len = len;
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slot for `value`, inserting it when new.
    pub fn slot_for(&mut self, value: &Value) -> Result<u64> {
        if value.is_null() {
            if self.nullable {
                return Ok(0);
            }
            return Err(ChError::codec(
                format!("LowCardinality({})", self.key_type),
                "NULL is not allowed in a non-nullable column",
            ));
        }
        let mut encoded = Vec::new();
        write_scalar(&self.key_type, value, &mut encoded)?;
        if let Some(slot) = self.slots.get(&encoded) {
            return Ok(*slot);
        }
        let slot = self.len;
        self.keys.extend_from_slice(&encoded);
        self.slots.insert(encoded, slot);
        self.len += 1;
        Ok(slot)
    }

    /// Encode one block of `values`.
    pub fn encode_block(&mut self, values: &[&Value], out: &mut Vec<u8>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        if self.len > self.key_limit {
            let (len, key_bytes) = self.base;
            trace!(keys = self.len, limit = self.key_limit, "low cardinality dictionary reset");
            self.truncate(len, key_bytes);
            self.sent_len = 0;
            self.resets += 1;
        }
        // A failed block must not leave unsent keys behind.
        let (start_len, start_bytes) = (self.len, self.keys.len());
        let mut indexes = Vec::with_capacity(values.len());
        for (row, value) in values.iter().enumerate() {
            match self.slot_for(value) {
                Ok(slot) => indexes.push(slot),
                Err(err) => {
                    self.truncate(start_len, start_bytes);
                    return Err(err.at_row(row));
                }
            }
        }
        let width = IndexWidth::for_dictionary_len(self.len);
        let mut flags = width as u64 | HAS_ADDITIONAL_KEYS;
        if self.len != self.sent_len {
            flags |= NEED_UPDATE_DICTIONARY;
        }
        trace!(
            keys = self.len,
            new_keys = self.len - self.sent_len,
            rows = values.len(),
            index_bytes = width.bytes(),
            "low cardinality block"
        );
        out.put_u64_le(flags);
        out.put_u64_le(self.len);
        out.put_bytes(&self.keys);
        out.put_u64_le(values.len() as u64);
        for index in indexes {
            #[allow(clippy::cast_possible_truncation)]
            match width {
                IndexWidth::U8 => out.put_u8(index as u8),
                IndexWidth::U16 => out.put_u16_le(index as u16),
                IndexWidth::U32 => out.put_u32_le(index as u32),
                IndexWidth::U64 => out.put_u64_le(index),
            }
        }
        self.sent_len = self.len;
        Ok(())
    }
}

/// Decoded dictionary kept between blocks of one read.
#[derive(Debug, Clone, Default)]
pub struct LowCardinalityReadState {
    keys: Option<Vec<Value>>,
}

impl LowCardinalityReadState {
    /// Decode one block of `rows` values of `LowCardinality(inner)`.
    pub fn decode_block(
        &mut self,
        inner: &ColumnType,
        reader: &mut dyn WireRead,
        rows: usize,
    ) -> Result<Vec<Value>> {
        if rows == 0 {
            return Ok(Vec::new());
        }
        let flags = reader.read_u64_le()?;
        if flags & NEED_GLOBAL_DICTIONARY != 0 {
            return Err(ChError::corrupt(
                "LowCardinality global dictionaries are not supported in native blocks",
            ));
        }
        let width = IndexWidth::from_code(flags & INDEX_WIDTH_MASK)?;
        if flags & HAS_ADDITIONAL_KEYS != 0 {
            let key_count = read_count(reader, "LowCardinality key count")?;
            let mut keys = read_scalar_column(inner.non_nullable(), reader, key_count)?;
            if inner.is_nullable() {
                if keys.is_empty() {
                    return Err(ChError::corrupt(
                        "LowCardinality(Nullable) dictionary lacks the NULL slot",
                    ));
                }
                keys[0] = Value::Null;
            }
            self.keys = Some(keys);
        }
        let Some(keys) = self.keys.as_ref() else {
            return Err(ChError::corrupt(
                "LowCardinality block references a dictionary that was never sent",
            ));
        };
        let row_count = read_count(reader, "LowCardinality row count")?;
        if row_count != rows {
            return Err(ChError::corrupt(format!(
                "LowCardinality carries {row_count} rows, block has {rows}"
            )));
        }
        let mut values = Vec::with_capacity(rows.min(MAX_PREALLOC_ROWS));
        for _ in 0..rows {
            let index = match width {
                IndexWidth::U8 => u64::from(reader.read_u8()?),
                IndexWidth::U16 => u64::from(reader.read_u16_le()?),
                IndexWidth::U32 => u64::from(reader.read_u32_le()?),
                IndexWidth::U64 => reader.read_u64_le()?,
            };
            let value = usize::try_from(index)
                .ok()
                .and_then(|i| keys.get(i))
                .ok_or_else(|| {
                    ChError::corrupt(format!(
                        "LowCardinality index {index} outside dictionary of {}",
                        keys.len()
                    ))
                })?;
            values.push(value.clone());
        }
        Ok(values)
    }
}

fn read_count(reader: &mut dyn WireRead, what: &str) -> Result<usize> {
    let raw = reader.read_u64_le()?;
    usize::try_from(raw)
        .ok()
        .filter(|n| *n <= u32::MAX as usize)
        .ok_or_else(|| ChError::corrupt(format!("{what} {raw} is implausible")))
}

/// Read and check the key serialization version.
pub fn read_version(reader: &mut dyn WireRead) -> Result<()> {
    let version = reader.read_u64_le()?;
    if version != KEY_SERIALIZATION_VERSION {
        return Err(ChError::corrupt(format!(
            "unsupported LowCardinality key serialization version {version}"
        )));
    }
    Ok(())
}
