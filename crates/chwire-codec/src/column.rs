//! Column encode/decode dispatch over the type tree.
//!
//! Container layouts:
//!
//! | Type              | Layout                                                   |
//! |-------------------|----------------------------------------------------------|
//! | `Nullable(T)`     | one null flag byte per row, then `T` for every row       |
//! | `Array(T)`        | cumulative end offsets as u64 LE, then flattened `T`     |
//! | `Tuple(T1..Tn)`   | each element column in turn, all sized by the row count |
//! | `Map(K, V)`       | `Array(Tuple(K, V))`: offsets, then keys, then values    |
//! | `LowCardinality`  | see [`crate::low_cardinality`]                           |
//!
//! State prefixes for every `LowCardinality` node are written depth-first
//! before any column data. Both the prefix and the data are skipped for a
//! zero-row block.

use std::sync::Arc;

use chwire_error::{ChError, Result};
use chwire_types::limits::MAX_PREALLOC_ROWS;
use chwire_types::{ColumnType, Value, WireRead, WireReadExt, WireWrite, WireWriteExt};

use crate::low_cardinality::{
    KEY_SERIALIZATION_VERSION, LowCardinalityDictionary, LowCardinalityReadState, read_version,
};
use crate::scalar::{read_scalar_column, write_scalar};
use crate::sparse::{SerializationKind, SerializationKinds, expand_sparse, read_sparse_offsets};

/// Largest flattened element count accepted from array offsets.
pub const MAX_ARRAY_ELEMENTS: u64 = 1 << 32;

/// Dictionaries for every `LowCardinality` node of one column, in depth-first
/// order, owned by one write operation.
#[derive(Debug, Clone, Default)]
pub struct EncodeState {
    dictionaries: Vec<LowCardinalityDictionary>,
    cursor: usize,
}

impl EncodeState {
    #[must_use]
    pub fn new(ty: &ColumnType) -> Self {
        let mut dictionaries = Vec::new();
        visit_low_cardinality(ty, &mut |inner| {
            dictionaries.push(LowCardinalityDictionary::new(inner));
        });
        Self {
            dictionaries,
            cursor: 0,
        }
    }

    /// Total keys across all dictionaries.
    #[must_use]
    pub fn dictionary_keys(&self) -> u64 {
        self.dictionaries.iter().map(LowCardinalityDictionary::len).sum()
    }

    fn next(&mut self) -> Result<&mut LowCardinalityDictionary> {
        let index = self.cursor;
        self.cursor += 1;
        self.dictionaries
            .get_mut(index)
            .ok_or_else(|| ChError::internal("LowCardinality dictionary missing for column"))
    }
}

/// Read-side counterpart of [`EncodeState`], owned by one read operation.
#[derive(Debug, Clone, Default)]
pub struct DecodeState {
    dictionaries: Vec<LowCardinalityReadState>,
    cursor: usize,
}

impl DecodeState {
    #[must_use]
    pub fn new(ty: &ColumnType) -> Self {
        let mut count = 0;
        visit_low_cardinality(ty, &mut |_| count += 1);
        Self {
            dictionaries: vec![LowCardinalityReadState::default(); count],
            cursor: 0,
        }
    }

    fn next(&mut self) -> Result<&mut LowCardinalityReadState> {
        let index = self.cursor;
        self.cursor += 1;
        self.dictionaries
            .get_mut(index)
            .ok_or_else(|| ChError::internal("LowCardinality state missing for column"))
    }
}

fn visit_low_cardinality<'t>(ty: &'t ColumnType, f: &mut dyn FnMut(&'t ColumnType)) {
    match ty {
        ColumnType::LowCardinality(inner) => f(inner),
        ColumnType::Nullable(inner) | ColumnType::Array(inner) => visit_low_cardinality(inner, f),
        ColumnType::Tuple(elements) => {
            for element in elements {
                visit_low_cardinality(&element.ty, f);
            }
        }
        ColumnType::Map(key, value) => {
            visit_low_cardinality(key, f);
            visit_low_cardinality(value, f);
        }
        _ => {}
    }
}

/// Write the serialization state prefix of `ty`.
pub fn write_prefix(ty: &ColumnType, out: &mut Vec<u8>) {
    visit_low_cardinality(ty, &mut |_| out.put_u64_le(KEY_SERIALIZATION_VERSION));
}

/// Read and validate the serialization state prefix of `ty`.
pub fn read_prefix(ty: &ColumnType, reader: &mut dyn WireRead) -> Result<()> {
    let mut count = 0;
    visit_low_cardinality(ty, &mut |_| count += 1);
    for _ in 0..count {
        read_version(reader)?;
    }
    Ok(())
}

/// Encode the data section of one column (no prefix).
pub fn encode_data(
    ty: &ColumnType,
    values: &[&Value],
    out: &mut Vec<u8>,
    state: &mut EncodeState,
) -> Result<()> {
    match ty {
        ColumnType::Nullable(inner) => {
            let default = inner.default_value();
            let mut payload = Vec::with_capacity(values.len());
            for value in values {
                if value.is_null() {
                    out.put_u8(1);
                    payload.push(&default);
                } else {
                    out.put_u8(0);
                    payload.push(*value);
                }
            }
            encode_data(inner, &payload, out, state)
        }
        ColumnType::LowCardinality(_) => state.next()?.encode_block(values, out),
        ColumnType::Array(inner) => {
            let mut flattened = Vec::new();
            let mut offset = 0u64;
            for (row, value) in values.iter().enumerate() {
                let Value::Array(items) = value else {
                    return Err(ChError::codec(
                        ty.to_string(),
                        format!("expected an array, got {} value {value}", value.kind_name()),
                    )
                    .at_row(row));
                };
                offset += items.len() as u64;
                out.put_u64_le(offset);
                flattened.extend(items.iter());
            }
            encode_data(inner, &flattened, out, state)
        }
        ColumnType::Tuple(elements) => {
            let mut columns: Vec<Vec<&Value>> = vec![Vec::with_capacity(values.len()); elements.len()];
            for (row, value) in values.iter().enumerate() {
                match value {
                    Value::Tuple(items) if items.len() == elements.len() => {
                        for (column, item) in columns.iter_mut().zip(items) {
                            column.push(item);
                        }
                    }
                    Value::Tuple(items) => {
                        return Err(ChError::codec(
                            ty.to_string(),
                            format!(
                                "tuple has {} elements, column expects {}",
                                items.len(),
                                elements.len()
                            ),
                        )
                        .at_row(row));
                    }
                    other => {
                        return Err(ChError::codec(
                            ty.to_string(),
                            format!("expected a tuple, got {} value {other}", other.kind_name()),
                        )
                        .at_row(row));
                    }
                }
            }
            for (element, column) in elements.iter().zip(&columns) {
                encode_data(&element.ty, column, out, state)?;
            }
            Ok(())
        }
        ColumnType::Map(key_ty, value_ty) => {
            let mut keys = Vec::new();
            let mut items = Vec::new();
            let mut offset = 0u64;
            for (row, value) in values.iter().enumerate() {
                let Value::Map(entries) = value else {
                    return Err(ChError::codec(
                        ty.to_string(),
                        format!("expected a map, got {} value {value}", value.kind_name()),
                    )
                    .at_row(row));
                };
                offset += entries.len() as u64;
                out.put_u64_le(offset);
                for (k, v) in entries {
                    keys.push(k);
                    items.push(v);
                }
            }
            encode_data(key_ty, &keys, out, state)?;
            encode_data(value_ty, &items, out, state)
        }
        _ => {
            for (row, value) in values.iter().enumerate() {
                write_scalar(ty, value, out).map_err(|e| e.at_row(row))?;
            }
            Ok(())
        }
    }
}

/// Decode the data section of one column (no prefix).
pub fn decode_data(
    ty: &ColumnType,
    reader: &mut dyn WireRead,
    rows: usize,
    state: &mut DecodeState,
) -> Result<Vec<Value>> {
    match ty {
        ColumnType::Nullable(inner) => {
            let nulls = reader.read_vec(rows)?;
            let payload = decode_data(inner, reader, rows, state)?;
            Ok(payload
                .into_iter()
                .zip(nulls)
                .map(|(value, null)| if null == 0 { value } else { Value::Null })
                .collect())
        }
        ColumnType::LowCardinality(inner) => state.next()?.decode_block(inner, reader, rows),
        ColumnType::Array(inner) => {
            let offsets = read_offsets(reader, rows)?;
            let total = offsets.last().copied().unwrap_or(0);
            let items = decode_data(inner, reader, total, state)?;
            Ok(split_by_offsets(items, &offsets)
                .into_iter()
                .map(Value::Array)
                .collect())
        }
        ColumnType::Tuple(elements) => {
            let mut columns = Vec::with_capacity(elements.len());
            for element in elements {
                columns.push(decode_data(&element.ty, reader, rows, state)?.into_iter());
            }
            Ok(transpose(columns, rows))
        }
        ColumnType::Map(key_ty, value_ty) => {
            let offsets = read_offsets(reader, rows)?;
            let total = offsets.last().copied().unwrap_or(0);
            let keys = decode_data(key_ty, reader, total, state)?;
            let values = decode_data(value_ty, reader, total, state)?;
            let entries: Vec<(Value, Value)> = keys.into_iter().zip(values).collect();
            Ok(split_by_offsets(entries, &offsets)
                .into_iter()
                .map(Value::Map)
                .collect())
        }
        _ => read_scalar_column(ty, reader, rows),
    }
}

/// Decode honoring per-column serialization kinds (sparse columns and
/// sparse tuple elements).
pub fn decode_data_with_kinds(
    ty: &ColumnType,
    kinds: &SerializationKinds,
    reader: &mut dyn WireRead,
    rows: usize,
    state: &mut DecodeState,
) -> Result<Vec<Value>> {
    if kinds.kind == SerializationKind::Sparse {
        let offsets = read_sparse_offsets(reader, rows)?;
        let nested = SerializationKinds {
            kind: SerializationKind::Default,
            elements: kinds.elements.clone(),
        };
        let values = decode_data_with_kinds(ty, &nested, reader, offsets.len(), state)?;
        return expand_sparse(ty, &offsets, values, rows);
    }
    match ty {
        ColumnType::Tuple(elements) if !kinds.is_dense() => {
            if kinds.elements.len() != elements.len() {
                return Err(ChError::corrupt(format!(
                    "serialization kinds describe {} tuple elements, type has {}",
                    kinds.elements.len(),
                    elements.len()
                )));
            }
            let mut columns = Vec::with_capacity(elements.len());
            for (element, element_kinds) in elements.iter().zip(&kinds.elements) {
                columns.push(
                    decode_data_with_kinds(&element.ty, element_kinds, reader, rows, state)?
                        .into_iter(),
                );
            }
            Ok(transpose(columns, rows))
        }
        _ => decode_data(ty, reader, rows, state),
    }
}

fn read_offsets(reader: &mut dyn WireRead, rows: usize) -> Result<Vec<usize>> {
    let mut offsets = Vec::with_capacity(rows.min(MAX_PREALLOC_ROWS));
    let mut previous = 0u64;
    for row in 0..rows {
        let offset = reader.read_u64_le()?;
        if offset < previous {
            return Err(ChError::corrupt(format!(
                "array offsets decrease at row {row}: {offset} < {previous}"
            )));
        }
        if offset > MAX_ARRAY_ELEMENTS {
            return Err(ChError::corrupt(format!(
                "array offset {offset} exceeds {MAX_ARRAY_ELEMENTS} elements"
            )));
        }
        previous = offset;
        offsets.push(usize::try_from(offset).map_err(|_| ChError::corrupt("array offset overflows usize"))?);
    }
    Ok(offsets)
}

fn split_by_offsets<T>(items: Vec<T>, offsets: &[usize]) -> Vec<Vec<T>> {
    let mut items = items.into_iter();
    let mut start = 0;
    offsets
        .iter()
        .map(|&end| {
            let chunk: Vec<T> = items.by_ref().take(end - start).collect();
            start = end;
            chunk
        })
        .collect()
}

fn transpose(mut columns: Vec<std::vec::IntoIter<Value>>, rows: usize) -> Vec<Value> {
    (0..rows)
        .map(|_| {
            Value::Tuple(
                columns
                    .iter_mut()
                    .map(|c| c.next().unwrap_or(Value::Null))
                    .collect(),
            )
        })
        .collect()
}

/// Codec bound to one column type, carrying that column's dictionary state
/// across the blocks of one operation.
#[derive(Debug, Clone)]
pub struct ColumnCodec {
    ty: Arc<ColumnType>,
    encode_state: EncodeState,
    decode_state: DecodeState,
}

impl ColumnCodec {
    #[must_use]
    pub fn new(ty: Arc<ColumnType>) -> Self {
        let encode_state = EncodeState::new(&ty);
        let decode_state = DecodeState::new(&ty);
        Self {
            ty,
            encode_state,
            decode_state,
        }
    }

    #[must_use]
    pub fn column_type(&self) -> &Arc<ColumnType> {
        &self.ty
    }

    #[must_use]
    pub fn encode_state(&self) -> &EncodeState {
        &self.encode_state
    }

    /// Encode one block worth of values: prefix, then data.
    pub fn encode(&mut self, values: &[Value], out: &mut Vec<u8>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let refs: Vec<&Value> = values.iter().collect();
        let start = out.len();
        write_prefix(&self.ty, out);
        self.encode_state.cursor = 0;
        let result = encode_data(&self.ty, &refs, out, &mut self.encode_state);
        if result.is_err() {
            out.truncate(start);
        }
        result
    }

    /// Decode one block of `rows` values: prefix, then data.
    pub fn decode(&mut self, reader: &mut dyn WireRead, rows: usize) -> Result<Vec<Value>> {
        self.decode_with_kinds(reader, rows, None)
    }

    pub fn decode_with_kinds(
        &mut self,
        reader: &mut dyn WireRead,
        rows: usize,
        kinds: Option<&SerializationKinds>,
    ) -> Result<Vec<Value>> {
        if rows == 0 {
            return Ok(Vec::new());
        }
        read_prefix(&self.ty, reader)?;
        self.decode_state.cursor = 0;
        match kinds {
            Some(kinds) => {
                decode_data_with_kinds(&self.ty, kinds, reader, rows, &mut self.decode_state)
            }
            None => decode_data(&self.ty, reader, rows, &mut self.decode_state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chwire_types::{SliceReader, parse_type};

    fn codec(ty: &str) -> ColumnCodec {
        ColumnCodec::new(Arc::new(parse_type(ty).expect("type")))
    }

    fn roundtrip(ty: &str, values: Vec<Value>) -> Vec<Value> {
        let mut out = Vec::new();
        codec(ty).encode(&values, &mut out).expect("encode");
        let mut reader = SliceReader::new(&out);
        let decoded = codec(ty).decode(&mut reader, values.len()).expect("decode");
        assert!(reader.is_empty(), "{ty}: trailing bytes");
        decoded
    }

    #[test]
    fn huge_row_count_on_a_short_stream_fails() {
        let bytes = [0u8, 1, 0];
        let mut reader = SliceReader::new(&bytes);
        let err = codec("Nullable(UInt8)")
            .decode(&mut reader, u32::MAX as usize)
            .unwrap_err();
        assert!(err.is_fatal_to_connection(), "{err:?}");
    }

    #[test]
    fn nullable_layout() {
        let values = vec![Value::UInt8(5), Value::Null];
        let mut out = Vec::new();
        codec("Nullable(UInt8)").encode(&values, &mut out).expect("encode");
        assert_eq!(out, vec![0, 1, 5, 0]);
        assert_eq!(roundtrip("Nullable(UInt8)", values.clone()), values);
    }

    #[test]
    fn array_layout() {
        let values = vec![
            Value::Array(vec![Value::Int8(1), Value::Int8(2)]),
            Value::Array(vec![]),
            Value::Array(vec![Value::Int8(3)]),
        ];
        let mut out = Vec::new();
        codec("Array(Int8)").encode(&values, &mut out).expect("encode");
        let mut expected = Vec::new();
        for offset in [2u64, 2, 3] {
            expected.extend_from_slice(&offset.to_le_bytes());
        }
        expected.extend_from_slice(&[1, 2, 3]);
        assert_eq!(out, expected);
    }

    #[test]
    fn map_is_array_of_tuples() {
        let map = vec![Value::Map(vec![
            (Value::from("a"), Value::UInt8(1)),
            (Value::from("b"), Value::UInt8(2)),
        ])];
        let tuples = vec![Value::Array(vec![
            Value::Tuple(vec![Value::from("a"), Value::UInt8(1)]),
            Value::Tuple(vec![Value::from("b"), Value::UInt8(2)]),
        ])];
        let mut as_map = Vec::new();
        codec("Map(String, UInt8)").encode(&map, &mut as_map).expect("map");
        let mut as_array = Vec::new();
        codec("Array(Tuple(String, UInt8))")
            .encode(&tuples, &mut as_array)
            .expect("array");
        assert_eq!(as_map, as_array);
        assert_eq!(roundtrip("Map(String, UInt8)", map.clone()), map);
    }

    #[test]
    fn decreasing_offsets_are_corrupt() {
        let mut data = Vec::new();
        data.put_u64_le(3);
        data.put_u64_le(1);
        let err = codec("Array(UInt8)")
            .decode(&mut SliceReader::new(&data), 2)
            .unwrap_err();
        assert!(err.is_fatal_to_connection());
        assert!(err.to_string().contains("decrease"), "{err}");
    }

    #[test]
    fn prefix_written_depth_first_for_nested_low_cardinality() {
        let values = vec![Value::Tuple(vec![
            Value::Array(vec![Value::from("x")]),
            Value::from("y"),
        ])];
        let mut out = Vec::new();
        codec("Tuple(Array(LowCardinality(String)), LowCardinality(String))")
            .encode(&values, &mut out)
            .expect("encode");
        let mut reader = SliceReader::new(&out);
        assert_eq!(reader.read_u64_le().expect("v1"), KEY_SERIALIZATION_VERSION);
        assert_eq!(reader.read_u64_le().expect("v2"), KEY_SERIALIZATION_VERSION);
        // Then the array offsets of the first element.
        assert_eq!(reader.read_u64_le().expect("offset"), 1);
    }

    #[test]
    fn failed_encode_leaves_buffer_untouched() {
        let mut out = vec![0xaa];
        let err = codec("Array(UInt8)")
            .encode(&[Value::Array(vec![]), Value::UInt8(1)], &mut out)
            .unwrap_err();
        assert_eq!(out, vec![0xaa]);
        assert!(matches!(err, ChError::Codec { row: Some(1), .. }), "{err:?}");
    }

    #[test]
    fn sparse_tuple_element() {
        let ty = parse_type("Tuple(UInt32, String)").expect("type");
        let kinds = SerializationKinds {
            kind: SerializationKind::Default,
            elements: vec![
                SerializationKinds {
                    kind: SerializationKind::Sparse,
                    elements: vec![],
                },
                SerializationKinds::default(),
            ],
        };
        let mut data = Vec::new();
        crate::sparse::write_sparse_offsets(&[2], 3, &mut data);
        data.put_u32_le(42);
        for s in ["a", "b", "c"] {
            data.put_str(s);
        }
        let decoded = ColumnCodec::new(Arc::new(ty))
            .decode_with_kinds(&mut SliceReader::new(&data), 3, Some(&kinds))
            .expect("decode");
        assert_eq!(
            decoded,
            vec![
                Value::Tuple(vec![Value::UInt32(0), Value::from("a")]),
                Value::Tuple(vec![Value::UInt32(0), Value::from("b")]),
                Value::Tuple(vec![Value::UInt32(42), Value::from("c")]),
            ]
        );
    }

    #[test]
    fn zero_rows_write_nothing() {
        let mut out = Vec::new();
        codec("LowCardinality(String)").encode(&[], &mut out).expect("encode");
        assert!(out.is_empty());
    }
}
