//! Column binary layouts of the ClickHouse native format.
//!
//! [`ColumnCodec`] is the entry point: it binds a parsed [`ColumnType`] to
//! the per-operation dictionary state and encodes or decodes one block of
//! values at a time. The free functions are exposed for block-level code that
//! drives prefixes and serialization kinds itself.
//!
//! [`ColumnType`]: chwire_types::ColumnType

pub mod column;
pub mod convert;
pub mod low_cardinality;
pub mod scalar;
pub mod sparse;

pub use column::{
    ColumnCodec, DecodeState, EncodeState, decode_data, decode_data_with_kinds, encode_data,
    read_prefix, write_prefix,
};
pub use convert::convert_value;
pub use low_cardinality::{IndexWidth, LowCardinalityDictionary, LowCardinalityReadState};
pub use scalar::{read_scalar_column, write_scalar};
pub use sparse::{SerializationKind, SerializationKinds};
