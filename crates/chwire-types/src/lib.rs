pub mod column_type;
pub mod cx;
pub mod decimal;
pub mod encoding;
pub mod limits;
pub mod parser;
pub mod registry;
pub mod value;

pub use column_type::{ColumnType, TupleElement, TypeLiteral};
pub use cx::Cx;
pub use decimal::Decimal;
pub use encoding::{SliceReader, WireRead, WireReadExt, WireWrite, WireWriteExt};
pub use parser::parse_type;
pub use registry::TypeRegistry;
pub use value::{U256, Value};

pub use arrow_buffer::i256;
