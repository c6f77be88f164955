use thiserror::Error;

/// Primary error type for chwire operations.
///
/// Structured variants for each failure class the engine can surface, with
/// enough context (type name, column name, row/block index) to diagnose a
/// failure without access to engine internals.
#[derive(Error, Debug)]
pub enum ChError {
    // === Type Errors ===
    /// Malformed type descriptor text.
    #[error("cannot parse type '{input}' at offset {offset}: {detail}")]
    TypeParse {
        input: String,
        offset: usize,
        detail: String,
    },

    // === Codec Errors ===
    /// Value or layout mismatch while encoding or decoding a column.
    #[error("{}", codec_message(.type_name, .column, .block, .row, .detail))]
    Codec {
        type_name: String,
        column: Option<String>,
        block: Option<usize>,
        row: Option<usize>,
        detail: String,
    },

    /// Numeric value does not fit the target wire representation.
    #[error("{}", overflow_message(.type_name, .column, .value))]
    Overflow {
        type_name: String,
        column: Option<String>,
        value: String,
    },

    /// A column source ran dry before the requested row count, or a row
    /// carries the wrong number of values.
    #[error("{}", length_message(.column, .expected, .actual))]
    ColumnLengthMismatch {
        column: Option<String>,
        expected: usize,
        actual: usize,
    },

    /// A column source failed while producing a value.
    #[error("{}", source_message(.column, .row, .detail))]
    Source {
        column: Option<String>,
        row: usize,
        detail: String,
    },

    // === Stream Errors ===
    /// Block checksum did not match the payload.
    #[error(
        "block checksum mismatch: expected {expected_hi:016x}{expected_lo:016x}, \
         computed {actual_hi:016x}{actual_lo:016x}"
    )]
    ChecksumMismatch {
        expected_lo: u64,
        expected_hi: u64,
        actual_lo: u64,
        actual_hi: u64,
    },

    /// The byte stream violates the protocol framing.
    #[error("protocol stream is corrupt: {detail}")]
    StreamCorrupt { detail: String },

    /// Compressor collaborator failed.
    #[error("compression failed ({method}): {detail}")]
    Compression { method: String, detail: String },

    /// Exception packet sent by the server.
    #[error("server exception {code} ({name}): {message}")]
    ServerException {
        code: i32,
        name: String,
        message: String,
    },

    // === Caller Errors ===
    /// Reader configured incorrectly (converter registered too late or for
    /// an incompatible column).
    #[error("reader configuration error: {detail}")]
    ReaderConfiguration { detail: String },

    /// Operation is not valid in the current state.
    #[error("invalid state: {detail}")]
    InvalidState { detail: String },

    /// Manual transactions need a transport with block acknowledgment.
    #[error("transport does not support transactional block acknowledgment")]
    TransactionUnsupported,

    /// Operation cancelled at a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    // === I/O Errors ===
    /// Transport I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Internal Errors ===
    /// Feature or type not supported by this engine.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

fn codec_message(
    type_name: &str,
    column: &Option<String>,
    block: &Option<usize>,
    row: &Option<usize>,
    detail: &str,
) -> String {
    let mut msg = format!("codec error for {type_name}");
    if let Some(column) = column {
        msg.push_str(&format!(" in column '{column}'"));
    }
    if let Some(block) = block {
        msg.push_str(&format!(" (block {block})"));
    }
    if let Some(row) = row {
        msg.push_str(&format!(" at row {row}"));
    }
    msg.push_str(": ");
    msg.push_str(detail);
    msg
}

fn overflow_message(type_name: &str, column: &Option<String>, value: &str) -> String {
    match column {
        Some(column) => format!("value {value} overflows {type_name} in column '{column}'"),
        None => format!("value {value} overflows {type_name}"),
    }
}

fn length_message(column: &Option<String>, expected: &usize, actual: &usize) -> String {
    match column {
        Some(column) => format!(
            "column '{column}' ended after {actual} rows, expected {expected}"
        ),
        None => format!("expected {expected} values, got {actual}"),
    }
}

fn source_message(column: &Option<String>, row: &usize, detail: &str) -> String {
    match column {
        Some(column) => format!("source for column '{column}' failed at row {row}: {detail}"),
        None => format!("column source failed at row {row}: {detail}"),
    }
}

/// Coarse classification matching the engine's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TypeParse,
    Codec,
    Checksum,
    StreamCorrupt,
    ColumnLengthMismatch,
    ReaderConfiguration,
    Overflow,
    Server,
    Cancelled,
    Io,
    Usage,
    Internal,
}

impl ChError {
    /// Map this error onto the taxonomy.
    #[allow(clippy::match_same_arms)]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::TypeParse { .. } => ErrorKind::TypeParse,
            Self::Codec { .. } | Self::Source { .. } => ErrorKind::Codec,
            Self::Overflow { .. } => ErrorKind::Overflow,
            Self::ColumnLengthMismatch { .. } => ErrorKind::ColumnLengthMismatch,
            Self::ChecksumMismatch { .. } => ErrorKind::Checksum,
            Self::StreamCorrupt { .. } | Self::Compression { .. } => ErrorKind::StreamCorrupt,
            Self::ServerException { .. } => ErrorKind::Server,
            Self::ReaderConfiguration { .. } => ErrorKind::ReaderConfiguration,
            Self::InvalidState { .. } | Self::TransactionUnsupported | Self::Unsupported(_) => {
                ErrorKind::Usage
            }
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the connection must be torn down after this error.
    ///
    /// Protocol framing has no resynchronization primitive, so anything that
    /// leaves the byte stream in an unknown position is fatal.
    pub const fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::StreamCorrupt { .. }
                | Self::Compression { .. }
                | Self::Io(_)
        )
    }

    /// Whether the caller can likely fix this by correcting its input.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TypeParse { .. }
                | Self::ReaderConfiguration { .. }
                | Self::Overflow { .. }
                | Self::ColumnLengthMismatch { .. }
                | Self::InvalidState { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::TypeParse { .. } => Some("Check parentheses, quoting and argument counts"),
            Self::ReaderConfiguration { .. } => {
                Some("Register converters before reading the first row")
            }
            Self::ChecksumMismatch { .. } | Self::StreamCorrupt { .. } => {
                Some("Close the connection and reconnect; the stream cannot be resynchronized")
            }
            Self::TransactionUnsupported => {
                Some("Use TransactionMode::Auto or a transport that acknowledges blocks")
            }
            Self::Overflow { .. } => Some("Use a wider column type or clamp the value"),
            _ => None,
        }
    }

    /// Attach column name and block index to a codec-level error.
    ///
    /// Errors that already carry a column keep it.
    #[must_use]
    pub fn in_column(self, name: &str, block_index: usize) -> Self {
        match self {
            Self::Codec {
                type_name,
                column,
                block,
                row,
                detail,
            } => Self::Codec {
                type_name,
                column: column.or_else(|| Some(name.to_owned())),
                block: block.or(Some(block_index)),
                row,
                detail,
            },
            Self::Overflow {
                type_name,
                column,
                value,
            } => Self::Overflow {
                type_name,
                column: column.or_else(|| Some(name.to_owned())),
                value,
            },
            Self::ColumnLengthMismatch {
                column,
                expected,
                actual,
            } => Self::ColumnLengthMismatch {
                column: column.or_else(|| Some(name.to_owned())),
                expected,
                actual,
            },
            Self::Source {
                column,
                row,
                detail,
            } => Self::Source {
                column: column.or_else(|| Some(name.to_owned())),
                row,
                detail,
            },
            other => other,
        }
    }

    /// Attach a row index to a codec error that lacks one.
    #[must_use]
    pub fn at_row(self, row_index: usize) -> Self {
        match self {
            Self::Codec {
                type_name,
                column,
                block,
                row,
                detail,
            } => Self::Codec {
                type_name,
                column,
                block,
                row: row.or(Some(row_index)),
                detail,
            },
            other => other,
        }
    }

    /// Create a type parse error.
    pub fn type_parse(input: impl Into<String>, offset: usize, detail: impl Into<String>) -> Self {
        Self::TypeParse {
            input: input.into(),
            offset,
            detail: detail.into(),
        }
    }

    /// Create a column source failure at `row`.
    pub fn source_failed(row: usize, detail: impl ToString) -> Self {
        Self::Source {
            column: None,
            row,
            detail: detail.to_string(),
        }
    }

    /// Create a codec error for a type.
    pub fn codec(type_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Codec {
            type_name: type_name.into(),
            column: None,
            block: None,
            row: None,
            detail: detail.into(),
        }
    }

    /// Create an overflow error.
    pub fn overflow(type_name: impl Into<String>, value: impl ToString) -> Self {
        Self::Overflow {
            type_name: type_name.into(),
            column: None,
            value: value.to_string(),
        }
    }

    /// Create a stream corruption error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::StreamCorrupt {
            detail: detail.into(),
        }
    }

    /// Create a reader configuration error.
    pub fn reader_config(detail: impl Into<String>) -> Self {
        Self::ReaderConfiguration {
            detail: detail.into(),
        }
    }

    /// Create an invalid-state error.
    pub fn invalid_state(detail: impl Into<String>) -> Self {
        Self::InvalidState {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `ChError`.
pub type Result<T> = std::result::Result<T, ChError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_type_parse() {
        let err = ChError::type_parse("Array(", 6, "unexpected end of input");
        assert_eq!(
            err.to_string(),
            "cannot parse type 'Array(' at offset 6: unexpected end of input"
        );
    }

    #[test]
    fn error_display_codec_with_context() {
        let err = ChError::codec("FixedString(2)", "value is 3 bytes long")
            .at_row(7)
            .in_column("code", 1);
        assert_eq!(
            err.to_string(),
            "codec error for FixedString(2) in column 'code' (block 1) at row 7: value is 3 bytes long"
        );
    }

    #[test]
    fn error_display_checksum() {
        let err = ChError::ChecksumMismatch {
            expected_lo: 1,
            expected_hi: 2,
            actual_lo: 3,
            actual_hi: 4,
        };
        assert_eq!(
            err.to_string(),
            "block checksum mismatch: expected 00000000000000020000000000000001, \
             computed 00000000000000040000000000000003"
        );
    }

    #[test]
    fn in_column_keeps_existing_context() {
        let err = ChError::overflow("UInt8", 300).in_column("a", 0).in_column("b", 1);
        assert!(matches!(
            err,
            ChError::Overflow { column: Some(ref c), .. } if c == "a"
        ));
        assert_eq!(err.to_string(), "value 300 overflows UInt8 in column 'a'");
    }

    #[test]
    fn length_mismatch_display() {
        let err = ChError::ColumnLengthMismatch {
            column: None,
            expected: 10,
            actual: 4,
        }
        .in_column("id", 2);
        assert_eq!(err.to_string(), "column 'id' ended after 4 rows, expected 10");
        assert_eq!(err.kind(), ErrorKind::ColumnLengthMismatch);

        let arity = ChError::ColumnLengthMismatch {
            column: None,
            expected: 3,
            actual: 2,
        };
        assert_eq!(arity.to_string(), "expected 3 values, got 2");
        assert!(arity.is_user_recoverable());
    }

    #[test]
    fn source_failure_names_column_and_row() {
        let err = ChError::source_failed(41, "sensor offline").in_column("temp", 3);
        assert_eq!(
            err.to_string(),
            "source for column 'temp' failed at row 41: sensor offline"
        );
        assert_eq!(err.kind(), ErrorKind::Codec);
        assert!(!err.is_fatal_to_connection());
    }

    #[test]
    fn kind_mapping() {
        assert_eq!(ChError::type_parse("x", 0, "y").kind(), ErrorKind::TypeParse);
        assert_eq!(ChError::codec("Int8", "x").kind(), ErrorKind::Codec);
        assert_eq!(ChError::corrupt("x").kind(), ErrorKind::StreamCorrupt);
        assert_eq!(ChError::reader_config("x").kind(), ErrorKind::ReaderConfiguration);
        assert_eq!(ChError::overflow("Int8", 1000).kind(), ErrorKind::Overflow);
        assert_eq!(ChError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(ChError::TransactionUnsupported.kind(), ErrorKind::Usage);
    }

    #[test]
    fn fatal_to_connection() {
        assert!(ChError::corrupt("bad offsets").is_fatal_to_connection());
        assert!(
            ChError::ChecksumMismatch {
                expected_lo: 0,
                expected_hi: 0,
                actual_lo: 1,
                actual_hi: 1,
            }
            .is_fatal_to_connection()
        );
        assert!(!ChError::codec("String", "x").is_fatal_to_connection());
        assert!(!ChError::reader_config("late").is_fatal_to_connection());
    }

    #[test]
    fn user_recoverable() {
        assert!(ChError::type_parse("Foo", 0, "unknown type").is_user_recoverable());
        assert!(ChError::reader_config("late").is_user_recoverable());
        assert!(!ChError::corrupt("x").is_user_recoverable());
        assert!(!ChError::internal("bug").is_user_recoverable());
    }

    #[test]
    fn suggestions() {
        assert!(ChError::corrupt("x").suggestion().is_some());
        assert!(ChError::TransactionUnsupported.suggestion().is_some());
        assert!(ChError::Cancelled.suggestion().is_none());
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: ChError = io_err.into();
        assert!(matches!(err, ChError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.is_fatal_to_connection());
    }
}
