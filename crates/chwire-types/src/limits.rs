//! Protocol revisions and size limits.

/// Server revision that introduced block info in Data packets.
pub const DBMS_MIN_REVISION_WITH_BLOCK_INFO: u64 = 51_903;

/// Server revision that added written rows/bytes to Progress packets.
pub const DBMS_MIN_REVISION_WITH_CLIENT_WRITE_INFO: u64 = 54_420;

/// Server revision that added the per-column custom serialization flag.
pub const DBMS_MIN_REVISION_WITH_CUSTOM_SERIALIZATION: u64 = 54_454;

/// Server revision that added elapsed time to Progress packets.
pub const DBMS_MIN_REVISION_WITH_SERVER_QUERY_TIME_IN_PROGRESS: u64 = 54_460;

/// Revision spoken when the caller does not pick one.
pub const DEFAULT_PROTOCOL_REVISION: u64 = DBMS_MIN_REVISION_WITH_SERVER_QUERY_TIME_IN_PROGRESS;

/// Rows per block when `max_block_size` is zero or unset.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 8192;

/// Encoded bytes handed to the compressor per envelope.
pub const MAX_COMPRESSED_FRAME_INPUT: usize = 1 << 20;

/// Largest decompressed size a single envelope may claim.
pub const MAX_DECOMPRESSED_FRAME_SIZE: usize = 1 << 30;

/// Largest length prefix accepted for a single string value.
pub const MAX_STRING_LEN: usize = 1 << 30;

/// Bytes read per step when a wire-declared length drives the read.
pub const WIRE_READ_CHUNK: usize = 64 * 1024;

/// Upper bound on speculative `Vec` capacity taken from wire-supplied counts.
pub const MAX_PREALLOC_ROWS: usize = 1 << 16;

/// Keys a LowCardinality write dictionary keeps before starting over.
pub const MAX_LOW_CARDINALITY_SHARED_KEYS: usize = 1 << 14;

/// Longest valid unsigned LEB128 encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;
