//! Connection, writer and reader settings.

use chwire_block::CompressionMethod;
use chwire_error::{ChError, Result};
use chwire_types::limits::{DBMS_MIN_REVISION_WITH_BLOCK_INFO, DEFAULT_MAX_BLOCK_SIZE, DEFAULT_PROTOCOL_REVISION};
use serde::{Deserialize, Serialize};

/// Largest block the writer will buffer, in rows.
pub const MAX_BLOCK_SIZE_CEILING: usize = 1 << 24;

/// Per-connection protocol settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Negotiated protocol revision.
    ///
    /// Default: 54460. Revisions gate block info, custom serialization flags
    /// and progress packet fields.
    pub revision: u64,
    /// Envelope compression; `None` sends plain native blocks.
    pub compression: Option<CompressionMethod>,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            revision: DEFAULT_PROTOCOL_REVISION,
            compression: None,
        }
    }
}

impl ProtocolSettings {
    /// Clamp the revision into the supported range.
    #[must_use]
    pub fn validated(mut self) -> Self {
        if self.revision < DBMS_MIN_REVISION_WITH_BLOCK_INFO {
            self.revision = DBMS_MIN_REVISION_WITH_BLOCK_INFO;
        }
        if self.revision > DEFAULT_PROTOCOL_REVISION {
            self.revision = DEFAULT_PROTOCOL_REVISION;
        }
        self
    }

    /// Parse settings from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str::<Self>(text)
            .map(Self::validated)
            .map_err(|e| ChError::Unsupported(format!("invalid protocol settings: {e}")))
    }
}

/// How flushed blocks become durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// Every flushed block is committed as it is sent.
    #[default]
    Auto,
    /// Flushed blocks stay provisional until `commit`.
    Manual,
    /// Rows are committed block by block as each block fills.
    Block,
}

impl TransactionMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Block => "block",
        }
    }
}

/// Writer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    pub mode: TransactionMode,
    /// Rows per block; `None` or `Some(0)` means [`DEFAULT_MAX_BLOCK_SIZE`].
    pub max_block_size: Option<usize>,
}

impl WriterOptions {
    #[must_use]
    pub fn validated(mut self) -> Self {
        self.max_block_size = match self.max_block_size {
            None | Some(0) => None,
            Some(n) => Some(n.min(MAX_BLOCK_SIZE_CEILING)),
        };
        self
    }

    /// Rows per block after applying the default.
    #[must_use]
    pub fn effective_block_size(&self) -> usize {
        match self.max_block_size {
            None | Some(0) => DEFAULT_MAX_BLOCK_SIZE,
            Some(n) => n.min(MAX_BLOCK_SIZE_CEILING),
        }
    }
}

/// Reader settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Expose ProfileEvents blocks as a result segment instead of dropping
    /// them.
    pub surface_profile_events: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_defaults() {
        assert_eq!(WriterOptions::default().effective_block_size(), DEFAULT_MAX_BLOCK_SIZE);
        let zero = WriterOptions {
            max_block_size: Some(0),
            ..WriterOptions::default()
        };
        assert_eq!(zero.effective_block_size(), DEFAULT_MAX_BLOCK_SIZE);
        assert_eq!(zero.validated().max_block_size, None);
        let huge = WriterOptions {
            max_block_size: Some(usize::MAX),
            ..WriterOptions::default()
        };
        assert_eq!(huge.validated().max_block_size, Some(MAX_BLOCK_SIZE_CEILING));
    }

    #[test]
    fn settings_from_json() {
        let settings =
            ProtocolSettings::from_json(r#"{"revision": 54454, "compression": "zstd"}"#).expect("json");
        assert_eq!(settings.revision, 54_454);
        assert_eq!(settings.compression, Some(CompressionMethod::Zstd));
        assert_eq!(ProtocolSettings::from_json("{}").expect("empty"), ProtocolSettings::default());
        assert!(ProtocolSettings::from_json(r#"{"compression": "brotli"}"#).is_err());
    }

    #[test]
    fn revision_is_clamped() {
        let old = ProtocolSettings {
            revision: 1,
            compression: None,
        };
        assert_eq!(old.validated().revision, DBMS_MIN_REVISION_WITH_BLOCK_INFO);
    }

    #[test]
    fn writer_options_roundtrip_through_json() {
        let options = WriterOptions {
            mode: TransactionMode::Manual,
            max_block_size: Some(100),
        };
        let text = serde_json::to_string(&options).expect("serialize");
        assert_eq!(text, r#"{"mode":"manual","max_block_size":100}"#);
        let back: WriterOptions = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, options);
    }
}
