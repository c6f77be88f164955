//! Shared cache of parsed type descriptors.
//!
//! The same type text shows up once per column per block, so descriptors are
//! parsed once and handed out as `Arc<ColumnType>`. The lock only guards the
//! map; the descriptors themselves are immutable and read without locking.

use std::collections::HashMap;
use std::sync::Arc;

use chwire_error::Result;
use parking_lot::RwLock;
use tracing::trace;

use crate::column_type::ColumnType;
use crate::parser::parse_type;

/// Entries beyond this are not cached; the descriptor is still returned.
pub const MAX_CACHED_TYPES: usize = 4096;

#[derive(Debug, Default)]
pub struct TypeRegistry {
    cache: RwLock<HashMap<String, Arc<ColumnType>>>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `text`, reusing a cached descriptor when one exists.
    pub fn get(&self, text: &str) -> Result<Arc<ColumnType>> {
        if let Some(hit) = self.cache.read().get(text) {
            return Ok(Arc::clone(hit));
        }
        let parsed = Arc::new(parse_type(text)?);
        let mut cache = self.cache.write();
        if let Some(raced) = cache.get(text) {
            return Ok(Arc::clone(raced));
        }
        if cache.len() < MAX_CACHED_TYPES {
            trace!(type_name = text, cached = cache.len() + 1, "type descriptor cached");
            cache.insert(text.to_owned(), Arc::clone(&parsed));
        }
        Ok(parsed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    pub fn clear(&self) {
        self.cache.write().clear();
    }
}
