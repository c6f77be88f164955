//! Cancellation context (`Cx`) threaded through every suspension point.
//!
//! The engine never spawns work of its own; every read and write is driven by
//! the caller. Cancellation is therefore cooperative: a caller (or another
//! thread holding a clone) calls [`Cx::cancel`], and the next
//! [`Cx::checkpoint`] on the driving thread returns [`ChError::Cancelled`].
//!
//! A block flush runs inside [`Cx::masked`] so that a cancellation requested
//! mid-send is observed only after the whole block has left the framer:
//!
//! ```
//! use chwire_types::Cx;
//!
//! let cx = Cx::new();
//! cx.cancel();
//! {
//!     let _guard = cx.masked();
//!     assert!(cx.checkpoint().is_ok());
//! }
//! assert!(cx.checkpoint().is_err());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chwire_error::{ChError, Result};

/// Deepest allowed nesting of [`Cx::masked`] sections.
pub const MASK_NESTING_LIMIT: u32 = 32;

#[derive(Debug, Default)]
struct Shared {
    cancelled: AtomicBool,
    masks: AtomicU32,
}

/// Shared cancellation handle; clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct Cx {
    shared: Arc<Shared>,
}

impl Cx {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Calling it again has no further effect.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Suspension point: fails with [`ChError::Cancelled`] once cancellation
    /// is requested, unless a masked section is open.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() && self.shared.masks.load(Ordering::Acquire) == 0 {
            return Err(ChError::Cancelled);
        }
        Ok(())
    }

    /// Open a section in which [`Cx::checkpoint`] always succeeds.
    ///
    /// # Panics
    ///
    /// Panics when more than [`MASK_NESTING_LIMIT`] sections are open at once.
    #[must_use]
    pub fn masked(&self) -> MaskGuard<'_> {
        let depth = self.shared.masks.fetch_add(1, Ordering::AcqRel) + 1;
        if depth > MASK_NESTING_LIMIT {
            self.shared.masks.fetch_sub(1, Ordering::AcqRel);
            panic!("masked sections nested {depth} deep, limit is {MASK_NESTING_LIMIT}");
        }
        MaskGuard { shared: &self.shared }
    }

    /// Number of masked sections currently open.
    #[must_use]
    pub fn open_masks(&self) -> u32 {
        self.shared.masks.load(Ordering::Acquire)
    }
}

/// Keeps the owning [`Cx`] masked until dropped.
#[derive(Debug)]
pub struct MaskGuard<'a> {
    shared: &'a Shared,
}

impl Drop for MaskGuard<'_> {
    fn drop(&mut self) {
        self.shared.masks.fetch_sub(1, Ordering::AcqRel);
    }
}
