//! Error types for the buffer exchange pool.
//!
//! Using the `thiserror` crate, this module provides the two error enums the
//! rest of the crate reports through:
//!
//! - **`PoolError`**: returned by every pool operation. Its variants map onto
//!   the failure classes a native-window adapter needs to distinguish:
//!   - **`InvalidArgument`**: malformed configuration, capacity or query key.
//!   - **`InvalidState`**: a slot is not in the state the operation requires,
//!     or capacity changed while buffers are outstanding.
//!   - **`NotFound`**: release/cancel of a handle no slot owns.
//!   - **`Allocation`**: the allocation provider failed (wraps `AllocationError`),
//!     including requests whose size overflows.
//!   - **`InvalidOperation`**: a `perform` request this window does not support.
//! - **`AllocationError`**: produced by [`BufferAllocator`](crate::allocator::BufferAllocator)
//!   implementations and propagated unchanged through `acquire`.
//!
//! No error is fatal to the pool: after any `Err` the pool stays consistent.

use crate::allocator::BufferId;
use thiserror::Error;

/// Convenience alias for results using the pool error type.
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Failure returned by a pool operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Malformed configuration, capacity or query key.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Slot not in the required state, or buffers outstanding.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No eligible slot owns this buffer.
    #[error("Unknown buffer: {0}")]
    NotFound(BufferId),

    /// The allocation provider failed.
    #[error("Buffer allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    /// `perform` request this window does not support.
    #[error("Operation not supported: {0}")]
    InvalidOperation(String),
}

impl PoolError {
    /// True for errors caused by the caller's input rather than pool state.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, PoolError::InvalidArgument(_))
    }
}

/// Failure reported by an allocation provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// The provider cannot produce this pixel format.
    #[error("Unsupported pixel format: {0:#x}")]
    UnsupportedFormat(u32),

    /// The provider's memory budget cannot cover the request.
    #[error("Out of buffer memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes asked for.
        requested: usize,
        /// Bytes left in the budget.
        available: usize,
    },

    /// The buffer size for this geometry overflows.
    #[error("Buffer too large: {width}x{height}")]
    TooLarge {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },

    /// Provider-specific failure.
    #[error("Allocation provider error: {0}")]
    Provider(String),
}
