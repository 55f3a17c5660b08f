//! Frame-buffer exchange pool for camera preview windows.
//!
//! This library implements the buffer side of a native preview window: a
//! bounded, thread-safe pool of graphic buffers that a camera producer dequeues,
//! fills and queues back. It is used by the `snapshot` harness, which drives a
//! simulated camera through the pool.

pub mod allocator;
pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod pool;
pub mod snapshot;
pub mod window;

pub use allocator::{
    BufferAllocator, BufferHandle, BufferId, BufferSpec, GraphicBuffer, HeapAllocator, HeapBuffer,
};
pub use error::{AllocationError, PoolError, PoolResult};
pub use pool::{
    BufferPool, DequeuedBuffer, PoolStats, QueryKey, SlotInfo, SlotState, TimestampMode,
    MAX_SLOTS, MIN_SLOTS, MIN_UNDEQUEUED_BUFFERS, TIMESTAMP_AUTO,
};
pub use window::{NativeWindow, WindowOperation};
