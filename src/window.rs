//! Native-window capability interface.
//!
//! A camera HAL talks to its preview window through a small, fixed set of
//! operations. [`NativeWindow`] is that set; [`BufferPool`] implements it once
//! and an ABI adapter (out of this crate) forwards the platform's function
//! pointers to a `&dyn NativeWindow`.
//!
//! Variadic `perform` calls arrive here already decoded as [`WindowOperation`].

use crate::allocator::{BufferAllocator, BufferHandle};
use crate::error::{PoolError, PoolResult};
use crate::pool::{BufferPool, DequeuedBuffer, QueryKey};
use tracing::warn;

/// Operations carried by the native `perform` entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOperation {
    /// Deprecated producer connect; accepted.
    Connect,
    /// Deprecated producer disconnect; accepted.
    Disconnect,
    /// Usage bits for new buffers.
    SetUsage(u32),
    /// Number of eligible slots.
    SetBufferCount(usize),
    /// Dimensions and format together.
    SetBuffersGeometry {
        /// Default width.
        width: i32,
        /// Default height.
        height: i32,
        /// HAL pixel format.
        format: i32,
    },
    /// Timestamp override; `TIMESTAMP_AUTO` restores the clock.
    SetBuffersTimestamp(i64),
    /// Default dimensions.
    SetBuffersDimensions {
        /// Default width.
        width: i32,
        /// Default height.
        height: i32,
    },
    /// Pixel format for new buffers.
    SetBuffersFormat(i32),
    /// Crop rectangle; unsupported.
    SetCrop,
    /// Rotation/flip; unsupported.
    SetBuffersTransform,
    /// Scaling mode; unsupported.
    SetScalingMode,
    /// Software lock of the next buffer; unsupported.
    Lock,
    /// Post a software-locked buffer; unsupported.
    UnlockAndPost,
    /// Producer API connect; unsupported.
    ApiConnect,
    /// Producer API disconnect; unsupported.
    ApiDisconnect,
}

/// Capability set a producer uses to exchange buffers with its window.
pub trait NativeWindow: Send + Sync {
    /// Accepted and ignored.
    fn set_swap_interval(&self, interval: i32) -> PoolResult<()>;

    /// Blocks until a buffer is available and hands it to the producer.
    fn dequeue_buffer(&self) -> PoolResult<DequeuedBuffer>;

    /// Returns a dequeued buffer unpublished.
    fn cancel_buffer(&self, buffer: &BufferHandle) -> PoolResult<()>;

    /// Consumer-side lock hook.
    fn lock_buffer(&self, buffer: &BufferHandle) -> PoolResult<()>;

    /// Publishes a dequeued buffer.
    fn queue_buffer(&self, buffer: &BufferHandle) -> PoolResult<()>;

    /// Reads a configuration value.
    fn query(&self, what: QueryKey) -> PoolResult<u32>;

    /// Applies a decoded `perform` request.
    fn perform(&self, operation: WindowOperation) -> PoolResult<()>;
}

impl<A: BufferAllocator> NativeWindow for BufferPool<A> {
    fn set_swap_interval(&self, interval: i32) -> PoolResult<()> {
        BufferPool::set_swap_interval(self, interval);
        Ok(())
    }

    fn dequeue_buffer(&self) -> PoolResult<DequeuedBuffer> {
        self.dequeue()
    }

    fn cancel_buffer(&self, buffer: &BufferHandle) -> PoolResult<()> {
        self.cancel(buffer)
    }

    fn lock_buffer(&self, buffer: &BufferHandle) -> PoolResult<()> {
        self.lock(buffer)
    }

    fn queue_buffer(&self, buffer: &BufferHandle) -> PoolResult<()> {
        self.queue(buffer)
    }

    fn query(&self, what: QueryKey) -> PoolResult<u32> {
        Ok(BufferPool::query(self, what))
    }

    fn perform(&self, operation: WindowOperation) -> PoolResult<()> {
        match operation {
            // Deprecated; must succeed.
            WindowOperation::Connect | WindowOperation::Disconnect => Ok(()),
            WindowOperation::SetUsage(usage) => {
                self.set_usage(usage);
                Ok(())
            }
            WindowOperation::SetBufferCount(count) => self.set_buffer_count(count),
            WindowOperation::SetBuffersGeometry {
                width,
                height,
                format,
            } => self.set_geometry(width, height, format),
            WindowOperation::SetBuffersTimestamp(timestamp) => {
                self.set_timestamp(timestamp);
                Ok(())
            }
            WindowOperation::SetBuffersDimensions { width, height } => {
                self.set_dimensions(width, height)
            }
            WindowOperation::SetBuffersFormat(format) => self.set_format(format),
            unsupported => {
                warn!(?unsupported, "perform: unsupported operation");
                Err(PoolError::InvalidOperation(format!("{unsupported:?}")))
            }
        }
    }
}
