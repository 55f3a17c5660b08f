//! Allocation provider boundary and a heap-backed default implementation.
//!
//! The pool never creates pixel memory itself. It asks a [`BufferAllocator`]
//! for a buffer the first time a slot is acquired, keeps the returned buffer
//! for the lifetime of that slot, and hands it back through
//! [`BufferAllocator::release`] when the pool shrinks or is dropped.
//!
//! [`HeapAllocator`] is the reference provider used by the `snapshot` harness
//! and by tests: it backs each buffer with a zeroed `BytesMut` sized from the
//! requested geometry and HAL pixel format, optionally bounded by a byte budget.

use crate::error::AllocationError;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// HAL pixel format codes understood by [`HeapAllocator`].
pub mod format {
    /// Let the provider pick; allocated as RGBA_8888.
    pub const UNSPECIFIED: u32 = 0;
    /// 32-bit RGBA.
    pub const RGBA_8888: u32 = 1;
    /// 32-bit RGB, alpha ignored.
    pub const RGBX_8888: u32 = 2;
    /// Packed 24-bit RGB.
    pub const RGB_888: u32 = 3;
    /// Packed 16-bit RGB.
    pub const RGB_565: u32 = 4;
    /// NV16.
    pub const YCBCR_422_SP: u32 = 0x10;
    /// NV21, the usual camera preview format.
    pub const YCRCB_420_SP: u32 = 0x11;
    /// Planar 4:2:0, Y then V then U.
    pub const YV12: u32 = 0x3231_5659;
}

/// Identity of an allocated buffer resource.
///
/// Slots resolve incoming handles by this identity, never by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Geometry, format and usage a buffer is allocated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferSpec {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// HAL pixel format code, see [`format`].
    pub format: u32,
    /// Gralloc usage bits, passed through to the provider.
    pub usage: u32,
}

/// Copyable descriptor of a buffer owned by a pool slot.
///
/// This is what the producer holds between dequeue and queue/cancel. It does
/// not own or borrow the pixel memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHandle {
    /// Identity the pool matches on.
    pub id: BufferId,
    /// Request the buffer was allocated for.
    pub spec: BufferSpec,
    /// Row stride in pixels.
    pub stride: u32,
}

/// A pixel buffer resource produced by a [`BufferAllocator`].
pub trait GraphicBuffer: Send {
    /// Descriptor identifying this buffer.
    fn handle(&self) -> BufferHandle;
}

/// Allocation provider consumed by the pool.
///
/// `release` takes the buffer by value, so a buffer can only be returned once.
pub trait BufferAllocator: Send + Sync {
    /// Buffer type owned by pool slots.
    type Buffer: GraphicBuffer;

    /// Allocates a buffer matching `spec`.
    ///
    /// # Errors
    ///
    /// Returns an [`AllocationError`] if the provider cannot satisfy the request.
    fn allocate(&self, spec: BufferSpec) -> Result<Self::Buffer, AllocationError>;

    /// Returns a buffer to the provider.
    fn release(&self, buffer: Self::Buffer);
}

/// Heap-backed frame buffer.
#[derive(Debug)]
pub struct HeapBuffer {
    handle: BufferHandle,
    pixels: BytesMut,
}

impl HeapBuffer {
    /// Pixel bytes, row-major, `stride * height` pixels long.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable pixel bytes for the producer to fill.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Size of the backing store in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// True for a 0x0 buffer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

impl GraphicBuffer for HeapBuffer {
    fn handle(&self) -> BufferHandle {
        self.handle
    }
}

/// Running totals kept by [`HeapAllocator`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapUsage {
    /// Buffers currently allocated and not yet released.
    pub live_buffers: usize,
    /// Bytes held by live buffers.
    pub live_bytes: usize,
    /// Buffers allocated over the allocator's lifetime.
    pub total_allocations: u64,
}

/// Reference allocation provider backed by heap memory.
#[derive(Debug, Default)]
pub struct HeapAllocator {
    next_id: AtomicU64,
    max_bytes: Option<usize>,
    usage: Mutex<HeapUsage>,
}

impl HeapAllocator {
    /// Creates an allocator with no byte budget.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an allocator that refuses to hold more than `max_bytes` at once.
    #[must_use]
    pub fn with_budget(max_bytes: usize) -> Self {
        Self {
            max_bytes: Some(max_bytes),
            ..Self::default()
        }
    }

    /// Current usage totals.
    #[must_use]
    pub fn usage(&self) -> HeapUsage {
        *self.usage.lock()
    }

    /// Bytes per buffer for `spec`.
    ///
    /// Planar YUV formats are sized in bits per pixel and rounded up.
    ///
    /// # Errors
    ///
    /// `UnsupportedFormat` for an unknown format, `TooLarge` if the size
    /// exceeds what a single allocation can hold.
    pub fn buffer_size(spec: &BufferSpec) -> Result<usize, AllocationError> {
        let bits_per_pixel: usize = match spec.format {
            format::UNSPECIFIED | format::RGBA_8888 | format::RGBX_8888 => 32,
            format::RGB_888 => 24,
            format::RGB_565 | format::YCBCR_422_SP => 16,
            format::YCRCB_420_SP | format::YV12 => 12,
            other => return Err(AllocationError::UnsupportedFormat(other)),
        };
        (spec.width as usize)
            .checked_mul(spec.height as usize)
            .and_then(|pixels| pixels.checked_mul(bits_per_pixel))
            .map(|bits| bits.div_ceil(8))
            .filter(|&size| isize::try_from(size).is_ok())
            .ok_or(AllocationError::TooLarge {
                width: spec.width,
                height: spec.height,
            })
    }
}

impl BufferAllocator for HeapAllocator {
    type Buffer = HeapBuffer;

    fn allocate(&self, spec: BufferSpec) -> Result<HeapBuffer, AllocationError> {
        let size = Self::buffer_size(&spec).inspect_err(|err| {
            tracing::warn!(width = spec.width, height = spec.height, format = spec.format, %err, "Rejected buffer request");
        })?;

        {
            let mut usage = self.usage.lock();
            if let Some(max) = self.max_bytes {
                let available = max.saturating_sub(usage.live_bytes);
                if size > available {
                    tracing::warn!(
                        requested = size,
                        available,
                        live_buffers = usage.live_buffers,
                        "Heap allocator budget exhausted"
                    );
                    return Err(AllocationError::OutOfMemory {
                        requested: size,
                        available,
                    });
                }
            }
            usage.live_buffers += 1;
            usage.live_bytes += size;
            usage.total_allocations += 1;
        }

        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::debug!(%id, width = spec.width, height = spec.height, format = spec.format, size, "Allocated heap buffer");

        Ok(HeapBuffer {
            handle: BufferHandle {
                id,
                spec,
                stride: spec.width,
            },
            pixels: BytesMut::zeroed(size),
        })
    }

    fn release(&self, buffer: HeapBuffer) {
        let mut usage = self.usage.lock();
        usage.live_buffers = usage.live_buffers.saturating_sub(1);
        usage.live_bytes = usage.live_bytes.saturating_sub(buffer.len());
        tracing::debug!(id = %buffer.handle.id, size = buffer.len(), "Released heap buffer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(width: u32, height: u32, format: u32) -> BufferSpec {
        BufferSpec {
            width,
            height,
            format,
            usage: 0,
        }
    }

    #[test]
    fn test_buffer_sizes_follow_format() {
        assert_eq!(HeapAllocator::buffer_size(&spec(4, 2, format::RGBA_8888)), Ok(32));
        assert_eq!(HeapAllocator::buffer_size(&spec(4, 2, format::UNSPECIFIED)), Ok(32));
        assert_eq!(HeapAllocator::buffer_size(&spec(4, 2, format::RGB_888)), Ok(24));
        assert_eq!(HeapAllocator::buffer_size(&spec(4, 2, format::RGB_565)), Ok(16));
        assert_eq!(HeapAllocator::buffer_size(&spec(4, 2, format::YCRCB_420_SP)), Ok(12));
        assert_eq!(HeapAllocator::buffer_size(&spec(3, 1, format::YV12)), Ok(5));
        assert_eq!(
            HeapAllocator::buffer_size(&spec(4, 2, 0x99)),
            Err(AllocationError::UnsupportedFormat(0x99))
        );
    }

    #[test]
    fn test_oversized_geometry_is_rejected() {
        let huge = spec(u32::MAX, u32::MAX, format::RGBA_8888);
        assert_eq!(
            HeapAllocator::buffer_size(&huge),
            Err(AllocationError::TooLarge {
                width: u32::MAX,
                height: u32::MAX
            })
        );

        let allocator = HeapAllocator::new();
        assert!(matches!(
            allocator.allocate(huge),
            Err(AllocationError::TooLarge { .. })
        ));
        assert_eq!(allocator.usage(), HeapUsage::default());
    }

    #[test]
    fn test_allocate_assigns_unique_ids() {
        let allocator = HeapAllocator::new();
        let a = allocator.allocate(spec(8, 8, format::RGBA_8888)).unwrap();
        let b = allocator.allocate(spec(8, 8, format::RGBA_8888)).unwrap();

        assert_ne!(a.handle().id, b.handle().id);
        assert_eq!(a.len(), 256);
        assert_eq!(a.handle().stride, 8);
        assert!(a.pixels().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_zero_geometry_allocates_empty_buffer() {
        let allocator = HeapAllocator::new();
        let buffer = allocator.allocate(BufferSpec::default()).unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_unsupported_format() {
        let allocator = HeapAllocator::new();
        let err = allocator.allocate(spec(8, 8, 0x1234)).unwrap_err();
        assert_eq!(err, AllocationError::UnsupportedFormat(0x1234));
        assert_eq!(allocator.usage().live_buffers, 0);
    }

    #[test]
    fn test_budget_is_enforced_and_replenished() {
        let allocator = HeapAllocator::with_budget(512);
        let first = allocator.allocate(spec(8, 8, format::RGBA_8888)).unwrap();
        let second = allocator.allocate(spec(8, 8, format::RGBA_8888)).unwrap();

        let err = allocator.allocate(spec(8, 8, format::RGBA_8888)).unwrap_err();
        assert_eq!(
            err,
            AllocationError::OutOfMemory {
                requested: 256,
                available: 0
            }
        );

        allocator.release(first);
        assert_eq!(allocator.usage().live_bytes, 256);
        assert!(allocator.allocate(spec(8, 8, format::RGBA_8888)).is_ok());

        allocator.release(second);
        let usage = allocator.usage();
        assert_eq!(usage.live_buffers, 1);
        assert_eq!(usage.total_allocations, 3);
    }
}
