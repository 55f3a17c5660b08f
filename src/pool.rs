//! Bounded frame-buffer exchange pool.
//!
//! [`BufferPool`] mediates buffer ownership between a single producer (camera
//! HAL or simulated source) and a single consumer over a fixed array of
//! [`MAX_SLOTS`] slots, of which the first `buffer_count` are eligible.
//!
//! # Handshake
//!
//! 1. `dequeue()` picks the FREE slot with the smallest frame number (the
//!    least recently published buffer), marks it ACQUIRED and returns its
//!    handle. Blocks while every eligible slot is ACQUIRED.
//! 2. The producer writes into the buffer out-of-band (see
//!    [`BufferPool::with_buffer_mut`]).
//! 3. `queue()` publishes it: stamps a timestamp and the next frame number and
//!    returns the slot straight to FREE. `cancel()` returns it to FREE without
//!    publishing.
//!
//! There is no intermediate "queued for consumption" state: a queued buffer is
//! immediately re-acquirable. Oldest-first selection is what keeps a freshly
//! published buffer out of the producer's hands for as long as possible.
//!
//! # Concurrency
//!
//! One `parking_lot::Mutex` guards all slot and configuration state. The only
//! suspension point is the condition-variable wait inside `dequeue()`; every
//! other operation completes under the lock without blocking. Waiters are not
//! served in FIFO order.
//!
//! # Buffer lifetime
//!
//! Slots allocate lazily on first dequeue using the geometry configured at that
//! moment, then keep the buffer. Buffers go back to the allocator only when the
//! pool shrinks (all of them) or is dropped.

use crate::allocator::{BufferAllocator, BufferHandle, BufferSpec, GraphicBuffer};
use crate::config::WindowConfig;
use crate::error::{PoolError, PoolResult};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::time::Instant;
use tracing::{debug, error, warn};

/// Hard upper bound on the number of slots.
pub const MAX_SLOTS: usize = 32;

/// Buffers the consumer may keep dequeued; reported by [`QueryKey::MinUndequeuedBuffers`].
///
/// Not enforced by `dequeue()`.
pub const MIN_UNDEQUEUED_BUFFERS: usize = 2;

/// Smallest allowed buffer count, and the default.
pub const MIN_SLOTS: usize = MIN_UNDEQUEUED_BUFFERS + 1;

/// Timestamp override value that selects [`TimestampMode::Auto`].
pub const TIMESTAMP_AUTO: i64 = i64::MIN;

static CLOCK_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic nanoseconds since the first call in this process.
fn monotonic_now_ns() -> i64 {
    i64::try_from(CLOCK_EPOCH.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

/// Ownership state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Available to `dequeue()`.
    Free,
    /// Held by the producer until `queue()` or `cancel()`.
    Acquired,
}

/// How queued buffers are timestamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampMode {
    /// Stamp with the monotonic clock at queue time.
    #[default]
    Auto,
    /// Stamp every buffer with this value.
    Fixed(i64),
}

impl TimestampMode {
    /// Maps a native timestamp argument; [`TIMESTAMP_AUTO`] selects `Auto`.
    #[must_use]
    pub fn from_raw(timestamp: i64) -> Self {
        if timestamp == TIMESTAMP_AUTO {
            TimestampMode::Auto
        } else {
            TimestampMode::Fixed(timestamp)
        }
    }

    fn resolve(self) -> i64 {
        match self {
            TimestampMode::Auto => monotonic_now_ns(),
            TimestampMode::Fixed(ts) => ts,
        }
    }
}

/// Keys accepted by [`BufferPool::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKey {
    /// Default buffer width.
    Width,
    /// Default buffer height.
    Height,
    /// Pixel format for new buffers.
    Format,
    /// Buffers the consumer keeps; always [`MIN_UNDEQUEUED_BUFFERS`].
    MinUndequeuedBuffers,
}

impl TryFrom<i32> for QueryKey {
    type Error = PoolError;

    fn try_from(what: i32) -> Result<Self, Self::Error> {
        match what {
            0 => Ok(QueryKey::Width),
            1 => Ok(QueryKey::Height),
            2 => Ok(QueryKey::Format),
            3 => Ok(QueryKey::MinUndequeuedBuffers),
            other => Err(PoolError::InvalidArgument(format!(
                "unknown query key {other}"
            ))),
        }
    }
}

/// A buffer handed to the producer by `dequeue()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Index of the slot that owns the buffer.
    pub slot: usize,
    /// Descriptor to pass back to `queue`/`cancel`.
    pub handle: BufferHandle,
}

/// Snapshot of one slot for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    /// Ownership state.
    pub state: SlotState,
    /// Frame number of the last publish, 0 if never published or cancelled.
    pub frame_number: u64,
    /// Timestamp stamped by the last publish.
    pub timestamp: i64,
    /// Whether a buffer has been allocated for the slot.
    pub has_buffer: bool,
}

/// Snapshot of pool-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Eligible slots.
    pub buffer_count: usize,
    /// Eligible slots currently ACQUIRED.
    pub dequeued: usize,
    /// Slots holding an allocated buffer.
    pub allocated: usize,
    /// Buffers published since the pool was created.
    pub frame_counter: u64,
}

struct Slot<B> {
    state: SlotState,
    buffer: Option<B>,
    /// 0 until first queued, and again after a cancel.
    frame_number: u64,
    timestamp: i64,
}

impl<B> Slot<B> {
    fn empty() -> Self {
        Self {
            state: SlotState::Free,
            buffer: None,
            frame_number: 0,
            timestamp: 0,
        }
    }
}

/// Everything the pool mutex protects.
struct PoolState<B> {
    slots: Vec<Slot<B>>,
    buffer_count: usize,
    default_width: u32,
    default_height: u32,
    pixel_format: u32,
    usage: u32,
    timestamp_mode: TimestampMode,
    frame_counter: u64,
}

impl<B: GraphicBuffer> PoolState<B> {
    fn new() -> Self {
        Self {
            slots: (0..MAX_SLOTS).map(|_| Slot::empty()).collect(),
            buffer_count: MIN_SLOTS,
            default_width: 0,
            default_height: 0,
            pixel_format: 0,
            usage: 0,
            timestamp_mode: TimestampMode::Auto,
            frame_counter: 0,
        }
    }

    fn buffer_spec(&self) -> BufferSpec {
        BufferSpec {
            width: self.default_width,
            height: self.default_height,
            format: self.pixel_format,
            usage: self.usage,
        }
    }

    fn eligible(&self) -> &[Slot<B>] {
        &self.slots[..self.buffer_count]
    }

    fn dequeued_count(&self) -> usize {
        self.eligible()
            .iter()
            .filter(|slot| slot.state == SlotState::Acquired)
            .count()
    }

    /// FREE eligible slot with the smallest frame number; lowest index on ties.
    fn oldest_free_slot(&self) -> Option<usize> {
        self.eligible()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == SlotState::Free)
            .min_by_key(|(_, slot)| slot.frame_number)
            .map(|(idx, _)| idx)
    }

    /// Eligible slot owning `handle`, required to be ACQUIRED.
    fn acquired_slot_for(&self, handle: &BufferHandle, op: &str) -> PoolResult<usize> {
        let idx = self
            .eligible()
            .iter()
            .position(|slot| {
                slot.buffer
                    .as_ref()
                    .is_some_and(|buffer| buffer.handle().id == handle.id)
            })
            .ok_or_else(|| {
                error!(op, id = %handle.id, "Unknown buffer");
                PoolError::NotFound(handle.id)
            })?;

        let state = self.slots[idx].state;
        if state != SlotState::Acquired {
            error!(op, slot = idx, ?state, "Slot is not owned by the client");
            return Err(PoolError::InvalidState(format!(
                "{op}: slot {idx} is not dequeued (state={state:?})"
            )));
        }
        Ok(idx)
    }
}

/// Bounded, thread-safe buffer exchange pool.
///
/// Share between producer and consumer threads with `Arc<BufferPool<A>>`.
///
/// # Example
///
/// ```
/// use camera_window::{BufferPool, HeapAllocator};
///
/// # fn main() -> camera_window::PoolResult<()> {
/// let pool = BufferPool::new(HeapAllocator::new());
/// pool.set_dimensions(640, 480)?;
///
/// let frame = pool.dequeue()?;
/// pool.with_buffer_mut(&frame.handle, |buf| buf.pixels_mut().fill(0x80))?;
/// pool.queue(&frame.handle)?;
///
/// assert_eq!(pool.stats().frame_counter, 1);
/// # Ok(())
/// # }
/// ```
pub struct BufferPool<A: BufferAllocator> {
    allocator: A,
    state: Mutex<PoolState<A::Buffer>>,
    dequeue_cond: Condvar,
}

impl<A: BufferAllocator> BufferPool<A> {
    /// Creates a pool with [`MIN_SLOTS`] eligible slots and no buffers.
    pub fn new(allocator: A) -> Self {
        Self {
            allocator,
            state: Mutex::new(PoolState::new()),
            dequeue_cond: Condvar::new(),
        }
    }

    /// Creates a pool and applies `config` through the validated setters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if any configured value is out of range.
    pub fn from_config(allocator: A, config: &WindowConfig) -> PoolResult<Self> {
        let pool = Self::new(allocator);
        pool.set_buffer_count(config.buffer_count)?;
        pool.set_geometry(config.width, config.height, config.format)?;
        pool.set_usage(config.usage);
        pool.set_timestamp(config.timestamp.unwrap_or(TIMESTAMP_AUTO));
        Ok(pool)
    }

    /// The allocation provider backing this pool.
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Changes the number of eligible slots.
    ///
    /// Growing only raises the count; existing buffers are kept. Shrinking
    /// releases every buffer in the pool, not just the ones past the new
    /// count: no client holds a buffer at this point, so the pool restarts
    /// from a clean slate.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `count` is outside `MIN_SLOTS..=MAX_SLOTS`.
    /// - `InvalidState` if any eligible slot is dequeued.
    pub fn set_buffer_count(&self, count: usize) -> PoolResult<()> {
        debug!(count, "set_buffer_count");
        let mut state = self.state.lock();

        if count > MAX_SLOTS {
            error!(count, max = MAX_SLOTS, "Buffer count larger than slots available");
            return Err(PoolError::InvalidArgument(format!(
                "buffer count {count} exceeds {MAX_SLOTS} slots"
            )));
        }

        if count == state.buffer_count {
            return Ok(());
        }

        if count < MIN_SLOTS {
            error!(count, min = MIN_SLOTS, "Requested buffer count is less than minimum");
            return Err(PoolError::InvalidArgument(format!(
                "buffer count {count} is less than minimum {MIN_SLOTS}"
            )));
        }

        let dequeued = state.dequeued_count();
        if dequeued > 0 {
            error!(dequeued, "set_buffer_count: client owns some buffers");
            return Err(PoolError::InvalidState(format!(
                "cannot change buffer count while {dequeued} buffer(s) are dequeued"
            )));
        }

        if count < state.buffer_count {
            self.free_all_buffers(&mut state);
        }
        state.buffer_count = count;
        drop(state);

        self.dequeue_cond.notify_all();
        Ok(())
    }

    fn free_all_buffers(&self, state: &mut PoolState<A::Buffer>) {
        for slot in &mut state.slots {
            if let Some(buffer) = slot.buffer.take() {
                self.allocator.release(buffer);
            }
            slot.state = SlotState::Free;
        }
    }

    /// Acquires the oldest free buffer, blocking until one is available.
    ///
    /// Allocates the slot's buffer on first use with the current geometry,
    /// format and usage.
    ///
    /// # Errors
    ///
    /// Returns `Allocation` if the provider fails. The slot is left FREE and
    /// usable by a later caller.
    pub fn dequeue(&self) -> PoolResult<DequeuedBuffer> {
        let mut state = self.state.lock();

        let slot = loop {
            if let Some(idx) = state.oldest_free_slot() {
                break idx;
            }
            debug!(
                dequeued = state.dequeued_count(),
                buffer_count = state.buffer_count,
                "dequeue: no free slot, waiting"
            );
            self.dequeue_cond.wait(&mut state);
        };

        state.slots[slot].state = SlotState::Acquired;

        if state.slots[slot].buffer.is_none() {
            let spec = state.buffer_spec();
            match self.allocator.allocate(spec) {
                Ok(buffer) => state.slots[slot].buffer = Some(buffer),
                Err(err) => {
                    error!(slot, ?spec, %err, "dequeue: buffer allocation failed");
                    state.slots[slot].state = SlotState::Free;
                    drop(state);
                    // The slot is free again; let a waiter retry it.
                    self.dequeue_cond.notify_one();
                    return Err(err.into());
                }
            }
        }

        let handle = state.slots[slot]
            .buffer
            .as_ref()
            .map(GraphicBuffer::handle)
            .ok_or_else(|| PoolError::InvalidState(format!("slot {slot} has no buffer")))?;

        debug!(slot, id = %handle.id, "dequeue: returning buffer");
        Ok(DequeuedBuffer { slot, handle })
    }

    /// Publishes a dequeued buffer and returns its slot to FREE.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no eligible slot owns `handle`.
    /// - `InvalidState` if the slot is not dequeued.
    pub fn queue(&self, handle: &BufferHandle) -> PoolResult<()> {
        let mut state = self.state.lock();
        let idx = state.acquired_slot_for(handle, "queue")?;

        let timestamp = state.timestamp_mode.resolve();
        state.frame_counter += 1;
        let frame_number = state.frame_counter;

        let slot = &mut state.slots[idx];
        slot.state = SlotState::Free;
        slot.timestamp = timestamp;
        slot.frame_number = frame_number;
        drop(state);

        debug!(slot = idx, frame_number, timestamp, "queue");
        self.dequeue_cond.notify_one();
        Ok(())
    }

    /// Returns a dequeued buffer without publishing it.
    ///
    /// Resets the slot's frame number to 0 so it is picked first next time.
    /// The frame counter and the slot timestamp are untouched.
    ///
    /// # Errors
    ///
    /// Same as [`queue`](Self::queue).
    pub fn cancel(&self, handle: &BufferHandle) -> PoolResult<()> {
        let mut state = self.state.lock();
        let idx = state.acquired_slot_for(handle, "cancel")?;

        let slot = &mut state.slots[idx];
        slot.state = SlotState::Free;
        slot.frame_number = 0;
        drop(state);

        debug!(slot = idx, "cancel");
        self.dequeue_cond.notify_one();
        Ok(())
    }

    /// Consumer lock hook. Performs no buffer operation.
    pub fn lock(&self, handle: &BufferHandle) -> PoolResult<()> {
        let _state = self.state.lock();
        debug!(id = %handle.id, "lock");
        Ok(())
    }

    /// Runs `f` on the buffer behind a dequeued handle.
    ///
    /// This is how a producer fills a frame. The pool lock is held while `f`
    /// runs, so keep it short.
    ///
    /// # Errors
    ///
    /// Same as [`queue`](Self::queue).
    pub fn with_buffer_mut<R>(
        &self,
        handle: &BufferHandle,
        f: impl FnOnce(&mut A::Buffer) -> R,
    ) -> PoolResult<R> {
        let mut state = self.state.lock();
        let idx = state.acquired_slot_for(handle, "with_buffer_mut")?;
        state.slots[idx]
            .buffer
            .as_mut()
            .map(f)
            .ok_or(PoolError::NotFound(handle.id))
    }

    /// Sets usage flags for buffers allocated from now on.
    pub fn set_usage(&self, usage: u32) {
        debug!(usage, "set_usage");
        self.state.lock().usage = usage;
    }

    /// Sets default dimensions for buffers allocated from now on.
    ///
    /// Both must be zero or both positive.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on a negative value or a zero/non-zero pair.
    pub fn set_dimensions(&self, width: i32, height: i32) -> PoolResult<()> {
        debug!(width, height, "set_dimensions");
        let (width, height) = validate_dimensions(width, height)?;
        let mut state = self.state.lock();
        state.default_width = width;
        state.default_height = height;
        Ok(())
    }

    /// Sets the pixel format for buffers allocated from now on.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `format` is negative.
    pub fn set_format(&self, format: i32) -> PoolResult<()> {
        debug!(format, "set_format");
        let format = validate_format(format)?;
        self.state.lock().pixel_format = format;
        Ok(())
    }

    /// Sets dimensions and format together; nothing changes if either is invalid.
    ///
    /// # Errors
    ///
    /// As [`set_dimensions`](Self::set_dimensions) and [`set_format`](Self::set_format).
    pub fn set_geometry(&self, width: i32, height: i32, format: i32) -> PoolResult<()> {
        debug!(width, height, format, "set_geometry");
        let (width, height) = validate_dimensions(width, height)?;
        let format = validate_format(format)?;
        let mut state = self.state.lock();
        state.default_width = width;
        state.default_height = height;
        state.pixel_format = format;
        Ok(())
    }

    /// Sets the timestamp override; [`TIMESTAMP_AUTO`] restores the clock.
    pub fn set_timestamp(&self, timestamp: i64) {
        let mode = TimestampMode::from_raw(timestamp);
        debug!(?mode, "set_timestamp");
        self.state.lock().timestamp_mode = mode;
    }

    /// Accepted for compatibility; swap interval has no effect on this pool.
    pub fn set_swap_interval(&self, interval: i32) {
        debug!(interval, "set_swap_interval ignored");
    }

    /// Reads a configuration value.
    pub fn query(&self, key: QueryKey) -> u32 {
        let state = self.state.lock();
        match key {
            QueryKey::Width => state.default_width,
            QueryKey::Height => state.default_height,
            QueryKey::Format => state.pixel_format,
            QueryKey::MinUndequeuedBuffers => MIN_UNDEQUEUED_BUFFERS as u32,
        }
    }

    /// Reads a configuration value by its native key code.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unrecognized key.
    pub fn query_raw(&self, what: i32) -> PoolResult<u32> {
        let key = QueryKey::try_from(what).inspect_err(|_| warn!(what, "query: bad key"))?;
        Ok(self.query(key))
    }

    /// Number of eligible slots.
    pub fn buffer_count(&self) -> usize {
        self.state.lock().buffer_count
    }

    /// Current timestamp mode.
    pub fn timestamp_mode(&self) -> TimestampMode {
        self.state.lock().timestamp_mode
    }

    /// Pool-wide counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            buffer_count: state.buffer_count,
            dequeued: state.dequeued_count(),
            allocated: state.slots.iter().filter(|s| s.buffer.is_some()).count(),
            frame_counter: state.frame_counter,
        }
    }

    /// State of slot `index`, or `None` past [`MAX_SLOTS`].
    pub fn slot_info(&self, index: usize) -> Option<SlotInfo> {
        let state = self.state.lock();
        state.slots.get(index).map(|slot| SlotInfo {
            state: slot.state,
            frame_number: slot.frame_number,
            timestamp: slot.timestamp,
            has_buffer: slot.buffer.is_some(),
        })
    }
}

impl<A: BufferAllocator> Drop for BufferPool<A> {
    fn drop(&mut self) {
        let BufferPool {
            allocator, state, ..
        } = self;
        for slot in &mut state.get_mut().slots {
            if let Some(buffer) = slot.buffer.take() {
                allocator.release(buffer);
            }
        }
    }
}

fn validate_dimensions(width: i32, height: i32) -> PoolResult<(u32, u32)> {
    let invalid = || {
        warn!(width, height, "Rejected buffer dimensions");
        PoolError::InvalidArgument(format!("invalid buffer dimensions {width}x{height}"))
    };
    let w = u32::try_from(width).map_err(|_| invalid())?;
    let h = u32::try_from(height).map_err(|_| invalid())?;
    if (w == 0) != (h == 0) {
        return Err(invalid());
    }
    Ok((w, h))
}

fn validate_format(format: i32) -> PoolResult<u32> {
    u32::try_from(format).map_err(|_| {
        warn!(format, "Rejected pixel format");
        PoolError::InvalidArgument(format!("invalid pixel format {format}"))
    })
}
