use std::time::Duration;

/// Typical CPU cache line size in bytes.
///
/// Most modern CPUs have a cache line of 64 bytes.
pub const CACHE_LINE_SIZE: usize = 64;

/// Size of a raw pointer on the target architecture in bytes.
///
/// On a 64-bit system, this is usually 8 bytes; on a 32-bit system, 4 bytes.
/// This is used for calculating padding or memory layout alignment.
pub const POINTER_SIZE: usize = size_of::<*const u8>();

/// Number of pointer-sized elements that fit into a single cache line.
///
/// This is computed as `CACHE_LINE_SIZE / POINTER_SIZE` and is commonly used
/// to pad arrays or structs to align to cache lines, reducing false sharing
/// between threads in concurrent data structures.
///
/// # Examples
///
/// ```
/// # use channels::constants::ARRAY_PADDING;
/// // On a 64-bit system, ARRAY_PADDING is typically 8
/// assert_eq!(ARRAY_PADDING, 64 / 8);
/// ```
pub const ARRAY_PADDING: usize = CACHE_LINE_SIZE / POINTER_SIZE;

/// Default ring buffer capacity used by [`crate::config::ChannelBuilder`] when
/// the caller does not specify one.
pub const DEFAULT_RING_CAPACITY: usize = 1024;

/// Default size for the key processor's decode/encode byte buffers.
pub const DEFAULT_IO_BUFFER_SIZE: usize = 64 * 1024;

/// `select()` timeout used by the selector loop between task-queue drains.
pub const SELECTOR_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Number of refill intervals the rate limiter splits one second into.
pub const RATE_LIMITER_REFILL_INTERVALS: u32 = 10;

/// Duration of a single rate limiter refill interval (100ms).
pub const RATE_LIMITER_REFILL_INTERVAL: Duration = Duration::from_millis(100);
