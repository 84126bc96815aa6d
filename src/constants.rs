//! Surge tuning constants
//!
//! Core constants used by the sequencers and wait strategies.

use static_assertions::const_assert;

/// Default ring buffer size (must be power of 2)
pub const DEFAULT_RING_BUFFER_SIZE: usize = 64 * 1024; // 64K slots

/// Maximum ring buffer size accepted at construction
pub const MAX_RING_BUFFER_SIZE: usize = 4 * 1024 * 1024; // 4M slots

/// Cache line size for alignment (64 bytes on most CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

/// Sequence cells are padded to two cache lines for CPUs that prefetch
/// adjacent lines
pub const SEQUENCE_PADDING: usize = 2 * CACHE_LINE_SIZE;

/// Spin iterations before the yielding wait strategy starts yielding
pub const YIELDING_SPIN_TRIES: u32 = 100;

/// Spin iterations per phase of the phased backoff wait strategy
pub const PHASED_BACKOFF_SPIN_TRIES: u32 = 10_000;

/// Retry budget for the sleeping wait strategy; the first half spins, the
/// second half yields, then the strategy sleeps between polls
pub const SLEEPING_RETRIES: u32 = 200;

/// Default sleep interval for the sleeping wait strategy, in nanoseconds
pub const DEFAULT_SLEEP_INTERVAL_NS: u64 = 100;

const_assert!(DEFAULT_RING_BUFFER_SIZE.is_power_of_two());
const_assert!(MAX_RING_BUFFER_SIZE.is_power_of_two());
const_assert!(CACHE_LINE_SIZE.is_power_of_two());
