//! Hard limits for heaps and content views.

/// Smallest heap that may be initialized.
pub const MIN_HEAP_SIZE: u64 = 64 * 1024;

/// Largest heap backed by memory only.
pub const MAX_HEAP_SIZE: u64 = 1 << 40;

/// Largest heap when file spill is enabled.
pub const MAX_LARGE_HEAP_SIZE: u64 = 4 << 40;

/// Allocation requests must be strictly below this.
pub const MAX_ALLOCATION_SIZE: u64 = 1 << 32;

/// Arena remainders smaller than this stay attached to the allocation.
pub const MIN_FREE_BLOCK_SIZE: u64 = 16;

/// Extension of per-allocation spill files.
pub const SPILL_FILE_EXTENSION: &str = ".hfh";

pub const DEFAULT_SPILL_ROOT: &str = ".";

/// A view must be able to hold strictly more items than this.
pub const MIN_CONTENT_VIEW_ITEMS: u64 = 10;

/// A view's duration bound must be strictly greater than this.
pub const MIN_CONTENT_VIEW_BUFFER_DURATION: u64 = 0;

/// 100ns units per second, the clock used for item timestamps.
pub const HUNDREDS_OF_NANOS_IN_A_SECOND: u64 = 10_000_000;
