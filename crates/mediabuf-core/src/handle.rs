//! Opaque allocation handles.
//!
//! A handle names an allocation independently of where its bytes live. The
//! all-ones value is reserved as "no allocation".

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(transparent)]
pub struct AllocationHandle(u64);

/// Sentinel returned by allocate when no backend has room.
pub const INVALID_HANDLE: AllocationHandle = AllocationHandle::INVALID;

impl AllocationHandle {
    pub const INVALID: AllocationHandle = AllocationHandle(u64::MAX);

    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != u64::MAX
    }
}

impl Default for AllocationHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for AllocationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "AllocationHandle({:#x})", self.0)
        } else {
            f.write_str("AllocationHandle(INVALID)")
        }
    }
}
