//! View items and their flag set.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Per-item flag bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemFlags(u32);

impl ItemFlags {
    pub const NONE: ItemFlags = ItemFlags(0);
    pub const FRAGMENT_START: ItemFlags = ItemFlags(1 << 0);
    pub const FRAGMENT_END: ItemFlags = ItemFlags(1 << 1);
    pub const STREAM_START: ItemFlags = ItemFlags(1 << 2);
    pub const BUFFERING_ACK: ItemFlags = ItemFlags(1 << 3);
    pub const RECEIVED_ACK: ItemFlags = ItemFlags(1 << 4);
    /// Rollback steps over these items when repositioning the cursor.
    pub const SKIP: ItemFlags = ItemFlags(1 << 5);

    const ALL: u32 = (1 << 6) - 1;

    /// Build from raw bits, dropping unknown ones.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        ItemFlags(bits & Self::ALL)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: ItemFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ItemFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ItemFlags) {
        self.0 &= !other.0;
    }

    /// Fragment start or stream start.
    pub const fn starts_fragment(self) -> bool {
        self.0 & (Self::FRAGMENT_START.0 | Self::STREAM_START.0) != 0
    }

    /// Both buffering and received acknowledgements have arrived.
    pub const fn is_acked(self) -> bool {
        self.contains(ItemFlags(Self::BUFFERING_ACK.0 | Self::RECEIVED_ACK.0))
    }
}

impl BitOr for ItemFlags {
    type Output = ItemFlags;

    fn bitor(self, rhs: ItemFlags) -> ItemFlags {
        ItemFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ItemFlags {
    fn bitor_assign(&mut self, rhs: ItemFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ItemFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ItemFlags, &str); 6] = [
            (ItemFlags::FRAGMENT_START, "FRAGMENT_START"),
            (ItemFlags::FRAGMENT_END, "FRAGMENT_END"),
            (ItemFlags::STREAM_START, "STREAM_START"),
            (ItemFlags::BUFFERING_ACK, "BUFFERING_ACK"),
            (ItemFlags::RECEIVED_ACK, "RECEIVED_ACK"),
            (ItemFlags::SKIP, "SKIP"),
        ];
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// One buffered media chunk, as stored in the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewItem<H> {
    /// Assigned by the view; never reused.
    pub index: u64,
    pub timestamp: u64,
    pub ack_timestamp: u64,
    pub duration: u64,
    /// Opaque payload, typically a heap allocation handle.
    pub handle: H,
    pub size: u64,
    pub flags: ItemFlags,
}

impl<H> ViewItem<H> {
    /// End of the covered interval `[timestamp, timestamp + duration)`.
    pub fn end(&self) -> u64 {
        self.timestamp.saturating_add(self.duration)
    }

    pub(crate) fn key(&self, use_ack: bool) -> u64 {
        if use_ack {
            self.ack_timestamp
        } else {
            self.timestamp
        }
    }

    pub(crate) fn key_end(&self, use_ack: bool) -> u64 {
        self.key(use_ack).saturating_add(self.duration)
    }
}

/// Input to `ContentView::add`. The view assigns the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem<H> {
    pub timestamp: u64,
    pub ack_timestamp: u64,
    pub duration: u64,
    pub handle: H,
    pub size: u64,
    pub flags: ItemFlags,
}

impl<H> NewItem<H> {
    /// An unflagged item whose ACK timestamp equals its timestamp.
    pub fn new(timestamp: u64, duration: u64, handle: H, size: u64) -> Self {
        Self {
            timestamp,
            ack_timestamp: timestamp,
            duration,
            handle,
            size,
            flags: ItemFlags::NONE,
        }
    }

    pub fn with_ack_timestamp(mut self, ack_timestamp: u64) -> Self {
        self.ack_timestamp = ack_timestamp;
        self
    }

    pub fn with_flags(mut self, flags: ItemFlags) -> Self {
        self.flags = flags;
        self
    }

    pub(crate) fn into_item(self, index: u64) -> ViewItem<H> {
        ViewItem {
            index,
            timestamp: self.timestamp,
            ack_timestamp: self.ack_timestamp,
            duration: self.duration,
            handle: self.handle,
            size: self.size,
            flags: self.flags,
        }
    }
}
