//! Arena backend: one contiguous region carved into boundary-tagged blocks.
//!
//! Block tags live in an offset-ordered map next to the region rather than
//! inside it. Every block still charges header + footer bytes of the region,
//! so the arena fills up exactly like an in-band boundary-tag allocator.
//!
//! Invariants (checked by `check`):
//! - blocks tile `[0, region.len())` with no gaps;
//! - no two free blocks are adjacent;
//! - `used` is the sum of allocated block spans.

use std::collections::BTreeMap;
use std::ops::Range;

use mediabuf_core::limits::MIN_FREE_BLOCK_SIZE;

use super::{align_up, overall_size, Store, StoreKind, ALLOCATION_FOOTER_SIZE, ALLOCATION_HEADER_SIZE};
use crate::error::{Error, Result};

const TAGS: u64 = ALLOCATION_HEADER_SIZE + ALLOCATION_FOOTER_SIZE;

/// Remainders below this stay attached to the block they came from.
const MIN_SPLIT: u64 = TAGS + MIN_FREE_BLOCK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Free,
    Allocated { size: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Block {
    span: u64,
    state: BlockState,
}

impl Block {
    fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }
}

pub struct ArenaBackend {
    region: Vec<u8>,
    blocks: BTreeMap<u64, Block>,
    used: u64,
}

impl ArenaBackend {
    pub fn new(limit: u64) -> Result<Self> {
        let len = usize::try_from(limit)
            .map_err(|_| Error::Config(format!("arena of {limit} bytes is not addressable")))?;
        let mut region = Vec::new();
        region
            .try_reserve_exact(len)
            .map_err(|e| Error::Config(format!("arena reserve {limit} bytes: {e}")))?;
        region.resize(len, 0u8);

        let mut blocks = BTreeMap::new();
        if limit > 0 {
            blocks.insert(
                0,
                Block {
                    span: limit,
                    state: BlockState::Free,
                },
            );
        }
        Ok(Self {
            region,
            blocks,
            used: 0,
        })
    }

    pub fn free_block_count(&self) -> usize {
        self.blocks.values().filter(|b| b.is_free()).count()
    }

    /// Largest request that would currently succeed.
    pub fn largest_free_allocation(&self) -> u64 {
        self.blocks
            .values()
            .filter(|b| b.is_free() && b.span >= TAGS)
            .map(|b| b.span - TAGS)
            .max()
            .unwrap_or(0)
    }

    fn allocated(&self, slot: u64) -> Result<(Block, u64)> {
        match self.blocks.get(&slot) {
            Some(b) => match b.state {
                BlockState::Allocated { size } => Ok((*b, size)),
                BlockState::Free => Err(Error::Corrupted(format!(
                    "arena block at {slot} is free"
                ))),
            },
            None => Err(Error::Corrupted(format!("no arena block at {slot}"))),
        }
    }

    fn first_fit(&self, span: u64) -> Option<u64> {
        self.blocks
            .iter()
            .find(|(_, b)| b.is_free() && b.span >= span)
            .map(|(off, _)| *off)
    }

    fn right_free(&self, off: u64, span: u64) -> Option<(u64, Block)> {
        let right = off + span;
        self.blocks
            .get(&right)
            .filter(|b| b.is_free())
            .map(|b| (right, *b))
    }

    fn left_free(&self, off: u64) -> Option<(u64, Block)> {
        self.blocks
            .range(..off)
            .next_back()
            .filter(|(_, b)| b.is_free())
            .map(|(o, b)| (*o, *b))
    }

    /// Shrink the allocated block at `off` to `keep` bytes and hand the rest
    /// back as a free block, merged with a free right neighbour.
    fn split_tail(&mut self, off: u64, keep: u64) {
        let Some(block) = self.blocks.get(&off).copied() else {
            return;
        };
        if block.span < keep || block.span - keep < MIN_SPLIT {
            return;
        }

        let mut free_span = block.span - keep;
        if let Some((right_off, right)) = self.right_free(off, block.span) {
            self.blocks.remove(&right_off);
            free_span += right.span;
        }

        self.blocks.insert(
            off,
            Block {
                span: keep,
                state: block.state,
            },
        );
        self.blocks.insert(
            off + keep,
            Block {
                span: free_span,
                state: BlockState::Free,
            },
        );
        self.used -= block.span - keep;
    }

    fn data_range(&self, slot: u64, size: u64) -> Result<Range<usize>> {
        let (block, _) = self.allocated(slot)?;
        if ALLOCATION_HEADER_SIZE + size > block.span - ALLOCATION_FOOTER_SIZE {
            return Err(Error::Corrupted(format!(
                "{size} bytes do not fit arena block at {slot}"
            )));
        }
        let start = (slot + ALLOCATION_HEADER_SIZE) as usize;
        Ok(start..start + size as usize)
    }
}

impl Store for ArenaBackend {
    fn kind(&self) -> StoreKind {
        StoreKind::Arena
    }

    fn limit(&self) -> u64 {
        self.region.len() as u64
    }

    fn used(&self) -> u64 {
        self.used
    }

    fn alloc(&mut self, size: u64) -> Result<Option<u64>> {
        let span = overall_size(size);
        let Some(off) = self.first_fit(span) else {
            return Ok(None);
        };

        if let Some(block) = self.blocks.get_mut(&off) {
            block.state = BlockState::Allocated { size };
            self.used += block.span;
        }
        self.split_tail(off, span);
        Ok(Some(off))
    }

    fn free(&mut self, slot: u64) -> Result<()> {
        let (block, _) = self.allocated(slot)?;
        self.used -= block.span;

        let mut off = slot;
        let mut span = block.span;
        if let Some((right_off, right)) = self.right_free(slot, block.span) {
            self.blocks.remove(&right_off);
            span += right.span;
        }
        if let Some((left_off, left)) = self.left_free(slot) {
            self.blocks.remove(&slot);
            off = left_off;
            span += left.span;
        }

        self.blocks.insert(
            off,
            Block {
                span,
                state: BlockState::Free,
            },
        );
        Ok(())
    }

    fn resize_in_place(&mut self, slot: u64, old_size: u64, new_size: u64) -> Result<bool> {
        let (block, _) = self.allocated(slot)?;
        let capacity = block.span - TAGS;

        if new_size < old_size {
            self.blocks.insert(
                slot,
                Block {
                    span: block.span,
                    state: BlockState::Allocated { size: new_size },
                },
            );
            self.split_tail(slot, overall_size(new_size));
            return Ok(true);
        }

        // Grows into slack left over from an earlier unsplit fit or shrink.
        if align_up(new_size) <= capacity {
            self.blocks.insert(
                slot,
                Block {
                    span: block.span,
                    state: BlockState::Allocated { size: new_size },
                },
            );
            return Ok(true);
        }

        if let Some((right_off, right)) = self.right_free(slot, block.span) {
            if block.span + right.span >= overall_size(new_size) {
                self.blocks.remove(&right_off);
                self.blocks.insert(
                    slot,
                    Block {
                        span: block.span + right.span,
                        state: BlockState::Allocated { size: new_size },
                    },
                );
                self.used += right.span;
                self.split_tail(slot, overall_size(new_size));
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn map(&mut self, slot: u64, _size: u64, _first: bool) -> Result<()> {
        self.allocated(slot).map(|_| ())
    }

    fn unmap(&mut self, slot: u64, _size: u64, _last: bool) -> Result<()> {
        self.allocated(slot).map(|_| ())
    }

    fn bytes(&self, slot: u64, size: u64) -> Result<&[u8]> {
        let range = self.data_range(slot, size)?;
        Ok(&self.region[range])
    }

    fn bytes_mut(&mut self, slot: u64, size: u64) -> Result<&mut [u8]> {
        let range = self.data_range(slot, size)?;
        Ok(&mut self.region[range])
    }

    fn check(&self) -> Result<()> {
        let mut expected = 0u64;
        let mut used = 0u64;
        let mut prev_free = false;

        for (off, block) in &self.blocks {
            if *off != expected {
                return Err(Error::Corrupted(format!(
                    "arena gap or overlap at {expected}, next block at {off}"
                )));
            }
            if block.span < TAGS {
                return Err(Error::Corrupted(format!(
                    "arena block at {off} smaller than its tags"
                )));
            }
            match block.state {
                BlockState::Free => {
                    if prev_free {
                        return Err(Error::Corrupted(format!(
                            "uncoalesced free block at {off}"
                        )));
                    }
                    prev_free = true;
                }
                BlockState::Allocated { size } => {
                    if overall_size(size) > block.span {
                        return Err(Error::Corrupted(format!(
                            "allocation of {size} overflows block at {off}"
                        )));
                    }
                    used += block.span;
                    prev_free = false;
                }
            }
            expected = off + block.span;
        }

        if expected != self.region.len() as u64 {
            return Err(Error::Corrupted(format!(
                "arena blocks end at {expected}, region is {}",
                self.region.len()
            )));
        }
        if used != self.used {
            return Err(Error::Corrupted(format!(
                "arena accounts {} used bytes, blocks hold {used}",
                self.used
            )));
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.region = Vec::new();
        self.blocks.clear();
        self.used = 0;
        Ok(())
    }
}
