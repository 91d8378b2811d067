//! Native backend: one heap buffer per allocation.
//!
//! Release does not free outstanding allocations. They stay owned by the
//! backend until the heap value itself is dropped.

use std::collections::HashMap;

use super::{overall_size, Store, StoreKind};
use crate::error::{Error, Result};

pub struct NativeBackend {
    limit: u64,
    used: u64,
    next_slot: u64,
    slots: HashMap<u64, Vec<u8>>,
}

impl NativeBackend {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: 0,
            next_slot: 1,
            slots: HashMap::new(),
        }
    }

    /// Allocations still owned by this backend.
    pub fn outstanding(&self) -> usize {
        self.slots.len()
    }

    fn buffer(&self, slot: u64) -> Result<&Vec<u8>> {
        self.slots
            .get(&slot)
            .ok_or_else(|| Error::Corrupted(format!("no native allocation in slot {slot}")))
    }

    fn buffer_mut(&mut self, slot: u64) -> Result<&mut Vec<u8>> {
        self.slots
            .get_mut(&slot)
            .ok_or_else(|| Error::Corrupted(format!("no native allocation in slot {slot}")))
    }
}

impl Store for NativeBackend {
    fn kind(&self) -> StoreKind {
        StoreKind::Native
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn used(&self) -> u64 {
        self.used
    }

    fn alloc(&mut self, size: u64) -> Result<Option<u64>> {
        let charged = overall_size(size);
        if self.used + charged > self.limit {
            return Ok(None);
        }

        let mut buf = Vec::new();
        if buf.try_reserve_exact(size as usize).is_err() {
            // The native allocator said no; same outcome as a full heap.
            return Ok(None);
        }
        buf.resize(size as usize, 0u8);

        let slot = self.next_slot;
        self.next_slot += 1;
        self.slots.insert(slot, buf);
        self.used += charged;
        Ok(Some(slot))
    }

    fn free(&mut self, slot: u64) -> Result<()> {
        let buf = self
            .slots
            .remove(&slot)
            .ok_or_else(|| Error::Corrupted(format!("no native allocation in slot {slot}")))?;
        self.used -= overall_size(buf.len() as u64);
        Ok(())
    }

    fn resize_in_place(&mut self, slot: u64, old_size: u64, new_size: u64) -> Result<bool> {
        let (old_charge, new_charge) = (overall_size(old_size), overall_size(new_size));
        if new_charge > old_charge && self.used - old_charge + new_charge > self.limit {
            return Ok(false);
        }

        let buf = self.buffer_mut(slot)?;
        if new_size > old_size
            && buf
                .try_reserve_exact((new_size - old_size) as usize)
                .is_err()
        {
            return Ok(false);
        }
        buf.resize(new_size as usize, 0u8);
        self.used = self.used - old_charge + new_charge;
        Ok(true)
    }

    fn map(&mut self, slot: u64, _size: u64, _first: bool) -> Result<()> {
        self.buffer(slot).map(|_| ())
    }

    fn unmap(&mut self, slot: u64, _size: u64, _last: bool) -> Result<()> {
        self.buffer(slot).map(|_| ())
    }

    fn bytes(&self, slot: u64, size: u64) -> Result<&[u8]> {
        let buf = self.buffer(slot)?;
        buf.get(..size as usize)
            .ok_or_else(|| Error::Corrupted(format!("native slot {slot} shorter than {size}")))
    }

    fn bytes_mut(&mut self, slot: u64, size: u64) -> Result<&mut [u8]> {
        let buf = self.buffer_mut(slot)?;
        buf.get_mut(..size as usize)
            .ok_or_else(|| Error::Corrupted(format!("native slot {slot} shorter than {size}")))
    }

    fn check(&self) -> Result<()> {
        let charged: u64 = self
            .slots
            .values()
            .map(|b| overall_size(b.len() as u64))
            .sum();
        if charged != self.used || self.used > self.limit {
            return Err(Error::Corrupted(format!(
                "native backend accounts {} bytes, slots hold {charged}, limit {}",
                self.used, self.limit
            )));
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        #[cfg(feature = "tracing")]
        if !self.slots.is_empty() {
            tracing::warn!(
                outstanding = self.slots.len(),
                bytes = self.used,
                "native heap released with outstanding allocations"
            );
        }
        Ok(())
    }
}
