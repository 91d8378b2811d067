//! The heap engine: one handle space over a primary store and an optional
//! spill store.
//!
//! Allocation tries the primary store first and only then the spill store.
//! Running out of room everywhere is reported as `INVALID_HANDLE`, not as an
//! error. All mutation goes through `&mut self`; callers that share a heap
//! wrap it in their own lock.

use std::collections::HashMap;

use mediabuf_core::config::{HeapConfig, PrimaryBackend, SpillKind};
use mediabuf_core::handle::{AllocationHandle, INVALID_HANDLE};
use mediabuf_core::limits::MAX_ALLOCATION_SIZE;

use crate::backend::{overall_size, ArenaBackend, NativeBackend, Store, StoreKind};
use crate::error::{Error, Result};
use crate::spill::{DeviceSession, DeviceSpill, FileSpill, Storage};
use crate::tracking::UsageTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Primary,
    Spill,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    tier: Tier,
    slot: u64,
    size: u64,
    map_count: u32,
}

/// Proof of one outstanding map call. Hand it back to `Heap::unmap`.
#[must_use = "a mapping must be returned through Heap::unmap"]
#[derive(Debug)]
pub struct Mapping {
    handle: AllocationHandle,
    size: u64,
}

impl Mapping {
    pub fn handle(&self) -> AllocationHandle {
        self.handle
    }

    /// Allocation size at map time. Kept as `u64` since allocations may
    /// exceed `usize` on 32-bit targets.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub limit: u64,
    pub primary_limit: u64,
    pub spill_limit: u64,
    /// Bytes charged for live allocations, overhead included.
    pub heap_size: u64,
    pub primary_size: u64,
    pub spill_size: u64,
    pub peak_size: u64,
    pub allocation_count: usize,
    pub spill_allocation_count: usize,
}

/// Collects the collaborators a spill backend needs before building a heap.
pub struct HeapBuilder {
    config: HeapConfig,
    device: Option<DeviceSession>,
    storage: Option<Box<dyn Storage>>,
}

impl HeapBuilder {
    pub fn new(config: HeapConfig) -> Self {
        Self {
            config,
            device: None,
            storage: None,
        }
    }

    /// Session used when the config selects device spill.
    pub fn device_session(mut self, session: DeviceSession) -> Self {
        self.device = Some(session);
        self
    }

    /// Storage used when the config selects file spill.
    pub fn storage(mut self, storage: Box<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn build(self) -> Result<Heap> {
        let config = self.config;
        config.validate()?;

        let primary_limit = config.primary_limit();
        let spill_limit = config.spill_limit();

        let primary: Box<dyn Store> = match config.primary {
            PrimaryBackend::Arena => Box::new(ArenaBackend::new(primary_limit)?),
            PrimaryBackend::Native => Box::new(NativeBackend::new(primary_limit)),
        };

        let spill: Option<Box<dyn Store>> = match config.spill {
            None => None,
            Some(SpillKind::Device) => {
                let session = self.device.ok_or_else(|| {
                    Error::Config("device spill requires a device session".into())
                })?;
                Some(Box::new(DeviceSpill::new(session, spill_limit)?))
            }
            Some(SpillKind::File) => {
                let storage = self.storage.ok_or_else(|| {
                    Error::Config("file spill requires a storage backend".into())
                })?;
                Some(Box::new(FileSpill::new(
                    storage,
                    config.spill_root.clone(),
                    config.spill_codec,
                    spill_limit,
                )?))
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            limit = config.limit_bytes,
            primary_limit,
            spill_limit,
            primary = ?config.primary,
            spill = ?config.spill,
            "heap initialized"
        );

        let usage = UsageTracker::new(config.limit_bytes);
        Ok(Heap {
            config,
            primary,
            spill,
            handles: HashMap::new(),
            next_handle: 1,
            usage,
            released: false,
        })
    }
}

pub struct Heap {
    config: HeapConfig,
    primary: Box<dyn Store>,
    spill: Option<Box<dyn Store>>,
    handles: HashMap<AllocationHandle, Entry>,
    next_handle: u64,
    usage: UsageTracker,
    released: bool,
}

fn validate_size(size: u64) -> Result<()> {
    if size == 0 || size >= MAX_ALLOCATION_SIZE {
        return Err(Error::InvalidAllocationSize(size));
    }
    Ok(())
}

impl Heap {
    /// Build a heap whose config needs no injected collaborators.
    pub fn initialize(config: HeapConfig) -> Result<Self> {
        HeapBuilder::new(config).build()
    }

    pub fn builder(config: HeapConfig) -> HeapBuilder {
        HeapBuilder::new(config)
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released {
            Err(Error::Released)
        } else {
            Ok(())
        }
    }

    fn entry(&self, handle: AllocationHandle) -> Result<Entry> {
        if !handle.is_valid() {
            return Err(Error::InvalidHandle(handle));
        }
        self.handles
            .get(&handle)
            .copied()
            .ok_or(Error::InvalidHandle(handle))
    }

    fn entry_mut(&mut self, handle: AllocationHandle) -> Result<&mut Entry> {
        self.handles
            .get_mut(&handle)
            .ok_or(Error::InvalidHandle(handle))
    }

    fn store(&self, tier: Tier) -> Result<&dyn Store> {
        match tier {
            Tier::Primary => Ok(self.primary.as_ref()),
            Tier::Spill => match self.spill.as_deref() {
                Some(spill) => Ok(spill),
                None => Err(Error::Corrupted("spill entry without a spill store".into())),
            },
        }
    }

    fn store_mut(&mut self, tier: Tier) -> Result<&mut dyn Store> {
        match tier {
            Tier::Primary => Ok(self.primary.as_mut()),
            Tier::Spill => match self.spill.as_deref_mut() {
                Some(spill) => Ok(spill),
                None => Err(Error::Corrupted("spill entry without a spill store".into())),
            },
        }
    }

    /// Allocate `size` bytes. Returns `INVALID_HANDLE` when no store has room.
    pub fn alloc(&mut self, size: u64) -> Result<AllocationHandle> {
        self.ensure_live()?;
        validate_size(size)?;

        if !self.usage.fits(size) {
            #[cfg(feature = "tracing")]
            tracing::trace!(size, heap_size = self.usage.used(), "heap limit reached");
            return Ok(INVALID_HANDLE);
        }

        let placed = match self.primary.alloc(size)? {
            Some(slot) => Some((Tier::Primary, slot)),
            None => match self.spill.as_mut() {
                Some(spill) => spill.alloc(size)?.map(|slot| (Tier::Spill, slot)),
                None => None,
            },
        };
        let Some((tier, slot)) = placed else {
            return Ok(INVALID_HANDLE);
        };

        let handle = AllocationHandle::new(self.next_handle);
        self.next_handle += 1;
        self.handles.insert(
            handle,
            Entry {
                tier,
                slot,
                size,
                map_count: 0,
            },
        );
        self.usage.charge(size);

        #[cfg(feature = "tracing")]
        tracing::trace!(%handle, size, spilled = (tier == Tier::Spill), "allocated");
        Ok(handle)
    }

    /// Free an unmapped allocation. The handle is never issued again.
    pub fn free(&mut self, handle: AllocationHandle) -> Result<()> {
        self.ensure_live()?;
        let entry = self.entry(handle)?;
        if entry.map_count > 0 {
            return Err(Error::HandleMapped {
                handle,
                map_count: entry.map_count,
            });
        }

        self.store_mut(entry.tier)?.free(entry.slot)?;
        self.handles.remove(&handle);
        self.usage.credit(entry.size);
        Ok(())
    }

    /// Map an allocation for direct access. Maps are reference counted.
    pub fn map(&mut self, handle: AllocationHandle) -> Result<Mapping> {
        self.ensure_live()?;
        let entry = self.entry(handle)?;
        self.store_mut(entry.tier)?
            .map(entry.slot, entry.size, entry.map_count == 0)?;
        self.entry_mut(handle)?.map_count += 1;
        Ok(Mapping {
            handle,
            size: entry.size,
        })
    }

    /// Return a mapping. The map count drops even when the store reports a
    /// failure; the allocation itself stays intact.
    pub fn unmap(&mut self, mapping: Mapping) -> Result<()> {
        self.ensure_live()?;
        let handle = mapping.handle;
        let entry = self.entry(handle)?;
        if entry.map_count == 0 {
            return Err(Error::NotMapped(handle));
        }

        let res = self
            .store_mut(entry.tier)?
            .unmap(entry.slot, entry.size, entry.map_count == 1);
        self.entry_mut(handle)?.map_count -= 1;
        res
    }

    fn mapped_entry(&self, mapping: &Mapping) -> Result<Entry> {
        self.ensure_live()?;
        let entry = self.entry(mapping.handle)?;
        if entry.map_count == 0 {
            return Err(Error::NotMapped(mapping.handle));
        }
        Ok(entry)
    }

    pub fn bytes(&self, mapping: &Mapping) -> Result<&[u8]> {
        let entry = self.mapped_entry(mapping)?;
        self.store(entry.tier)?.bytes(entry.slot, entry.size)
    }

    pub fn bytes_mut(&mut self, mapping: &Mapping) -> Result<&mut [u8]> {
        let entry = self.mapped_entry(mapping)?;
        self.store_mut(entry.tier)?.bytes_mut(entry.slot, entry.size)
    }

    pub fn alloc_size(&self, handle: AllocationHandle) -> Result<u64> {
        self.ensure_live()?;
        Ok(self.entry(handle)?.size)
    }

    pub fn map_count(&self, handle: AllocationHandle) -> Result<u32> {
        self.ensure_live()?;
        Ok(self.entry(handle)?.map_count)
    }

    /// Which store currently holds `handle`.
    pub fn backend_of(&self, handle: AllocationHandle) -> Result<StoreKind> {
        self.ensure_live()?;
        let entry = self.entry(handle)?;
        Ok(self.store(entry.tier)?.kind())
    }

    /// Change an allocation's size, returning the handle that now names it.
    ///
    /// Shrinks and grows into adjacent free space keep the handle. Any other
    /// grow relocates the bytes to a fresh allocation, frees the old one and
    /// returns the new handle. On failure the original is untouched.
    pub fn resize(&mut self, handle: AllocationHandle, new_size: u64) -> Result<AllocationHandle> {
        self.ensure_live()?;
        validate_size(new_size)?;
        let entry = self.entry(handle)?;
        if new_size == entry.size {
            return Ok(handle);
        }
        if entry.map_count > 0 {
            return Err(Error::HandleMapped {
                handle,
                map_count: entry.map_count,
            });
        }

        if !self.usage.fits_resize(entry.size, new_size) {
            return Err(Error::OutOfSpace {
                requested: new_size,
            });
        }

        if self
            .store_mut(entry.tier)?
            .resize_in_place(entry.slot, entry.size, new_size)?
        {
            self.entry_mut(handle)?.size = new_size;
            self.usage.recharge(entry.size, new_size);
            return Ok(handle);
        }

        self.relocate(handle, entry, new_size)
    }

    fn relocate(&mut self, handle: AllocationHandle, entry: Entry, new_size: u64) -> Result<AllocationHandle> {
        let contents = self.read_unmapped(entry)?;

        let moved = self.alloc(new_size)?;
        if !moved.is_valid() {
            return Err(Error::OutOfSpace {
                requested: new_size,
            });
        }

        let target = self.entry(moved)?;
        if let Err(e) = self.write_unmapped(target, &contents) {
            self.discard_relocation(moved);
            return Err(e);
        }
        if let Err(e) = self.free(handle) {
            self.discard_relocation(moved);
            return Err(e);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(from = %handle, to = %moved, new_size, "allocation relocated");
        Ok(moved)
    }

    /// Undo a half-finished relocation. The caller reports the original error.
    fn discard_relocation(&mut self, moved: AllocationHandle) {
        if let Err(_e) = self.free(moved) {
            #[cfg(feature = "tracing")]
            tracing::warn!(handle = %moved, error = %_e, "relocation target could not be freed");
        }
    }

    fn read_unmapped(&mut self, entry: Entry) -> Result<Vec<u8>> {
        let store = self.store_mut(entry.tier)?;
        store.map(entry.slot, entry.size, true)?;
        let contents = store.bytes(entry.slot, entry.size).map(|b| b.to_vec());
        let unmapped = store.unmap(entry.slot, entry.size, true);
        let contents = contents?;
        unmapped?;
        Ok(contents)
    }

    fn write_unmapped(&mut self, entry: Entry, data: &[u8]) -> Result<()> {
        let store = self.store_mut(entry.tier)?;
        store.map(entry.slot, entry.size, true)?;
        let written = store.bytes_mut(entry.slot, entry.size).map(|dst| {
            let n = dst.len().min(data.len());
            dst[..n].copy_from_slice(&data[..n]);
        });
        let unmapped = store.unmap(entry.slot, entry.size, true);
        written?;
        unmapped
    }

    /// Bytes charged for live allocations, overhead included.
    pub fn heap_size(&self) -> u64 {
        self.usage.used()
    }

    pub fn allocation_count(&self) -> usize {
        self.handles.len()
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            limit: self.config.limit_bytes,
            primary_limit: self.primary.limit(),
            spill_limit: self.spill.as_ref().map_or(0, |s| s.limit()),
            heap_size: self.usage.used(),
            peak_size: self.usage.peak(),
            allocation_count: self.handles.len(),
            ..HeapStats::default()
        };
        for entry in self.handles.values() {
            match entry.tier {
                Tier::Primary => stats.primary_size += overall_size(entry.size),
                Tier::Spill => {
                    stats.spill_size += overall_size(entry.size);
                    stats.spill_allocation_count += 1;
                }
            }
        }
        stats
    }

    /// Validate the handle table against every store's own bookkeeping.
    pub fn debug_check(&self) -> Result<()> {
        self.ensure_live()?;
        self.primary.check()?;
        if let Some(spill) = &self.spill {
            spill.check()?;
        }

        let charged: u64 = self.handles.values().map(|e| overall_size(e.size)).sum();
        if charged != self.usage.used() {
            return Err(Error::Corrupted(format!(
                "heap accounts {} bytes, handles hold {charged}",
                self.usage.used()
            )));
        }
        if self.usage.used() > self.config.limit_bytes {
            return Err(Error::Corrupted(format!(
                "heap size {} exceeds limit {}",
                self.usage.used(), self.config.limit_bytes
            )));
        }
        if self.primary.used() > self.primary.limit() {
            return Err(Error::Corrupted("primary store over its limit".into()));
        }
        Ok(())
    }

    /// Tear the heap down. Idempotent.
    ///
    /// Arena and spill capacity is reclaimed wholesale. Native allocations are
    /// not freed here. A failure from one store does not stop the others from
    /// being released; the first error is returned.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            outstanding = self.handles.len(),
            heap_size = self.usage.used(),
            "releasing heap"
        );

        let mut first_err = self.primary.release().err();
        if let Some(spill) = self.spill.as_mut() {
            if let Err(e) = spill.release() {
                first_err.get_or_insert(e);
            }
        }
        self.handles.clear();
        self.usage.reset();
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if let Err(_e) = self.release() {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_e, "heap release on drop failed");
        }
    }
}
