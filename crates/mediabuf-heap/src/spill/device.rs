//! Device-memory spill.
//!
//! The heap never talks to device memory directly. It goes through a
//! `DeviceAdapter` owned by a `DeviceSession`. A session is either
//! exclusive (initialized when a heap attaches, uninitialized when it is
//! released) or shared (initialized once, kept open across heap lifecycles
//! until the caller closes it).
//!
//! Mapped device regions are staged in host memory: map locks the region and
//! copies it out, unmap writes the copy back and unlocks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{overall_size, Store, StoreKind};
use crate::error::{Error, Result};

/// Adapter-issued region id. Zero is never a valid region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u32);

impl DeviceHandle {
    pub const INVALID: DeviceHandle = DeviceHandle(0);
}

/// Entry points of a device-memory provider.
pub trait DeviceAdapter: Send {
    fn init(&mut self) -> Result<()>;

    fn uninit(&mut self) -> Result<()>;

    /// Largest number of bytes the device can hand out.
    fn max_capacity(&self) -> u64;

    fn alloc(&mut self, size: u32) -> Result<DeviceHandle>;

    fn free(&mut self, handle: DeviceHandle) -> Result<()>;

    fn lock(&mut self, handle: DeviceHandle) -> Result<()>;

    fn unlock(&mut self, handle: DeviceHandle) -> Result<()>;

    /// Copy a locked region into `out`.
    fn read(&self, handle: DeviceHandle, out: &mut [u8]) -> Result<()>;

    /// Copy `data` into the start of a locked region.
    fn write(&mut self, handle: DeviceHandle, data: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Reopened for every heap; closed when that heap is released.
    Exclusive,
    /// Opened once and kept across heap lifecycles.
    Shared,
}

struct SessionInner {
    adapter: Box<dyn DeviceAdapter>,
    open: bool,
    heaps: usize,
}

/// Caller-owned adapter session. Cloning shares the same adapter.
#[derive(Clone)]
pub struct DeviceSession {
    mode: SessionMode,
    inner: Arc<Mutex<SessionInner>>,
}

impl DeviceSession {
    pub fn new(adapter: impl DeviceAdapter + 'static, mode: SessionMode) -> Self {
        Self {
            mode,
            inner: Arc::new(Mutex::new(SessionInner {
                adapter: Box::new(adapter),
                open: false,
                heaps: 0,
            })),
        }
    }

    pub fn exclusive(adapter: impl DeviceAdapter + 'static) -> Self {
        Self::new(adapter, SessionMode::Exclusive)
    }

    pub fn shared(adapter: impl DeviceAdapter + 'static) -> Self {
        Self::new(adapter, SessionMode::Shared)
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.lock().map(|inner| inner.open).unwrap_or(false)
    }

    /// Uninitialize a session no heap is attached to. No-op when closed.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.heaps > 0 {
            return Err(Error::Config(format!(
                "device session still attached to {} heap(s)",
                inner.heaps
            )));
        }
        if inner.open {
            inner.open = false;
            inner.adapter.uninit()?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Device("device session lock poisoned".into()))
    }

    /// Check capacity, then open the adapter if needed.
    pub(crate) fn attach(&self, required: u64) -> Result<()> {
        let mut inner = self.lock()?;
        if self.mode == SessionMode::Exclusive && inner.heaps > 0 {
            return Err(Error::Config(
                "exclusive device session is already attached to a heap".into(),
            ));
        }

        let max = inner.adapter.max_capacity();
        if max < required {
            return Err(Error::Device(format!(
                "cannot reserve {required} device bytes, adapter max is {max}"
            )));
        }

        if !inner.open {
            inner.adapter.init()?;
            inner.open = true;
            #[cfg(feature = "tracing")]
            tracing::debug!(mode = ?self.mode, max, "device session opened");
        }
        inner.heaps += 1;
        Ok(())
    }

    pub(crate) fn detach(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.heaps = inner.heaps.saturating_sub(1);
        if self.mode == SessionMode::Exclusive && inner.open {
            inner.open = false;
            inner.adapter.uninit()?;
            #[cfg(feature = "tracing")]
            tracing::debug!("device session closed");
        }
        Ok(())
    }

    pub(crate) fn with_adapter<R>(
        &self,
        f: impl FnOnce(&mut dyn DeviceAdapter) -> Result<R>,
    ) -> Result<R> {
        let mut inner = self.lock()?;
        if !inner.open {
            return Err(Error::Device("device session is not open".into()));
        }
        f(inner.adapter.as_mut())
    }
}

struct Region {
    bytes: Vec<u8>,
    locks: u32,
}

/// Device adapter backed by process memory.
///
/// Behaves like a real device provider (explicit init, bounded capacity,
/// lock before access) and is what `mediabuf-io` wires in by default.
pub struct HostRegionAdapter {
    capacity: u64,
    used: u64,
    initialized: bool,
    next: u32,
    regions: HashMap<u32, Region>,
}

impl HostRegionAdapter {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used: 0,
            initialized: false,
            next: 1,
            regions: HashMap::new(),
        }
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    fn region(&self, handle: DeviceHandle) -> Result<&Region> {
        self.regions
            .get(&handle.0)
            .ok_or_else(|| Error::Device(format!("unknown device region {}", handle.0)))
    }

    fn region_mut(&mut self, handle: DeviceHandle) -> Result<&mut Region> {
        self.regions
            .get_mut(&handle.0)
            .ok_or_else(|| Error::Device(format!("unknown device region {}", handle.0)))
    }

    fn ensure_init(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::Device("device not initialized".into()))
        }
    }
}

impl DeviceAdapter for HostRegionAdapter {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Err(Error::Device("device already initialized".into()));
        }
        self.initialized = true;
        Ok(())
    }

    fn uninit(&mut self) -> Result<()> {
        self.ensure_init()?;
        self.initialized = false;
        self.regions.clear();
        self.used = 0;
        Ok(())
    }

    fn max_capacity(&self) -> u64 {
        self.capacity
    }

    fn alloc(&mut self, size: u32) -> Result<DeviceHandle> {
        self.ensure_init()?;
        if self.used + size as u64 > self.capacity {
            return Err(Error::Device(format!("device out of memory for {size} bytes")));
        }
        let id = self.next;
        self.next = self.next.wrapping_add(1).max(1);
        self.regions.insert(
            id,
            Region {
                bytes: vec![0u8; size as usize],
                locks: 0,
            },
        );
        self.used += size as u64;
        Ok(DeviceHandle(id))
    }

    fn free(&mut self, handle: DeviceHandle) -> Result<()> {
        self.ensure_init()?;
        let region = self
            .regions
            .remove(&handle.0)
            .ok_or_else(|| Error::Device(format!("unknown device region {}", handle.0)))?;
        self.used -= region.bytes.len() as u64;
        Ok(())
    }

    fn lock(&mut self, handle: DeviceHandle) -> Result<()> {
        self.ensure_init()?;
        self.region_mut(handle)?.locks += 1;
        Ok(())
    }

    fn unlock(&mut self, handle: DeviceHandle) -> Result<()> {
        self.ensure_init()?;
        let region = self.region_mut(handle)?;
        if region.locks == 0 {
            return Err(Error::Device(format!("device region {} is not locked", handle.0)));
        }
        region.locks -= 1;
        Ok(())
    }

    fn read(&self, handle: DeviceHandle, out: &mut [u8]) -> Result<()> {
        let region = self.region(handle)?;
        if region.locks == 0 || out.len() > region.bytes.len() {
            return Err(Error::Device(format!("device region {} not readable", handle.0)));
        }
        out.copy_from_slice(&region.bytes[..out.len()]);
        Ok(())
    }

    fn write(&mut self, handle: DeviceHandle, data: &[u8]) -> Result<()> {
        let region = self.region_mut(handle)?;
        if region.locks == 0 || data.len() > region.bytes.len() {
            return Err(Error::Device(format!("device region {} not writable", handle.0)));
        }
        region.bytes[..data.len()].copy_from_slice(data);
        Ok(())
    }
}

struct DeviceSlot {
    handle: DeviceHandle,
    size: u64,
    staged: Option<Vec<u8>>,
}

/// Spill store that places each allocation in its own device region.
pub struct DeviceSpill {
    session: DeviceSession,
    limit: u64,
    used: u64,
    slots: HashMap<u64, DeviceSlot>,
    attached: bool,
}

impl DeviceSpill {
    /// Attach to `session`, reserving `limit` bytes of device capacity.
    pub fn new(session: DeviceSession, limit: u64) -> Result<Self> {
        session.attach(limit)?;
        Ok(Self {
            session,
            limit,
            used: 0,
            slots: HashMap::new(),
            attached: true,
        })
    }

    fn slot(&self, slot: u64) -> Result<&DeviceSlot> {
        self.slots
            .get(&slot)
            .ok_or_else(|| Error::Corrupted(format!("no device allocation in slot {slot}")))
    }

    fn slot_mut(&mut self, slot: u64) -> Result<&mut DeviceSlot> {
        self.slots
            .get_mut(&slot)
            .ok_or_else(|| Error::Corrupted(format!("no device allocation in slot {slot}")))
    }
}

impl Store for DeviceSpill {
    fn kind(&self) -> StoreKind {
        StoreKind::Device
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
        let device_size = u32::try_from(size)
            .map_err(|_| Error::Device(format!("cannot allocate {size} bytes from device")))?;

        let handle = self.session.with_adapter(|a| a.alloc(device_size))?;
        if handle == DeviceHandle::INVALID {
            return Err(Error::Device(format!("device refused {size} bytes")));
        }

        let slot = handle.0 as u64;
        self.slots.insert(
            slot,
            DeviceSlot {
                handle,
                size,
                staged: None,
            },
        );
        self.used += charged;
        Ok(Some(slot))
    }

    fn free(&mut self, slot: u64) -> Result<()> {
        let handle = self.slot(slot)?.handle;
        self.session.with_adapter(|a| a.free(handle))?;
        if let Some(freed) = self.slots.remove(&slot) {
            self.used -= overall_size(freed.size);
        }
        Ok(())
    }

    fn resize_in_place(&mut self, slot: u64, old_size: u64, new_size: u64) -> Result<bool> {
        // Device regions cannot grow; shrinking keeps the region.
        if new_size > old_size {
            return Ok(false);
        }
        let entry = self.slot_mut(slot)?;
        entry.size = new_size;
        self.used = self.used - overall_size(old_size) + overall_size(new_size);
        Ok(true)
    }

    fn map(&mut self, slot: u64, size: u64, first: bool) -> Result<()> {
        let handle = self.slot(slot)?.handle;
        self.session.with_adapter(|a| a.lock(handle))?;
        if !first {
            return Ok(());
        }

        let mut staged = vec![0u8; size as usize];
        let read = self.session.with_adapter(|a| a.read(handle, &mut staged));
        if let Err(e) = read {
            let _ = self.session.with_adapter(|a| a.unlock(handle));
            return Err(e);
        }
        self.slot_mut(slot)?.staged = Some(staged);
        Ok(())
    }

    fn unmap(&mut self, slot: u64, _size: u64, last: bool) -> Result<()> {
        let entry = self.slot_mut(slot)?;
        let handle = entry.handle;
        let staged = if last {
            entry.staged.take()
        } else {
            entry.staged.clone()
        };

        let session = &self.session;
        let written = match staged {
            Some(bytes) => session.with_adapter(|a| a.write(handle, &bytes)),
            None => Ok(()),
        };
        let unlocked = session.with_adapter(|a| a.unlock(handle));
        written.and(unlocked)
    }

    fn bytes(&self, slot: u64, size: u64) -> Result<&[u8]> {
        let entry = self.slot(slot)?;
        entry
            .staged
            .as_deref()
            .and_then(|b| b.get(..size as usize))
            .ok_or_else(|| Error::Device(format!("device slot {slot} is not mapped")))
    }

    fn bytes_mut(&mut self, slot: u64, size: u64) -> Result<&mut [u8]> {
        let entry = self.slot_mut(slot)?;
        entry
            .staged
            .as_deref_mut()
            .and_then(|b| b.get_mut(..size as usize))
            .ok_or_else(|| Error::Device(format!("device slot {slot} is not mapped")))
    }

    fn check(&self) -> Result<()> {
        let charged: u64 = self.slots.values().map(|s| overall_size(s.size)).sum();
        if charged != self.used || self.used > self.limit {
            return Err(Error::Corrupted(format!(
                "device spill accounts {} bytes, slots hold {charged}, limit {}",
                self.used, self.limit
            )));
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if !self.attached {
            return Ok(());
        }
        self.attached = false;

        let mut first_err = None;
        for (_, entry) in self.slots.drain() {
            if let Err(e) = self.session.with_adapter(|a| a.free(entry.handle)) {
                first_err.get_or_insert(e);
            }
        }
        self.used = 0;
        if let Err(e) = self.session.detach() {
            first_err.get_or_insert(e);
        }
        first_err.map_or(Ok(()), Err)
    }
}
