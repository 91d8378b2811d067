//! The rolling content view.
//!
//! Items live in a fixed ring sized by `max_items`. Indices grow without
//! bound and are never reused; the live window is `[tail, head)` where
//! `head` is the index the next item will receive. The cursor `current`
//! always lies in `[tail, head]`.
//!
//! When automatic overflow would evict the item most recently handed out
//! by `get_next`, that item is moved aside instead. It leaves the window
//! (and its aggregates) but its eviction callback is deferred until the
//! cursor has moved on and another overflow happens, or a trim passes it.

use std::fmt;

use mediabuf_core::config::{OverflowPolicy, ViewConfig};

use crate::error::{Error, Result};
use crate::item::{ItemFlags, NewItem, ViewItem};

/// Eviction notification: the evicted item, and whether it had already been
/// delivered through the cursor.
pub type EvictionCallback<H> = Box<dyn FnMut(&ViewItem<H>, bool) + Send>;

/// An aggregate over the undelivered part of the window and over all of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Aggregate {
    /// From the cursor to the head.
    pub current: u64,
    /// From the tail to the head.
    pub window: u64,
}

pub struct ContentView<H> {
    config: ViewConfig,
    ring: Vec<Option<ViewItem<H>>>,
    tail: u64,
    head: u64,
    current: u64,
    /// Index last returned by `get_next`.
    in_flight: Option<u64>,
    retained: Option<ViewItem<H>>,
    window_duration: u64,
    window_size: u64,
    on_evict: EvictionCallback<H>,
}

impl<H> ContentView<H> {
    /// Create an empty view.
    ///
    /// Fails if `max_items` or `max_buffer_duration` is at or below its
    /// minimum.
    pub fn new<F>(config: ViewConfig, on_evict: F) -> Result<Self>
    where
        F: FnMut(&ViewItem<H>, bool) + Send + 'static,
    {
        config.validate()?;
        let capacity = usize::try_from(config.max_items)
            .map_err(|_| Error::Config(format!("max_items {} does not fit in memory", config.max_items)))?;

        let mut ring = Vec::new();
        ring.try_reserve_exact(capacity)
            .map_err(|_| Error::Config(format!("cannot reserve {capacity} view slots")))?;
        ring.resize_with(capacity, || None);

        Ok(Self {
            config,
            ring,
            tail: 0,
            head: 0,
            current: 0,
            in_flight: None,
            retained: None,
            window_duration: 0,
            window_size: 0,
            on_evict: Box::new(on_evict),
        })
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn capacity(&self) -> u64 {
        self.ring.len() as u64
    }

    /// Number of items in the window.
    pub fn len(&self) -> u64 {
        self.head - self.tail
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Index of the oldest live item (equal to `next_index` when empty).
    pub fn tail_index(&self) -> u64 {
        self.tail
    }

    /// Index the next added item will receive.
    pub fn next_index(&self) -> u64 {
        self.head
    }

    /// The in-flight item held back from overflow eviction, if any.
    pub fn retained(&self) -> Option<&ViewItem<H>> {
        self.retained.as_ref()
    }

    fn slot(&self, index: u64) -> usize {
        (index % self.capacity()) as usize
    }

    fn newest(&self) -> Option<&ViewItem<H>> {
        if self.is_empty() {
            return None;
        }
        self.ring[self.slot(self.head - 1)].as_ref()
    }

    fn oldest(&self) -> Option<&ViewItem<H>> {
        if self.is_empty() {
            return None;
        }
        self.ring[self.slot(self.tail)].as_ref()
    }

    // ---- adding and eviction ---------------------------------------------

    /// Append an item as the new head, evicting from the tail first if the
    /// window would exceed either limit. Returns the assigned index.
    pub fn add(&mut self, item: NewItem<H>) -> Result<u64> {
        if item.duration == 0 {
            return Err(Error::InvalidArgument("item duration must be non-zero".into()));
        }
        if item.duration > self.config.max_buffer_duration {
            return Err(Error::InvalidArgument(format!(
                "item duration {} exceeds the buffer duration {}",
                item.duration, self.config.max_buffer_duration
            )));
        }
        if let Some(newest) = self.newest() {
            if item.timestamp < newest.end() {
                return Err(Error::OutOfOrder {
                    timestamp: item.timestamp,
                    newest_end: newest.end(),
                });
            }
        }

        if self.needs_room(item.duration) {
            self.make_room(item.duration);
        }

        let index = self.head;
        let slot = self.slot(index);
        self.window_duration = self.window_duration.saturating_add(item.duration);
        self.window_size = self.window_size.saturating_add(item.size);
        self.ring[slot] = Some(item.into_item(index));
        self.head += 1;
        Ok(index)
    }

    fn needs_room(&self, incoming: u64) -> bool {
        self.len() + 1 > self.config.max_items
            || self.window_duration.saturating_add(incoming) > self.config.max_buffer_duration
    }

    fn make_room(&mut self, incoming: u64) {
        self.release_retained(false);

        let mut evicted = 0u64;
        match self.config.overflow_policy {
            OverflowPolicy::DropTail => {
                while !self.is_empty() && self.needs_room(incoming) {
                    self.evict_tail();
                    evicted += 1;
                }
            }
            OverflowPolicy::DropUntilFragmentStart => {
                while !self.is_empty() && self.needs_room(incoming) {
                    self.evict_tail();
                    evicted += 1;
                    while self.oldest().is_some_and(|tail| !tail.flags.starts_fragment()) {
                        self.evict_tail();
                        evicted += 1;
                    }
                }
                if self.is_empty() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(max_items = self.config.max_items, "content view cannot hold a whole fragment");
                }
            }
        }

        self.current = self.current.max(self.tail);

        #[cfg(feature = "tracing")]
        tracing::debug!(evicted, tail = self.tail, retained = self.retained.is_some(), "content view overflow");
        #[cfg(not(feature = "tracing"))]
        let _ = evicted;
    }

    /// Drop the tail item from the window. The in-flight item is retained
    /// instead of being reported.
    fn evict_tail(&mut self) {
        let delivered = self.tail < self.current;
        let Some(item) = self.pop_tail() else {
            return;
        };
        if self.in_flight == Some(item.index) {
            self.release_retained(false);
            #[cfg(feature = "tracing")]
            tracing::trace!(index = item.index, "retaining in-flight item");
            self.retained = Some(item);
        } else {
            (self.on_evict)(&item, delivered);
        }
    }

    fn pop_tail(&mut self) -> Option<ViewItem<H>> {
        if self.is_empty() {
            return None;
        }
        let slot = self.slot(self.tail);
        self.tail += 1;
        let item = self.ring[slot].take()?;
        self.window_duration = self.window_duration.saturating_sub(item.duration);
        self.window_size = self.window_size.saturating_sub(item.size);
        Some(item)
    }

    /// Report the retained item as evicted, unless it is still in flight
    /// and `force` is false.
    fn release_retained(&mut self, force: bool) {
        let releasable = match &self.retained {
            Some(item) => force || self.in_flight != Some(item.index),
            None => false,
        };
        if releasable {
            if let Some(item) = self.retained.take() {
                (self.on_evict)(&item, true);
            }
        }
    }

    /// Whether one more minimal item fits without eviction.
    pub fn check_availability(&self) -> bool {
        self.len() < self.config.max_items && self.window_duration < self.config.max_buffer_duration
    }

    /// Evict every item with an index below `index`, oldest first.
    pub fn trim_tail(&mut self, index: u64) -> Result<()> {
        if index > self.head {
            return Err(Error::InvalidIndex(index));
        }
        if self.retained.as_ref().is_some_and(|r| r.index < index) {
            if self.in_flight.is_some_and(|i| i < index) {
                self.in_flight = None;
            }
            self.release_retained(true);
        }
        while self.tail < index {
            let delivered = self.tail < self.current;
            if let Some(item) = self.pop_tail() {
                if self.in_flight == Some(item.index) {
                    self.in_flight = None;
                }
                (self.on_evict)(&item, delivered);
            }
        }
        self.current = self.current.max(self.tail);
        Ok(())
    }

    /// Evict everything, including a retained item, and reset the cursor.
    pub fn remove_all(&mut self) {
        self.release_retained(true);
        while !self.is_empty() {
            let delivered = self.tail < self.current;
            if let Some(item) = self.pop_tail() {
                (self.on_evict)(&item, delivered);
            }
        }
        self.current = self.tail;
        self.in_flight = None;
        self.window_duration = 0;
        self.window_size = 0;
    }

    // ---- cursor ----------------------------------------------------------

    /// Return the item at the cursor and advance past it.
    pub fn get_next(&mut self) -> Result<&ViewItem<H>> {
        if self.current >= self.head {
            return Err(Error::NoMoreItems);
        }
        let index = self.current;
        self.current += 1;
        self.in_flight = Some(index);
        self.get_item_at(index)
    }

    pub fn current_index(&self) -> u64 {
        self.current
    }

    /// Position the cursor anywhere in `[tail, head]`.
    pub fn set_current_index(&mut self, index: u64) -> Result<()> {
        if index < self.tail || index > self.head {
            return Err(Error::InvalidIndex(index));
        }
        self.current = index;
        Ok(())
    }

    pub fn reset_current(&mut self) {
        self.current = self.tail;
    }

    /// Move the cursor back so that at least `min_duration` of delivered
    /// content is delivered again.
    ///
    /// With `stop_at_fragment_start` the cursor only lands on the nearest
    /// fragment start behind it and does not move if there is none. With
    /// `only_if_acked` it never steps onto an item lacking either
    /// acknowledgement. The cursor then moves forward past `SKIP` items.
    pub fn rollback_current(
        &mut self,
        min_duration: u64,
        stop_at_fragment_start: bool,
        only_if_acked: bool,
    ) -> Result<()> {
        if self.current == self.tail || min_duration == 0 {
            return Ok(());
        }

        let mut pos = self.current;
        let mut rolled = 0u64;
        let mut landing = None;
        while pos > self.tail {
            let item = self.get_item_at(pos - 1)?;
            if only_if_acked && !item.flags.is_acked() {
                break;
            }
            let starts_fragment = item.flags.starts_fragment();
            rolled = rolled.saturating_add(item.duration);
            pos -= 1;

            if stop_at_fragment_start {
                if starts_fragment {
                    landing = Some(pos);
                    break;
                }
            } else {
                landing = Some(pos);
                if rolled >= min_duration {
                    break;
                }
            }
        }

        let Some(mut pos) = landing else {
            return Ok(());
        };
        while pos < self.head && self.get_item_at(pos)?.flags.contains(ItemFlags::SKIP) {
            pos += 1;
        }
        self.current = pos;
        Ok(())
    }

    // ---- lookup ----------------------------------------------------------

    /// Newest live item.
    pub fn get_head(&self) -> Result<&ViewItem<H>> {
        self.newest().ok_or(Error::NoMoreItems)
    }

    /// Oldest live item.
    pub fn get_tail(&self) -> Result<&ViewItem<H>> {
        self.oldest().ok_or(Error::NoMoreItems)
    }

    pub fn get_item_at(&self, index: u64) -> Result<&ViewItem<H>> {
        if !self.item_exists(index) {
            return Err(Error::InvalidIndex(index));
        }
        self.ring[self.slot(index)]
            .as_ref()
            .ok_or(Error::InvalidIndex(index))
    }

    pub fn item_exists(&self, index: u64) -> bool {
        index >= self.tail && index < self.head
    }

    /// Whether `timestamp` lies between the oldest item's start and the
    /// newest item's end.
    pub fn timestamp_in_range(&self, timestamp: u64, use_ack: bool) -> bool {
        match (self.oldest(), self.newest()) {
            (Some(oldest), Some(newest)) => {
                timestamp >= oldest.key(use_ack) && timestamp < newest.key_end(use_ack)
            }
            _ => false,
        }
    }

    /// The item covering `timestamp`. A timestamp in a gap between two items
    /// resolves to the newer one.
    pub fn get_item_with_timestamp(&self, timestamp: u64, use_ack: bool) -> Result<&ViewItem<H>> {
        if !self.timestamp_in_range(timestamp, use_ack) {
            return Err(Error::InvalidTimestamp(timestamp));
        }
        let (mut lo, mut hi) = (self.tail, self.head);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.get_item_at(mid)?.key_end(use_ack) <= timestamp {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        self.get_item_at(lo)
    }

    // ---- aggregates ------------------------------------------------------

    fn sum_from_current(&self, f: impl Fn(&ViewItem<H>) -> u64) -> u64 {
        (self.current.max(self.tail)..self.head)
            .filter_map(|i| self.ring[self.slot(i)].as_ref())
            .map(f)
            .fold(0u64, u64::saturating_add)
    }

    pub fn window_duration(&self) -> Aggregate {
        Aggregate {
            current: self.sum_from_current(|item| item.duration),
            window: self.window_duration,
        }
    }

    pub fn window_item_count(&self) -> Aggregate {
        Aggregate {
            current: self.head - self.current.max(self.tail),
            window: self.len(),
        }
    }

    pub fn window_allocation_size(&self) -> Aggregate {
        Aggregate {
            current: self.sum_from_current(|item| item.size),
            window: self.window_size,
        }
    }
}

impl<H> fmt::Debug for ContentView<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentView")
            .field("config", &self.config)
            .field("tail", &self.tail)
            .field("head", &self.head)
            .field("current", &self.current)
            .field("in_flight", &self.in_flight)
            .field("retained", &self.retained.as_ref().map(|r| r.index))
            .field("window_duration", &self.window_duration)
            .field("window_size", &self.window_size)
            .finish()
    }
}
