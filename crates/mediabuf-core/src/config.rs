//! Heap and content view configuration that callers can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::limits::{
    DEFAULT_SPILL_ROOT, HUNDREDS_OF_NANOS_IN_A_SECOND, MAX_HEAP_SIZE, MAX_LARGE_HEAP_SIZE,
    MIN_CONTENT_VIEW_BUFFER_DURATION, MIN_CONTENT_VIEW_ITEMS, MIN_HEAP_SIZE,
};

/// In-memory backend that serves allocations before anything spills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryBackend {
    /// One contiguous region carved into boundary-tagged blocks.
    Arena,
    /// One native allocation per handle.
    Native,
}

/// Secondary store used once the primary share is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpillKind {
    Device,
    File,
}

/// Payload codec for spill files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpillCodec {
    #[default]
    None,
    Zstd,
    Lz4,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapConfig {
    /// Total capacity across primary and spill backends (bytes).
    pub limit_bytes: u64,

    /// Percent of `limit_bytes` kept in primary memory, 0..=100. The
    /// remainder goes to the spill backend. Ignored without a spill backend.
    pub spill_ratio_percent: u32,

    pub primary: PrimaryBackend,

    pub spill: Option<SpillKind>,

    /// Directory for spill files. Must exist when file spill is selected.
    pub spill_root: String,

    pub spill_codec: SpillCodec,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            limit_bytes: 64 * 1024 * 1024, // 64 MiB default
            spill_ratio_percent: 100,
            primary: PrimaryBackend::Arena,
            spill: None,
            spill_root: DEFAULT_SPILL_ROOT.to_string(),
            spill_codec: SpillCodec::None,
        }
    }
}

impl HeapConfig {
    pub fn new(limit_bytes: u64, primary: PrimaryBackend) -> Self {
        Self {
            limit_bytes,
            primary,
            ..Self::default()
        }
    }

    /// Keep `spill_ratio_percent` of the limit in memory and spill the rest to `kind`.
    pub fn with_spill(mut self, kind: SpillKind, spill_ratio_percent: u32) -> Self {
        self.spill = Some(kind);
        self.spill_ratio_percent = spill_ratio_percent;
        self
    }

    pub fn with_spill_root(mut self, root: impl Into<String>) -> Self {
        self.spill_root = root.into();
        self
    }

    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `MEDIABUF_HEAP_LIMIT`: total capacity in bytes
    /// - `MEDIABUF_HEAP_SPILL_RATIO`: in-memory share in percent
    /// - `MEDIABUF_HEAP_BACKEND`: `arena` or `native`
    /// - `MEDIABUF_HEAP_SPILL`: `device` or `file`
    /// - `MEDIABUF_HEAP_SPILL_ROOT`: spill file directory
    /// - `MEDIABUF_HEAP_SPILL_CODEC`: `none`, `zstd` or `lz4`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("MEDIABUF_HEAP_LIMIT") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.limit_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("MEDIABUF_HEAP_SPILL_RATIO") {
            if let Ok(v) = s.parse::<u32>() {
                cfg.spill_ratio_percent = v;
            }
        }

        if let Ok(s) = std::env::var("MEDIABUF_HEAP_BACKEND") {
            match s.trim().to_ascii_lowercase().as_str() {
                "arena" => cfg.primary = PrimaryBackend::Arena,
                "native" | "system" => cfg.primary = PrimaryBackend::Native,
                _ => {}
            }
        }

        if let Ok(s) = std::env::var("MEDIABUF_HEAP_SPILL") {
            match s.trim().to_ascii_lowercase().as_str() {
                "device" | "vram" => cfg.spill = Some(SpillKind::Device),
                "file" => cfg.spill = Some(SpillKind::File),
                "none" | "" => cfg.spill = None,
                _ => {}
            }
        }

        if let Ok(s) = std::env::var("MEDIABUF_HEAP_SPILL_ROOT") {
            cfg.spill_root = s;
        }

        if let Ok(s) = std::env::var("MEDIABUF_HEAP_SPILL_CODEC") {
            match s.trim().to_ascii_lowercase().as_str() {
                "none" => cfg.spill_codec = SpillCodec::None,
                "zstd" => cfg.spill_codec = SpillCodec::Zstd,
                "lz4" => cfg.spill_codec = SpillCodec::Lz4,
                _ => {}
            }
        }

        cfg
    }

    /// Largest limit accepted for this backend combination.
    pub fn max_limit(&self) -> u64 {
        match self.spill {
            Some(SpillKind::File) => MAX_LARGE_HEAP_SIZE,
            _ => MAX_HEAP_SIZE,
        }
    }

    /// Initialize-time checks that do not need any backend.
    pub fn validate(&self) -> Result<()> {
        if self.limit_bytes < MIN_HEAP_SIZE || self.limit_bytes > self.max_limit() {
            return Err(Error::Config(format!(
                "heap limit {} outside [{}, {}]",
                self.limit_bytes,
                MIN_HEAP_SIZE,
                self.max_limit()
            )));
        }
        if self.spill_ratio_percent > 100 {
            return Err(Error::Config(format!(
                "spill ratio {}% exceeds 100%",
                self.spill_ratio_percent
            )));
        }
        if self.spill == Some(SpillKind::File) && self.spill_root.trim().is_empty() {
            return Err(Error::Config("file spill requires a root directory".into()));
        }
        Ok(())
    }

    /// Bytes served by the primary backend.
    pub fn primary_limit(&self) -> u64 {
        if self.spill.is_none() {
            return self.limit_bytes;
        }
        // 128-bit to keep 4 TiB * 100 exact.
        ((self.limit_bytes as u128 * self.spill_ratio_percent.min(100) as u128) / 100) as u64
    }

    /// Bytes served by the spill backend.
    pub fn spill_limit(&self) -> u64 {
        self.limit_bytes - self.primary_limit()
    }
}

/// What happens when an add would overflow the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict oldest items one at a time until the new item fits.
    #[default]
    DropTail,
    /// Keep evicting until the tail starts a fragment.
    DropUntilFragmentStart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    pub max_items: u64,

    /// Upper bound on the summed duration of the window.
    pub max_buffer_duration: u64,

    pub overflow_policy: OverflowPolicy,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            max_items: 1000,
            max_buffer_duration: 120 * HUNDREDS_OF_NANOS_IN_A_SECOND,
            overflow_policy: OverflowPolicy::DropTail,
        }
    }
}

impl ViewConfig {
    pub fn new(max_items: u64, max_buffer_duration: u64, overflow_policy: OverflowPolicy) -> Self {
        Self {
            max_items,
            max_buffer_duration,
            overflow_policy,
        }
    }

    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `MEDIABUF_VIEW_MAX_ITEMS`
    /// - `MEDIABUF_VIEW_MAX_DURATION`: in 100ns units
    /// - `MEDIABUF_VIEW_OVERFLOW`: `drop_tail` or `drop_until_fragment_start`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("MEDIABUF_VIEW_MAX_ITEMS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.max_items = v;
            }
        }

        if let Ok(s) = std::env::var("MEDIABUF_VIEW_MAX_DURATION") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.max_buffer_duration = v;
            }
        }

        if let Ok(s) = std::env::var("MEDIABUF_VIEW_OVERFLOW") {
            match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
                "drop_tail" => cfg.overflow_policy = OverflowPolicy::DropTail,
                "drop_until_fragment_start" => {
                    cfg.overflow_policy = OverflowPolicy::DropUntilFragmentStart
                }
                _ => {}
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_items <= MIN_CONTENT_VIEW_ITEMS {
            return Err(Error::Config(format!(
                "max items {} must exceed {}",
                self.max_items, MIN_CONTENT_VIEW_ITEMS
            )));
        }
        if self.max_buffer_duration <= MIN_CONTENT_VIEW_BUFFER_DURATION {
            return Err(Error::Config(format!(
                "max buffer duration {} must exceed {}",
                self.max_buffer_duration, MIN_CONTENT_VIEW_BUFFER_DURATION
            )));
        }
        Ok(())
    }
}
