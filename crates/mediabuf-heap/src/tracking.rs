//! Byte accounting for a heap: live charge, limit headroom and peak.

use crate::backend::overall_size;

/// Tracks what a heap has charged against its limit.
///
/// Every live allocation is charged `overall_size(size)`; the tracker never
/// lets callers charge past the limit they were built with.
#[derive(Debug, Clone)]
pub struct UsageTracker {
    limit: u64,
    used: u64,
    peak: u64,
}

impl UsageTracker {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: 0,
            peak: 0,
        }
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn peak(&self) -> u64 {
        self.peak
    }

    pub fn headroom(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    /// Whether an allocation of `size` payload bytes would fit.
    pub fn fits(&self, size: u64) -> bool {
        overall_size(size) <= self.headroom()
    }

    /// Whether resizing `old_size` to `new_size` stays within the limit.
    pub fn fits_resize(&self, old_size: u64, new_size: u64) -> bool {
        let (old, new) = (overall_size(old_size), overall_size(new_size));
        new <= old || new - old <= self.headroom()
    }

    pub fn charge(&mut self, size: u64) {
        self.used += overall_size(size);
        self.bump_peak();
    }

    pub fn credit(&mut self, size: u64) {
        self.used = self.used.saturating_sub(overall_size(size));
    }

    pub fn recharge(&mut self, old_size: u64, new_size: u64) {
        self.credit(old_size);
        self.charge(new_size);
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }

    fn bump_peak(&mut self) {
        if self.used > self.peak {
            self.peak = self.used;
            #[cfg(feature = "tracing")]
            tracing::trace!(used = self.used, limit = self.limit, "new heap peak");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_survives_credits() {
        let mut t = UsageTracker::new(10_000);
        t.charge(1000);
        t.charge(2000);
        t.credit(1000);
        assert_eq!(t.used(), overall_size(2000));
        assert_eq!(t.peak(), overall_size(1000) + overall_size(2000));
    }

    #[test]
    fn fits_accounts_for_overhead() {
        let mut t = UsageTracker::new(overall_size(100) * 2);
        t.charge(100);
        // Payloads round up to 8 bytes: 104 shares 100's footprint, 105 does not.
        assert_eq!(overall_size(104), overall_size(100));
        assert!(overall_size(105) > overall_size(100));
        assert!(t.fits(104));
        assert!(!t.fits(105));
        assert!(t.fits_resize(100, 50));
        assert!(t.fits_resize(100, 200));
        assert!(!t.fits_resize(100, 400));
    }
}
