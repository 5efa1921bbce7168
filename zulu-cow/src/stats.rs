/// I/O counters for a [`BackingStore`](crate::BackingStore).
///
/// Requested counters track what callers asked for; the others track what was
/// actually moved against each file. The gap between the two is the cost of
/// group-granular copy-on-write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Bytes callers asked to read.
    pub requested_read: u64,
    /// Bytes read from the original to serve reads.
    pub original_read: u64,
    /// Bytes read from the overlay to serve reads.
    pub overlay_read: u64,
    /// Bytes callers asked to write.
    pub requested_write: u64,
    /// Bytes written to the overlay on behalf of callers.
    pub overlay_write: u64,
    /// Bytes read from the original while promoting groups.
    pub copy_read: u64,
}

impl Stats {
    /// Returns the read amplification as a fraction of requested bytes.
    ///
    /// `0.0` when nothing was requested.
    #[must_use]
    pub fn over_read(&self) -> f64 {
        amplification(self.original_read + self.overlay_read, self.requested_read)
    }

    /// Returns the write amplification as a fraction of requested bytes.
    ///
    /// Promotion reads count against writes. `0.0` when nothing was requested.
    #[must_use]
    pub fn over_write(&self) -> f64 {
        amplification(self.copy_read + self.overlay_write, self.requested_write)
    }
}

fn amplification(moved: u64, requested: u64) -> f64 {
    if requested == 0 {
        return 0.0;
    }

    moved as f64 / requested as f64 - 1.0
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "read {} (orig {}, overlay {}, over-read {:.1}%) write {} (overlay {}, copy {}, over-write {:.1}%)",
            self.requested_read,
            self.original_read,
            self.overlay_read,
            self.over_read() * 100.0,
            self.requested_write,
            self.overlay_write,
            self.copy_read,
            self.over_write() * 100.0,
        )
    }
}
