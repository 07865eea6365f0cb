//! Cumulative session accounting.
//!
//! Tracks what one process invocation actually downloaded: image sets and
//! bytes, incremented only on real writes so skipped work never inflates the
//! totals. The counters live in an explicit struct passed through the call
//! chain (not a global), so tests can run independent sessions side by side.
//! Lifetime is the process; nothing here is persisted.

/// Counters for one harvest session.
#[derive(Debug, Default)]
pub struct SessionStats {
    image_sets: u64,
    image_bytes: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one newly written asset of `bytes` bytes.
    pub fn add_bytes(&mut self, bytes: u64) {
        self.image_bytes += bytes;
    }

    /// Account for one record that wrote at least one new asset.
    pub fn add_image_set(&mut self) {
        self.image_sets += 1;
    }

    pub fn image_sets(&self) -> u64 {
        self.image_sets
    }

    pub fn image_bytes(&self) -> u64 {
        self.image_bytes
    }

    /// The cumulative progress line shown after each record that produced
    /// at least one new asset. Reflects session totals, not per-record ones.
    pub fn progress_line(&self) -> String {
        format!(
            "downloaded {} image set{} ({}) this session",
            self.image_sets,
            if self.image_sets == 1 { "" } else { "s" },
            format_bytes(self.image_bytes)
        )
    }
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
