//! Progress reporting hooks for long-running file work

use std::path::Path;

/// Receives byte-count increments while archiving and hashing.
///
/// Implementations must be cheap and thread-safe; they are called from CPU
/// workers once per block.
pub trait ProgressSink: Send + Sync {
    /// A new unit of work over `total` bytes has started
    fn begin(&self, label: &str, path: &Path, total: u64);

    /// `bytes` more bytes were processed
    fn advance(&self, bytes: u64);

    /// The unit of work started for `path` finished
    fn finish(&self, _path: &Path) {}
}

/// Discards every report
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn begin(&self, _label: &str, _path: &Path, _total: u64) {}

    fn advance(&self, _bytes: u64) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Counts every byte reported
    #[derive(Debug, Default)]
    pub struct CountingProgress {
        pub expected: AtomicU64,
        pub seen: AtomicU64,
    }

    impl ProgressSink for CountingProgress {
        fn begin(&self, _label: &str, _path: &Path, total: u64) {
            self.expected.fetch_add(total, Ordering::SeqCst);
        }

        fn advance(&self, bytes: u64) {
            self.seen.fetch_add(bytes, Ordering::SeqCst);
        }
    }
}
