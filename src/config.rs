//! Configuration for the log manager
//!
//! Mirrors the shape of an engine config struct: a plain defaults struct
//! with named presets. The only tunable today is the automatic-checkpoint
//! threshold.

/// Configuration for [`crate::LogManager`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Approximate bytes of log records appended since the last checkpoint
    /// before a commit triggers an automatic checkpoint.
    pub checkpoint_threshold_bytes: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            checkpoint_threshold_bytes: 10 * 1024 * 1024, // 10 MB
        }
    }
}

impl LogConfig {
    /// A config that never checkpoints automatically. Useful for tests
    /// that assert byte-exact log contents.
    pub fn disabled() -> Self {
        Self {
            checkpoint_threshold_bytes: u64::MAX,
        }
    }
}
