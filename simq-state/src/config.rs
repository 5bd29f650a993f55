//! State provisioning configuration

use serde::{Deserialize, Serialize};

/// Configuration for state construction and buffer management
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Byte alignment of local heap buffers
    ///
    /// Must be a power of two and at least the alignment of `Complex64`.
    ///
    /// Default: 64 (AVX-512)
    pub alignment: usize,

    /// Minimum buffer length (in elements) for parallel resets
    ///
    /// Shorter buffers are cleared on the calling thread.
    ///
    /// Default: 65536 (a 16-qubit wavefunction)
    pub parallel_threshold: usize,

    /// Maximum size in bytes of a single state buffer
    ///
    /// Set to 0 for no limit.
    ///
    /// Default: 0 (unlimited)
    pub memory_limit: usize,

    /// Permission bits for newly created shared memory segments
    ///
    /// Default: 0o600
    pub segment_mode: u32,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            alignment: 64,
            parallel_threshold: 1 << 16,
            memory_limit: 0,
            segment_mode: 0o600,
        }
    }
}

impl StateConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_parallel_threshold(mut self, elements: usize) -> Self {
        self.parallel_threshold = elements;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    pub fn with_segment_mode(mut self, mode: u32) -> Self {
        self.segment_mode = mode;
        self
    }
}
