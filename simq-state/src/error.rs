//! Error types for state construction and buffer management

use crate::system_state::StateKind;
use thiserror::Error;

/// Errors that can occur while provisioning or manipulating a state
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    /// A buffer's element count disagrees with the size implied by the qubit count
    #[error("Allocation size mismatch: expected {expected} elements, got {actual}")]
    AllocationSizeMismatch { expected: usize, actual: usize },

    /// Buffer length cannot describe a state of the requested kind
    #[error("Malformed state buffer of length {length}: {reason}")]
    MalformedState { length: usize, reason: &'static str },

    /// Operation requested on the wrong kind of state
    #[error("Expected a {expected} state, got a {actual} state")]
    WrongStateKind { expected: StateKind, actual: StateKind },

    /// Memory allocation error
    #[error("Failed to allocate {size} bytes for state buffer")]
    AllocationError { size: usize },

    /// Qubit count does not fit in addressable memory or the configured limit
    #[error("{num_qubits} qubits exceed the supported maximum of {max_qubits}")]
    TooManyQubits { num_qubits: usize, max_qubits: usize },

    /// Shared memory segment name is not usable
    #[error("Invalid shared memory segment name {name:?}")]
    InvalidSegmentName { name: String },

    /// Segment is already mapped by another state in this process
    #[error("Shared memory segment {name:?} is already mapped in this process")]
    SegmentInUse { name: String },

    /// An OS call on a shared memory segment failed
    #[error("{operation} failed for shared memory segment {name:?}: {reason}")]
    SharedMemory {
        name: String,
        operation: &'static str,
        reason: String,
    },

    /// Operation not available on this platform
    #[error("{operation} is not supported on this platform")]
    Unsupported { operation: &'static str },
}

/// Result type for state operations
pub type Result<T> = std::result::Result<T, StateError>;
