//! Allocation backend: where a state's amplitude buffer physically lives
//!
//! Every state owns its memory through an [`AmplitudeBuffer`]. The buffer is
//! provisioned by one of three strategies:
//!
//! - **Local**: 64-byte aligned, zero-initialized process heap memory
//! - **Shared**: a named POSIX shared memory segment that other processes
//!   can attach to by name
//! - **External**: a caller-supplied [`ExternalAllocation`]
//!
//! Releasing the memory is tied to dropping the buffer: heap blocks are
//! deallocated, shared segments are unmapped (and unlinked by the mapping
//! that created them), external owners are dropped. There is no deferred or
//! collector-driven cleanup.
//!
//! # Memory layout
//!
//! Elements are `Complex64`: an `f64` real part followed by an `f64`
//! imaginary part ([`ELEMENT_BYTES`] bytes). A pure state of `n` qubits is
//! `2^n` elements, amplitude `k` belonging to the basis state whose bit
//! pattern is `k`. A density matrix of `n` qubits is `2^(2n)` elements in
//! row-major order. Processes built independently agree on this layout.

pub mod external;
pub mod heap;
pub mod shared;

pub use external::ExternalAllocation;
pub use shared::SharedSegment;

use crate::config::StateConfig;
use crate::error::{Result, StateError};
use heap::HeapBlock;
use num_complex::Complex64;
use std::fmt;
use std::ptr::NonNull;
use tracing::debug;

/// Size in bytes of one state element
pub const ELEMENT_BYTES: usize = std::mem::size_of::<Complex64>();

const _: () = assert!(ELEMENT_BYTES == 16);

/// Where a buffer's memory comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationKind {
    /// Process-local heap memory
    Local,
    /// Named shared memory segment
    Shared,
    /// Caller-supplied memory
    External,
}

impl fmt::Display for AllocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationKind::Local => write!(f, "local"),
            AllocationKind::Shared => write!(f, "shared"),
            AllocationKind::External => write!(f, "external"),
        }
    }
}

/// Requested provisioning strategy for a state's buffer
///
/// # Example
///
/// ```
/// use simq_state::AllocationSpec;
///
/// assert!(matches!(AllocationSpec::from(None::<&str>), AllocationSpec::Local));
/// assert!(matches!(AllocationSpec::from("qvm-worker"), AllocationSpec::Shared(_)));
/// ```
#[derive(Default)]
pub enum AllocationSpec {
    /// Ordinary heap memory
    #[default]
    Local,
    /// Shared memory segment with the given name
    Shared(String),
    /// Caller-supplied allocation
    External(Box<dyn ExternalAllocation>),
}

impl AllocationSpec {
    /// Wrap a caller-supplied allocation
    pub fn external(allocation: impl ExternalAllocation + 'static) -> Self {
        AllocationSpec::External(Box::new(allocation))
    }

    /// Strategy this spec selects
    pub fn kind(&self) -> AllocationKind {
        match self {
            AllocationSpec::Local => AllocationKind::Local,
            AllocationSpec::Shared(_) => AllocationKind::Shared,
            AllocationSpec::External(_) => AllocationKind::External,
        }
    }
}

impl fmt::Debug for AllocationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationSpec::Local => write!(f, "Local"),
            AllocationSpec::Shared(name) => f.debug_tuple("Shared").field(name).finish(),
            AllocationSpec::External(ext) => f
                .debug_struct("External")
                .field("length", &ext.length())
                .finish(),
        }
    }
}

impl From<&str> for AllocationSpec {
    fn from(name: &str) -> Self {
        AllocationSpec::Shared(name.to_string())
    }
}

impl From<String> for AllocationSpec {
    fn from(name: String) -> Self {
        AllocationSpec::Shared(name)
    }
}

impl From<Option<&str>> for AllocationSpec {
    fn from(name: Option<&str>) -> Self {
        name.map_or(AllocationSpec::Local, AllocationSpec::from)
    }
}

impl From<Box<dyn ExternalAllocation>> for AllocationSpec {
    fn from(allocation: Box<dyn ExternalAllocation>) -> Self {
        AllocationSpec::External(allocation)
    }
}

/// A provisioning strategy bound to a concrete element count
///
/// Construction validates the request; [`Allocation::allocate`] produces the
/// buffer whose drop is the release action.
#[derive(Debug)]
pub struct Allocation {
    length: usize,
    spec: AllocationSpec,
}

impl Allocation {
    /// Bind a strategy to `length` elements
    ///
    /// # Errors
    /// Returns `AllocationSizeMismatch` if an external allocation reports a
    /// different length. Nothing is materialized in that case.
    pub fn new(spec: AllocationSpec, length: usize) -> Result<Self> {
        if let AllocationSpec::External(ext) = &spec {
            let actual = ext.length();
            if actual != length {
                return Err(StateError::AllocationSizeMismatch {
                    expected: length,
                    actual,
                });
            }
        }
        Ok(Self { length, spec })
    }

    /// Number of elements this allocation provides
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Strategy of this allocation
    #[inline]
    pub fn kind(&self) -> AllocationKind {
        self.spec.kind()
    }

    /// Provision the buffer
    pub fn allocate(self, config: &StateConfig) -> Result<AmplitudeBuffer> {
        let length = self.length;
        let buffer = match self.spec {
            AllocationSpec::Local => AmplitudeBuffer::local(length, config)?,
            AllocationSpec::Shared(name) => {
                let segment = SharedSegment::open(&name, length, config.segment_mode)?;
                AmplitudeBuffer::from_segment(segment)
            }
            AllocationSpec::External(ext) => AmplitudeBuffer::from_external(ext, length)?,
        };
        debug!(
            kind = %buffer.kind(),
            length,
            pinned = buffer.is_pinned_address(),
            "allocated state buffer"
        );
        Ok(buffer)
    }
}

enum Backing {
    Heap(HeapBlock),
    Shared(SharedSegment),
    External {
        owner: Box<dyn ExternalAllocation>,
        pinned: bool,
    },
}

/// Owned complex buffer from any allocation strategy
///
/// Dropping the buffer releases its memory exactly once.
pub struct AmplitudeBuffer {
    data: NonNull<Complex64>,
    len: usize,
    backing: Backing,
}

impl AmplitudeBuffer {
    /// Allocate a zero-initialized heap buffer of `len` elements
    pub fn local(len: usize, config: &StateConfig) -> Result<Self> {
        check_memory_limit(len, config)?;
        let block = HeapBlock::zeroed(len, config.alignment)?;
        Ok(Self {
            data: block.as_non_null(),
            len,
            backing: Backing::Heap(block),
        })
    }

    /// Take ownership of a mapped shared memory segment
    ///
    /// A segment from [`SharedSegment::open`] is the only mapping of its
    /// name in this process; one from [`SharedSegment::open_unchecked`]
    /// carries that function's contract into the buffer.
    pub fn from_segment(segment: SharedSegment) -> Self {
        Self {
            data: segment.as_non_null(),
            len: segment.len(),
            backing: Backing::Shared(segment),
        }
    }

    /// Materialize a caller-supplied allocation of `expected` elements
    pub fn from_external(mut owner: Box<dyn ExternalAllocation>, expected: usize) -> Result<Self> {
        let actual = owner.length();
        if actual != expected {
            return Err(StateError::AllocationSizeMismatch { expected, actual });
        }

        let data = owner.materialize();
        if data.as_ptr() as usize % std::mem::align_of::<Complex64>() != 0 {
            return Err(StateError::MalformedState {
                length: actual,
                reason: "external buffer is not aligned for Complex64",
            });
        }

        let pinned = owner.is_pinned_address();
        Ok(Self {
            data,
            len: actual,
            backing: Backing::External { owner, pinned },
        })
    }

    /// Number of elements
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[Complex64] {
        // SAFETY: `data` is valid for `len` elements for as long as `backing` lives.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Complex64] {
        // SAFETY: as above, and `&mut self` gives exclusive in-process access.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.len) }
    }

    /// Base address of the buffer
    #[inline]
    pub fn as_ptr(&self) -> *const Complex64 {
        self.data.as_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut Complex64 {
        self.data.as_ptr()
    }

    /// Whether `self` and `other` are the same memory
    #[inline]
    pub fn ptr_eq(&self, other: &AmplitudeBuffer) -> bool {
        self.data == other.data
    }

    pub fn kind(&self) -> AllocationKind {
        match self.backing {
            Backing::Heap(_) => AllocationKind::Local,
            Backing::Shared(_) => AllocationKind::Shared,
            Backing::External { .. } => AllocationKind::External,
        }
    }

    /// Whether consumers outside this process (or outside this crate) read
    /// the buffer at its fixed address
    ///
    /// Heap buffers are never pinned; shared segments always are; external
    /// allocations report it themselves.
    pub fn is_pinned_address(&self) -> bool {
        match &self.backing {
            Backing::Heap(_) => false,
            Backing::Shared(_) => true,
            Backing::External { pinned, .. } => *pinned,
        }
    }

    /// Name of the backing shared segment, if any
    pub fn segment_name(&self) -> Option<&str> {
        match &self.backing {
            Backing::Shared(segment) => Some(segment.name()),
            _ => None,
        }
    }
}

impl fmt::Debug for AmplitudeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmplitudeBuffer")
            .field("kind", &self.kind())
            .field("len", &self.len)
            .field("data", &self.data)
            .field("pinned", &self.is_pinned_address())
            .finish()
    }
}

// Safety: the buffer is the sole in-process user of its memory. Heap blocks
// are owned outright, `SharedSegment::open` maps a name at most once per
// process, and external owners guarantee exclusivity through their unsafe
// trait contract. The external owner is never accessed through a shared
// reference.
unsafe impl Send for AmplitudeBuffer {}
unsafe impl Sync for AmplitudeBuffer {}

/// Number of elements in a pure state of `num_qubits` qubits
pub fn pure_state_length(num_qubits: usize) -> Result<usize> {
    checked_state_length(num_qubits, 1, 0)
}

/// Number of elements in a density matrix of `num_qubits` qubits
pub fn density_matrix_length(num_qubits: usize) -> Result<usize> {
    checked_state_length(num_qubits, 2, 0)
}

/// Qubit count of a pure state buffer of `length` elements
pub fn qubits_for_pure_length(length: usize) -> Result<usize> {
    if !length.is_power_of_two() {
        return Err(StateError::MalformedState {
            length,
            reason: "length is not a power of two",
        });
    }
    Ok(length.trailing_zeros() as usize)
}

/// Qubit count of a density matrix buffer of `length` elements
pub fn qubits_for_density_length(length: usize) -> Result<usize> {
    let exponent = qubits_for_pure_length(length)?;
    if exponent % 2 != 0 {
        return Err(StateError::MalformedState {
            length,
            reason: "length is not an even power of two",
        });
    }
    Ok(exponent / 2)
}

/// Element count for `num_qubits` qubits where each qubit contributes
/// `factor` binary dimensions, bounded by addressable memory and `memory_limit`
pub(crate) fn checked_state_length(
    num_qubits: usize,
    factor: usize,
    memory_limit: usize,
) -> Result<usize> {
    let budget = if memory_limit == 0 {
        usize::MAX
    } else {
        memory_limit
    };
    let max_elements = budget / ELEMENT_BYTES;
    if max_elements == 0 {
        return Err(StateError::AllocationError {
            size: ELEMENT_BYTES,
        });
    }

    let max_qubits = max_elements.ilog2() as usize / factor;
    if num_qubits > max_qubits {
        return Err(StateError::TooManyQubits {
            num_qubits,
            max_qubits,
        });
    }
    Ok(1usize << (num_qubits * factor))
}

fn check_memory_limit(len: usize, config: &StateConfig) -> Result<()> {
    let size = len
        .checked_mul(ELEMENT_BYTES)
        .ok_or(StateError::AllocationError { size: usize::MAX })?;
    if config.memory_limit != 0 && size > config.memory_limit {
        return Err(StateError::AllocationError { size });
    }
    Ok(())
}
