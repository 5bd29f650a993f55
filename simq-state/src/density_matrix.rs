//! Density matrix representation for mixed quantum states
//!
//! A density matrix ρ of `n` qubits is stored flat, in row-major order:
//! `elements[i * dim + j] == ρᵢⱼ` with `dim = 2^n`. The two-dimensional
//! view is an `ndarray` view over that same memory, re-derived from the
//! current buffer on every access, so writing through one is visible
//! through the other.
//!
//! Unlike [`PureState`](crate::PureState), a density matrix never needs the
//! pointer-swap protocol. Channel kernels allocate their intermediate
//! storage themselves; the state only offers a slot
//! ([`set_temporary_state`](DensityMatrixState::set_temporary_state)) where
//! such a kernel may park a buffer between calls.
//!
//! # Example
//!
//! ```
//! use num_complex::Complex64;
//! use simq_state::DensityMatrixState;
//!
//! let mut rho = DensityMatrixState::new(1).unwrap();
//! rho.set_matrix_at(1, 0, Complex64::new(0.0, 0.5));
//! assert_eq!(rho.elements()[2], Complex64::new(0.0, 0.5));
//! assert_eq!(rho.matrix_view()[[1, 0]], Complex64::new(0.0, 0.5));
//! ```

use crate::allocation::{
    qubits_for_density_length, Allocation, AllocationKind, AmplitudeBuffer,
};
use crate::config::StateConfig;
use crate::error::{Result, StateError};
use crate::system_state::{fill_ground_state, QuantumSystemState, StateKind};
use ndarray::{ArrayView2, ArrayViewMut2};
use num_complex::Complex64;
use std::fmt;
use tracing::trace;

/// Density matrix state over any allocation strategy
///
/// Stores the full 2^n × 2^n density matrix in row-major order.
/// Memory usage: O(4^n) complex numbers.
pub struct DensityMatrixState {
    /// Number of qubits
    num_qubits: usize,

    /// Side length of the matrix view, derived from the buffer length
    dimension: usize,

    config: StateConfig,

    /// Flat row-major matrix elements, length dimension²
    elements_vector: AmplitudeBuffer,

    /// Storage parked here by channel kernels; never allocated by the state
    temporary_state: Option<AmplitudeBuffer>,
}

impl DensityMatrixState {
    /// Create a local density matrix initialized to |0...0⟩⟨0...0|
    pub fn new(num_qubits: usize) -> Result<Self> {
        crate::system_state::make_density_matrix_state(num_qubits, crate::AllocationSpec::Local)
    }

    pub(crate) fn from_allocation(
        num_qubits: usize,
        allocation: Allocation,
        config: StateConfig,
    ) -> Result<Self> {
        let buffer = allocation.allocate(&config)?;
        let dimension = view_dimension(&buffer)?;
        let mut state = Self {
            num_qubits,
            dimension,
            config,
            elements_vector: buffer,
            temporary_state: None,
        };
        state.reset_to_zero();
        Ok(state)
    }

    /// Get number of qubits
    #[inline]
    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    /// Get matrix dimension (2^num_qubits)
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Flat row-major matrix elements
    #[inline]
    pub fn elements(&self) -> &[Complex64] {
        self.elements_vector.as_slice()
    }

    /// Flat row-major matrix elements, mutably
    #[inline]
    pub fn elements_mut(&mut self) -> &mut [Complex64] {
        self.elements_vector.as_mut_slice()
    }

    /// Replace the backing buffer
    ///
    /// The matrix view is re-derived over the new buffer before returning.
    /// Returns the previous buffer.
    ///
    /// # Errors
    /// Returns `AllocationSizeMismatch` if `buffer` is not `2^(2n)` elements.
    pub fn set_elements(&mut self, buffer: AmplitudeBuffer) -> Result<Option<AmplitudeBuffer>> {
        let expected = self.elements_vector.len();
        if buffer.len() != expected {
            return Err(StateError::AllocationSizeMismatch {
                expected,
                actual: buffer.len(),
            });
        }

        self.dimension = view_dimension(&buffer)?;
        Ok(Some(std::mem::replace(&mut self.elements_vector, buffer)))
    }

    /// Qubit count derived from the buffer length
    pub fn qubit_count(&self) -> Result<usize> {
        qubits_for_density_length(self.elements_vector.len())
    }

    /// Reset to |0...0⟩⟨0...0|
    pub fn reset_to_zero(&mut self) {
        let threshold = self.config.parallel_threshold;
        fill_ground_state(self.elements_vector.as_mut_slice(), threshold);
        trace!(num_qubits = self.num_qubits, "reset density matrix");
    }

    /// Strategy of the backing buffer
    pub fn allocation_kind(&self) -> AllocationKind {
        self.elements_vector.kind()
    }

    /// Name of the shared segment behind the buffer, if any
    pub fn segment_name(&self) -> Option<&str> {
        self.elements_vector.segment_name()
    }

    /// Two-dimensional view aliasing the flat buffer
    pub fn matrix_view(&self) -> ArrayView2<'_, Complex64> {
        let dim = self.dimension;
        // SAFETY: the buffer holds exactly dim * dim contiguous elements
        // (checked whenever `dimension` is derived) and outlives the view.
        unsafe { ArrayView2::from_shape_ptr((dim, dim), self.elements_vector.as_ptr()) }
    }

    /// Mutable two-dimensional view aliasing the flat buffer
    pub fn matrix_view_mut(&mut self) -> ArrayViewMut2<'_, Complex64> {
        let dim = self.dimension;
        // SAFETY: as in `matrix_view`, and `&mut self` makes the view exclusive.
        unsafe { ArrayViewMut2::from_shape_ptr((dim, dim), self.elements_vector.as_mut_ptr()) }
    }

    /// Get a matrix element ρᵢⱼ
    ///
    /// # Panics
    /// Panics if `row` or `col` is out of range.
    #[inline]
    pub fn matrix_at(&self, row: usize, col: usize) -> Complex64 {
        self.matrix_view()[[row, col]]
    }

    /// Set a matrix element ρᵢⱼ
    ///
    /// # Panics
    /// Panics if `row` or `col` is out of range.
    #[inline]
    pub fn set_matrix_at(&mut self, row: usize, col: usize, value: Complex64) {
        self.matrix_view_mut()[[row, col]] = value;
    }

    /// Calculate trace: Tr(ρ)
    ///
    /// Should always be 1 for valid density matrices.
    pub fn trace(&self) -> f64 {
        self.matrix_view().diag().iter().map(|z| z.re).sum()
    }

    /// Park a buffer for a channel kernel, returning whatever was parked before
    pub fn set_temporary_state(&mut self, buffer: AmplitudeBuffer) -> Option<AmplitudeBuffer> {
        self.temporary_state.replace(buffer)
    }

    /// The parked buffer, if any
    pub fn temporary_state(&self) -> Option<&[Complex64]> {
        self.temporary_state.as_ref().map(AmplitudeBuffer::as_slice)
    }

    /// The parked buffer, mutably, if any
    pub fn temporary_state_mut(&mut self) -> Option<&mut [Complex64]> {
        self.temporary_state
            .as_mut()
            .map(AmplitudeBuffer::as_mut_slice)
    }

    /// Remove and return the parked buffer
    pub fn take_temporary_state(&mut self) -> Option<AmplitudeBuffer> {
        self.temporary_state.take()
    }
}

/// Matrix side length for a flat density buffer
fn view_dimension(buffer: &AmplitudeBuffer) -> Result<usize> {
    Ok(1usize << qubits_for_density_length(buffer.len())?)
}

impl QuantumSystemState for DensityMatrixState {
    fn kind(&self) -> StateKind {
        StateKind::DensityMatrix
    }

    fn elements(&self) -> &[Complex64] {
        DensityMatrixState::elements(self)
    }

    fn elements_mut(&mut self) -> &mut [Complex64] {
        DensityMatrixState::elements_mut(self)
    }

    fn set_elements(&mut self, buffer: AmplitudeBuffer) -> Result<Option<AmplitudeBuffer>> {
        DensityMatrixState::set_elements(self, buffer)
    }

    fn qubit_count(&self) -> Result<usize> {
        DensityMatrixState::qubit_count(self)
    }

    fn reset_to_zero(&mut self) {
        DensityMatrixState::reset_to_zero(self)
    }

    fn allocation_kind(&self) -> AllocationKind {
        DensityMatrixState::allocation_kind(self)
    }
}

impl fmt::Debug for DensityMatrixState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DensityMatrixState {{ qubits: {}, dim: {}, allocation: {}, trace: {:.4} }}",
            self.num_qubits,
            self.dimension,
            self.allocation_kind(),
            self.trace()
        )
    }
}
