//! The state protocol shared by every state representation
//!
//! [`QuantumSystemState`] is the capability set numeric kernels program
//! against: read or replace the raw buffer, report the qubit count, reset to
//! the ground state, and (for representations that need it) manage scratch
//! space for non-unitary operations. The set of representations is closed:
//! [`SystemState`] is a tagged union over [`PureState`] and
//! [`DensityMatrixState`], so callers that do not know the kind statically
//! dispatch with a `match` instead of a trait object.

use crate::allocation::{
    checked_state_length, Allocation, AllocationKind, AllocationSpec, AmplitudeBuffer,
};
use crate::config::StateConfig;
use crate::density_matrix::DensityMatrixState;
use crate::error::Result;
use crate::pure_state::PureState;
use num_complex::Complex64;
use rayon::prelude::*;
use std::fmt;

/// Which representation a state uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Wavefunction of `2^n` amplitudes
    Pure,
    /// Row-major `2^n × 2^n` density matrix
    DensityMatrix,
}

impl StateKind {
    /// Number of binary dimensions each qubit contributes to the buffer length
    #[inline]
    pub(crate) fn exponent_factor(self) -> usize {
        match self {
            StateKind::Pure => 1,
            StateKind::DensityMatrix => 2,
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKind::Pure => write!(f, "pure"),
            StateKind::DensityMatrix => write!(f, "density-matrix"),
        }
    }
}

/// Capabilities every quantum state representation provides
pub trait QuantumSystemState {
    /// Representation of this state
    fn kind(&self) -> StateKind;

    /// The live buffer
    fn elements(&self) -> &[Complex64];

    /// The live buffer, mutably
    fn elements_mut(&mut self) -> &mut [Complex64];

    /// Replace the live buffer
    ///
    /// The buffer must have the state's element count. Returns the displaced
    /// buffer if the state has no further use for it.
    fn set_elements(&mut self, buffer: AmplitudeBuffer) -> Result<Option<AmplitudeBuffer>>;

    /// Qubit count derived from the live buffer's length
    ///
    /// # Errors
    /// Returns `MalformedState` if the length cannot describe a state of
    /// this kind.
    fn qubit_count(&self) -> Result<usize>;

    /// Overwrite the live buffer with the all-zeros basis state
    ///
    /// Element 0 becomes `1 + 0i`, every other element `0`.
    fn reset_to_zero(&mut self);

    /// Strategy that provisioned the state's original buffer
    fn allocation_kind(&self) -> AllocationKind;

    /// Make sure scratch space for non-unitary operations exists
    fn ensure_scratch(&mut self) -> Result<()> {
        Ok(())
    }

    /// Whether [`commit_swap`](Self::commit_swap) must run before outside
    /// consumers read the state
    fn requires_swap(&self) -> bool {
        false
    }

    /// Publish the live buffer to the state's fixed address
    ///
    /// Returns whether anything was done.
    fn commit_swap(&mut self) -> bool {
        false
    }
}

/// A state of either representation
#[derive(Debug)]
pub enum SystemState {
    Pure(PureState),
    DensityMatrix(DensityMatrixState),
}

impl SystemState {
    pub fn as_pure(&self) -> Option<&PureState> {
        match self {
            SystemState::Pure(state) => Some(state),
            SystemState::DensityMatrix(_) => None,
        }
    }

    pub fn as_pure_mut(&mut self) -> Option<&mut PureState> {
        match self {
            SystemState::Pure(state) => Some(state),
            SystemState::DensityMatrix(_) => None,
        }
    }

    pub fn as_density_matrix(&self) -> Option<&DensityMatrixState> {
        match self {
            SystemState::DensityMatrix(state) => Some(state),
            SystemState::Pure(_) => None,
        }
    }

    pub fn as_density_matrix_mut(&mut self) -> Option<&mut DensityMatrixState> {
        match self {
            SystemState::DensityMatrix(state) => Some(state),
            SystemState::Pure(_) => None,
        }
    }
}

impl From<PureState> for SystemState {
    fn from(state: PureState) -> Self {
        SystemState::Pure(state)
    }
}

impl From<DensityMatrixState> for SystemState {
    fn from(state: DensityMatrixState) -> Self {
        SystemState::DensityMatrix(state)
    }
}

macro_rules! dispatch {
    ($self:expr, $state:ident => $body:expr) => {
        match $self {
            SystemState::Pure($state) => $body,
            SystemState::DensityMatrix($state) => $body,
        }
    };
}

impl QuantumSystemState for SystemState {
    fn kind(&self) -> StateKind {
        dispatch!(self, state => state.kind())
    }

    fn elements(&self) -> &[Complex64] {
        dispatch!(self, state => state.elements())
    }

    fn elements_mut(&mut self) -> &mut [Complex64] {
        dispatch!(self, state => state.elements_mut())
    }

    fn set_elements(&mut self, buffer: AmplitudeBuffer) -> Result<Option<AmplitudeBuffer>> {
        dispatch!(self, state => state.set_elements(buffer))
    }

    fn qubit_count(&self) -> Result<usize> {
        dispatch!(self, state => state.qubit_count())
    }

    fn reset_to_zero(&mut self) {
        dispatch!(self, state => state.reset_to_zero())
    }

    fn allocation_kind(&self) -> AllocationKind {
        dispatch!(self, state => state.allocation_kind())
    }

    fn ensure_scratch(&mut self) -> Result<()> {
        dispatch!(self, state => state.ensure_scratch())
    }

    fn requires_swap(&self) -> bool {
        dispatch!(self, state => state.requires_swap())
    }

    fn commit_swap(&mut self) -> bool {
        dispatch!(self, state => state.commit_swap())
    }
}

/// Create a pure state of `num_qubits` qubits in `|0…0⟩`
///
/// # Example
///
/// ```
/// use num_complex::Complex64;
/// use simq_state::{make_pure_state, AllocationSpec};
///
/// let state = make_pure_state(3, AllocationSpec::Local).unwrap();
/// assert_eq!(state.qubit_count().unwrap(), 3);
/// assert_eq!(state.elements()[0], Complex64::new(1.0, 0.0));
/// ```
pub fn make_pure_state(num_qubits: usize, spec: impl Into<AllocationSpec>) -> Result<PureState> {
    make_pure_state_with_config(num_qubits, spec, &StateConfig::default())
}

/// Create a pure state with an explicit configuration
pub fn make_pure_state_with_config(
    num_qubits: usize,
    spec: impl Into<AllocationSpec>,
    config: &StateConfig,
) -> Result<PureState> {
    let allocation = bind_allocation(StateKind::Pure, num_qubits, spec.into(), config)?;
    PureState::from_allocation(num_qubits, allocation, config.clone())
}

/// Create a density matrix state of `num_qubits` qubits in `|0…0⟩⟨0…0|`
///
/// # Example
///
/// ```
/// use simq_state::{diagonal_probabilities, make_density_matrix_state, AllocationSpec};
///
/// let state = make_density_matrix_state(2, AllocationSpec::Local).unwrap();
/// assert_eq!(state.elements().len(), 16);
/// assert_eq!(diagonal_probabilities(&state).unwrap(), vec![1.0, 0.0, 0.0, 0.0]);
/// ```
pub fn make_density_matrix_state(
    num_qubits: usize,
    spec: impl Into<AllocationSpec>,
) -> Result<DensityMatrixState> {
    make_density_matrix_state_with_config(num_qubits, spec, &StateConfig::default())
}

/// Create a density matrix state with an explicit configuration
pub fn make_density_matrix_state_with_config(
    num_qubits: usize,
    spec: impl Into<AllocationSpec>,
    config: &StateConfig,
) -> Result<DensityMatrixState> {
    let allocation = bind_allocation(StateKind::DensityMatrix, num_qubits, spec.into(), config)?;
    DensityMatrixState::from_allocation(num_qubits, allocation, config.clone())
}

/// Create a state of either kind
pub fn make_state(
    kind: StateKind,
    num_qubits: usize,
    spec: impl Into<AllocationSpec>,
    config: &StateConfig,
) -> Result<SystemState> {
    Ok(match kind {
        StateKind::Pure => make_pure_state_with_config(num_qubits, spec, config)?.into(),
        StateKind::DensityMatrix => {
            make_density_matrix_state_with_config(num_qubits, spec, config)?.into()
        }
    })
}

fn bind_allocation(
    kind: StateKind,
    num_qubits: usize,
    spec: AllocationSpec,
    config: &StateConfig,
) -> Result<Allocation> {
    let length = checked_state_length(num_qubits, kind.exponent_factor(), config.memory_limit)?;
    Allocation::new(spec, length)
}

/// Write `|0…0⟩` into `elements`
///
/// Long buffers are cleared in parallel chunks.
pub(crate) fn fill_ground_state(elements: &mut [Complex64], parallel_threshold: usize) {
    let zero = Complex64::new(0.0, 0.0);
    let threads = rayon::current_num_threads();
    if elements.len() >= parallel_threshold && threads > 1 {
        let chunk_size = (elements.len() / threads).max(4096);
        elements
            .par_chunks_mut(chunk_size)
            .for_each(|chunk| chunk.fill(zero));
    } else {
        elements.fill(zero);
    }

    if let Some(first) = elements.first_mut() {
        *first = Complex64::new(1.0, 0.0);
    }
}
