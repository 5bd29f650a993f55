//! Basis-outcome probabilities of a density matrix
//!
//! Measuring every qubit of ρ in the computational basis yields outcome `k`
//! with probability `Re ρₖₖ`. Outcome indices follow the qubit numbering
//! used throughout simq: qubit `q` is bit `q` of `k`, so qubit 0 is the
//! least-significant bit. For two qubits, outcome `1` means qubit 0 read 1
//! and qubit 1 read 0.

use crate::density_matrix::DensityMatrixState;
use crate::error::{Result, StateError};
use crate::system_state::{QuantumSystemState, StateKind};

/// Probabilities of all `2^n` basis outcomes of a density matrix state
///
/// Entry `i` is the real part of the `i`-th diagonal element.
///
/// # Errors
/// Returns `WrongStateKind` for anything but a density matrix, and
/// `MalformedState` if the buffer length is not an even power of two.
///
/// # Example
///
/// ```
/// use simq_state::{diagonal_probabilities, make_pure_state, AllocationSpec, StateError};
///
/// let pure = make_pure_state(2, AllocationSpec::Local).unwrap();
/// assert!(matches!(
///     diagonal_probabilities(&pure),
///     Err(StateError::WrongStateKind { .. })
/// ));
/// ```
pub fn diagonal_probabilities<S>(state: &S) -> Result<Vec<f64>>
where
    S: QuantumSystemState + ?Sized,
{
    let kind = state.kind();
    if kind != StateKind::DensityMatrix {
        return Err(StateError::WrongStateKind {
            expected: StateKind::DensityMatrix,
            actual: kind,
        });
    }

    let dim = 1usize << state.qubit_count()?;
    Ok(diagonal_of(state.elements(), dim))
}

impl DensityMatrixState {
    /// Probabilities of all basis outcomes, `Re ρᵢᵢ` for each `i`
    pub fn diagonal_probabilities(&self) -> Vec<f64> {
        diagonal_of(self.elements(), self.dimension())
    }
}

fn diagonal_of(elements: &[num_complex::Complex64], dim: usize) -> Vec<f64> {
    elements.iter().step_by(dim + 1).map(|z| z.re).collect()
}

/// Value of `qubit` in basis outcome `outcome`
#[inline]
pub fn outcome_bit(outcome: usize, qubit: usize) -> bool {
    (outcome >> qubit) & 1 == 1
}

/// Outcome as a bitstring, qubit `num_qubits - 1` first and qubit 0 last
pub fn outcome_bitstring(outcome: usize, num_qubits: usize) -> String {
    format!("{:0width$b}", outcome, width = num_qubits)
}
