//! Quantum state representations and the memory they live in
//!
//! This crate provides the two state representations the simq simulators
//! evolve, a wavefunction ([`PureState`]) and a density matrix
//! ([`DensityMatrixState`]), both unified behind the [`QuantumSystemState`]
//! protocol that numeric kernels program against.
//!
//! # Memory
//!
//! A state's buffer comes from one of three strategies ([`AllocationSpec`]):
//!
//! - **Local**: aligned process heap memory
//! - **Shared**: a named POSIX shared memory segment, so worker processes of
//!   a distributed run can map the same state
//! - **External**: caller-supplied memory ([`ExternalAllocation`])
//!
//! Memory is released deterministically when the owning state is dropped.
//!
//! # Example
//!
//! ```
//! use simq_state::{
//!     diagonal_probabilities, make_density_matrix_state, make_pure_state, AllocationSpec,
//! };
//!
//! let psi = make_pure_state(3, AllocationSpec::Local).unwrap();
//! assert_eq!(psi.elements().len(), 8);
//!
//! let rho = make_density_matrix_state(3, None::<&str>).unwrap();
//! let probs = diagonal_probabilities(&rho).unwrap();
//! assert_eq!(probs[0], 1.0);
//! ```

pub mod allocation;
pub mod config;
pub mod density_matrix;
pub mod error;
pub mod measurement;
pub mod pure_state;
pub mod system_state;

pub use allocation::{
    density_matrix_length, pure_state_length, qubits_for_density_length, qubits_for_pure_length,
    Allocation, AllocationKind, AllocationSpec, AmplitudeBuffer, ExternalAllocation,
    SharedSegment, ELEMENT_BYTES,
};
pub use config::StateConfig;
pub use density_matrix::DensityMatrixState;
pub use error::{Result, StateError};
pub use measurement::{diagonal_probabilities, outcome_bit, outcome_bitstring};
pub use pure_state::PureState;
pub use system_state::{
    make_density_matrix_state, make_density_matrix_state_with_config, make_pure_state,
    make_pure_state_with_config, make_state, QuantumSystemState, StateKind, SystemState,
};
