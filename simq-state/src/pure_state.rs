//! Wavefunction representation with scratch space and pointer swapping
//!
//! A [`PureState`] holds `2^n` complex amplitudes. Non-unitary (stochastic)
//! kernels need somewhere to put a candidate result while the "before" state
//! stays readable, so the state lazily provides a scratch buffer of the same
//! length.
//!
//! # Pointer-swap protocol
//!
//! The buffer assigned at construction is the *original* buffer. When it is
//! pinned (shared memory, or external memory somebody else reads at a fixed
//! address), outside consumers only ever look there. A stochastic step
//! proceeds as:
//!
//! 1. [`ensure_scratch`](PureState::ensure_scratch), then write the outcome
//!    into the scratch buffer (see [`live_and_scratch_mut`](PureState::live_and_scratch_mut)).
//! 2. [`swap_live_and_scratch`](PureState::swap_live_and_scratch) to make
//!    that outcome the live state. The original buffer is now scratch.
//! 3. If [`requires_swap`](PureState::requires_swap), call
//!    [`commit_swap`](PureState::commit_swap): the live values are copied into
//!    the original buffer, which becomes live again, and the other buffer
//!    goes back to being scratch for the next round.
//!
//! For unpinned (local heap) originals there is nothing to publish and step
//! 3 is skipped.

use crate::allocation::{qubits_for_pure_length, Allocation, AllocationKind, AmplitudeBuffer};
use crate::config::StateConfig;
use crate::error::{Result, StateError};
use crate::system_state::{fill_ground_state, QuantumSystemState, StateKind};
use num_complex::Complex64;
use std::fmt;
use std::mem;
use tracing::{debug, trace};

/// Which buffer fills a role (live or scratch)
#[derive(Debug)]
enum Slot {
    /// The buffer assigned at construction
    Original,
    /// Any other buffer
    Detached(AmplitudeBuffer),
}

/// Pure quantum state over any allocation strategy
///
/// # Example
///
/// ```
/// use num_complex::Complex64;
/// use simq_state::PureState;
///
/// let mut state = PureState::new(2).unwrap();
/// state.ensure_scratch().unwrap();
///
/// // A kernel writes its outcome into scratch, then makes it live
/// let (live, scratch) = state.live_and_scratch_mut().unwrap();
/// scratch.copy_from_slice(live);
/// scratch.swap(0, 3);
/// state.swap_live_and_scratch().unwrap();
///
/// assert_eq!(state.elements()[3], Complex64::new(1.0, 0.0));
/// // Heap memory has no fixed-address consumers
/// assert!(!state.requires_swap());
/// ```
pub struct PureState {
    /// Number of qubits
    num_qubits: usize,

    config: StateConfig,

    /// Buffer assigned at construction; kept alive for the state's lifetime
    original_amplitudes: AmplitudeBuffer,

    /// Live buffer
    amplitudes: Slot,

    /// Scratch buffer, allocated on first use
    trial_amplitudes: Option<Slot>,
}

impl PureState {
    /// Create a local pure state initialized to |0...0⟩
    pub fn new(num_qubits: usize) -> Result<Self> {
        crate::system_state::make_pure_state(num_qubits, crate::AllocationSpec::Local)
    }

    pub(crate) fn from_allocation(
        num_qubits: usize,
        allocation: Allocation,
        config: StateConfig,
    ) -> Result<Self> {
        let buffer = allocation.allocate(&config)?;
        let mut state = Self {
            num_qubits,
            config,
            original_amplitudes: buffer,
            amplitudes: Slot::Original,
            trial_amplitudes: None,
        };
        state.reset_to_zero();
        Ok(state)
    }

    /// Get the number of qubits
    #[inline]
    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    /// Get the state dimension (2^num_qubits)
    #[inline]
    pub fn dimension(&self) -> usize {
        self.original_amplitudes.len()
    }

    /// Live amplitudes
    pub fn elements(&self) -> &[Complex64] {
        resolve(&self.original_amplitudes, &self.amplitudes)
    }

    /// Live amplitudes, mutably
    pub fn elements_mut(&mut self) -> &mut [Complex64] {
        resolve_mut(&mut self.original_amplitudes, &mut self.amplitudes)
    }

    /// Replace the live buffer
    ///
    /// Returns the displaced buffer, unless it was the original buffer,
    /// which the state keeps so it can publish into it later.
    ///
    /// # Errors
    /// Returns `AllocationSizeMismatch` if `buffer` is not `2^n` elements.
    pub fn set_elements(&mut self, buffer: AmplitudeBuffer) -> Result<Option<AmplitudeBuffer>> {
        if buffer.len() != self.dimension() {
            return Err(StateError::AllocationSizeMismatch {
                expected: self.dimension(),
                actual: buffer.len(),
            });
        }

        Ok(match mem::replace(&mut self.amplitudes, Slot::Detached(buffer)) {
            Slot::Original => None,
            Slot::Detached(previous) => Some(previous),
        })
    }

    /// Qubit count derived from the live buffer length
    pub fn qubit_count(&self) -> Result<usize> {
        qubits_for_pure_length(self.elements().len())
    }

    /// Reset the live buffer to |0...0⟩
    pub fn reset_to_zero(&mut self) {
        let threshold = self.config.parallel_threshold;
        fill_ground_state(self.elements_mut(), threshold);
        trace!(num_qubits = self.num_qubits, "reset pure state");
    }

    /// Strategy of the original buffer
    pub fn allocation_kind(&self) -> AllocationKind {
        self.original_amplitudes.kind()
    }

    /// Whether the original buffer is read by outside consumers at a fixed address
    pub fn original_is_pinned(&self) -> bool {
        self.original_amplitudes.is_pinned_address()
    }

    /// Name of the shared segment behind the original buffer, if any
    pub fn segment_name(&self) -> Option<&str> {
        self.original_amplitudes.segment_name()
    }

    /// The buffer at the state's fixed address
    ///
    /// This is what outside consumers see; it only matches
    /// [`elements`](Self::elements) once any pending swap is committed.
    pub fn original_elements(&self) -> &[Complex64] {
        self.original_amplitudes.as_slice()
    }

    /// Base address of the original buffer
    pub fn original_ptr(&self) -> *const Complex64 {
        self.original_amplitudes.as_ptr()
    }

    /// Whether the live buffer is the original buffer
    pub fn is_live_original(&self) -> bool {
        match &self.amplitudes {
            Slot::Original => true,
            Slot::Detached(buffer) => buffer.ptr_eq(&self.original_amplitudes),
        }
    }

    /// Allocate scratch space if it does not exist yet
    ///
    /// Scratch is local heap memory of the same length as the live buffer.
    /// Its contents are undefined until a kernel writes them.
    pub fn ensure_scratch(&mut self) -> Result<()> {
        if self.trial_amplitudes.is_none() {
            let scratch = AmplitudeBuffer::local(self.dimension(), &self.config)?;
            debug!(
                num_qubits = self.num_qubits,
                length = scratch.len(),
                "allocated pure state scratch buffer"
            );
            self.trial_amplitudes = Some(Slot::Detached(scratch));
        }
        Ok(())
    }

    /// Whether scratch space has been allocated
    pub fn has_scratch(&self) -> bool {
        self.trial_amplitudes.is_some()
    }

    /// Scratch buffer, if allocated
    pub fn scratch(&self) -> Option<&[Complex64]> {
        self.trial_amplitudes
            .as_ref()
            .map(|slot| resolve(&self.original_amplitudes, slot))
    }

    /// Scratch buffer, mutably, if allocated
    pub fn scratch_mut(&mut self) -> Option<&mut [Complex64]> {
        let original = &mut self.original_amplitudes;
        self.trial_amplitudes
            .as_mut()
            .map(move |slot| resolve_mut(original, slot))
    }

    /// Borrow the live buffer for reading and the scratch buffer for writing
    ///
    /// Allocates scratch space if needed.
    pub fn live_and_scratch_mut(&mut self) -> Result<(&[Complex64], &mut [Complex64])> {
        self.ensure_scratch()?;
        let length = self.dimension();
        let Self {
            original_amplitudes,
            amplitudes,
            trial_amplitudes,
            ..
        } = self;

        match (amplitudes, trial_amplitudes.as_mut()) {
            (Slot::Original, Some(Slot::Detached(scratch))) => {
                Ok((original_amplitudes.as_slice(), scratch.as_mut_slice()))
            }
            (Slot::Detached(live), Some(Slot::Original)) => {
                Ok((live.as_slice(), original_amplitudes.as_mut_slice()))
            }
            (Slot::Detached(live), Some(Slot::Detached(scratch))) => {
                Ok((live.as_slice(), scratch.as_mut_slice()))
            }
            _ => Err(StateError::MalformedState {
                length,
                reason: "live and scratch roles refer to the same buffer",
            }),
        }
    }

    /// Exchange the live and scratch roles
    ///
    /// This is how a kernel makes the outcome it wrote into scratch the live
    /// state. Allocates scratch space if needed.
    pub fn swap_live_and_scratch(&mut self) -> Result<()> {
        self.ensure_scratch()?;
        if let Some(trial) = self.trial_amplitudes.as_mut() {
            mem::swap(&mut self.amplitudes, trial);
        }
        Ok(())
    }

    /// Whether the live buffer must be published to the original buffer
    ///
    /// True iff the live buffer is not the original one and the original
    /// one is pinned.
    pub fn requires_swap(&self) -> bool {
        !self.is_live_original() && self.original_amplitudes.is_pinned_address()
    }

    /// Publish the live state to the original buffer
    ///
    /// Copies the live values into the original buffer, makes it live
    /// again, and keeps the previously live buffer as scratch for reuse.
    /// Does nothing (and returns `false`) unless [`requires_swap`](Self::requires_swap).
    pub fn commit_swap(&mut self) -> bool {
        if !self.requires_swap() {
            return false;
        }

        if let Slot::Detached(live) = &self.amplitudes {
            self.original_amplitudes
                .as_mut_slice()
                .copy_from_slice(live.as_slice());
        }

        let previous = mem::replace(&mut self.amplitudes, Slot::Original);
        self.trial_amplitudes = Some(previous);
        debug!(
            num_qubits = self.num_qubits,
            kind = %self.original_amplitudes.kind(),
            "committed pure state swap into original buffer"
        );
        true
    }

    /// Measurement probabilities |a_k|² of the live amplitudes
    pub fn probabilities(&self) -> Vec<f64> {
        self.elements().iter().map(|a| a.norm_sqr()).collect()
    }

    /// Euclidean norm of the live amplitudes
    pub fn norm(&self) -> f64 {
        self.elements()
            .iter()
            .map(|a| a.norm_sqr())
            .sum::<f64>()
            .sqrt()
    }
}

fn resolve<'a>(original: &'a AmplitudeBuffer, slot: &'a Slot) -> &'a [Complex64] {
    match slot {
        Slot::Original => original.as_slice(),
        Slot::Detached(buffer) => buffer.as_slice(),
    }
}

fn resolve_mut<'a>(original: &'a mut AmplitudeBuffer, slot: &'a mut Slot) -> &'a mut [Complex64] {
    match slot {
        Slot::Original => original.as_mut_slice(),
        Slot::Detached(buffer) => buffer.as_mut_slice(),
    }
}

impl QuantumSystemState for PureState {
    fn kind(&self) -> StateKind {
        StateKind::Pure
    }

    fn elements(&self) -> &[Complex64] {
        PureState::elements(self)
    }

    fn elements_mut(&mut self) -> &mut [Complex64] {
        PureState::elements_mut(self)
    }

    fn set_elements(&mut self, buffer: AmplitudeBuffer) -> Result<Option<AmplitudeBuffer>> {
        PureState::set_elements(self, buffer)
    }

    fn qubit_count(&self) -> Result<usize> {
        PureState::qubit_count(self)
    }

    fn reset_to_zero(&mut self) {
        PureState::reset_to_zero(self)
    }

    fn allocation_kind(&self) -> AllocationKind {
        PureState::allocation_kind(self)
    }

    fn ensure_scratch(&mut self) -> Result<()> {
        PureState::ensure_scratch(self)
    }

    fn requires_swap(&self) -> bool {
        PureState::requires_swap(self)
    }

    fn commit_swap(&mut self) -> bool {
        PureState::commit_swap(self)
    }
}

impl fmt::Debug for PureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PureState {{ qubits: {}, allocation: {}, live_original: {}, scratch: {} }}",
            self.num_qubits,
            self.allocation_kind(),
            self.is_live_original(),
            self.has_scratch()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::AllocationSpec;
    use crate::system_state::make_pure_state;
    use approx::assert_relative_eq;

    fn sentinel(value: f64) -> Complex64 {
        Complex64::new(value, -value)
    }

    #[test]
    fn test_new_pure_state() {
        for n in 0..=10 {
            let state = PureState::new(n).unwrap();
            assert_eq!(state.num_qubits(), n);
            assert_eq!(state.dimension(), 1 << n);
            assert_eq!(state.qubit_count().unwrap(), n);
            assert_eq!(state.elements()[0], Complex64::new(1.0, 0.0));
            assert!(state.elements()[1..]
                .iter()
                .all(|&z| z == Complex64::new(0.0, 0.0)));
        }
    }

    #[test]
    fn test_reset_after_arbitrary_contents() {
        let mut state = PureState::new(4).unwrap();
        for (i, amp) in state.elements_mut().iter_mut().enumerate() {
            *amp = Complex64::new(i as f64 + 1.0, 0.5);
        }
        state.reset_to_zero();

        assert_eq!(state.elements()[0], Complex64::new(1.0, 0.0));
        for i in 1..state.dimension() {
            assert_eq!(state.elements()[i], Complex64::new(0.0, 0.0));
        }
        assert_relative_eq!(state.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scratch_is_lazy_and_allocated_once() {
        let mut state = PureState::new(3).unwrap();
        assert!(!state.has_scratch());
        assert!(state.scratch().is_none());

        state.ensure_scratch().unwrap();
        assert!(state.has_scratch());
        let first = state.scratch().unwrap().as_ptr();

        state.ensure_scratch().unwrap();
        assert_eq!(state.scratch().unwrap().as_ptr(), first);
        assert_eq!(state.scratch().unwrap().len(), 8);
    }

    #[test]
    fn test_live_and_scratch_mut() {
        let mut state = PureState::new(2).unwrap();
        let (live, scratch) = state.live_and_scratch_mut().unwrap();
        assert_eq!(live[0], Complex64::new(1.0, 0.0));
        scratch.fill(sentinel(2.0));

        assert!(state
            .scratch()
            .unwrap()
            .iter()
            .all(|&z| z == sentinel(2.0)));
        assert_eq!(state.elements()[0], Complex64::new(1.0, 0.0));
    }

    #[test]
    fn test_local_state_never_requires_swap() {
        let mut state = PureState::new(2).unwrap();
        assert!(state.is_live_original());
        assert!(!state.requires_swap());

        state.ensure_scratch().unwrap();
        state.scratch_mut().unwrap().fill(sentinel(1.0));
        state.swap_live_and_scratch().unwrap();

        assert!(!state.is_live_original());
        assert!(!state.original_is_pinned());
        assert!(!state.requires_swap());
        assert!(!state.commit_swap());
        assert!(state.elements().iter().all(|&z| z == sentinel(1.0)));
    }

    #[test]
    fn test_swap_roundtrip_restores_original_role() {
        let mut state = PureState::new(2).unwrap();
        let original = state.original_ptr();

        state.swap_live_and_scratch().unwrap();
        assert_ne!(state.elements().as_ptr(), original);
        assert_eq!(state.scratch().unwrap().as_ptr(), original);

        state.swap_live_and_scratch().unwrap();
        assert_eq!(state.elements().as_ptr(), original);
        assert!(state.is_live_original());
    }

    #[test]
    fn test_set_elements() {
        let mut state = PureState::new(2).unwrap();
        let mut replacement = AmplitudeBuffer::local(4, &StateConfig::default()).unwrap();
        replacement.as_mut_slice()[2] = Complex64::new(1.0, 0.0);
        let replacement_ptr = replacement.as_ptr();

        // The original buffer is kept, not handed back
        assert!(state.set_elements(replacement).unwrap().is_none());
        assert_eq!(state.elements().as_ptr(), replacement_ptr);
        assert_eq!(state.elements()[2], Complex64::new(1.0, 0.0));
        assert_eq!(state.original_elements()[0], Complex64::new(1.0, 0.0));

        let other = AmplitudeBuffer::local(4, &StateConfig::default()).unwrap();
        let displaced = state.set_elements(other).unwrap().unwrap();
        assert_eq!(displaced.as_ptr(), replacement_ptr);
    }

    #[test]
    fn test_set_elements_wrong_length() {
        let mut state = PureState::new(2).unwrap();
        let buffer = AmplitudeBuffer::local(8, &StateConfig::default()).unwrap();
        assert_eq!(
            state.set_elements(buffer).unwrap_err(),
            StateError::AllocationSizeMismatch {
                expected: 4,
                actual: 8
            }
        );
    }

    #[test]
    fn test_probabilities() {
        let mut state = make_pure_state(1, AllocationSpec::Local).unwrap();
        let h = 1.0 / 2.0_f64.sqrt();
        state.elements_mut()[0] = Complex64::new(h, 0.0);
        state.elements_mut()[1] = Complex64::new(0.0, h);

        let probs = state.probabilities();
        assert_relative_eq!(probs[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(probs[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_debug_format() {
        let state = PureState::new(3).unwrap();
        let text = format!("{:?}", state);
        assert!(text.contains("qubits: 3"));
        assert!(text.contains("allocation: local"));
    }
}
