//! Integration tests for states backed by POSIX shared memory
#![cfg(unix)]

use num_complex::Complex64;
use simq_state::{
    diagonal_probabilities, make_density_matrix_state, make_pure_state,
    make_pure_state_with_config, AllocationKind, AmplitudeBuffer, SharedSegment, StateConfig,
    StateError, ELEMENT_BYTES,
};
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_SEGMENT: AtomicUsize = AtomicUsize::new(0);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Process-unique segment name
fn segment_name(tag: &str) -> String {
    let n = NEXT_SEGMENT.fetch_add(1, Ordering::SeqCst);
    format!("simq-{}-{}-{}", std::process::id(), tag, n)
}

/// Map an existing segment the way a second worker process would
///
/// Tests only read the returned view between mutations of the owning state.
fn attach(name: &str, len: usize) -> AmplitudeBuffer {
    let segment = unsafe { SharedSegment::open_unchecked(name, len, 0o600) }.unwrap();
    AmplitudeBuffer::from_segment(segment)
}

#[test]
fn test_shared_pure_state_is_pinned_and_initialized() {
    init_tracing();
    let name = segment_name("pure");
    let state = make_pure_state(3, name.as_str()).unwrap();

    assert_eq!(state.allocation_kind(), AllocationKind::Shared);
    assert_eq!(state.segment_name(), Some(name.as_str()));
    assert!(state.original_is_pinned());
    assert_eq!(state.qubit_count().unwrap(), 3);
    assert_eq!(state.elements()[0], Complex64::new(1.0, 0.0));
    assert!(state.elements()[1..]
        .iter()
        .all(|&z| z == Complex64::new(0.0, 0.0)));
}

#[test]
fn test_attached_mapping_sees_pure_state_layout() {
    let name = segment_name("layout");
    let mut state = make_pure_state(2, name.as_str()).unwrap();
    for (k, amp) in state.elements_mut().iter_mut().enumerate() {
        *amp = Complex64::new(k as f64, -(k as f64));
    }

    let peer = attach(&name, 4);
    for k in 0..4 {
        assert_eq!(peer.as_slice()[k], Complex64::new(k as f64, -(k as f64)));
    }
}

#[test]
fn test_attached_mapping_sees_row_major_density_matrix() {
    let name = segment_name("rho");
    let mut rho = make_density_matrix_state(2, name.as_str()).unwrap();
    let dim = rho.dimension();
    rho.set_matrix_at(2, 1, Complex64::new(0.125, 0.5));

    let peer = attach(&name, dim * dim);
    assert_eq!(peer.as_slice()[2 * dim + 1], Complex64::new(0.125, 0.5));
    assert_eq!(peer.as_slice()[0], Complex64::new(1.0, 0.0));
    assert_eq!(diagonal_probabilities(&rho).unwrap(), vec![1.0, 0.0, 0.0, 0.0]);
}

#[test]
fn test_swap_protocol_over_shared_memory() {
    init_tracing();
    let name = segment_name("swap");
    let mut state = make_pure_state(3, name.as_str()).unwrap();
    let original = state.original_ptr();

    let a = Complex64::new(0.5, 0.5);
    let b = Complex64::new(-0.25, 1.0);
    state.elements_mut().fill(a);
    state.ensure_scratch().unwrap();
    state.scratch_mut().unwrap().fill(b);

    state.swap_live_and_scratch().unwrap();
    assert!(state.requires_swap());

    // A peer still sees the pre-step values until the swap is committed
    let peer = attach(&name, 8);
    assert!(peer.as_slice().iter().all(|&z| z == a));

    assert!(state.commit_swap());
    assert_eq!(state.elements().as_ptr(), original);
    assert!(state.original_elements().iter().all(|&z| z == b));
    assert!(peer.as_slice().iter().all(|&z| z == b));
    assert!(state.has_scratch());
}

#[test]
fn test_attach_with_mismatched_size_fails() {
    let name = segment_name("size");
    let _state = make_pure_state(3, name.as_str()).unwrap();

    assert_eq!(
        make_pure_state(2, name.as_str()).unwrap_err(),
        StateError::AllocationSizeMismatch {
            expected: 4,
            actual: 8
        }
    );
}

#[test]
fn test_second_state_on_a_mapped_name_is_rejected() {
    let name = segment_name("in-use");
    let state = make_pure_state(2, name.as_str()).unwrap();

    assert_eq!(
        make_pure_state(2, name.as_str()).unwrap_err(),
        StateError::SegmentInUse { name: name.clone() }
    );
    assert_eq!(
        SharedSegment::open(&name, 4, 0o600).unwrap_err(),
        StateError::SegmentInUse { name: name.clone() }
    );

    drop(state);
    assert!(make_pure_state(2, name.as_str()).is_ok());
}

#[test]
fn test_detaching_worker_keeps_owner_segment_attachable() {
    init_tracing();
    let name = segment_name("detach");
    let mut state = make_pure_state(2, name.as_str()).unwrap();
    state.elements_mut()[3] = Complex64::new(7.0, 0.0);

    let first = attach(&name, 4);
    assert_eq!(first.as_slice()[3], Complex64::new(7.0, 0.0));
    drop(first);

    let second = attach(&name, 4);
    assert_eq!(second.as_slice()[3], Complex64::new(7.0, 0.0));
    assert_eq!(second.as_slice()[0], Complex64::new(1.0, 0.0));
    drop(second);

    state.elements_mut()[2] = Complex64::new(0.0, -1.0);
    let third = attach(&name, 4);
    assert_eq!(third.as_slice()[2], Complex64::new(0.0, -1.0));
}

#[test]
fn test_invalid_segment_name() {
    assert!(matches!(
        make_pure_state(1, "bad/name"),
        Err(StateError::InvalidSegmentName { .. })
    ));
}

#[test]
fn test_segment_size_matches_layout() {
    let name = segment_name("bytes");
    let segment = SharedSegment::open(&name, 16, 0o600).unwrap();
    assert_eq!(segment.byte_len(), 16 * ELEMENT_BYTES);
}

#[test]
fn test_memory_limit_applies_to_shared_states() {
    let name = segment_name("limit");
    let config = StateConfig::default().with_memory_limit(64);
    assert_eq!(
        make_pure_state_with_config(3, name.as_str(), &config).unwrap_err(),
        StateError::TooManyQubits {
            num_qubits: 3,
            max_qubits: 2
        }
    );
}

#[cfg(target_os = "linux")]
#[test]
fn test_segment_is_unlinked_when_state_drops() {
    let name = segment_name("drop");
    let path = std::path::Path::new("/dev/shm").join(&name);

    let state = make_pure_state(2, name.as_str()).unwrap();
    assert!(path.exists());

    drop(state);
    assert!(!path.exists());
}

#[cfg(target_os = "linux")]
#[test]
fn test_only_the_creating_state_unlinks() {
    let name = segment_name("owner");
    let path = std::path::Path::new("/dev/shm").join(&name);

    let state = make_pure_state(2, name.as_str()).unwrap();
    drop(attach(&name, 4));
    assert!(path.exists());

    drop(state);
    assert!(!path.exists());
}
