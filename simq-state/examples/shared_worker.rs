//! Demonstrates a pure state in shared memory and the pointer-swap protocol
//!
//! Run with: RUST_LOG=debug cargo run --example shared_worker

use num_complex::Complex64;
use simq_state::{
    diagonal_probabilities, make_density_matrix_state, make_pure_state, AllocationSpec,
    AmplitudeBuffer, SharedSegment,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Shared Memory State Demo ===\n");

    // Example 1: A state other workers can map by name
    println!("1. Shared Pure State:");
    let name = format!("simq-demo-{}", std::process::id());
    let mut state = match make_pure_state(4, name.as_str()) {
        Ok(state) => state,
        Err(err) => {
            println!("   Shared memory unavailable ({err}), falling back to local memory");
            make_pure_state(4, AllocationSpec::Local).unwrap()
        }
    };
    println!("   Allocation: {}", state.allocation_kind());
    println!("   Segment: {:?}", state.segment_name());
    println!("   Pinned: {}", state.original_is_pinned());
    println!();

    // Example 2: A stochastic step lands in scratch, then becomes live
    println!("2. Stochastic Step:");
    let (live, scratch) = state.live_and_scratch_mut().unwrap();
    scratch.copy_from_slice(live);
    scratch.swap(0, 5);
    state.swap_live_and_scratch().unwrap();
    println!("   Requires swap: {}", state.requires_swap());
    println!("   Committed: {}", state.commit_swap());
    println!("   Original buffer |0101⟩ amplitude: {}", state.original_elements()[5]);
    println!();

    // Example 3: What a second worker sees
    if let Some(segment_name) = state.segment_name().map(str::to_string) {
        println!("3. Attached Worker View:");
        // SAFETY: `state` is not touched while the peer view is read.
        let segment =
            unsafe { SharedSegment::open_unchecked(&segment_name, state.dimension(), 0o600) }
                .unwrap();
        let peer = AmplitudeBuffer::from_segment(segment);
        println!("   Peer amplitude 5: {}", peer.as_slice()[5]);
        println!();
    }

    // Example 4: Density matrix diagonal
    println!("4. Density Matrix Probabilities:");
    let mut rho = make_density_matrix_state(2, AllocationSpec::Local).unwrap();
    rho.set_matrix_at(0, 0, Complex64::new(0.5, 0.0));
    rho.set_matrix_at(3, 3, Complex64::new(0.5, 0.0));
    for (outcome, p) in diagonal_probabilities(&rho).unwrap().iter().enumerate() {
        println!("   P({:02b}) = {:.3}", outcome, p);
    }
}
