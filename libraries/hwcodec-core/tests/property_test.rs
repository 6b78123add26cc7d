//! Property-based tests for the shared vocabulary
//!
//! Uses proptest to check the transition table and buffer header
//! arithmetic across arbitrary inputs.

use hwcodec_core::{
    is_legal_transition, BufferHeader, BufferId, BufferOrigin, ComponentState, PortIndex,
};
use proptest::prelude::*;

// ===== Helpers =====

fn any_state() -> impl Strategy<Value = ComponentState> {
    prop::sample::select(ComponentState::ALL.to_vec())
}

fn header(size: usize) -> BufferHeader {
    let id = BufferId {
        port: PortIndex::Input,
        slot: 0,
        generation: 1,
    };
    BufferHeader::new(id, BufferOrigin::Host, vec![0; size])
}

// ===== Property Tests =====

proptest! {
    /// Property: nothing leaves Invalid and no state transitions to itself
    #[test]
    fn invalid_and_same_state_are_never_legal(from in any_state(), to in any_state()) {
        if from == ComponentState::Invalid || from == to {
            prop_assert!(!is_legal_transition(from, to));
        }
    }

    /// Property: every other state may fall into Invalid
    #[test]
    fn invalid_is_always_reachable(from in any_state()) {
        prop_assume!(from != ComponentState::Invalid);
        prop_assert!(is_legal_transition(from, ComponentState::Invalid));
    }

    /// Property: resources are only gained or lost through Idle
    #[test]
    fn resource_boundary_crossed_through_idle(from in any_state(), to in any_state()) {
        prop_assume!(to != ComponentState::Invalid);
        if is_legal_transition(from, to) && from.has_resources() != to.has_resources() {
            let idle_side = if to.has_resources() { to } else { from };
            prop_assert_eq!(idle_side, ComponentState::Idle);
        }
    }

    /// Property: payload never exceeds the backing memory
    #[test]
    fn payload_bounded_by_capacity(
        size in 0usize..256,
        first in prop::collection::vec(any::<u8>(), 0..300),
        second in prop::collection::vec(any::<u8>(), 0..300),
    ) {
        let mut buf = header(size);
        let written = buf.write_payload(&first);
        prop_assert_eq!(written, first.len().min(size));

        let appended = buf.append_payload(&second);
        prop_assert!(buf.filled_len <= buf.alloc_len());
        prop_assert_eq!(buf.filled_len, written + appended);
        prop_assert_eq!(buf.remaining_capacity(), size - buf.filled_len);
        prop_assert_eq!(&buf.payload()[..written], &first[..written]);
    }
}

#[test]
fn legal_transition_table() {
    use ComponentState::*;

    let legal = [
        (Loaded, Idle),
        (Loaded, WaitForResources),
        (WaitForResources, Loaded),
        (WaitForResources, Idle),
        (Idle, Loaded),
        (Idle, Executing),
        (Idle, Pause),
        (Executing, Idle),
        (Executing, Pause),
        (Pause, Idle),
        (Pause, Executing),
    ];

    for from in ComponentState::ALL {
        for to in ComponentState::ALL {
            let expected = legal.contains(&(from, to)) || (to == Invalid && from != Invalid);
            assert_eq!(
                is_legal_transition(from, to),
                expected,
                "{from:?} -> {to:?}"
            );
        }
    }
}
