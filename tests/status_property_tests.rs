//! Property-based tests for the instruction status lifecycle
//!
//! The transition table is small enough to enumerate, but proptest keeps the
//! invariants stated as properties over arbitrary status pairs and paths.

use instruction_settlement::types::Status;
use proptest::prelude::*;

// PROPERTY TEST STRATEGIES

fn status_strategy() -> impl Strategy<Value = Status> {
    prop::sample::select(Status::ALL.to_vec())
}

/// Walk the transition table from `initiated` following `choices`
fn walk(choices: &[usize]) -> Vec<Status> {
    let mut path = vec![Status::Initiated];
    for choice in choices {
        let current = *path.last().unwrap_or(&Status::Initiated);
        let next: Vec<Status> = Status::ALL
            .into_iter()
            .filter(|next| current.can_transition_to(*next))
            .collect();
        if next.is_empty() {
            break;
        }
        path.push(next[choice % next.len()]);
    }
    path
}

// PROPERTY TESTS
proptest! {
    /// Property: nothing ever returns to `initiated`
    #[test]
    fn initiated_is_never_reentered(from in status_strategy()) {
        prop_assert!(!from.can_transition_to(Status::Initiated));
    }

    /// Property: there are no self loops
    #[test]
    fn no_self_transitions(status in status_strategy()) {
        prop_assert!(!status.can_transition_to(status));
    }

    /// Property: terminal statuses only leave through `rollbackInitiated`
    #[test]
    fn terminal_statuses_only_roll_back(from in status_strategy(), to in status_strategy()) {
        if from.is_terminal() && from.can_transition_to(to) {
            prop_assert_eq!(to, Status::RollbackInitiated);
            prop_assert_eq!(from, Status::Executed);
        }
    }

    /// Property: every status other than `initiated` and `matched` reached
    /// through the table is one only the privileged organization may set
    #[test]
    fn privileged_targets_cover_settlement(from in status_strategy(), to in status_strategy()) {
        if from.can_transition_to(to) && !matches!(to, Status::Matched | Status::Signed | Status::Canceled) {
            prop_assert!(to.is_privileged_target());
        }
    }

    /// Property: any walk through the table stays agreed once matched and
    /// ends in a status with no way forward but rollback
    #[test]
    fn walks_are_consistent(choices in prop::collection::vec(any::<usize>(), 0..12)) {
        let path = walk(&choices);

        for pair in path.windows(2) {
            prop_assert!(pair[0].can_transition_to(pair[1]));
            if pair[0].is_agreed() {
                prop_assert!(pair[1].is_agreed());
            }
        }
        if path.len() <= choices.len() {
            prop_assert!(path.last().is_some_and(|last| last.is_terminal() && *last != Status::Executed));
        }
    }

    /// Property: the wire literal parses back to the same status
    #[test]
    fn literal_roundtrip(status in status_strategy()) {
        prop_assert_eq!(status.to_string().parse::<Status>().unwrap(), status);
        prop_assert_eq!(serde_json::to_value(status).unwrap(), serde_json::Value::from(status.as_str()));
    }
}
