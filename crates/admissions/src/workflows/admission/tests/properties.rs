use super::common::*;
use std::sync::Arc;

use proptest::prelude::*;

use crate::workflows::admission::engine::TransitionError;
use crate::workflows::admission::graph::StageGraph;
use crate::workflows::admission::stage::Stage;

fn any_stage() -> impl Strategy<Value = Stage> {
    proptest::sample::select(Stage::ordered().to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever sequence of targets is requested, the trail only ever holds legal edges,
    /// only grows by appending, and always ends in the record's current stage.
    #[test]
    fn audit_trail_invariants_hold_for_random_requests(
        targets in prop::collection::vec(any_stage(), 1..24)
    ) {
        let graph = StageGraph::standard();
        let repository = Arc::new(MemoryRepository::default());
        let record = seed_in_stage(&repository, "prop", Stage::Submitted);
        let engine = engine_with(repository.clone());

        let mut previous = record;
        for target in targets {
            let from = previous.current_stage();
            match engine.request_transition(previous.id(), target, None, ACTOR) {
                Ok(updated) => {
                    prop_assert!(graph.can_transition(from, target));
                    prop_assert_eq!(updated.audit_trail().len(), previous.audit_trail().len() + 1);
                    prop_assert_eq!(
                        &updated.audit_trail().entries()[..previous.audit_trail().len()],
                        previous.audit_trail().entries()
                    );
                    previous = updated;
                }
                Err(TransitionError::IllegalTransition { from: rejected_from, to }) => {
                    prop_assert!(!graph.can_transition(from, target));
                    prop_assert_eq!(rejected_from, from);
                    prop_assert_eq!(to, target);
                    prop_assert_eq!(&repository.stored(previous.id()), &previous);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }

            prop_assert_eq!(previous.current_stage(), previous.derived_stage());
        }

        let mut expected_from = Stage::INITIAL;
        for entry in previous.audit_trail().iter() {
            prop_assert_eq!(entry.from_stage, expected_from);
            prop_assert!(graph.can_transition(entry.from_stage, entry.to_stage));
            expected_from = entry.to_stage;
        }
        prop_assert_eq!(previous.version() as usize, previous.audit_trail().len());
    }
}
