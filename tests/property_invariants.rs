//! Property suites for the tree invariants, the deterministic fallback,
//! the formula pipelines, and structural schema validation.

use proptest::prelude::*;

use forest::domain::models::evolution::CompletionReport;
use forest::domain::models::hta::Complexity;
use forest::services::evolution::breakthrough_level;
use forest::services::goal_analysis::{analyze, fallback_branches};
use forest::services::hta_engine::{
    task_difficulty, task_duration, task_priority, tasks_per_branch, DurationContext, HtaEngine,
};
use forest::services::intelligence_bridge::validate_schema;

/// Plausible multi-word goal strings.
fn goal_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-z]{3,10}", 1..6).prop_map(|words| words.join(" "))
}

fn duration_context_strategy() -> impl Strategy<Value = DurationContext> {
    prop_oneof![
        Just(DurationContext::Standard),
        Just(DurationContext::HighUrgency),
        Just(DurationContext::HandsOn),
        Just(DurationContext::Reading),
    ]
}

proptest! {
    /// Fallback branch generation is deterministic per goal.
    #[test]
    fn proptest_fallback_branches_deterministic(goal in goal_strategy()) {
        let first: Vec<String> = fallback_branches(&goal, &analyze(&goal))
            .into_iter()
            .map(|b| b.name)
            .collect();
        let second: Vec<String> = fallback_branches(&goal, &analyze(&goal))
            .into_iter()
            .map(|b| b.name)
            .collect();
        prop_assert_eq!(&first, &second);
        prop_assert!(first.len() >= 3);

        let mut unique = first.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(unique.len(), first.len(), "duplicate branch names");
    }

    /// A materialized frontier always satisfies the structural invariants:
    /// every task points at an existing branch, prerequisites stay inside
    /// the tree, ids are unique, and per-branch priorities are a strict
    /// total order.
    #[test]
    fn proptest_materialized_frontier_invariants(
        goal in goal_strategy(),
        score in 1u8..=10,
        urgency in any::<bool>(),
    ) {
        let complexity = Complexity::from_score(score, Vec::new());
        let branches = fallback_branches(&goal, &analyze(&goal));
        let nodes = HtaEngine::materialize_frontier(&goal, &complexity, &branches, urgency);

        prop_assert_eq!(nodes.len(), tasks_per_branch(score) * branches.len());

        let branch_names: Vec<&str> = branches.iter().map(|b| b.name.as_str()).collect();
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut unique = ids.clone();
        unique.sort_unstable();
        unique.dedup();
        prop_assert_eq!(unique.len(), ids.len(), "duplicate task ids");

        for node in &nodes {
            prop_assert!(branch_names.contains(&node.branch.as_str()));
            prop_assert!((1..=5).contains(&node.difficulty));
            prop_assert!((10..=60).contains(&node.duration));
            for prereq in &node.prerequisites {
                prop_assert!(ids.contains(&prereq.as_str()));
            }
        }

        for branch in &branch_names {
            let priorities: Vec<u32> = nodes
                .iter()
                .filter(|n| n.branch.as_str() == *branch)
                .map(|n| n.priority)
                .collect();
            for pair in priorities.windows(2) {
                prop_assert!(pair[0] < pair[1], "priorities not strictly increasing");
            }
        }
    }

    /// The formula pipelines stay inside their documented ranges.
    #[test]
    fn proptest_formula_ranges(
        score in 1u8..=10,
        index in 0usize..40,
        branch_priority in 1u32..10,
        context in duration_context_strategy(),
    ) {
        prop_assert!((15..=25).contains(&tasks_per_branch(score)));
        prop_assert!((1..=5).contains(&task_difficulty(score, index)));
        prop_assert!((10..=60).contains(&task_duration(score, index, context)));
        prop_assert_eq!(
            task_priority(branch_priority, index),
            branch_priority * 100 + u32::try_from(index).unwrap() * 10
        );
    }

    /// Difficulty and duration never decrease along a branch.
    #[test]
    fn proptest_progression_is_monotone(score in 1u8..=10, context in duration_context_strategy()) {
        for index in 0..24usize {
            prop_assert!(task_difficulty(score, index) <= task_difficulty(score, index + 1));
            prop_assert!(
                task_duration(score, index, context) <= task_duration(score, index + 1, context)
            );
        }
    }

    /// Breakthrough levels stay in [2, 5] for any report.
    #[test]
    fn proptest_breakthrough_level_bounds(
        outcome in ".{0,60}",
        learned in ".{0,200}",
        difficulty_rating in 0u8..=5,
        breakthrough in any::<bool>(),
    ) {
        let report = CompletionReport {
            block_id: "t".to_string(),
            outcome,
            energy_level: 3,
            learned,
            difficulty_rating,
            breakthrough,
        };
        let level = breakthrough_level(&report);
        prop_assert!((2..=5).contains(&level));
        if breakthrough {
            prop_assert!(level >= 4);
        }
    }

    /// A response is accepted exactly when every required key is present;
    /// rejections name the first missing key.
    #[test]
    fn proptest_schema_required_keys(
        keys in proptest::collection::btree_set("[a-z]{1,8}", 1..6),
        drop_index in any::<prop::sample::Index>(),
    ) {
        let keys: Vec<String> = keys.into_iter().collect();
        let schema = serde_json::json!({"required": keys});

        let full: serde_json::Map<String, serde_json::Value> = keys
            .iter()
            .map(|k| (k.clone(), serde_json::json!(1)))
            .collect();
        prop_assert!(validate_schema(&serde_json::Value::Object(full.clone()), &schema).is_ok());

        let dropped = drop_index.get(&keys).clone();
        let mut partial = full;
        partial.remove(&dropped);
        let err = validate_schema(&serde_json::Value::Object(partial), &schema).unwrap_err();
        prop_assert!(err.contains(&dropped), "error '{}' does not name '{}'", err, dropped);
    }
}

#[test]
fn test_complexity_from_score_clamps() {
    for score in [0u8, 1, 5, 10, 200] {
        let complexity = Complexity::from_score(score, Vec::new());
        assert!((1..=10).contains(&complexity.score));
        assert!((2..=6).contains(&complexity.recommended_depth));
    }
}
