//! Property-based test generators using proptest.
//!
//! The central generator is [`unit_plan_strategy`]: a random tree of nested
//! work units, each saving some documents, running its children in order and
//! then committing or rolling back. Any plan respects LIFO nesting.

use nestdb_core::{AccessType, CollectionKind, Document};
use proptest::prelude::*;

/// What a unit does when its children have finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Commit the unit.
    Commit,
    /// Roll the unit back.
    Rollback,
}

/// A nested work unit to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPlan {
    /// Documents saved before the children run.
    pub saves: usize,
    /// Nested units, run one after the other.
    pub children: Vec<UnitPlan>,
    /// How the unit finishes.
    pub outcome: Outcome,
}

impl UnitPlan {
    /// Creates a leaf plan.
    #[must_use]
    pub fn leaf(saves: usize, outcome: Outcome) -> Self {
        Self {
            saves,
            children: Vec::new(),
            outcome,
        }
    }

    /// Adds a child plan.
    #[must_use]
    pub fn with_child(mut self, child: UnitPlan) -> Self {
        self.children.push(child);
        self
    }

    /// Returns the number of units in the plan.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        1 + self.children.iter().map(Self::unit_count).sum::<usize>()
    }

    /// Returns the deepest nesting level reached (0 for a leaf).
    #[must_use]
    pub fn max_level(&self) -> usize {
        self.children
            .iter()
            .map(|c| c.max_level() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Returns the total number of saves in the plan.
    #[must_use]
    pub fn total_saves(&self) -> usize {
        self.saves + self.children.iter().map(Self::total_saves).sum::<usize>()
    }
}

/// Strategy for unit outcomes, biased toward commit.
pub fn outcome_strategy() -> impl Strategy<Value = Outcome> {
    prop_oneof![3 => Just(Outcome::Commit), 1 => Just(Outcome::Rollback)]
}

/// Strategy for nested unit plans up to `depth` levels below the root.
pub fn unit_plan_strategy(depth: u32) -> impl Strategy<Value = UnitPlan> {
    let leaf = (0usize..4, outcome_strategy()).prop_map(|(saves, outcome)| UnitPlan::leaf(saves, outcome));
    leaf.prop_recursive(depth, 32, 3, |inner| {
        (0usize..4, prop::collection::vec(inner, 0..3), outcome_strategy()).prop_map(
            |(saves, children, outcome)| UnitPlan {
                saves,
                children,
                outcome,
            },
        )
    })
}

/// Strategy for access types.
pub fn access_strategy() -> impl Strategy<Value = AccessType> {
    prop_oneof![
        Just(AccessType::Read),
        Just(AccessType::Write),
        Just(AccessType::Exclusive),
    ]
}

/// Strategy for collection kinds.
pub fn kind_strategy() -> impl Strategy<Value = CollectionKind> {
    prop_oneof![Just(CollectionKind::Document), Just(CollectionKind::Edge)]
}

/// Strategy for valid collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for small documents holding a JSON-like map.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..6)
        .prop_map(|map| Document::encode(&map).expect("map encodes"))
}

/// Configuration for property-based tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_metrics() {
        let plan = UnitPlan::leaf(1, Outcome::Commit)
            .with_child(UnitPlan::leaf(2, Outcome::Rollback).with_child(UnitPlan::leaf(3, Outcome::Commit)))
            .with_child(UnitPlan::leaf(0, Outcome::Commit));
        assert_eq!(plan.unit_count(), 4);
        assert_eq!(plan.max_level(), 2);
        assert_eq!(plan.total_saves(), 6);
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn plans_stay_within_depth(plan in unit_plan_strategy(3)) {
            prop_assert!(plan.max_level() <= 3);
        }

        #[test]
        fn documents_decode(doc in document_strategy()) {
            let map: std::collections::BTreeMap<String, i64> = doc.decode().unwrap();
            prop_assert!(map.len() < 6);
        }
    }
}
