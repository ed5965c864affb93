//! Proptest strategies shared by the property suites.

#![allow(dead_code)]

use proptest::prelude::*;

use import_orchestrator::models::{EntityDependency, ExecutionStatus, LockType};

/// Queue priorities in the admitted range
pub fn priorities_strategy() -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(1..=20i32, 1..30)
}

#[derive(Debug, Clone)]
pub enum LockOp {
    Acquire {
        owner: usize,
        key: usize,
        lock_type: LockType,
        ttl_seconds: i64,
    },
    Release {
        owner: usize,
        key: usize,
    },
    /// Move the clock forward
    Advance { seconds: i64 },
}

pub fn lock_type_strategy() -> impl Strategy<Value = LockType> {
    prop_oneof![Just(LockType::Exclusive), Just(LockType::Shared)]
}

pub fn lock_ops_strategy() -> impl Strategy<Value = Vec<LockOp>> {
    let op = prop_oneof![
        4 => (0..4usize, 0..3usize, lock_type_strategy(), 1..30i64).prop_map(
            |(owner, key, lock_type, ttl_seconds)| LockOp::Acquire {
                owner,
                key,
                lock_type,
                ttl_seconds,
            }
        ),
        2 => (0..4usize, 0..3usize).prop_map(|(owner, key)| LockOp::Release { owner, key }),
        1 => (1..20i64).prop_map(|seconds| LockOp::Advance { seconds }),
    ];
    prop::collection::vec(op, 1..60)
}

/// Random acyclic graph: entity `i` optionally depends on some `j < i`,
/// listed in shuffled order
pub fn entity_graph_strategy() -> impl Strategy<Value = Vec<EntityDependency>> {
    (1..10usize)
        .prop_flat_map(|count| {
            let parents: Vec<_> = (0..count)
                .map(|index| {
                    if index == 0 {
                        Just(None).boxed()
                    } else {
                        prop::option::of(0..index).boxed()
                    }
                })
                .collect();
            parents
        })
        .prop_map(|parents| {
            parents
                .into_iter()
                .enumerate()
                .map(|(index, parent)| match parent {
                    Some(parent) => EntityDependency::depending_on(
                        format!("Entity{index}"),
                        format!("Entity{parent}"),
                        index as i32,
                    ),
                    None => EntityDependency::root(format!("Entity{index}"), index as i32),
                })
                .collect::<Vec<_>>()
        })
        .prop_shuffle()
}

/// One step against a live schedule
#[derive(Debug, Clone)]
pub enum ScheduleOp {
    /// Jump past the next occurrence and tick
    Fire,
    /// Finish the `pick`-th outstanding execution, or replay a finished one
    Finish { pick: usize, status: ExecutionStatus },
    Replay { pick: usize, status: ExecutionStatus },
    /// HARD limit below (tight) or above the per-firing reservation
    Limit { tight: bool },
    /// Make the next submissions fail or succeed
    SubmitFailing(bool),
}

pub fn finish_status_strategy() -> impl Strategy<Value = ExecutionStatus> {
    prop_oneof![
        3 => Just(ExecutionStatus::Completed),
        2 => Just(ExecutionStatus::Failed),
        1 => Just(ExecutionStatus::Cancelled),
    ]
}

pub fn schedule_ops_strategy() -> impl Strategy<Value = Vec<ScheduleOp>> {
    let op = prop_oneof![
        4 => Just(ScheduleOp::Fire),
        4 => (0..4usize, finish_status_strategy())
            .prop_map(|(pick, status)| ScheduleOp::Finish { pick, status }),
        1 => (0..4usize, finish_status_strategy())
            .prop_map(|(pick, status)| ScheduleOp::Replay { pick, status }),
        1 => any::<bool>().prop_map(|tight| ScheduleOp::Limit { tight }),
        1 => any::<bool>().prop_map(ScheduleOp::SubmitFailing),
    ];
    prop::collection::vec(op, 1..40)
}
