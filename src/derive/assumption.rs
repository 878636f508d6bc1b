//! Dependency-driven derivation with assumption/rollback for negation.
//!
//! While this strategy runs, `NOT` producers record each literal they
//! assumed absent, together with a snapshot of the books, the work queue
//! and the assumption set taken at that moment. If a later derivation
//! asserts one of those literals, the engine restores the snapshot and
//! abandons the fact it was deriving; the restored queue then re-derives
//! from the pre-assumption state, now with the literal's producer ahead of
//! its consumers.
//!
//! This realises a bounded stable-model search: exact under stratified
//! negation, conservative otherwise.

use std::collections::VecDeque;

use super::{dependency_map, Engine};

pub(crate) fn run(engine: &mut Engine<'_>) {
    engine.assuming = true;
    engine.assumptions.clear();

    let dependents = dependency_map(engine.registry);
    engine.queue = engine
        .registry
        .names()
        .map(str::to_string)
        .collect::<VecDeque<_>>();

    while let Some(name) = engine.queue.pop_front() {
        if !engine.derive_fact(&name) {
            continue;
        }
        if let Some(waiting) = dependents.get(&name) {
            for dependent in waiting {
                engine.queue.push_back(dependent.clone());
            }
        }
    }

    engine.assuming = false;
}
