//! Dependency-driven derivation.
//!
//! Every fact is enqueued once; a fact whose derived set changes enqueues
//! its dependents. Cyclic rule graphs simply re-enqueue until monotone
//! growth runs out.

use std::collections::VecDeque;

use super::{dependency_map, Engine};

pub(crate) fn run(engine: &mut Engine<'_>) {
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
}
