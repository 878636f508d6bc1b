//! Naive fixed point: sweep every fact until a full sweep changes nothing.
//!
//! Termination follows from monotone growth: each sweep can only add
//! derived instances or stabilise, and the books are finite for any finite
//! set of postulates and ranges.

use super::Engine;

pub(crate) fn run(engine: &mut Engine<'_>) {
    let names: Vec<String> = engine.registry.names().map(str::to_string).collect();
    let mut changed = true;
    while changed {
        changed = false;
        for name in &names {
            changed |= engine.derive_fact(name);
        }
    }
}
