//! The knowledge base: per-fact books of instances and non-instances.
//!
//! For every fact name the base keeps two insertion-ordered maps keyed by
//! the structural content hash of the normalized instance: the *instances*
//! (atoms known to hold) and the *non-instances* (atoms known not to hold).
//! Instances carry a `derived` flag separating atoms produced by the
//! derivation engine from postulated ones; the flag never participates in
//! hashing, so a derived atom and its postulated twin share one slot.
//!
//! The invariants of the two books (disjointness, postulate dominance) are
//! enforced by [`crate::transitions`]; this module only provides the
//! primitives and keeps iteration order equal to insertion order.

use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use rustc_hash::FxHasher;

use crate::ast::Expression;

/// Stable 64-bit structural hash of an expression.
///
/// Two structurally equal expressions always hash equal, across copies and
/// across runs.
pub fn content_hash(expr: &Expression) -> u64 {
    let mut hasher = FxHasher::default();
    expr.hash(&mut hasher);
    hasher.finish()
}

/// A stored atom together with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    /// The normalized ground expression.
    pub expr: Expression,
    /// Whether the derivation engine produced it (true) or it was
    /// postulated (false). Postulated entries persist across derivation
    /// rounds; derived entries are re-earned every round.
    pub derived: bool,
}

/// The in-memory knowledge base.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    instances: IndexMap<String, IndexMap<u64, Instance>>,
    non_instances: IndexMap<String, IndexMap<u64, Expression>>,
}

impl KnowledgeBase {
    /// An empty knowledge base.
    pub fn new() -> KnowledgeBase {
        KnowledgeBase::default()
    }

    /// Registers (or resets) the books for a fact. Re-declaring a fact
    /// drops everything recorded under its name.
    pub fn register_fact(&mut self, name: &str) {
        self.instances.insert(name.to_string(), IndexMap::new());
        self.non_instances.insert(name.to_string(), IndexMap::new());
    }

    /// Fact names with registered books, in declaration order.
    pub fn fact_names(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }

    /// Iterates a fact's instances in insertion order.
    pub fn instances(&self, name: &str) -> impl Iterator<Item = &Instance> {
        self.instances.get(name).into_iter().flat_map(IndexMap::values)
    }

    /// Iterates a fact's instances with their hashes, in insertion order.
    pub fn instances_with_hashes(&self, name: &str) -> impl Iterator<Item = (u64, &Instance)> {
        self.instances
            .get(name)
            .into_iter()
            .flat_map(IndexMap::iter)
            .map(|(hash, instance)| (*hash, instance))
    }

    /// Iterates a fact's non-instances in insertion order.
    pub fn non_instances(&self, name: &str) -> impl Iterator<Item = &Expression> {
        self.non_instances
            .get(name)
            .into_iter()
            .flat_map(IndexMap::values)
    }

    /// Number of instances recorded for a fact.
    pub fn instance_count(&self, name: &str) -> usize {
        self.instances.get(name).map_or(0, IndexMap::len)
    }

    /// Looks an instance up by hash.
    pub fn get_instance(&self, name: &str, hash: u64) -> Option<&Instance> {
        self.instances.get(name)?.get(&hash)
    }

    /// Whether an instance with this hash is recorded.
    pub fn has_instance(&self, name: &str, hash: u64) -> bool {
        self.get_instance(name, hash).is_some()
    }

    /// Whether a non-instance with this hash is recorded.
    pub fn has_non_instance(&self, name: &str, hash: u64) -> bool {
        self.non_instances
            .get(name)
            .is_some_and(|book| book.contains_key(&hash))
    }

    /// Records an instance under its hash.
    pub fn put_instance(&mut self, name: &str, hash: u64, expr: Expression, derived: bool) {
        self.instances
            .entry(name.to_string())
            .or_default()
            .insert(hash, Instance { expr, derived });
    }

    /// Downgrades an existing instance to postulated. No-op when absent.
    pub fn set_postulated(&mut self, name: &str, hash: u64) {
        if let Some(instance) = self
            .instances
            .get_mut(name)
            .and_then(|book| book.get_mut(&hash))
        {
            instance.derived = false;
        }
    }

    /// Removes an instance by hash, preserving the order of the rest.
    pub fn remove_instance(&mut self, name: &str, hash: u64) -> Option<Instance> {
        self.instances.get_mut(name)?.shift_remove(&hash)
    }

    /// Records a non-instance under its hash.
    pub fn put_non_instance(&mut self, name: &str, hash: u64, expr: Expression) {
        self.non_instances
            .entry(name.to_string())
            .or_default()
            .insert(hash, expr);
    }

    /// Removes a non-instance by hash, preserving the order of the rest.
    pub fn remove_non_instance(&mut self, name: &str, hash: u64) -> Option<Expression> {
        self.non_instances.get_mut(name)?.shift_remove(&hash)
    }

    /// Moves every derived instance of a fact out of the base, preserving
    /// order. The derivation engine uses this to make derived atoms
    /// re-earn their place each round.
    pub fn take_derived(&mut self, name: &str) -> IndexMap<u64, Instance> {
        let Some(book) = self.instances.get_mut(name) else {
            return IndexMap::new();
        };
        let mut taken = IndexMap::new();
        let kept: IndexMap<u64, Instance> = book
            .drain(..)
            .filter_map(|(hash, instance)| {
                if instance.derived {
                    taken.insert(hash, instance);
                    None
                } else {
                    Some((hash, instance))
                }
            })
            .collect();
        *book = kept;
        taken
    }

    /// A snapshot for later diffing or restoration. Entries are immutable
    /// once inserted, so a structural clone is sufficient.
    pub fn snapshot(&self) -> KnowledgeBase {
        self.clone()
    }

    /// Replaces the whole state with a snapshot.
    pub fn restore(&mut self, snapshot: KnowledgeBase) {
        *self = snapshot;
    }
}
