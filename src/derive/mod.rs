//! The derivation engine: fixed-point closure under derivation rules.
//!
//! Every fact's `derived-from`, `holds-when` and `conditioned-by` lists are
//! synthesized into [`Rule`]s. Deriving a fact is a local fixed point: its
//! previously derived instances are set aside, every rule is evaluated and
//! each binding asserted (as derived) until a full pass adds nothing, and
//! the fact counts as changed when the derived set differs from before.
//!
//! Three strategies drive the local step to global quiescence:
//!
//! - [`Strategy::Naive`] sweeps every fact until a sweep changes nothing;
//! - [`Strategy::Queue`] follows a dependency map and re-derives only the
//!   facts whose inputs changed;
//! - [`Strategy::Assumption`] extends the queue strategy with
//!   negation-as-failure assumptions and rollback, a bounded form of
//!   stable-model search that is exact under stratified negation and
//!   conservative otherwise.
//!
//! After quiescence the violation check runs: invariant facts must hold
//! exactly one instance, and any true `violated-when` clause flags its duty
//! instance.

pub(crate) mod assumption;
pub(crate) mod naive;
pub(crate) mod queue;

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::ast::{Expression, Operator, Primitive};
use crate::error::EvalError;
use crate::eval::stream::FactIter;
use crate::eval::{self, AssumptionSink, Context};
use crate::facts::{Fact, FactRegistry};
use crate::knowledge::{content_hash, KnowledgeBase};
use crate::transitions::{self, Violations};

/// Which derivation strategy a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Naive global fixed point: sweep all facts until nothing changes.
    Naive,
    /// Dependency-driven work queue.
    Queue,
    /// Dependency-driven with assumption/rollback for negation.
    #[default]
    Assumption,
}

/// How a rule's bindings flow into the fact being derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleFlow {
    /// Bindings are instances (wrapped with the fact's head if needed).
    Direct,
    /// Atomic holds-when: a boolean binding gates enumeration of the
    /// fact's own instances; instance bindings flow into the head.
    Gate,
}

/// One synthesized derivation rule.
#[derive(Debug, Clone)]
struct Rule {
    body: Expression,
    flow: RuleFlow,
}

/// Synthesizes the rules for one fact.
///
/// Each `derived-from` clause yields its own bindings; each `holds-when`
/// clause of a composite fact gates the expanded head `F(p1…pn)` so the
/// head parameters unify with the clause; each `holds-when` clause of an
/// atomic fact streams the clause itself (see [`RuleFlow::Gate`]).
/// `conditioned-by` clauses are conjoined onto every rule under `WHEN`.
fn rules_for(fact: &Fact) -> Vec<Rule> {
    let conditions = fact.conditioned_by();
    let conditioned = |expr: Expression| {
        if conditions.is_empty() {
            expr
        } else {
            Expression::operator(
                Operator::When,
                vec![
                    expr,
                    Expression::operator(Operator::And, conditions.to_vec()),
                ],
            )
        }
    };

    let mut rules = Vec::with_capacity(fact.derived_from().len() + fact.holds_when().len());
    for derived in fact.derived_from() {
        rules.push(Rule {
            body: conditioned(derived.clone()),
            flow: RuleFlow::Direct,
        });
    }

    match fact {
        Fact::Atomic(atomic) => {
            for holds in &atomic.holds_when {
                rules.push(Rule {
                    body: conditioned(holds.clone()),
                    flow: RuleFlow::Gate,
                });
            }
        }
        Fact::Composite(composite) => {
            // The bare head expands to F([p1]…[pn]), unifying with the
            // clause's parameter references.
            let head = Expression::constructor(composite.name.clone(), vec![]);
            for holds in &composite.holds_when {
                let gate = if conditions.is_empty() {
                    holds.clone()
                } else {
                    let mut operands = vec![holds.clone()];
                    operands.extend(conditions.iter().cloned());
                    Expression::operator(Operator::And, operands)
                };
                rules.push(Rule {
                    body: Expression::operator(Operator::When, vec![head.clone(), gate]),
                    flow: RuleFlow::Direct,
                });
            }
        }
    }

    rules
}

/// Builds the dependency map: for every fact a rule references (by
/// constructor identifier or resolved variable name), the facts that must
/// re-derive when it changes.
fn dependency_map(registry: &FactRegistry) -> IndexMap<String, IndexSet<String>> {
    let mut dependents: IndexMap<String, IndexSet<String>> = IndexMap::new();
    for fact in registry.iter() {
        for rule in rules_for(fact) {
            let mut references = Vec::new();
            rule.body.collect_references(&mut references);
            for reference in references {
                dependents
                    .entry(registry.resolve(&reference))
                    .or_default()
                    .insert(fact.name().to_string());
            }
        }
    }
    dependents
}

/// A committed negation-as-failure assumption, with everything needed to
/// roll the engine back to the moment it was made.
#[derive(Debug, Clone)]
struct Assumption {
    snapshot: KnowledgeBase,
    queue: VecDeque<String>,
    prior: FxHashMap<u64, Assumption>,
}

enum Applied {
    Created,
    Skipped,
    RolledBack,
}

/// Shared state for one derivation pass.
struct Engine<'a> {
    registry: &'a FactRegistry,
    kb: &'a mut KnowledgeBase,
    assuming: bool,
    assumptions: FxHashMap<u64, Assumption>,
    queue: VecDeque<String>,
}

impl<'a> Engine<'a> {
    fn new(registry: &'a FactRegistry, kb: &'a mut KnowledgeBase) -> Engine<'a> {
        Engine {
            registry,
            kb,
            assuming: false,
            assumptions: FxHashMap::default(),
            queue: VecDeque::new(),
        }
    }

    /// Derives one fact to its local fixed point. Returns whether the
    /// fact's derived set changed relative to the previous pass.
    fn derive_fact(&mut self, name: &str) -> bool {
        let registry = self.registry;
        let Some(fact) = registry.get(name) else {
            return false;
        };
        let rules = rules_for(fact);
        if rules.is_empty() {
            return false;
        }

        let old_derived = self.kb.take_derived(name);

        let mut changed = true;
        while changed {
            changed = false;
            for rule in &rules {
                let sink = AssumptionSink::new();
                let bindings = {
                    let ctx = if self.assuming {
                        Context::with_assumptions(registry, self.kb, &sink)
                    } else {
                        Context::new(registry, self.kb)
                    };
                    match eval::gather(&ctx, &rule.body) {
                        Ok(bindings) => bindings,
                        Err(err) => {
                            warn!(fact = name, error = %err, "skipping underivable rule");
                            continue;
                        }
                    }
                };

                if self.assuming {
                    self.commit_assumptions(sink.drain());
                }

                for binding in bindings {
                    match self.apply_binding(name, rule.flow, binding) {
                        Ok(Applied::Created) => changed = true,
                        Ok(Applied::Skipped) => {}
                        Ok(Applied::RolledBack) => return changed,
                        Err(err) => {
                            warn!(fact = name, error = %err, "skipping underivable binding");
                        }
                    }
                }
            }
        }

        for hash in old_derived.keys() {
            if !self.kb.has_instance(name, *hash) {
                return true;
            }
        }
        for (hash, instance) in self.kb.instances_with_hashes(name) {
            if instance.derived && !old_derived.contains_key(&hash) {
                return true;
            }
        }
        false
    }

    /// Applies one rule binding to the fact under derivation.
    fn apply_binding(
        &mut self,
        name: &str,
        flow: RuleFlow,
        binding: Expression,
    ) -> Result<Applied, EvalError> {
        if flow == RuleFlow::Gate {
            if let Expression::Primitive(Primitive::Bool(gate)) = binding {
                if !gate {
                    return Ok(Applied::Skipped);
                }
                let heads = {
                    let ctx = Context::new(self.registry, self.kb);
                    let mut iter = FactIter::open(&ctx, name)?;
                    let mut heads = Vec::new();
                    while let Some(head) = iter.next() {
                        heads.push(head);
                    }
                    heads
                };
                let mut created = false;
                for head in heads {
                    match self.assert_derived(head)? {
                        Applied::Created => created = true,
                        Applied::Skipped => {}
                        Applied::RolledBack => return Ok(Applied::RolledBack),
                    }
                }
                return Ok(if created {
                    Applied::Created
                } else {
                    Applied::Skipped
                });
            }
        }

        let headed = binding
            .as_constructor()
            .is_some_and(|(identifier, _)| identifier == name);
        let instance = if headed {
            binding
        } else {
            Expression::constructor(name.to_string(), vec![binding])
        };
        self.assert_derived(instance)
    }

    /// Converts and asserts one derived instance, honouring committed
    /// assumptions: deriving an assumed-absent atom rolls the engine back.
    fn assert_derived(&mut self, instance: Expression) -> Result<Applied, EvalError> {
        let converted = match self.registry.convert_instance(&instance) {
            Ok(converted) => converted,
            Err(err) => {
                debug!(instance = %instance, error = %err, "derivation discards binding");
                return Ok(Applied::Skipped);
            }
        };

        if self.assuming {
            let hash = content_hash(&converted);
            if let Some(assumption) = self.assumptions.remove(&hash) {
                debug!(instance = %converted, "assumed-absent atom derived, rolling back");
                self.kb.restore(assumption.snapshot);
                self.queue = assumption.queue;
                self.assumptions = assumption.prior;
                return Ok(Applied::RolledBack);
            }
        }

        match transitions::create(self.registry, self.kb, &converted, true) {
            Ok(()) => Ok(Applied::Created),
            Err(err) => {
                debug!(instance = %converted, error = %err, "derivation discards instance");
                Ok(Applied::Skipped)
            }
        }
    }

    /// Merges freshly recorded assumptions, attaching the queue as it
    /// stands and the assumption set as it stood before this batch.
    fn commit_assumptions(&mut self, pending: Vec<eval::PendingAssumption>) {
        if pending.is_empty() {
            return;
        }
        let prior = self.assumptions.clone();
        for record in pending {
            self.assumptions
                .entry(record.literal)
                .or_insert_with(|| Assumption {
                    snapshot: record.snapshot,
                    queue: self.queue.clone(),
                    prior: prior.clone(),
                });
        }
    }
}

/// Runs derivation to quiescence under the given strategy, then checks
/// violations into the buffer.
pub fn run(
    strategy: Strategy,
    registry: &FactRegistry,
    kb: &mut KnowledgeBase,
    violations: &mut Violations,
) {
    {
        let mut engine = Engine::new(registry, kb);
        match strategy {
            Strategy::Naive => naive::run(&mut engine),
            Strategy::Queue => queue::run(&mut engine),
            Strategy::Assumption => assumption::run(&mut engine),
        }
    }
    check_violations(registry, kb, violations);
}

/// Post-quiescence violation check: invariant facts must hold exactly one
/// instance; any true violated-when clause flags its duty instance.
pub fn check_violations(
    registry: &FactRegistry,
    kb: &KnowledgeBase,
    violations: &mut Violations,
) {
    for fact in registry.iter() {
        match fact {
            Fact::Composite(composite) if !composite.violated_when.is_empty() => {
                let instances: Vec<Expression> = kb
                    .instances(&composite.name)
                    .map(|instance| instance.expr.clone())
                    .collect();
                for instance in instances {
                    let Some((_, args)) = instance.as_constructor() else {
                        continue;
                    };
                    let ctx = Context::new(registry, kb);
                    for clause in &composite.violated_when {
                        let violated = eval::fill_parameters(
                            registry,
                            clause,
                            &composite.identified_by,
                            args,
                        )
                        .and_then(|filled| eval::first(&ctx, &filled))
                        .and_then(|binding| match binding {
                            Some(binding) => eval::truth(&ctx, &binding),
                            None => Ok(false),
                        });
                        match violated {
                            Ok(true) => {
                                violations.add("duty", instance.clone());
                                break;
                            }
                            Ok(false) => {}
                            Err(err) => {
                                warn!(duty = %instance, error = %err, "violated-when clause failed");
                            }
                        }
                    }
                }
            }
            Fact::Atomic(atomic) if atomic.is_invariant => {
                if kb.instance_count(&atomic.name) != 1 {
                    violations.add("invariant", Expression::var(atomic.name.clone()));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expression;
    use crate::facts::{AtomicFact, PrimitiveType};
    use pretty_assertions::assert_eq;

    fn atomic_with_rules(
        name: &str,
        holds_when: Vec<Expression>,
        conditioned_by: Vec<Expression>,
    ) -> Fact {
        Fact::Atomic(AtomicFact {
            name: name.to_string(),
            ty: Some(PrimitiveType::Int),
            range: Vec::new(),
            derived_from: Vec::new(),
            holds_when,
            conditioned_by,
            is_invariant: false,
        })
    }

    #[test]
    fn conditions_wrap_rules_under_when() {
        let fact = atomic_with_rules(
            "b",
            vec![Expression::var("a")],
            vec![Expression::var("ok")],
        );
        let rules = rules_for(&fact);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].body.to_string(), "a When ok");
    }

    #[test]
    fn unconditioned_rules_stay_bare() {
        let fact = atomic_with_rules("b", vec![Expression::var("a")], Vec::new());
        let rules = rules_for(&fact);
        assert_eq!(rules[0].body.to_string(), "a");
        assert_eq!(rules[0].flow, RuleFlow::Gate);
    }

    #[test]
    fn dependency_map_sees_variable_references() {
        let mut registry = FactRegistry::new();
        registry.declare(Fact::atomic_int("a"));
        registry.declare(atomic_with_rules("b", vec![Expression::var("a")], Vec::new()));
        let deps = dependency_map(&registry);
        assert!(deps.get("a").is_some_and(|set| set.contains("b")));
    }
}
