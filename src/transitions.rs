//! State transitions: create, terminate, obfuscate, and trigger.
//!
//! These are the only operations that move atoms between the instance and
//! non-instance books, and they maintain the book invariants:
//!
//! - no atom is ever in both books (disjointness);
//! - a postulated atom wins over its derived twin and persists across
//!   derivation rounds (postulate dominance);
//! - derivation cannot override an explicit non-instance.
//!
//! Triggering executes the effect clauses of an event, act or duty in a
//! fixed, observable order: synced transitions first, then obfuscations,
//! then terminations, then creations. A triggered act that does not
//! currently hold is recorded as an `act` violation but its effects still
//! run.

use tracing::debug;

use crate::ast::{Expression, TriggerRecord, Violation};
use crate::error::TransitionError;
use crate::eval::{self, Context};
use crate::facts::{FactKind, FactRegistry};
use crate::knowledge::{content_hash, KnowledgeBase};

/// The per-phrase violation buffer.
///
/// Violations are collected while a phrase executes (act violations during
/// triggering, invariant and duty violations after derivation) and flushed
/// into the phrase result in the order they were found.
#[derive(Debug, Default)]
pub struct Violations {
    entries: Vec<(&'static str, Expression)>,
}

impl Violations {
    /// An empty buffer.
    pub fn new() -> Violations {
        Violations::default()
    }

    /// Records a violation of the given kind.
    pub fn add(&mut self, kind: &'static str, expr: Expression) {
        self.entries.push((kind, expr));
    }

    /// Whether anything was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drains the buffer into wire records. Bare fact names (invariants)
    /// carry no operands; instances carry theirs.
    pub fn drain(&mut self) -> Vec<Violation> {
        self.entries
            .drain(..)
            .map(|(kind, expr)| match expr {
                Expression::VarRef(name) => Violation {
                    kind: kind.to_string(),
                    identifier: name,
                    operands: Vec::new(),
                },
                Expression::Constructor {
                    identifier,
                    operands,
                } => Violation {
                    kind: kind.to_string(),
                    identifier,
                    operands,
                },
                other => Violation {
                    kind: kind.to_string(),
                    identifier: other.to_string(),
                    operands: Vec::new(),
                },
            })
            .collect()
    }
}

/// Asserts an instance.
///
/// The expression is normalized first. An explicit non-instance is removed
/// by a postulation but blocks a derivation. Re-postulating an existing
/// instance is a no-op; re-deriving one is an error the engine swallows;
/// postulating a currently-derived instance downgrades it to postulated.
pub fn create(
    registry: &FactRegistry,
    kb: &mut KnowledgeBase,
    expr: &Expression,
    derived: bool,
) -> Result<(), TransitionError> {
    let converted = registry.convert_instance(expr)?;
    let (name, _) = converted.as_constructor().unwrap_or(("", &[]));
    let name = name.to_string();
    let hash = content_hash(&converted);

    if kb.has_non_instance(&name, hash) {
        if derived {
            return Err(TransitionError::DeriveNonInstance);
        }
        kb.remove_non_instance(&name, hash);
    }

    if let Some(existing) = kb.get_instance(&name, hash) {
        if derived {
            return Err(TransitionError::InstanceExists);
        }
        if existing.derived {
            kb.set_postulated(&name, hash);
        }
        return Ok(());
    }

    kb.put_instance(&name, hash, converted, derived);
    Ok(())
}

/// Explicitly falsifies an instance: removes it from the instance book and
/// records it as a non-instance. Terminating an atom that is already an
/// explicit non-instance is an error.
pub fn terminate(
    registry: &FactRegistry,
    kb: &mut KnowledgeBase,
    expr: &Expression,
) -> Result<(), TransitionError> {
    let converted = registry.convert_instance(expr)?;
    let (name, _) = converted.as_constructor().unwrap_or(("", &[]));
    let name = name.to_string();
    let hash = content_hash(&converted);

    kb.remove_instance(&name, hash);
    if kb.has_non_instance(&name, hash) {
        return Err(TransitionError::NonInstanceExists(converted.to_string()));
    }
    kb.put_non_instance(&name, hash, converted);
    Ok(())
}

/// Removes an instance from both books, returning the atom to the unknown
/// (closed-world false) state.
pub fn obfuscate(
    registry: &FactRegistry,
    kb: &mut KnowledgeBase,
    expr: &Expression,
) -> Result<(), TransitionError> {
    let converted = registry.convert_instance(expr)?;
    let (name, _) = converted.as_constructor().unwrap_or(("", &[]));
    let name = name.to_string();
    let hash = content_hash(&converted);

    kb.remove_instance(&name, hash);
    kb.remove_non_instance(&name, hash);
    Ok(())
}

/// Executes the transitions an expression's bindings denote.
///
/// Every binding must name an event, act or duty. Effects are expanded
/// with the trigger's arguments substituted for the fact's parameters, then
/// applied in order: syncs (recursively triggered), obfuscations,
/// terminations, creations.
pub fn trigger(
    registry: &FactRegistry,
    kb: &mut KnowledgeBase,
    violations: &mut Violations,
    records: &mut Vec<TriggerRecord>,
    operand: &Expression,
) -> Result<(), TransitionError> {
    let bindings = {
        let ctx = Context::new(registry, kb);
        eval::gather(&ctx, operand)?
    };

    for binding in bindings {
        if binding.as_constructor().is_none() {
            debug!(binding = %binding, "skipping non-instance expression in trigger");
            continue;
        }
        let instance = match registry.convert_instance(&binding) {
            Ok(instance) => instance,
            Err(err) => {
                debug!(binding = %binding, error = %err, "cannot convert trigger instance");
                continue;
            }
        };
        let (name, args) = match instance.as_constructor() {
            Some((name, args)) => (name.to_string(), args.to_vec()),
            None => continue,
        };
        let Some(composite) = registry.get(&name).and_then(crate::facts::Fact::as_composite)
        else {
            return Err(TransitionError::NotTriggerable(name));
        };
        if !composite.kind.is_triggerable() {
            return Err(TransitionError::NotTriggerable(name));
        }

        if composite.kind == FactKind::Act {
            let ctx = Context::new(registry, kb);
            let enabled = eval::truth(&ctx, &instance)?;
            if !enabled {
                debug!(act = %instance, "triggered act does not hold");
                violations.add("act", instance.clone());
            }
        }

        debug!(transition = %instance, "executing transition");
        records.push(TriggerRecord {
            identifier: name.clone(),
            operands: args.clone(),
        });

        let params = &composite.identified_by;
        let syncs = expand_effects(registry, kb, &composite.syncs_with, params, &args)?;
        let obfuscations = expand_effects(registry, kb, &composite.obfuscates, params, &args)?;
        let terminations = expand_effects(registry, kb, &composite.terminates, params, &args)?;
        let creations = expand_effects(registry, kb, &composite.creates, params, &args)?;

        for sync in &syncs {
            trigger(registry, kb, violations, records, sync)?;
        }
        for expr in &obfuscations {
            if expr.as_constructor().is_none() {
                debug!(expr = %expr, "skipping non-instance obfuscation");
                continue;
            }
            obfuscate(registry, kb, expr)?;
        }
        for expr in &terminations {
            terminate(registry, kb, expr)?;
        }
        for expr in &creations {
            create(registry, kb, expr, false)?;
        }
    }

    Ok(())
}

/// Expands one effect list: parameter-substitutes each clause with the
/// trigger's arguments, then gathers every binding.
fn expand_effects(
    registry: &FactRegistry,
    kb: &KnowledgeBase,
    effects: &[Expression],
    params: &[String],
    args: &[Expression],
) -> Result<Vec<Expression>, TransitionError> {
    let ctx = Context::new(registry, kb);
    let mut expanded = Vec::new();
    for effect in effects {
        let filled = eval::fill_parameters(registry, effect, params, args)?;
        expanded.extend(eval::gather(&ctx, &filled)?);
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{AtomicFact, CompositeFact, Fact, FactKind};
    use pretty_assertions::assert_eq;

    fn predicate(name: &str) -> Fact {
        Fact::Atomic(AtomicFact {
            name: name.to_string(),
            ty: None,
            range: Vec::new(),
            derived_from: Vec::new(),
            holds_when: Vec::new(),
            conditioned_by: Vec::new(),
            is_invariant: false,
        })
    }

    fn world() -> (FactRegistry, KnowledgeBase) {
        let mut registry = FactRegistry::new();
        registry.declare(Fact::atomic_int("a"));
        let mut kb = KnowledgeBase::new();
        kb.register_fact("a");
        (registry, kb)
    }

    fn a(n: i64) -> Expression {
        Expression::constructor("a", vec![Expression::int(n)])
    }

    #[test]
    fn create_then_terminate_is_false() {
        let (registry, mut kb) = world();
        create(&registry, &mut kb, &a(1), false).unwrap();
        assert_eq!(kb.instance_count("a"), 1);

        terminate(&registry, &mut kb, &a(1)).unwrap();
        assert_eq!(kb.instance_count("a"), 0);
        assert_eq!(kb.non_instances("a").count(), 1);

        // Terminating again hits the existing non-instance.
        assert!(matches!(
            terminate(&registry, &mut kb, &a(1)),
            Err(TransitionError::NonInstanceExists(_))
        ));
    }

    #[test]
    fn obfuscate_clears_both_books() {
        let (registry, mut kb) = world();
        create(&registry, &mut kb, &a(1), false).unwrap();
        obfuscate(&registry, &mut kb, &a(1)).unwrap();
        assert_eq!(kb.instance_count("a"), 0);
        assert_eq!(kb.non_instances("a").count(), 0);

        terminate(&registry, &mut kb, &a(2)).unwrap();
        obfuscate(&registry, &mut kb, &a(2)).unwrap();
        assert_eq!(kb.non_instances("a").count(), 0);
    }

    #[test]
    fn postulation_is_idempotent() {
        let (registry, mut kb) = world();
        create(&registry, &mut kb, &a(1), false).unwrap();
        create(&registry, &mut kb, &a(1), false).unwrap();
        assert_eq!(kb.instance_count("a"), 1);
    }

    #[test]
    fn postulate_dominates_derived() {
        let (registry, mut kb) = world();
        create(&registry, &mut kb, &a(1), true).unwrap();
        let hash = content_hash(&a(1));
        assert!(kb.get_instance("a", hash).unwrap().derived);

        create(&registry, &mut kb, &a(1), false).unwrap();
        assert!(!kb.get_instance("a", hash).unwrap().derived);

        // A second derivation of an existing instance is rejected.
        assert!(matches!(
            create(&registry, &mut kb, &a(1), true),
            Err(TransitionError::InstanceExists)
        ));
    }

    #[test]
    fn derivation_cannot_override_non_instances() {
        let (registry, mut kb) = world();
        terminate(&registry, &mut kb, &a(1)).unwrap();
        assert!(matches!(
            create(&registry, &mut kb, &a(1), true),
            Err(TransitionError::DeriveNonInstance)
        ));

        // A postulation removes the non-instance instead.
        create(&registry, &mut kb, &a(1), false).unwrap();
        assert_eq!(kb.non_instances("a").count(), 0);
        assert_eq!(kb.instance_count("a"), 1);
    }

    #[test]
    fn trigger_applies_effects_in_order() {
        let mut registry = FactRegistry::new();
        registry.declare(Fact::atomic_string("actor"));
        registry.declare(predicate("c"));
        registry.declare(predicate("t"));
        registry.declare(Fact::Composite(CompositeFact {
            name: "s".to_string(),
            kind: FactKind::Event,
            identified_by: Vec::new(),
            derived_from: Vec::new(),
            holds_when: Vec::new(),
            conditioned_by: Vec::new(),
            syncs_with: Vec::new(),
            creates: vec![Expression::constructor("synced", vec![])],
            terminates: Vec::new(),
            obfuscates: Vec::new(),
            violated_when: Vec::new(),
        }));
        registry.declare(predicate("synced"));
        registry.declare(Fact::Composite(CompositeFact {
            name: "pay".to_string(),
            kind: FactKind::Act,
            identified_by: vec!["actor".to_string()],
            derived_from: Vec::new(),
            holds_when: Vec::new(),
            conditioned_by: Vec::new(),
            syncs_with: vec![Expression::constructor("s", vec![])],
            creates: vec![Expression::constructor("c", vec![])],
            terminates: vec![Expression::constructor("t", vec![])],
            obfuscates: Vec::new(),
            violated_when: Vec::new(),
        }));
        let mut kb = KnowledgeBase::new();
        for name in ["actor", "c", "t", "s", "synced", "pay"] {
            kb.register_fact(name);
        }

        let alice = Expression::constructor("actor", vec![Expression::string("Alice")]);
        let act = Expression::constructor("pay", vec![alice]);
        create(&registry, &mut kb, &Expression::constructor("t", vec![]), false).unwrap();
        create(&registry, &mut kb, &act, false).unwrap();

        let mut violations = Violations::new();
        let mut records = Vec::new();
        trigger(&registry, &mut kb, &mut violations, &mut records, &act).unwrap();

        // Sync ran (recursively), t terminated, c created; act held, so no
        // violation.
        assert!(violations.is_empty());
        assert_eq!(kb.instance_count("synced"), 1);
        assert_eq!(kb.instance_count("c"), 1);
        assert_eq!(kb.instance_count("t"), 0);
        assert_eq!(kb.non_instances("t").count(), 1);
        let names: Vec<&str> = records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(names, vec!["pay", "s"]);
    }

    #[test]
    fn disabled_acts_violate_but_still_execute() {
        let mut registry = FactRegistry::new();
        registry.declare(Fact::atomic_string("actor"));
        registry.declare(predicate("done"));
        registry.declare(Fact::Composite(CompositeFact {
            name: "sign".to_string(),
            kind: FactKind::Act,
            identified_by: vec!["actor".to_string()],
            derived_from: Vec::new(),
            holds_when: Vec::new(),
            conditioned_by: Vec::new(),
            syncs_with: Vec::new(),
            creates: vec![Expression::constructor("done", vec![])],
            terminates: Vec::new(),
            obfuscates: Vec::new(),
            violated_when: Vec::new(),
        }));
        let mut kb = KnowledgeBase::new();
        for name in ["actor", "done", "sign"] {
            kb.register_fact(name);
        }

        let act = Expression::constructor(
            "sign",
            vec![Expression::constructor(
                "actor",
                vec![Expression::string("Bob")],
            )],
        );
        let mut violations = Violations::new();
        let mut records = Vec::new();
        trigger(&registry, &mut kb, &mut violations, &mut records, &act).unwrap();

        assert_eq!(kb.instance_count("done"), 1);
        let drained = violations.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].kind, "act");
        assert_eq!(drained[0].identifier, "sign");
    }

    #[test]
    fn plain_facts_are_not_triggerable() {
        let (registry, mut kb) = world();
        create(&registry, &mut kb, &a(1), false).unwrap();
        let mut violations = Violations::new();
        let mut records = Vec::new();
        assert!(matches!(
            trigger(&registry, &mut kb, &mut violations, &mut records, &a(1)),
            Err(TransitionError::NotTriggerable(_))
        ));
    }
}
