//! Producer plumbing: streams, unification, and fact enumeration.
//!
//! A [`Producer`] yields at most one binding per `next` call and is free to
//! hold nested producers; dropping it drops the whole subtree, which is how
//! cancellation propagates. [`Stream`] is the public handle around a boxed
//! producer.
//!
//! [`FactIter`] enumerates a fact's instances: finite facts enumerate
//! their range (atomic) or the cartesian product of their parameters'
//! enumerations (composite); infinite facts enumerate the instances
//! currently recorded, in insertion order, from a snapshot taken when the
//! iteration starts.

use crate::ast::Expression;
use crate::error::{EvalError, TypeError};
use crate::eval::interpreter::producer_for;
use crate::eval::{Context, StreamItem};
use crate::facts::Fact;

/// A cooperative binding producer.
///
/// `next` advances by exactly one binding; after returning `None` a
/// producer stays exhausted. Cancellation is dropping the producer.
pub(crate) trait Producer {
    /// Produces the next binding, if any.
    fn next(&mut self, ctx: &Context<'_>) -> StreamItem;
}

/// A handle on a running producer network.
///
/// The consumer pulls with [`Stream::next`]; between pulls every producer
/// in the network is suspended. Dropping the stream cancels it.
pub struct Stream {
    producer: Box<dyn Producer>,
}

impl Stream {
    pub(crate) fn from_producer(producer: Box<dyn Producer>) -> Stream {
        Stream { producer }
    }

    /// Pulls the next binding.
    pub fn next(&mut self, ctx: &Context<'_>) -> StreamItem {
        self.producer.next(ctx)
    }

    /// Cancels the stream. Equivalent to dropping it; spelled out for
    /// consumers that want to make the cancellation visible.
    pub fn cancel(self) {}
}

/// Yields one precomputed item, then exhausts.
pub(crate) struct Once {
    item: StreamItem,
}

impl Once {
    pub(crate) fn ok(expr: Expression) -> Once {
        Once {
            item: Some(Ok(expr)),
        }
    }
}

impl Producer for Once {
    fn next(&mut self, _ctx: &Context<'_>) -> StreamItem {
        self.item.take()
    }
}

/// Enumerates a fact's instances for free-variable expansion.
pub(crate) enum FactIter {
    /// Precomputed finite list (range values, bare atoms, or a snapshot of
    /// recorded instances).
    List(std::vec::IntoIter<Expression>),
    /// Lazy cartesian product of per-parameter enumerations.
    Product {
        name: String,
        factors: Vec<Vec<Expression>>,
        indices: Vec<usize>,
        done: bool,
    },
}

impl FactIter {
    /// Opens the enumeration for the fact a variable name resolves to.
    pub(crate) fn open(ctx: &Context<'_>, name: &str) -> Result<FactIter, EvalError> {
        let resolved = ctx.registry.resolve(name);
        let fact = ctx
            .registry
            .get(&resolved)
            .ok_or_else(|| TypeError::UnknownFact(resolved.clone()))?;

        if !ctx.registry.is_finite(&resolved) {
            // Infinite facts enumerate what is currently known to hold.
            let snapshot: Vec<Expression> = ctx
                .kb
                .instances(&resolved)
                .map(|instance| instance.expr.clone())
                .collect();
            return Ok(FactIter::List(snapshot.into_iter()));
        }

        match fact {
            Fact::Atomic(atomic) => {
                let values = if atomic.range.is_empty() {
                    vec![Expression::constructor(resolved, vec![])]
                } else {
                    atomic
                        .range
                        .iter()
                        .map(|value| {
                            Expression::constructor(
                                resolved.clone(),
                                vec![Expression::Primitive(value.clone())],
                            )
                        })
                        .collect()
                };
                Ok(FactIter::List(values.into_iter()))
            }
            Fact::Composite(composite) => {
                let mut factors = Vec::with_capacity(composite.identified_by.len());
                for param in &composite.identified_by {
                    let mut factor = Vec::new();
                    let mut iter = FactIter::open(ctx, param)?;
                    while let Some(instance) = iter.next() {
                        factor.push(instance);
                    }
                    factors.push(factor);
                }
                // An empty factor empties the whole product.
                let done = factors.iter().any(Vec::is_empty);
                let indices = vec![0; factors.len()];
                Ok(FactIter::Product {
                    name: resolved,
                    factors,
                    indices,
                    done,
                })
            }
        }
    }

    /// The next enumerated instance.
    pub(crate) fn next(&mut self) -> Option<Expression> {
        match self {
            FactIter::List(items) => items.next(),
            FactIter::Product {
                name,
                factors,
                indices,
                done,
            } => {
                if *done {
                    return None;
                }
                let operands: Vec<Expression> = factors
                    .iter()
                    .zip(indices.iter())
                    .map(|(factor, index)| factor[*index].clone())
                    .collect();
                // Advance odometer-style, last parameter fastest.
                let mut position = factors.len();
                loop {
                    if position == 0 {
                        *done = true;
                        break;
                    }
                    position -= 1;
                    indices[position] += 1;
                    if indices[position] < factors[position].len() {
                        break;
                    }
                    indices[position] = 0;
                }
                Some(Expression::constructor(name.clone(), operands))
            }
        }
    }
}

/// Expands the first free variable of an expression: for every instance of
/// the variable's fact, substitutes it into every occurrence and streams
/// the substituted expression's own bindings.
pub(crate) struct Unify {
    template: Expression,
    variable: String,
    outer: Option<FactIter>,
    inner: Option<Box<dyn Producer>>,
    failed: bool,
}

impl Unify {
    pub(crate) fn new(template: Expression, variable: String) -> Unify {
        Unify {
            template,
            variable,
            outer: None,
            inner: None,
            failed: false,
        }
    }
}

impl Producer for Unify {
    fn next(&mut self, ctx: &Context<'_>) -> StreamItem {
        if self.failed {
            return None;
        }
        loop {
            if let Some(inner) = self.inner.as_mut() {
                match inner.next(ctx) {
                    Some(item) => return Some(item),
                    None => self.inner = None,
                }
            }
            if self.outer.is_none() {
                match FactIter::open(ctx, &self.variable) {
                    Ok(iter) => self.outer = Some(iter),
                    Err(err) => {
                        self.failed = true;
                        return Some(Err(err));
                    }
                }
            }
            let instance = self.outer.as_mut().and_then(FactIter::next)?;
            let mut substituted = self.template.clone();
            substituted.substitute(&self.variable, &instance);
            self.inner = Some(producer_for(substituted));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{AtomicFact, CompositeFact, FactKind, FactRegistry, PrimitiveType};
    use crate::knowledge::{content_hash, KnowledgeBase};
    use pretty_assertions::assert_eq;

    fn ranged(name: &str, values: &[i64]) -> Fact {
        Fact::Atomic(AtomicFact {
            name: name.to_string(),
            ty: Some(PrimitiveType::Int),
            range: values.iter().map(|v| crate::ast::Primitive::Int(*v)).collect(),
            derived_from: Vec::new(),
            holds_when: Vec::new(),
            conditioned_by: Vec::new(),
            is_invariant: false,
        })
    }

    fn composite(name: &str, params: &[&str]) -> Fact {
        Fact::Composite(CompositeFact {
            name: name.to_string(),
            kind: FactKind::Fact,
            identified_by: params.iter().map(|p| p.to_string()).collect(),
            derived_from: Vec::new(),
            holds_when: Vec::new(),
            conditioned_by: Vec::new(),
            syncs_with: Vec::new(),
            creates: Vec::new(),
            terminates: Vec::new(),
            obfuscates: Vec::new(),
            violated_when: Vec::new(),
        })
    }

    fn enumerate(registry: &FactRegistry, kb: &KnowledgeBase, name: &str) -> Vec<String> {
        let ctx = Context::new(registry, kb);
        let mut iter = FactIter::open(&ctx, name).unwrap();
        let mut out = Vec::new();
        while let Some(instance) = iter.next() {
            out.push(instance.to_string());
        }
        out
    }

    #[test]
    fn finite_atomic_facts_enumerate_their_range() {
        let mut registry = FactRegistry::new();
        registry.declare(ranged("die", &[1, 2, 3]));
        let kb = KnowledgeBase::new();
        assert_eq!(
            enumerate(&registry, &kb, "die"),
            vec!["die(1)", "die(2)", "die(3)"]
        );
    }

    #[test]
    fn infinite_facts_enumerate_recorded_instances_in_order() {
        let mut registry = FactRegistry::new();
        registry.declare(Fact::atomic_int("a"));
        let mut kb = KnowledgeBase::new();
        kb.register_fact("a");
        for value in [5, 2, 9] {
            let expr = Expression::constructor("a", vec![Expression::int(value)]);
            kb.put_instance("a", content_hash(&expr), expr, false);
        }
        assert_eq!(enumerate(&registry, &kb, "a"), vec!["a(5)", "a(2)", "a(9)"]);
    }

    #[test]
    fn composite_enumeration_is_a_cartesian_product() {
        let mut registry = FactRegistry::new();
        registry.declare(ranged("die", &[1, 2]));
        registry.declare(composite("pair", &["die", "die'"]));
        let kb = KnowledgeBase::new();
        assert_eq!(
            enumerate(&registry, &kb, "pair"),
            vec![
                "pair(die(1),die(1))",
                "pair(die(1),die(2))",
                "pair(die(2),die(1))",
                "pair(die(2),die(2))",
            ]
        );
    }

    #[test]
    fn empty_factor_empties_the_product() {
        let mut registry = FactRegistry::new();
        registry.declare(ranged("die", &[1, 2]));
        registry.declare(Fact::atomic_int("a"));
        registry.declare(composite("pair", &["die", "a"]));
        let kb = KnowledgeBase::new();
        // `a` is infinite with no recorded instances, and is one factor of
        // a composite that the registry then treats as infinite too: the
        // enumeration falls back to recorded `pair` instances, none.
        assert_eq!(enumerate(&registry, &kb, "pair"), Vec::<String>::new());
    }

    #[test]
    fn nullary_predicates_enumerate_once() {
        let mut registry = FactRegistry::new();
        registry.declare(Fact::Atomic(AtomicFact {
            name: "ready".to_string(),
            ty: None,
            range: Vec::new(),
            derived_from: Vec::new(),
            holds_when: Vec::new(),
            conditioned_by: Vec::new(),
            is_invariant: false,
        }));
        let kb = KnowledgeBase::new();
        assert_eq!(enumerate(&registry, &kb, "ready"), vec!["ready()"]);
    }

    #[test]
    fn unknown_facts_fail_to_open() {
        let registry = FactRegistry::new();
        let kb = KnowledgeBase::new();
        let ctx = Context::new(&registry, &kb);
        assert!(FactIter::open(&ctx, "ghost").is_err());
    }
}
