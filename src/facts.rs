//! Fact registry: declarations, placeholders, conversion, finiteness.
//!
//! Facts give atoms their shape. An [`AtomicFact`] wraps a primitive payload
//! (or nothing, for nullary predicates) and may enumerate a finite range; a
//! [`CompositeFact`] lists named parameters, each referencing another fact,
//! and may additionally be an event, act or duty. The [`FactRegistry`] owns
//! every declaration plus the placeholder aliases, and implements the two
//! operations everything else leans on: name resolution and canonical
//! instance conversion.
//!
//! # Name resolution
//!
//! Rule authors write decorated variables like `x1` or `y'` to mean "another
//! value of the same type as `x` / `y`". [`FactRegistry::resolve`] strips
//! trailing digits and apostrophes, then follows placeholder aliases
//! transitively:
//!
//! ```rust
//! use eflint::facts::FactRegistry;
//!
//! let mut registry = FactRegistry::new();
//! registry.declare(eflint::facts::Fact::atomic_string("person"));
//! registry.declare_placeholder("buyer", "person").unwrap();
//! assert_eq!(registry.resolve("buyer2'"), "person");
//! ```

use indexmap::IndexMap;

use crate::ast::{Expression, Primitive};
use crate::error::TypeError;

/// Base type of an atomic fact's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    /// 64-bit signed integer payload.
    Int,
    /// String payload.
    String,
}

impl PrimitiveType {
    /// Parses the wire name (`"Int"` / `"String"`).
    pub fn from_name(name: &str) -> Option<PrimitiveType> {
        match name {
            "Int" => Some(PrimitiveType::Int),
            "String" => Some(PrimitiveType::String),
            _ => None,
        }
    }

    /// Whether a primitive value inhabits this type.
    pub fn admits(self, value: &Primitive) -> bool {
        matches!(
            (self, value),
            (PrimitiveType::Int, Primitive::Int(_)) | (PrimitiveType::String, Primitive::String(_))
        )
    }
}

/// What flavour of composite fact a declaration introduces. Events, acts
/// and duties are composite facts whose instances can be triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactKind {
    /// A plain composite fact.
    Fact,
    /// An event; all parameters are free.
    Event,
    /// An act; the first parameter is the actor.
    Act,
    /// A duty; the first two parameters are holder and claimant.
    Duty,
}

impl FactKind {
    /// Whether instances of this kind can be triggered.
    pub fn is_triggerable(self) -> bool {
        !matches!(self, FactKind::Fact)
    }
}

/// An atomic fact declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicFact {
    /// Fact name.
    pub name: String,
    /// Payload type; `None` declares a nullary predicate.
    pub ty: Option<PrimitiveType>,
    /// Enumerated range; empty means unbounded.
    pub range: Vec<Primitive>,
    /// Rules producing instances directly.
    pub derived_from: Vec<Expression>,
    /// Rules gating the head.
    pub holds_when: Vec<Expression>,
    /// Conditions conjoined onto every rule.
    pub conditioned_by: Vec<Expression>,
    /// Whether exactly one instance must hold at quiescence.
    pub is_invariant: bool,
}

/// A composite fact declaration (including events, acts and duties).
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeFact {
    /// Fact name.
    pub name: String,
    /// Which flavour of composite this is.
    pub kind: FactKind,
    /// Ordered parameters, each referencing a fact name.
    pub identified_by: Vec<String>,
    /// Rules producing instances directly.
    pub derived_from: Vec<Expression>,
    /// Rules gating the head.
    pub holds_when: Vec<Expression>,
    /// Conditions conjoined onto every rule.
    pub conditioned_by: Vec<Expression>,
    /// Transitions triggered before this fact's own effects.
    pub syncs_with: Vec<Expression>,
    /// Effect: instances to postulate.
    pub creates: Vec<Expression>,
    /// Effect: instances to terminate.
    pub terminates: Vec<Expression>,
    /// Effect: instances to obfuscate.
    pub obfuscates: Vec<Expression>,
    /// Clauses under which a held instance is a violated duty.
    pub violated_when: Vec<Expression>,
}

/// A declared fact, atomic or composite.
#[derive(Debug, Clone, PartialEq)]
pub enum Fact {
    /// Atomic fact.
    Atomic(AtomicFact),
    /// Composite fact.
    Composite(CompositeFact),
}

impl Fact {
    /// Shorthand for a plain atomic fact with the given payload type.
    pub fn atomic(name: impl Into<String>, ty: PrimitiveType) -> Fact {
        Fact::Atomic(AtomicFact {
            name: name.into(),
            ty: Some(ty),
            range: Vec::new(),
            derived_from: Vec::new(),
            holds_when: Vec::new(),
            conditioned_by: Vec::new(),
            is_invariant: false,
        })
    }

    /// Shorthand for a plain `String`-typed atomic fact.
    pub fn atomic_string(name: impl Into<String>) -> Fact {
        Fact::atomic(name, PrimitiveType::String)
    }

    /// Shorthand for a plain `Int`-typed atomic fact.
    pub fn atomic_int(name: impl Into<String>) -> Fact {
        Fact::atomic(name, PrimitiveType::Int)
    }

    /// The declared name.
    pub fn name(&self) -> &str {
        match self {
            Fact::Atomic(fact) => &fact.name,
            Fact::Composite(fact) => &fact.name,
        }
    }

    /// Derived-from rule list.
    pub fn derived_from(&self) -> &[Expression] {
        match self {
            Fact::Atomic(fact) => &fact.derived_from,
            Fact::Composite(fact) => &fact.derived_from,
        }
    }

    /// Holds-when rule list.
    pub fn holds_when(&self) -> &[Expression] {
        match self {
            Fact::Atomic(fact) => &fact.holds_when,
            Fact::Composite(fact) => &fact.holds_when,
        }
    }

    /// Conditioned-by rule list.
    pub fn conditioned_by(&self) -> &[Expression] {
        match self {
            Fact::Atomic(fact) => &fact.conditioned_by,
            Fact::Composite(fact) => &fact.conditioned_by,
        }
    }

    /// The atomic view, if this fact is atomic.
    pub fn as_atomic(&self) -> Option<&AtomicFact> {
        match self {
            Fact::Atomic(fact) => Some(fact),
            Fact::Composite(_) => None,
        }
    }

    /// The composite view, if this fact is composite.
    pub fn as_composite(&self) -> Option<&CompositeFact> {
        match self {
            Fact::Atomic(_) => None,
            Fact::Composite(fact) => Some(fact),
        }
    }
}

/// Every declared fact plus the placeholder aliases, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct FactRegistry {
    facts: IndexMap<String, Fact>,
    placeholders: IndexMap<String, String>,
}

impl FactRegistry {
    /// An empty registry.
    pub fn new() -> FactRegistry {
        FactRegistry::default()
    }

    /// Declares (or re-declares) a fact.
    pub fn declare(&mut self, fact: Fact) {
        self.facts.insert(fact.name().to_string(), fact);
    }

    /// Declares a placeholder alias. Duplicate names are rejected.
    pub fn declare_placeholder(
        &mut self,
        name: impl Into<String>,
        for_fact: impl Into<String>,
    ) -> Result<(), TypeError> {
        let name = name.into();
        if self.placeholders.contains_key(&name) {
            return Err(TypeError::DuplicatePlaceholder(name));
        }
        self.placeholders.insert(name, for_fact.into());
        Ok(())
    }

    /// Looks a fact up by exact name.
    pub fn get(&self, name: &str) -> Option<&Fact> {
        self.facts.get(name)
    }

    /// Mutable lookup, used by `extend` phrases.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Fact> {
        self.facts.get_mut(name)
    }

    /// Whether a fact with this exact name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.facts.contains_key(name)
    }

    /// Iterates declarations in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.values()
    }

    /// Declared fact names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.facts.keys().map(String::as_str)
    }

    /// Resolves a variable or parameter name to the fact it ranges over:
    /// trailing digits and apostrophes are stripped, then placeholder
    /// aliases are followed transitively. Alias cycles stop at the last
    /// fresh name instead of looping.
    pub fn resolve(&self, name: &str) -> String {
        let mut name = strip_decorations(name).to_string();
        // Bounded by the alias count so a cyclic chain terminates.
        for _ in 0..=self.placeholders.len() {
            match self.placeholders.get(&name) {
                Some(target) => name = strip_decorations(target).to_string(),
                None => break,
            }
        }
        name
    }

    /// Whether the fact's instances can be enumerated exhaustively: atomic
    /// facts with a range or no payload, and composite facts whose every
    /// parameter is finite. Unknown facts and parameter cycles report
    /// infinite.
    pub fn is_finite(&self, name: &str) -> bool {
        let mut visiting = Vec::new();
        self.is_finite_inner(&self.resolve(name), &mut visiting)
    }

    fn is_finite_inner(&self, name: &str, visiting: &mut Vec<String>) -> bool {
        if visiting.iter().any(|seen| seen == name) {
            return false;
        }
        match self.facts.get(name) {
            Some(Fact::Atomic(fact)) => !fact.range.is_empty() || fact.ty.is_none(),
            Some(Fact::Composite(fact)) => {
                visiting.push(name.to_string());
                let finite = fact
                    .identified_by
                    .iter()
                    .all(|param| self.is_finite_inner(&self.resolve(param), visiting));
                visiting.pop();
                finite
            }
            None => false,
        }
    }

    /// Normalizes a ground construction into the canonical shape of its
    /// fact and checks every atomic payload against its declared range.
    ///
    /// Canonical form stores each atomic payload directly inside the
    /// wrapping constructor: `b(a(1))` becomes `b(1)` when `a` and `b` are
    /// both `Int`-typed atomic facts.
    pub fn convert_instance(&self, expr: &Expression) -> Result<Expression, TypeError> {
        let (identifier, operands) = expr
            .as_constructor()
            .ok_or_else(|| TypeError::NotAnInstance(expr.to_string()))?;
        let fact = self
            .facts
            .get(identifier)
            .ok_or_else(|| TypeError::UnknownFact(identifier.to_string()))?;

        match fact {
            Fact::Atomic(atomic) => {
                if operands.is_empty() && atomic.ty.is_none() {
                    return Ok(expr.clone());
                }
                if operands.len() != 1 {
                    return Err(TypeError::ArityMismatch {
                        name: atomic.name.clone(),
                        expected: 1,
                        got: operands.len(),
                    });
                }
                let payload = self.atomic_payload(&operands[0], atomic)?;
                check_range(atomic, &payload)?;
                Ok(Expression::constructor(
                    atomic.name.clone(),
                    vec![Expression::Primitive(payload)],
                ))
            }
            Fact::Composite(composite) => {
                if operands.len() != composite.identified_by.len() {
                    return Err(TypeError::ArityMismatch {
                        name: composite.name.clone(),
                        expected: composite.identified_by.len(),
                        got: operands.len(),
                    });
                }
                let converted = operands
                    .iter()
                    .zip(&composite.identified_by)
                    .map(|(operand, param)| self.convert_param(operand, &self.resolve(param)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expression::constructor(composite.name.clone(), converted))
            }
        }
    }

    fn convert_param(&self, expr: &Expression, target: &str) -> Result<Expression, TypeError> {
        let fact = self
            .facts
            .get(target)
            .ok_or_else(|| TypeError::UnknownFact(target.to_string()))?;
        match fact {
            Fact::Atomic(atomic) => {
                let payload = self.atomic_payload(expr, atomic)?;
                check_range(atomic, &payload)?;
                Ok(Expression::constructor(
                    atomic.name.clone(),
                    vec![Expression::Primitive(payload)],
                ))
            }
            Fact::Composite(_) => self.convert_instance(expr),
        }
    }

    /// Extracts the primitive payload an expression contributes to an
    /// atomic fact, unwrapping same-typed atomic instances on the way.
    fn atomic_payload(
        &self,
        expr: &Expression,
        target: &AtomicFact,
    ) -> Result<Primitive, TypeError> {
        let ty = target.ty.ok_or_else(|| TypeError::Conversion {
            name: target.name.clone(),
            value: expr.to_string(),
        })?;
        match expr {
            Expression::Primitive(p) => {
                if ty.admits(p) {
                    Ok(p.clone())
                } else {
                    Err(TypeError::Conversion {
                        name: target.name.clone(),
                        value: p.to_string(),
                    })
                }
            }
            Expression::Constructor {
                identifier,
                operands,
            } => {
                let inner = self
                    .facts
                    .get(identifier)
                    .ok_or_else(|| TypeError::UnknownFact(identifier.clone()))?;
                let inner = inner
                    .as_atomic()
                    .ok_or_else(|| TypeError::CompositeToAtomic(target.name.clone()))?;
                if inner.ty != Some(ty) {
                    return Err(TypeError::Conversion {
                        name: target.name.clone(),
                        value: expr.to_string(),
                    });
                }
                if operands.len() != 1 {
                    return Err(TypeError::ArityMismatch {
                        name: inner.name.clone(),
                        expected: 1,
                        got: operands.len(),
                    });
                }
                self.atomic_payload(&operands[0], target)
            }
            other => Err(TypeError::Conversion {
                name: target.name.clone(),
                value: other.to_string(),
            }),
        }
    }
}

fn check_range(fact: &AtomicFact, payload: &Primitive) -> Result<(), TypeError> {
    if fact.range.is_empty() || fact.range.contains(payload) {
        Ok(())
    } else {
        Err(TypeError::OutOfRange {
            name: fact.name.clone(),
            value: payload.to_string(),
        })
    }
}

fn strip_decorations(name: &str) -> &str {
    name.trim_end_matches(|c: char| c.is_ascii_digit() || c == '\'')
}
