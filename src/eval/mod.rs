//! Lazy, cooperative evaluation of expressions into binding streams.
//!
//! Evaluating an expression produces a [`Stream`] of *bindings*: ground
//! expressions obtained by enumerating every free variable over the
//! instances of its fact and reducing operators. Streams are cooperative
//! producers: each [`Stream::next`] call advances the producer network by
//! exactly one binding, and dropping a stream cancels it together with
//! every nested producer it owns. Consumers that stop early (`Exists`,
//! `When`, boolean queries) therefore never leave a dangling producer
//! behind.
//!
//! Free variables with the same name are *unified*: every occurrence is
//! replaced by the same instance before the rest of the expression is
//! evaluated, so `x == x` over `x ∈ {1,2}` yields two bindings, not four.
//!
//! # Example
//!
//! ```rust
//! use eflint::ast::Expression;
//! use eflint::eval::{self, Context};
//! use eflint::facts::{Fact, FactRegistry};
//! use eflint::knowledge::{content_hash, KnowledgeBase};
//!
//! let mut registry = FactRegistry::new();
//! registry.declare(Fact::atomic_int("a"));
//! let mut kb = KnowledgeBase::new();
//! kb.register_fact("a");
//! let one = Expression::constructor("a", vec![Expression::int(1)]);
//! kb.put_instance("a", content_hash(&one), one, false);
//!
//! let ctx = Context::new(&registry, &kb);
//! let bindings = eval::gather(&ctx, &Expression::var("a")).unwrap();
//! assert_eq!(bindings.len(), 1);
//! assert_eq!(bindings[0].to_string(), "a(1)");
//! ```

pub(crate) mod interpreter;
pub(crate) mod stream;

use std::cell::RefCell;

use crate::ast::Expression;
use crate::error::EvalError;
use crate::facts::FactRegistry;
use crate::knowledge::KnowledgeBase;

pub use interpreter::{fill_parameters, first, gather, open, truth};
pub use stream::Stream;

/// A negation-as-failure assumption noted while a rule was evaluated:
/// the literal with this content hash was taken to be absent.
#[derive(Debug, Clone)]
pub struct PendingAssumption {
    /// Content hash of the assumed-absent literal, post conversion.
    pub literal: u64,
    /// The knowledge base as it stood when the assumption was made.
    pub snapshot: KnowledgeBase,
}

/// Collects [`PendingAssumption`]s from `NOT` producers during a rule
/// evaluation. Installed into the [`Context`] by the assumption-based
/// derivation strategy and drained by it after each rule.
#[derive(Debug, Default)]
pub struct AssumptionSink {
    pending: RefCell<Vec<PendingAssumption>>,
}

impl AssumptionSink {
    /// An empty sink.
    pub fn new() -> AssumptionSink {
        AssumptionSink::default()
    }

    /// Notes an assumption.
    pub fn record(&self, literal: u64, snapshot: KnowledgeBase) {
        self.pending
            .borrow_mut()
            .push(PendingAssumption { literal, snapshot });
    }

    /// Takes every assumption recorded so far.
    pub fn drain(&self) -> Vec<PendingAssumption> {
        self.pending.borrow_mut().drain(..).collect()
    }
}

/// Read access to everything evaluation needs: the fact registry, the
/// knowledge base, and (during assumption-based derivation) the sink for
/// negation-as-failure assumptions.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    /// Fact declarations and placeholders.
    pub registry: &'a FactRegistry,
    /// Current instances and non-instances.
    pub kb: &'a KnowledgeBase,
    /// Where `NOT` producers note tentative assumptions, if anywhere.
    pub assumptions: Option<&'a AssumptionSink>,
}

impl<'a> Context<'a> {
    /// A context without an assumption sink.
    pub fn new(registry: &'a FactRegistry, kb: &'a KnowledgeBase) -> Context<'a> {
        Context {
            registry,
            kb,
            assumptions: None,
        }
    }

    /// A context that records negation-as-failure assumptions.
    pub fn with_assumptions(
        registry: &'a FactRegistry,
        kb: &'a KnowledgeBase,
        sink: &'a AssumptionSink,
    ) -> Context<'a> {
        Context {
            registry,
            kb,
            assumptions: Some(sink),
        }
    }
}

/// One step of a producer: a binding, a failure, or exhaustion (`None`).
pub type StreamItem = Option<Result<Expression, EvalError>>;
