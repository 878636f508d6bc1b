//! The per-request session: phrase lifecycle, snapshots, diffs, results.
//!
//! A [`Session`] owns the fact registry and the knowledge base and is their
//! single mutator. Each phrase runs the same lifecycle: clear the violation
//! buffer, snapshot the books, dispatch on the phrase kind, bring the base
//! to closure with the configured derivation strategy, check violations,
//! and emit one structured result with the knowledge-base delta.
//!
//! Queries never mutate state and never trigger derivation; their errors
//! come back in a failed result without touching the books.
//!
//! # Example
//!
//! ```rust
//! use eflint::session::Session;
//! use serde_json::json;
//!
//! let mut session = Session::default();
//! let input = serde_json::from_value(json!({
//!     "version": "0.1.0",
//!     "kind": "phrases",
//!     "phrases": [
//!         {"kind": "afact", "name": "citizen", "type": "String"},
//!         {"kind": "create", "operand": {"identifier": "citizen", "operands": ["Alice"]}},
//!         {"kind": "bquery", "expression": {"identifier": "citizen", "operands": ["Alice"]}},
//!     ],
//! }))
//! .unwrap();
//! let response = session.handle(&input);
//! let encoded = serde_json::to_value(&response).unwrap();
//! assert_eq!(encoded["success"], json!(true));
//! assert_eq!(encoded["results"][2]["result"], json!(true));
//! ```

use serde::Serialize;
use tracing::debug;

use crate::ast::{
    ActPhrase, AtomicFactPhrase, CompositeFactPhrase, DutyPhrase, EventPhrase, ExtendPhrase,
    Expression, Handshake, Input, Output, Phrase, PhraseBody, PhraseResult, PlaceholderPhrase,
    PredicatePhrase, StateChanges, StatementPhrase, TriggerRecord,
};
use crate::derive::{self, Strategy};
use crate::error::{Error, ErrorEntry, ProtocolError, TypeError};
use crate::eval::{self, Context};
use crate::facts::{AtomicFact, CompositeFact, Fact, FactKind, FactRegistry, PrimitiveType};
use crate::knowledge::KnowledgeBase;
use crate::transitions::{self, Violations};

/// The reasoner's name, as reported in the handshake.
pub const REASONER: &str = "eflint";

/// The reasoner's version, as reported in the handshake.
pub const REASONER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Phrase-protocol versions this reasoner accepts.
pub const SUPPORTED_VERSIONS: &[&str] = &["0.1.0"];

/// Facts every session starts with.
const DEFAULT_FACTS: &[(&str, PrimitiveType)] = &[
    ("actor", PrimitiveType::String),
    ("int", PrimitiveType::Int),
    ("ref", PrimitiveType::String),
    ("string", PrimitiveType::String),
];

/// Every phrase kind the transport accepts.
const PHRASE_KINDS: &[&str] = &[
    "afact",
    "cfact",
    "placeholder",
    "predicate",
    "event",
    "act",
    "duty",
    "extend",
    "create",
    "terminate",
    "obfuscate",
    "trigger",
    "bquery",
    "iquery",
];

/// The reasoner's answer to one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    /// Answer to a `handshake` request.
    Handshake(Handshake),
    /// Answer to a `phrases` or `ping` request.
    Output(Output),
}

/// One reasoning session: the knowledge base, the fact registry, and the
/// derivation strategy that brings them to closure.
#[derive(Debug)]
pub struct Session {
    registry: FactRegistry,
    kb: KnowledgeBase,
    strategy: Strategy,
    violations: Violations,
}

impl Default for Session {
    fn default() -> Session {
        Session::new(Strategy::default())
    }
}

impl Session {
    /// Creates a session with the given derivation strategy and the
    /// built-in default facts.
    pub fn new(strategy: Strategy) -> Session {
        let mut session = Session {
            registry: FactRegistry::new(),
            kb: KnowledgeBase::new(),
            strategy,
            violations: Violations::new(),
        };
        for (name, ty) in DEFAULT_FACTS {
            session.declare_fact(Fact::atomic(*name, *ty));
        }
        session
    }

    /// The handshake record describing this reasoner.
    pub fn handshake() -> Handshake {
        Handshake {
            success: true,
            reasoner: REASONER.to_string(),
            reasoner_version: REASONER_VERSION.to_string(),
            supported_versions: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
            shares_updates: true,
            shares_triggers: true,
            shares_violations: false,
        }
    }

    /// Read access to the knowledge base, mainly for inspection and tests.
    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.kb
    }

    /// Read access to the fact registry.
    pub fn registry(&self) -> &FactRegistry {
        &self.registry
    }

    /// Handles one request envelope.
    pub fn handle(&mut self, input: &Input) -> Response {
        if !SUPPORTED_VERSIONS.contains(&input.version.as_str()) {
            return failure(ProtocolError::UnsupportedVersion(input.version.clone()));
        }
        match input.kind.as_str() {
            "handshake" => {
                if !input.phrases.is_empty() || input.updates {
                    return failure(ProtocolError::UnsupportedFields);
                }
                Response::Handshake(Session::handshake())
            }
            "ping" => {
                if !input.phrases.is_empty() || input.updates {
                    return failure(ProtocolError::UnsupportedFields);
                }
                Response::Output(Output {
                    success: true,
                    errors: Vec::new(),
                    results: Vec::new(),
                })
            }
            "phrases" => {
                let mut results = Vec::with_capacity(input.phrases.len());
                for raw in &input.phrases {
                    match decode_phrase(raw) {
                        Ok(phrase) => results.push(self.run_phrase(&phrase)),
                        Err(err) => results.push(PhraseResult::Failure {
                            success: false,
                            errors: vec![ErrorEntry::from_error(&err.into())],
                        }),
                    }
                }
                Response::Output(Output {
                    success: true,
                    errors: Vec::new(),
                    results,
                })
            }
            other => failure(ProtocolError::UnknownKind(other.to_string())),
        }
    }

    /// Runs a single typed phrase.
    pub fn run_phrase(&mut self, phrase: &Phrase) -> PhraseResult {
        match &phrase.body {
            PhraseBody::Bquery(query) => self.bquery(&query.expression),
            PhraseBody::Iquery(query) => self.iquery(&query.expression),
            _ => self.run_stateful(phrase),
        }
    }

    fn run_stateful(&mut self, phrase: &Phrase) -> PhraseResult {
        self.violations = Violations::new();
        let snapshot = self.kb.snapshot();
        let mut errors: Vec<ErrorEntry> = Vec::new();
        let mut triggers: Vec<TriggerRecord> = Vec::new();
        let mut changes: Vec<Phrase> = Vec::new();

        let declared = match &phrase.body {
            PhraseBody::Afact(decl) => Some(self.declare_atomic(decl)),
            PhraseBody::Cfact(decl) => Some(self.declare_composite(decl)),
            PhraseBody::Placeholder(decl) => Some(self.declare_placeholder(decl)),
            PhraseBody::Predicate(decl) => Some(self.declare_predicate(decl)),
            PhraseBody::Event(decl) => Some(self.declare_event(decl)),
            PhraseBody::Act(decl) => Some(self.declare_act(decl)),
            PhraseBody::Duty(decl) => Some(self.declare_duty(decl)),
            PhraseBody::Extend(decl) => Some(self.extend(decl)),
            PhraseBody::Create(statement) => {
                self.apply_statement(StatementKind::Create, &statement.operand, &mut errors);
                None
            }
            PhraseBody::Terminate(statement) => {
                self.apply_statement(StatementKind::Terminate, &statement.operand, &mut errors);
                None
            }
            PhraseBody::Obfuscate(statement) => {
                self.apply_statement(StatementKind::Obfuscate, &statement.operand, &mut errors);
                None
            }
            PhraseBody::Trigger(statement) => {
                if let Err(err) = transitions::trigger(
                    &self.registry,
                    &mut self.kb,
                    &mut self.violations,
                    &mut triggers,
                    &statement.operand,
                ) {
                    errors.push(ErrorEntry::from_error(&err.into()));
                }
                None
            }
            PhraseBody::Bquery(_) | PhraseBody::Iquery(_) => None,
        };
        match declared {
            Some(Ok(())) => changes.push(phrase.clone()),
            Some(Err(err)) => errors.push(ErrorEntry::from_error(&err)),
            None => {}
        }

        // The base is brought to closure even after a partial failure, so
        // later phrases observe a consistent state.
        derive::run(
            self.strategy,
            &self.registry,
            &mut self.kb,
            &mut self.violations,
        );

        changes.extend(self.diff(&snapshot));
        let violations = self.violations.drain();

        PhraseResult::Changes(StateChanges {
            success: errors.is_empty(),
            errors,
            changes,
            triggers,
            violated: !violations.is_empty(),
            violations,
        })
    }

    fn bquery(&self, expression: &Expression) -> PhraseResult {
        let ctx = Context::new(&self.registry, &self.kb);
        let evaluated = eval::gather(&ctx, expression).and_then(|bindings| {
            if bindings.is_empty() {
                return Ok(false);
            }
            for binding in &bindings {
                if !eval::truth(&ctx, binding)? {
                    return Ok(false);
                }
            }
            Ok(true)
        });
        match evaluated {
            Ok(result) => {
                debug!(query = %expression, result, "bquery");
                PhraseResult::Boolean {
                    success: true,
                    result,
                }
            }
            Err(err) => PhraseResult::Failure {
                success: false,
                errors: vec![ErrorEntry::from_error(&Error::from(err))],
            },
        }
    }

    fn iquery(&self, expression: &Expression) -> PhraseResult {
        let ctx = Context::new(&self.registry, &self.kb);
        match eval::gather(&ctx, expression) {
            Ok(bindings) => PhraseResult::Instances {
                success: true,
                result: bindings,
            },
            Err(err) => PhraseResult::Failure {
                success: false,
                errors: vec![ErrorEntry::from_error(&Error::from(err))],
            },
        }
    }

    fn apply_statement(
        &mut self,
        kind: StatementKind,
        operand: &Expression,
        errors: &mut Vec<ErrorEntry>,
    ) {
        let bindings = {
            let ctx = Context::new(&self.registry, &self.kb);
            eval::gather(&ctx, operand)
        };
        let bindings = match bindings {
            Ok(bindings) => bindings,
            Err(err) => {
                errors.push(ErrorEntry::from_error(&Error::from(err)));
                return;
            }
        };
        for binding in bindings {
            let applied = match kind {
                StatementKind::Create => {
                    transitions::create(&self.registry, &mut self.kb, &binding, false)
                }
                StatementKind::Terminate => {
                    transitions::terminate(&self.registry, &mut self.kb, &binding)
                }
                StatementKind::Obfuscate => {
                    if binding.as_constructor().is_none() {
                        debug!(binding = %binding, "skipping non-instance obfuscation");
                        continue;
                    }
                    transitions::obfuscate(&self.registry, &mut self.kb, &binding)
                }
            };
            if let Err(err) = applied {
                // The first failure aborts the rest of this statement.
                errors.push(ErrorEntry::from_error(&Error::from(err)));
                return;
            }
        }
    }

    fn declare_fact(&mut self, fact: Fact) {
        self.kb.register_fact(fact.name());
        self.registry.declare(fact);
    }

    fn declare_atomic(&mut self, decl: &AtomicFactPhrase) -> Result<(), Error> {
        let ty = PrimitiveType::from_name(&decl.ty).ok_or_else(|| {
            ProtocolError::MalformedPhrase(format!(
                "type of fact {} should be one of String or Int",
                decl.name
            ))
        })?;
        let mut range = Vec::with_capacity(decl.range.len());
        for value in &decl.range {
            let primitive = value.as_primitive().ok_or_else(|| {
                ProtocolError::MalformedPhrase(format!(
                    "range of fact {} can only contain primitives",
                    decl.name
                ))
            })?;
            if !ty.admits(primitive) {
                return Err(TypeError::Conversion {
                    name: decl.name.clone(),
                    value: primitive.to_string(),
                }
                .into());
            }
            range.push(primitive.clone());
        }
        self.declare_fact(Fact::Atomic(AtomicFact {
            name: decl.name.clone(),
            ty: Some(ty),
            range,
            derived_from: decl.derived_from.clone(),
            holds_when: decl.holds_when.clone(),
            conditioned_by: decl.conditioned_by.clone(),
            is_invariant: decl.is_invariant,
        }));
        Ok(())
    }

    fn declare_predicate(&mut self, decl: &PredicatePhrase) -> Result<(), Error> {
        self.declare_fact(Fact::Atomic(AtomicFact {
            name: decl.name.clone(),
            ty: None,
            range: Vec::new(),
            derived_from: Vec::new(),
            holds_when: vec![decl.expression.clone()],
            conditioned_by: Vec::new(),
            is_invariant: decl.is_invariant,
        }));
        Ok(())
    }

    fn declare_composite(&mut self, decl: &CompositeFactPhrase) -> Result<(), Error> {
        self.declare_fact(Fact::Composite(CompositeFact {
            name: decl.name.clone(),
            kind: FactKind::Fact,
            identified_by: decl.identified_by.clone(),
            derived_from: decl.derived_from.clone(),
            holds_when: decl.holds_when.clone(),
            conditioned_by: decl.conditioned_by.clone(),
            syncs_with: Vec::new(),
            creates: Vec::new(),
            terminates: Vec::new(),
            obfuscates: Vec::new(),
            violated_when: Vec::new(),
        }));
        Ok(())
    }

    fn declare_event(&mut self, decl: &EventPhrase) -> Result<(), Error> {
        self.declare_fact(Fact::Composite(CompositeFact {
            name: decl.name.clone(),
            kind: FactKind::Event,
            identified_by: decl.related_to.clone(),
            derived_from: decl.derived_from.clone(),
            holds_when: decl.holds_when.clone(),
            conditioned_by: decl.conditioned_by.clone(),
            syncs_with: decl.syncs_with.clone(),
            creates: decl.creates.clone(),
            terminates: decl.terminates.clone(),
            obfuscates: decl.obfuscates.clone(),
            violated_when: Vec::new(),
        }));
        Ok(())
    }

    fn declare_act(&mut self, decl: &ActPhrase) -> Result<(), Error> {
        let actor = decl.actor.clone().unwrap_or_else(|| "actor".to_string());
        let mut identified_by = vec![actor];
        identified_by.extend(decl.related_to.iter().cloned());
        self.declare_fact(Fact::Composite(CompositeFact {
            name: decl.name.clone(),
            kind: FactKind::Act,
            identified_by,
            derived_from: decl.derived_from.clone(),
            holds_when: decl.holds_when.clone(),
            conditioned_by: decl.conditioned_by.clone(),
            syncs_with: decl.syncs_with.clone(),
            creates: decl.creates.clone(),
            terminates: decl.terminates.clone(),
            obfuscates: decl.obfuscates.clone(),
            violated_when: Vec::new(),
        }));
        Ok(())
    }

    fn declare_duty(&mut self, decl: &DutyPhrase) -> Result<(), Error> {
        let mut identified_by = vec![decl.holder.clone(), decl.claimant.clone()];
        identified_by.extend(decl.related_to.iter().cloned());
        self.declare_fact(Fact::Composite(CompositeFact {
            name: decl.name.clone(),
            kind: FactKind::Duty,
            identified_by,
            derived_from: decl.derived_from.clone(),
            holds_when: decl.holds_when.clone(),
            conditioned_by: decl.conditioned_by.clone(),
            syncs_with: decl.syncs_with.clone(),
            creates: decl.creates.clone(),
            terminates: decl.terminates.clone(),
            obfuscates: decl.obfuscates.clone(),
            violated_when: decl.violated_when.clone(),
        }));
        Ok(())
    }

    fn declare_placeholder(&mut self, decl: &PlaceholderPhrase) -> Result<(), Error> {
        let name = decl
            .name
            .first()
            .ok_or(ProtocolError::MissingField("name"))?;
        self.registry
            .declare_placeholder(name.clone(), decl.for_fact.clone())?;
        Ok(())
    }

    fn extend(&mut self, decl: &ExtendPhrase) -> Result<(), Error> {
        let fact = self
            .registry
            .get_mut(&decl.name)
            .ok_or_else(|| TypeError::UnknownFact(decl.name.clone()))?;
        match fact {
            Fact::Atomic(atomic) => {
                atomic.derived_from.extend(decl.derived_from.iter().cloned());
                atomic.holds_when.extend(decl.holds_when.iter().cloned());
                atomic
                    .conditioned_by
                    .extend(decl.conditioned_by.iter().cloned());
            }
            Fact::Composite(composite) => {
                composite
                    .derived_from
                    .extend(decl.derived_from.iter().cloned());
                composite.holds_when.extend(decl.holds_when.iter().cloned());
                composite
                    .conditioned_by
                    .extend(decl.conditioned_by.iter().cloned());
                if composite.kind.is_triggerable() {
                    composite.syncs_with.extend(decl.syncs_with.iter().cloned());
                    composite.creates.extend(decl.creates.iter().cloned());
                    composite.terminates.extend(decl.terminates.iter().cloned());
                    composite.obfuscates.extend(decl.obfuscates.iter().cloned());
                }
            }
        }
        Ok(())
    }

    /// Computes the post-phrase delta as replayable phrases: removals as
    /// `terminate` (the atom became a non-instance) or `obfuscate` (it
    /// vanished), additions as `create`.
    fn diff(&self, snapshot: &KnowledgeBase) -> Vec<Phrase> {
        let mut changes = Vec::new();
        for name in snapshot.fact_names() {
            for (hash, instance) in snapshot.instances_with_hashes(name) {
                if self.kb.has_instance(name, hash) {
                    continue;
                }
                let operand = instance.expr.clone();
                let body = if self.kb.has_non_instance(name, hash) {
                    debug!(change = %format!("-{}", operand), "state change");
                    PhraseBody::Terminate(StatementPhrase { operand })
                } else {
                    debug!(change = %format!("~{}", operand), "state change");
                    PhraseBody::Obfuscate(StatementPhrase { operand })
                };
                changes.push(Phrase::new(body));
            }
        }
        for name in self.kb.fact_names() {
            for (hash, instance) in self.kb.instances_with_hashes(name) {
                if snapshot.has_instance(name, hash) {
                    continue;
                }
                debug!(change = %format!("+{}", instance.expr), "state change");
                changes.push(Phrase::new(PhraseBody::Create(StatementPhrase {
                    operand: instance.expr.clone(),
                })));
            }
        }
        changes
    }
}

enum StatementKind {
    Create,
    Terminate,
    Obfuscate,
}

fn failure(err: ProtocolError) -> Response {
    Response::Output(Output {
        success: false,
        errors: vec![ErrorEntry::from_error(&err.into())],
        results: Vec::new(),
    })
}

fn decode_phrase(value: &serde_json::Value) -> Result<Phrase, ProtocolError> {
    let kind = value
        .get("kind")
        .and_then(serde_json::Value::as_str)
        .ok_or(ProtocolError::MissingField("kind"))?;
    if !PHRASE_KINDS.contains(&kind) {
        return Err(ProtocolError::UnknownKind(kind.to_string()));
    }
    serde_json::from_value(value.clone())
        .map_err(|err| ProtocolError::MalformedPhrase(err.to_string()))
}
