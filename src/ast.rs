//! Data model for eFLINT phrases, expressions, and results.
//!
//! This module defines the value types flowing through the reasoner: the
//! [`Expression`] tree shared by rules, instances and queries, the typed
//! [`Phrase`] records a transport collaborator submits, and the structured
//! result records emitted per phrase.
//!
//! # Expression shapes
//!
//! An expression is one of six shapes, mirrored one-to-one on the wire
//! (see [`crate::json`] for the encoding):
//!
//! ```text
//! 42 / "Alice" / True          primitive
//! [citizen]                    variable reference
//! parent(x, y)                 constructor application
//! x && y, Count(...)           operator
//! Foreach x : body             iterator
//! instance.parameter           projection
//! ```
//!
//! # Example
//!
//! ```rust
//! use eflint::ast::{Expression, Operator};
//!
//! let expr = Expression::operator(
//!     Operator::Eq,
//!     vec![Expression::var("x"), Expression::int(3)],
//! );
//! assert_eq!(expr.to_string(), "x == 3");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ErrorEntry;

/// A primitive literal: integer, string, or boolean.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// 64-bit signed integer.
    Int(i64),
    /// String literal.
    String(String),
    /// Boolean literal.
    Bool(bool),
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Int(n) => write!(f, "{}", n),
            Primitive::String(s) => write!(f, "\"{}\"", s),
            Primitive::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// The closed operator set, with the exact on-wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Neq,
    And,
    Or,
    Not,
    When,
    Count,
    Sum,
    Max,
    Min,
    Holds,
    Enabled,
}

impl Operator {
    /// The operator's wire name, bit-exact.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Add => "ADD",
            Operator::Sub => "SUB",
            Operator::Mul => "MUL",
            Operator::Div => "DIV",
            Operator::Mod => "MOD",
            Operator::Lt => "LT",
            Operator::Gt => "GT",
            Operator::Lte => "LTE",
            Operator::Gte => "GTE",
            Operator::Eq => "EQ",
            Operator::Neq => "NEQ",
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Not => "NOT",
            Operator::When => "WHEN",
            Operator::Count => "COUNT",
            Operator::Sum => "SUM",
            Operator::Max => "MAX",
            Operator::Min => "MIN",
            Operator::Holds => "HOLDS",
            Operator::Enabled => "ENABLED",
        }
    }

    /// Parses a wire name back into an operator.
    pub fn from_name(name: &str) -> Option<Operator> {
        Some(match name {
            "ADD" => Operator::Add,
            "SUB" => Operator::Sub,
            "MUL" => Operator::Mul,
            "DIV" => Operator::Div,
            "MOD" => Operator::Mod,
            "LT" => Operator::Lt,
            "GT" => Operator::Gt,
            "LTE" => Operator::Lte,
            "GTE" => Operator::Gte,
            "EQ" => Operator::Eq,
            "NEQ" => Operator::Neq,
            "AND" => Operator::And,
            "OR" => Operator::Or,
            "NOT" => Operator::Not,
            "WHEN" => Operator::When,
            "COUNT" => Operator::Count,
            "SUM" => Operator::Sum,
            "MAX" => Operator::Max,
            "MIN" => Operator::Min,
            "HOLDS" => Operator::Holds,
            "ENABLED" => Operator::Enabled,
            _ => return None,
        })
    }

    /// True for the binary integer operators (`ADD` through `GTE`).
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Operator::Add
                | Operator::Sub
                | Operator::Mul
                | Operator::Div
                | Operator::Mod
                | Operator::Lt
                | Operator::Gt
                | Operator::Lte
                | Operator::Gte
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Iterator kinds, with the exact on-wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IteratorKind {
    /// Streams every binding of the body.
    Foreach,
    /// Yields a single boolean: does any body binding hold?
    Exists,
}

impl IteratorKind {
    /// The iterator's wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            IteratorKind::Foreach => "FOREACH",
            IteratorKind::Exists => "EXISTS",
        }
    }

    /// Parses a wire name back into an iterator kind.
    pub fn from_name(name: &str) -> Option<IteratorKind> {
        match name {
            "FOREACH" => Some(IteratorKind::Foreach),
            "EXISTS" => Some(IteratorKind::Exists),
            _ => None,
        }
    }
}

/// A node in the expression tree.
///
/// Structural equality and hashing derive from the tree, so two
/// occurrences of the same ground atom compare and hash equal regardless
/// of how they were produced. Whether an atom was derived or postulated is
/// tracked by the knowledge base, never inside the expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    /// A primitive literal.
    Primitive(Primitive),
    /// A reference to a typed variable, encoded on the wire as a
    /// single-element array to keep it apart from a plain string.
    VarRef(String),
    /// `identifier(operands…)`: an atom of a declared fact.
    Constructor {
        /// Fact name.
        identifier: String,
        /// Argument expressions, one per declared parameter.
        operands: Vec<Expression>,
    },
    /// An operator applied to ordered operands.
    Operator {
        /// Which operator.
        operator: Operator,
        /// Ordered operand expressions.
        operands: Vec<Expression>,
    },
    /// `Foreach`/`Exists` binding names over a body expression.
    Iterator {
        /// Which iterator.
        iterator: IteratorKind,
        /// Names bound by the iterator.
        binds: Vec<String>,
        /// Body expression.
        expression: Box<Expression>,
    },
    /// `operand.parameter`: selects a named field of a composite atom.
    Projection {
        /// Parameter name to select.
        parameter: String,
        /// Expression evaluating to a composite instance.
        operand: Box<Expression>,
    },
}

impl Expression {
    /// Integer literal.
    pub fn int(value: i64) -> Expression {
        Expression::Primitive(Primitive::Int(value))
    }

    /// String literal.
    pub fn string(value: impl Into<String>) -> Expression {
        Expression::Primitive(Primitive::String(value.into()))
    }

    /// Boolean literal.
    pub fn bool(value: bool) -> Expression {
        Expression::Primitive(Primitive::Bool(value))
    }

    /// Variable reference.
    pub fn var(name: impl Into<String>) -> Expression {
        Expression::VarRef(name.into())
    }

    /// Constructor application.
    pub fn constructor(identifier: impl Into<String>, operands: Vec<Expression>) -> Expression {
        Expression::Constructor {
            identifier: identifier.into(),
            operands,
        }
    }

    /// Operator application.
    pub fn operator(operator: Operator, operands: Vec<Expression>) -> Expression {
        Expression::Operator { operator, operands }
    }

    /// The constructor view of this expression, if it is one.
    pub fn as_constructor(&self) -> Option<(&str, &[Expression])> {
        match self {
            Expression::Constructor {
                identifier,
                operands,
            } => Some((identifier.as_str(), operands.as_slice())),
            _ => None,
        }
    }

    /// The primitive view of this expression, if it is one.
    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Expression::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// Finds the first free variable in pre-order.
    ///
    /// The search descends constructor and operator operands only; variables
    /// inside iterator bodies and projection operands belong to those nested
    /// streams and are enumerated when they run.
    pub fn find_variable(&self) -> Option<&str> {
        match self {
            Expression::VarRef(name) => Some(name.as_str()),
            Expression::Constructor { operands, .. } | Expression::Operator { operands, .. } => {
                operands.iter().find_map(Expression::find_variable)
            }
            _ => None,
        }
    }

    /// Replaces every occurrence of the variable `name` with `value`,
    /// following the same descent rule as [`Expression::find_variable`].
    pub fn substitute(&mut self, name: &str, value: &Expression) {
        match self {
            Expression::VarRef(var) if var == name => *self = value.clone(),
            Expression::Constructor { operands, .. } | Expression::Operator { operands, .. } => {
                for operand in operands {
                    operand.substitute(name, value);
                }
            }
            _ => {}
        }
    }

    /// Collects every fact referenced by this expression: constructor
    /// identifiers and variable-reference names, throughout the whole tree.
    /// Used to build derivation dependency edges.
    pub fn collect_references(&self, out: &mut Vec<String>) {
        match self {
            Expression::Primitive(_) => {}
            Expression::VarRef(name) => out.push(name.clone()),
            Expression::Constructor {
                identifier,
                operands,
            } => {
                out.push(identifier.clone());
                for operand in operands {
                    operand.collect_references(out);
                }
            }
            Expression::Operator { operands, .. } => {
                for operand in operands {
                    operand.collect_references(out);
                }
            }
            Expression::Iterator { expression, .. } => expression.collect_references(out),
            Expression::Projection { operand, .. } => operand.collect_references(out),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Primitive(p) => write!(f, "{}", p),
            Expression::VarRef(name) => f.write_str(name),
            Expression::Constructor {
                identifier,
                operands,
            } => {
                write!(f, "{}(", identifier)?;
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", operand)?;
                }
                f.write_str(")")
            }
            Expression::Operator { operator, operands } => match operator {
                Operator::Not => match operands.first() {
                    Some(operand) => write!(f, "!{}", operand),
                    None => f.write_str("!"),
                },
                Operator::Count
                | Operator::Sum
                | Operator::Max
                | Operator::Min
                | Operator::Holds
                | Operator::Enabled => {
                    let keyword = match operator {
                        Operator::Count => "Count",
                        Operator::Sum => "Sum",
                        Operator::Max => "Max",
                        Operator::Min => "Min",
                        Operator::Holds => "Holds",
                        _ => "Enabled",
                    };
                    write!(f, "{}(", keyword)?;
                    if let Some(operand) = operands.first() {
                        write!(f, "{}", operand)?;
                    }
                    f.write_str(")")
                }
                Operator::When => {
                    if let [body, condition] = operands.as_slice() {
                        write!(f, "{} When {}", body, condition)
                    } else {
                        f.write_str("When")
                    }
                }
                _ => {
                    let symbol = match operator {
                        Operator::Add => "+",
                        Operator::Sub => "-",
                        Operator::Mul => "*",
                        Operator::Div => "/",
                        Operator::Mod => "%",
                        Operator::Lt => "<",
                        Operator::Gt => ">",
                        Operator::Lte => "<=",
                        Operator::Gte => ">=",
                        Operator::Eq => "==",
                        Operator::Neq => "!=",
                        Operator::And => "&&",
                        _ => "||",
                    };
                    for (i, operand) in operands.iter().enumerate() {
                        if i > 0 {
                            write!(f, " {} ", symbol)?;
                        }
                        write!(f, "{}", operand)?;
                    }
                    Ok(())
                }
            },
            Expression::Iterator {
                iterator,
                binds,
                expression,
            } => {
                let keyword = match iterator {
                    IteratorKind::Foreach => "Foreach",
                    IteratorKind::Exists => "Exists",
                };
                write!(f, "{} {} : {}", keyword, binds.join(", "), expression)
            }
            Expression::Projection { parameter, operand } => {
                write!(f, "{}.{}", operand, parameter)
            }
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_empty_exprs(value: &Vec<Expression>) -> bool {
    value.is_empty()
}

fn is_empty_strings(value: &Vec<String>) -> bool {
    value.is_empty()
}

fn default_type() -> String {
    "String".to_string()
}

/// One phrase of a request, with the transport-shared flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phrase {
    /// When set, the phrase is not meant to persist state changes.
    #[serde(default, skip_serializing_if = "is_false")]
    pub stateless: bool,
    /// When set, the client asks for state updates in the result.
    #[serde(default, skip_serializing_if = "is_false")]
    pub updates: bool,
    /// The kind-specific payload.
    #[serde(flatten)]
    pub body: PhraseBody,
}

impl Phrase {
    /// Wraps a payload with default flags.
    pub fn new(body: PhraseBody) -> Phrase {
        Phrase {
            stateless: false,
            updates: false,
            body,
        }
    }
}

/// The kind-specific payload of a phrase, tagged by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PhraseBody {
    /// Declares an atomic fact.
    Afact(AtomicFactPhrase),
    /// Declares a composite fact.
    Cfact(CompositeFactPhrase),
    /// Declares a placeholder alias.
    Placeholder(PlaceholderPhrase),
    /// Declares a nullary predicate.
    Predicate(PredicatePhrase),
    /// Declares an event.
    Event(EventPhrase),
    /// Declares an act.
    Act(ActPhrase),
    /// Declares a duty.
    Duty(DutyPhrase),
    /// Appends rules to an existing fact.
    Extend(ExtendPhrase),
    /// Postulates instances.
    Create(StatementPhrase),
    /// Explicitly falsifies instances.
    Terminate(StatementPhrase),
    /// Removes instances from both books.
    Obfuscate(StatementPhrase),
    /// Executes event/act/duty effects.
    Trigger(StatementPhrase),
    /// Boolean query.
    Bquery(QueryPhrase),
    /// Instance query.
    Iquery(QueryPhrase),
}

/// Payload of an `afact` declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicFactPhrase {
    /// Fact name.
    pub name: String,
    /// Base type, `"String"` or `"Int"`.
    #[serde(rename = "type", default = "default_type")]
    pub ty: String,
    /// Optional finite range of primitive values.
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub range: Vec<Expression>,
    /// Derivation rules producing instances directly.
    #[serde(rename = "derived-from", default, skip_serializing_if = "is_empty_exprs")]
    pub derived_from: Vec<Expression>,
    /// Derivation rules gating the head.
    #[serde(rename = "holds-when", default, skip_serializing_if = "is_empty_exprs")]
    pub holds_when: Vec<Expression>,
    /// Conditions conjoined onto every rule.
    #[serde(
        rename = "conditioned-by",
        default,
        skip_serializing_if = "is_empty_exprs"
    )]
    pub conditioned_by: Vec<Expression>,
    /// When set, exactly one instance must hold at quiescence.
    #[serde(rename = "is-invariant", default, skip_serializing_if = "is_false")]
    pub is_invariant: bool,
}

/// Payload of a `cfact` declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeFactPhrase {
    /// Fact name.
    pub name: String,
    /// Ordered parameter list; each entry references a fact name.
    #[serde(
        rename = "identified-by",
        default,
        skip_serializing_if = "is_empty_strings"
    )]
    pub identified_by: Vec<String>,
    /// Derivation rules producing instances directly.
    #[serde(rename = "derived-from", default, skip_serializing_if = "is_empty_exprs")]
    pub derived_from: Vec<Expression>,
    /// Derivation rules gating the head.
    #[serde(rename = "holds-when", default, skip_serializing_if = "is_empty_exprs")]
    pub holds_when: Vec<Expression>,
    /// Conditions conjoined onto every rule.
    #[serde(
        rename = "conditioned-by",
        default,
        skip_serializing_if = "is_empty_exprs"
    )]
    pub conditioned_by: Vec<Expression>,
}

/// Payload of a `placeholder` declaration. The name is a single-element
/// list on the wire, like a variable reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderPhrase {
    /// Placeholder name, wrapped in a one-element list.
    pub name: Vec<String>,
    /// The fact this placeholder aliases.
    #[serde(rename = "for")]
    pub for_fact: String,
}

/// Payload of a `predicate` declaration: an atomic fact with no payload
/// type whose single holds-when clause is the given expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicatePhrase {
    /// Predicate name.
    pub name: String,
    /// The clause under which the predicate holds.
    pub expression: Expression,
    /// When set, the predicate is an invariant.
    #[serde(rename = "is-invariant", default, skip_serializing_if = "is_false")]
    pub is_invariant: bool,
}

/// Payload of an `event` declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPhrase {
    /// Event name.
    pub name: String,
    /// Parameter list.
    #[serde(
        rename = "related-to",
        default,
        skip_serializing_if = "is_empty_strings"
    )]
    pub related_to: Vec<String>,
    /// Derivation rules producing instances directly.
    #[serde(rename = "derived-from", default, skip_serializing_if = "is_empty_exprs")]
    pub derived_from: Vec<Expression>,
    /// Derivation rules gating the head.
    #[serde(rename = "holds-when", default, skip_serializing_if = "is_empty_exprs")]
    pub holds_when: Vec<Expression>,
    /// Conditions conjoined onto every rule.
    #[serde(
        rename = "conditioned-by",
        default,
        skip_serializing_if = "is_empty_exprs"
    )]
    pub conditioned_by: Vec<Expression>,
    /// Transitions triggered before this one's own effects.
    #[serde(rename = "syncs-with", default, skip_serializing_if = "is_empty_exprs")]
    pub syncs_with: Vec<Expression>,
    /// Instances postulated by the effect.
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub creates: Vec<Expression>,
    /// Instances terminated by the effect.
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub terminates: Vec<Expression>,
    /// Instances obfuscated by the effect.
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub obfuscates: Vec<Expression>,
}

/// Payload of an `act` declaration. The actor becomes the first parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActPhrase {
    /// Act name.
    pub name: String,
    /// Actor parameter; defaults to the built-in `actor` fact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Remaining parameters.
    #[serde(
        rename = "related-to",
        default,
        skip_serializing_if = "is_empty_strings"
    )]
    pub related_to: Vec<String>,
    /// Derivation rules producing instances directly.
    #[serde(rename = "derived-from", default, skip_serializing_if = "is_empty_exprs")]
    pub derived_from: Vec<Expression>,
    /// Derivation rules gating the head.
    #[serde(rename = "holds-when", default, skip_serializing_if = "is_empty_exprs")]
    pub holds_when: Vec<Expression>,
    /// Conditions conjoined onto every rule.
    #[serde(
        rename = "conditioned-by",
        default,
        skip_serializing_if = "is_empty_exprs"
    )]
    pub conditioned_by: Vec<Expression>,
    /// Transitions triggered before this one's own effects.
    #[serde(rename = "syncs-with", default, skip_serializing_if = "is_empty_exprs")]
    pub syncs_with: Vec<Expression>,
    /// Instances postulated by the effect.
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub creates: Vec<Expression>,
    /// Instances terminated by the effect.
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub terminates: Vec<Expression>,
    /// Instances obfuscated by the effect.
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub obfuscates: Vec<Expression>,
}

/// Payload of a `duty` declaration. Holder and claimant become the first
/// two parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutyPhrase {
    /// Duty name.
    pub name: String,
    /// The party the duty rests on.
    pub holder: String,
    /// The party the duty is owed to.
    pub claimant: String,
    /// Remaining parameters.
    #[serde(
        rename = "related-to",
        default,
        skip_serializing_if = "is_empty_strings"
    )]
    pub related_to: Vec<String>,
    /// Derivation rules producing instances directly.
    #[serde(rename = "derived-from", default, skip_serializing_if = "is_empty_exprs")]
    pub derived_from: Vec<Expression>,
    /// Derivation rules gating the head.
    #[serde(rename = "holds-when", default, skip_serializing_if = "is_empty_exprs")]
    pub holds_when: Vec<Expression>,
    /// Conditions conjoined onto every rule.
    #[serde(
        rename = "conditioned-by",
        default,
        skip_serializing_if = "is_empty_exprs"
    )]
    pub conditioned_by: Vec<Expression>,
    /// Transitions triggered before this one's own effects.
    #[serde(rename = "syncs-with", default, skip_serializing_if = "is_empty_exprs")]
    pub syncs_with: Vec<Expression>,
    /// Instances postulated by the effect.
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub creates: Vec<Expression>,
    /// Instances terminated by the effect.
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub terminates: Vec<Expression>,
    /// Instances obfuscated by the effect.
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub obfuscates: Vec<Expression>,
    /// Clauses under which each held duty instance counts as violated.
    /// A single expression is accepted on decode and read as a one-element
    /// list.
    #[serde(
        rename = "violated-when",
        default,
        skip_serializing_if = "is_empty_exprs",
        deserialize_with = "crate::json::one_or_many"
    )]
    pub violated_when: Vec<Expression>,
}

/// Payload of an `extend` phrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendPhrase {
    /// Declared kind of the fact being extended.
    #[serde(rename = "parent-kind")]
    pub parent_kind: String,
    /// Fact name.
    pub name: String,
    /// Appended derived-from clauses.
    #[serde(rename = "derived-from", default, skip_serializing_if = "is_empty_exprs")]
    pub derived_from: Vec<Expression>,
    /// Appended holds-when clauses.
    #[serde(rename = "holds-when", default, skip_serializing_if = "is_empty_exprs")]
    pub holds_when: Vec<Expression>,
    /// Appended conditioned-by clauses.
    #[serde(
        rename = "conditioned-by",
        default,
        skip_serializing_if = "is_empty_exprs"
    )]
    pub conditioned_by: Vec<Expression>,
    /// Appended syncs-with clauses (event/act/duty facts only).
    #[serde(rename = "syncs-with", default, skip_serializing_if = "is_empty_exprs")]
    pub syncs_with: Vec<Expression>,
    /// Appended creates clauses (event/act/duty facts only).
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub creates: Vec<Expression>,
    /// Appended terminates clauses (event/act/duty facts only).
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub terminates: Vec<Expression>,
    /// Appended obfuscates clauses (event/act/duty facts only).
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub obfuscates: Vec<Expression>,
}

/// Payload of `create`, `terminate`, `obfuscate` and `trigger` phrases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementPhrase {
    /// The expression whose bindings the statement applies to.
    pub operand: Expression,
}

/// Payload of `bquery` and `iquery` phrases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPhrase {
    /// The queried expression.
    pub expression: Expression,
}

/// A request envelope.
///
/// Phrases are kept as raw JSON values so that one malformed phrase fails
/// individually instead of aborting the whole request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    /// Protocol version, checked against the supported set.
    pub version: String,
    /// Request kind: `phrases`, `ping` or `handshake`.
    pub kind: String,
    /// The submitted phrases, decoded one at a time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phrases: Vec<serde_json::Value>,
    /// Whether the client asks for state updates.
    #[serde(default, skip_serializing_if = "is_false")]
    pub updates: bool,
}

/// A violation reported in a phrase result. Violations accompany a
/// successful phrase; they are findings, not failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Violation kind: `invariant`, `duty` or `act`.
    pub kind: String,
    /// Name of the violated fact.
    pub identifier: String,
    /// Operands of the violating instance, empty for invariants.
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub operands: Vec<Expression>,
}

/// A transition executed while handling a trigger phrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
    /// Name of the triggered event, act or duty.
    pub identifier: String,
    /// Ground arguments of the triggered instance.
    #[serde(default, skip_serializing_if = "is_empty_exprs")]
    pub operands: Vec<Expression>,
}

/// Result of a declaration or state-changing phrase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChanges {
    /// Whether the phrase applied cleanly.
    pub success: bool,
    /// Errors that aborted part of the phrase.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorEntry>,
    /// Post-phrase knowledge-base delta, as replayable phrases.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<Phrase>,
    /// Transitions executed by trigger phrases.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<TriggerRecord>,
    /// Whether any violation was found after closure.
    pub violated: bool,
    /// The violations found after closure.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

/// One result record per phrase, shaped by the phrase kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PhraseResult {
    /// A phrase that failed before touching the knowledge base.
    Failure {
        /// Always false.
        success: bool,
        /// What went wrong.
        errors: Vec<ErrorEntry>,
    },
    /// A `bquery` result.
    Boolean {
        /// Whether the query evaluated cleanly.
        success: bool,
        /// The query's truth value.
        result: bool,
    },
    /// An `iquery` result.
    Instances {
        /// Whether the query evaluated cleanly.
        success: bool,
        /// The bindings, in stream order.
        result: Vec<Expression>,
    },
    /// A declaration or state-change result.
    Changes(StateChanges),
}

/// A response envelope for a `phrases` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
    /// Whether the request as a whole was accepted.
    pub success: bool,
    /// Request-level errors (version, kind, envelope shape).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorEntry>,
    /// One result per phrase, in submission order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<PhraseResult>,
}

/// The reasoner's answer to a handshake request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    /// Always true.
    pub success: bool,
    /// Reasoner name.
    pub reasoner: String,
    /// Reasoner version.
    pub reasoner_version: String,
    /// Phrase-protocol versions this reasoner accepts.
    pub supported_versions: Vec<String>,
    /// Whether results carry knowledge-base deltas.
    pub shares_updates: bool,
    /// Whether results carry executed transitions.
    pub shares_triggers: bool,
    /// Whether violations are pushed outside phrase results.
    pub shares_violations: bool,
}
