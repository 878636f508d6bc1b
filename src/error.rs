//! Error types for the eFLINT reasoner.
//!
//! Errors are split by concern: [`ProtocolError`] for malformed requests,
//! [`TypeError`] for references that do not fit the declared facts,
//! [`EvalError`] for failures inside expression evaluation, and
//! [`TransitionError`] for rejected state changes. [`Error`] is the
//! top-level sum used by the session.
//!
//! Invariant and duty violations are *not* errors; they travel in the
//! `violations` list of a phrase result while the phrase succeeds.

use thiserror::Error;

use serde::{Deserialize, Serialize};

/// A request (or a single phrase) that does not conform to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The request version is not one of the supported protocol versions.
    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    /// The request or phrase kind is not recognised.
    #[error("unknown kind: {0}")]
    UnknownKind(String),

    /// A handshake or ping carried fields it must not have.
    #[error("unsupported fields for this kind")]
    UnsupportedFields,

    /// A required field is absent.
    #[error("field {0} is required")]
    MissingField(&'static str),

    /// An expression does not match any of the recognised JSON shapes.
    #[error("malformed expression: {0}")]
    MalformedExpression(String),

    /// A phrase could not be decoded at all.
    #[error("malformed phrase: {0}")]
    MalformedPhrase(String),
}

/// A reference or construction that contradicts the fact declarations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// The named fact was never declared.
    #[error("fact {0} does not exist")]
    UnknownFact(String),

    /// A constructor carries the wrong number of operands.
    #[error("fact {name} expects {expected} operands, got {got}")]
    ArityMismatch {
        /// Fact the constructor refers to.
        name: String,
        /// Declared parameter count.
        expected: usize,
        /// Operand count in the construction.
        got: usize,
    },

    /// A value falls outside an atomic fact's enumerated range.
    #[error("value {value} is not in the range of fact {name}")]
    OutOfRange {
        /// The atomic fact whose range was checked.
        name: String,
        /// Rendering of the offending value.
        value: String,
    },

    /// A primitive payload does not match the atomic fact's base type.
    #[error("cannot convert {value} to {name}")]
    Conversion {
        /// Conversion target fact.
        name: String,
        /// Rendering of the offending value.
        value: String,
    },

    /// A composite instance was used where an atomic one is required.
    #[error("cannot convert composite instance to atomic fact {0}")]
    CompositeToAtomic(String),

    /// Something other than a ground `name(args…)` construction was used
    /// where an instance is required.
    #[error("expression {0} is not an instance")]
    NotAnInstance(String),

    /// A placeholder was declared twice.
    #[error("placeholder {0} already exists")]
    DuplicatePlaceholder(String),
}

/// A failure while evaluating an expression stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// The expression references facts inconsistently with the registry.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// An arithmetic operand did not evaluate to an integer.
    #[error("operand of {op} is not an Int")]
    NotAnInt {
        /// Operator name as it appears on the wire.
        op: &'static str,
    },

    /// Integer division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// An operand stream produced no binding where one is required.
    #[error("operand of {op} produced no binding")]
    MissingOperand {
        /// Operator name as it appears on the wire.
        op: &'static str,
    },

    /// `Holds` was applied to something that is not an instance.
    #[error("Holds requires its operand to evaluate to an instance")]
    HoldsOnLiteral,

    /// A projection was applied to a non-composite or unknown parameter.
    #[error("expression has no parameter {0}")]
    UnknownParameter(String),

    /// A projection was applied to an atomic instance.
    #[error("cannot project atomic fact {0}")]
    ProjectAtomic(String),

    /// A projection was applied to something that is not an instance.
    #[error("cannot project {0}: not an instance")]
    ProjectNonInstance(String),

    /// An expression shape the evaluator cannot dispatch on. Reaching this
    /// is a bug in the reasoner, not in the input; the session reports it
    /// and should be dropped.
    #[error("internal invariant breach: {0}")]
    Internal(String),
}

/// A rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The change refers to types inconsistently.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// The change required evaluation that failed.
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// Derivation tried to assert an atom whose negation is explicit.
    #[error("cannot derive a non-instance")]
    DeriveNonInstance,

    /// Derivation re-asserted an atom it already produced.
    #[error("instance already exists")]
    InstanceExists,

    /// Termination of an atom that is already explicitly false.
    #[error("non-instance {0} already exists")]
    NonInstanceExists(String),

    /// Only events, acts and duties can be triggered.
    #[error("fact {0} is not triggerable")]
    NotTriggerable(String),
}

/// Top-level error for the session entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Transport-level failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Declaration-level failure.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// Evaluation failure.
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// Rejected state change.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Wire representation of an error inside a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Stable machine-readable identifier.
    pub id: String,
    /// Human-readable description.
    pub message: String,
}

impl ErrorEntry {
    /// Builds a wire entry from any reasoner error, assigning the stable id
    /// for its category.
    pub fn from_error(err: &Error) -> Self {
        let id = match err {
            Error::Protocol(ProtocolError::UnsupportedVersion(_)) => "unsupported-version",
            Error::Protocol(ProtocolError::UnknownKind(_)) => "unknown-kind",
            Error::Protocol(_) => "protocol-error",
            Error::Type(_) => "type-error",
            Error::Eval(EvalError::Internal(_)) => "internal-error",
            Error::Eval(EvalError::Type(_)) => "type-error",
            Error::Eval(_) => "evaluation-error",
            Error::Transition(TransitionError::Type(_)) => "type-error",
            Error::Transition(TransitionError::Eval(EvalError::Type(_))) => "type-error",
            Error::Transition(_) => "transition-error",
        };
        ErrorEntry {
            id: id.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<&Error> for ErrorEntry {
    fn from(err: &Error) -> Self {
        ErrorEntry::from_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_entries_carry_stable_ids() {
        let err = Error::Protocol(ProtocolError::UnsupportedVersion("9.9.9".into()));
        let entry = ErrorEntry::from_error(&err);
        assert_eq!(entry.id, "unsupported-version");
        assert!(entry.message.contains("9.9.9"));

        let err = Error::Type(TypeError::UnknownFact("citizen".into()));
        assert_eq!(ErrorEntry::from_error(&err).id, "type-error");

        let err = Error::Eval(EvalError::Internal("bad shape".into()));
        assert_eq!(ErrorEntry::from_error(&err).id, "internal-error");
    }

    #[test]
    fn type_errors_flow_into_eval_errors() {
        let err: EvalError = TypeError::UnknownFact("person".into()).into();
        let top = Error::from(err);
        assert_eq!(ErrorEntry::from_error(&top).id, "type-error");
    }
}
