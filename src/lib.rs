//! # eFLINT reasoner
//!
//! A reasoner for the eFLINT normative language, which models regulations
//! as facts, events, acts, duties and derivation rules. Clients submit a
//! sequence of *phrases* (declarations, state changes, triggers, queries);
//! the reasoner maintains a knowledge base of instances (atoms known to
//! hold) and non-instances (atoms known not to hold), computes the
//! deductive closure after every phrase, reports state transitions and
//! violations, and answers queries.
//!
//! ## Overview
//!
//! ```text
//! phrases ──> Session ──> declarations ──> FactRegistry
//!                │   └──> statements/triggers ──> transitions ──> KnowledgeBase
//!                └──> derivation (fixed point) ──> closure + violations
//!                          └──> evaluator (lazy binding streams)
//! ```
//!
//! The textual eFLINT grammar, the HTTP endpoint and any persistence are
//! external collaborators: this crate consumes typed phrases (or their
//! JSON encoding) and produces structured results.
//!
//! ## Quick start
//!
//! ```rust
//! use eflint::session::{Response, Session};
//! use serde_json::json;
//!
//! let mut session = Session::default();
//! let input = serde_json::from_value(json!({
//!     "version": "0.1.0",
//!     "kind": "phrases",
//!     "phrases": [
//!         {"kind": "afact", "name": "person", "type": "String"},
//!         {"kind": "create", "operand": {"identifier": "person", "operands": ["Alice"]}},
//!         {"kind": "bquery", "expression": {"identifier": "person", "operands": ["Alice"]}},
//!     ],
//! }))
//! .unwrap();
//!
//! let Response::Output(output) = session.handle(&input) else { panic!() };
//! assert!(output.success);
//! ```
//!
//! ## Modules
//!
//! - [`ast`]: expressions, phrases and result records
//! - [`json`]: the JSON wire encoding of expressions
//! - [`error`]: error taxonomy
//! - [`facts`]: fact registry, placeholders, conversion
//! - [`knowledge`]: the instance / non-instance books
//! - [`eval`]: lazy cooperative binding streams
//! - [`transitions`]: create / terminate / obfuscate / trigger
//! - [`derive`]: fixed-point derivation (naive, queued, assumption-based)
//! - [`session`]: per-phrase orchestration

#![doc(html_root_url = "https://docs.rs/eflint-reasoner/0.3.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod ast;
pub mod derive;
pub mod error;
pub mod eval;
pub mod facts;
pub mod json;
pub mod knowledge;
pub mod session;
pub mod transitions;

// Re-exports for convenience
pub use ast::{Expression, Handshake, Input, Output, Phrase, PhraseBody, PhraseResult};
pub use derive::Strategy;
pub use error::{Error, ErrorEntry, EvalError, ProtocolError, TransitionError, TypeError};
pub use facts::{Fact, FactRegistry};
pub use knowledge::KnowledgeBase;
pub use session::{Response, Session};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn a_session_answers_queries() {
        let mut session = Session::default();
        let input: Input = serde_json::from_value(json!({
            "version": "0.1.0",
            "kind": "phrases",
            "phrases": [
                {"kind": "afact", "name": "person", "type": "String"},
                {"kind": "bquery", "expression": {"identifier": "person", "operands": ["Alice"]}},
            ],
        }))
        .unwrap();
        let Response::Output(output) = session.handle(&input) else {
            panic!("expected an output");
        };
        assert!(output.success);
        assert_eq!(output.results.len(), 2);
    }

    #[test]
    fn a_handshake_identifies_the_reasoner() {
        let mut session = Session::default();
        let input: Input =
            serde_json::from_value(json!({"version": "0.1.0", "kind": "handshake"})).unwrap();
        let Response::Handshake(shake) = session.handle(&input) else {
            panic!("expected a handshake");
        };
        assert_eq!(shake.reasoner, "eflint");
    }
}
