//! End-to-end phrase lifecycle: declarations, state changes, triggers,
//! queries, violations, and the per-phrase delta.

use eflint::ast::{PhraseBody, PhraseResult, StateChanges};
use eflint::session::Session;
use eflint::Phrase;
use pretty_assertions::assert_eq;
use serde_json::json;

fn run(session: &mut Session, value: serde_json::Value) -> PhraseResult {
    let phrase: Phrase = serde_json::from_value(value).expect("phrase should decode");
    session.run_phrase(&phrase)
}

fn changes(session: &mut Session, value: serde_json::Value) -> StateChanges {
    match run(session, value) {
        PhraseResult::Changes(result) => result,
        other => panic!("expected a state-change result, got {:?}", other),
    }
}

fn bquery(session: &mut Session, expression: serde_json::Value) -> bool {
    match run(session, json!({"kind": "bquery", "expression": expression})) {
        PhraseResult::Boolean { result, .. } => result,
        other => panic!("expected a boolean result, got {:?}", other),
    }
}

fn iquery(session: &mut Session, expression: serde_json::Value) -> Vec<String> {
    match run(session, json!({"kind": "iquery", "expression": expression})) {
        PhraseResult::Instances { result, .. } => {
            result.iter().map(|expr| expr.to_string()).collect()
        }
        other => panic!("expected an instance result, got {:?}", other),
    }
}

#[test]
fn atomic_finite_range_checks_membership() {
    let mut session = Session::default();
    changes(
        &mut session,
        json!({"kind": "afact", "name": "x", "type": "Int", "range": [1, 2, 3]}),
    );
    let result = changes(
        &mut session,
        json!({"kind": "create", "operand": {"identifier": "x", "operands": [2]}}),
    );
    assert!(result.success);
    assert!(bquery(&mut session, json!({"identifier": "x", "operands": [2]})));

    // Out-of-range values are type errors, for queries too.
    let result = run(
        &mut session,
        json!({"kind": "bquery", "expression": {"identifier": "x", "operands": [5]}}),
    );
    let PhraseResult::Failure { errors, .. } = result else {
        panic!("expected a failure");
    };
    assert_eq!(errors[0].id, "type-error");

    let result = changes(
        &mut session,
        json!({"kind": "create", "operand": {"identifier": "x", "operands": [5]}}),
    );
    assert!(!result.success);
}

#[test]
fn create_terminate_obfuscate_lifecycle() {
    let mut session = Session::default();
    changes(&mut session, json!({"kind": "afact", "name": "a", "type": "Int"}));
    let a1 = json!({"identifier": "a", "operands": [1]});

    changes(&mut session, json!({"kind": "create", "operand": a1}));
    assert!(bquery(&mut session, a1.clone()));

    changes(&mut session, json!({"kind": "terminate", "operand": a1}));
    assert!(!bquery(&mut session, a1.clone()));
    assert_eq!(session.knowledge().non_instances("a").count(), 1);

    changes(&mut session, json!({"kind": "obfuscate", "operand": a1}));
    assert!(!bquery(&mut session, a1.clone()));
    assert_eq!(session.knowledge().non_instances("a").count(), 0);
}

#[test]
fn repeated_postulation_is_idempotent() {
    let mut session = Session::default();
    changes(&mut session, json!({"kind": "afact", "name": "a", "type": "Int"}));
    let a1 = json!({"identifier": "a", "operands": [1]});
    changes(&mut session, json!({"kind": "create", "operand": a1}));
    let second = changes(&mut session, json!({"kind": "create", "operand": a1}));
    assert!(second.success);
    assert!(second.changes.is_empty(), "no delta on re-postulation");
    assert_eq!(session.knowledge().instance_count("a"), 1);
}

#[test]
fn diff_reports_terminations_and_obfuscations() {
    let mut session = Session::default();
    changes(&mut session, json!({"kind": "afact", "name": "a", "type": "Int"}));
    let a1 = json!({"identifier": "a", "operands": [1]});
    changes(&mut session, json!({"kind": "create", "operand": a1}));

    let result = changes(&mut session, json!({"kind": "terminate", "operand": a1}));
    assert_eq!(result.changes.len(), 1);
    assert!(matches!(result.changes[0].body, PhraseBody::Terminate(_)));

    changes(&mut session, json!({"kind": "create", "operand": a1}));
    let result = changes(&mut session, json!({"kind": "obfuscate", "operand": a1}));
    assert_eq!(result.changes.len(), 1);
    assert!(matches!(result.changes[0].body, PhraseBody::Obfuscate(_)));
}

#[test]
fn invariants_violate_until_satisfied() {
    let mut session = Session::default();
    let result = changes(
        &mut session,
        json!({"kind": "afact", "name": "p", "type": "String", "is-invariant": true}),
    );
    assert!(result.violated);
    assert_eq!(result.violations[0].kind, "invariant");
    assert_eq!(result.violations[0].identifier, "p");

    // Any other non-query phrase keeps reporting it.
    let result = changes(&mut session, json!({"kind": "afact", "name": "unrelated"}));
    assert!(result.violated);

    let result = changes(
        &mut session,
        json!({"kind": "create", "operand": {"identifier": "p", "operands": ["set"]}}),
    );
    assert!(!result.violated);
}

#[test]
fn duty_violations_carry_the_instance() {
    let mut session = Session::default();
    changes(&mut session, json!({"kind": "afact", "name": "person"}));
    changes(
        &mut session,
        json!({"kind": "predicate", "name": "overdue", "expression": false}),
    );
    changes(
        &mut session,
        json!({
            "kind": "duty",
            "name": "pay",
            "holder": "person",
            "claimant": "person'",
            "violated-when": [{"identifier": "overdue", "operands": []}],
        }),
    );
    let result = changes(
        &mut session,
        json!({"kind": "create", "operand": {"identifier": "pay", "operands": ["H1", "C1"]}}),
    );
    assert!(!result.violated);

    let result = changes(
        &mut session,
        json!({"kind": "create", "operand": {"identifier": "overdue", "operands": []}}),
    );
    assert!(result.violated);
    let duty = &result.violations[0];
    assert_eq!(duty.kind, "duty");
    assert_eq!(duty.identifier, "pay");
    assert_eq!(
        duty.operands.iter().map(|o| o.to_string()).collect::<Vec<_>>(),
        vec!["person(\"H1\")", "person(\"C1\")"]
    );
}

#[test]
fn act_trigger_runs_effects_in_order() {
    let mut session = Session::default();
    changes(&mut session, json!({"kind": "afact", "name": "person"}));
    for name in ["c", "t", "synced"] {
        changes(
            &mut session,
            json!({"kind": "predicate", "name": name, "expression": false}),
        );
    }
    changes(
        &mut session,
        json!({
            "kind": "event",
            "name": "s",
            "creates": [{"identifier": "synced", "operands": []}],
        }),
    );
    changes(
        &mut session,
        json!({
            "kind": "act",
            "name": "a",
            "actor": "person",
            "syncs-with": [{"identifier": "s", "operands": []}],
            "creates": [{"identifier": "c", "operands": []}],
            "terminates": [{"identifier": "t", "operands": []}],
        }),
    );

    changes(
        &mut session,
        json!({"kind": "create", "operand": {"identifier": "t", "operands": []}}),
    );
    changes(
        &mut session,
        json!({"kind": "create", "operand": {"identifier": "a", "operands": ["A1"]}}),
    );

    let result = changes(
        &mut session,
        json!({"kind": "trigger", "operand": {"identifier": "a", "operands": ["A1"]}}),
    );
    assert!(result.success);
    assert!(!result.violated, "the act held, so no act violation");
    let triggered: Vec<&str> = result.triggers.iter().map(|t| t.identifier.as_str()).collect();
    assert_eq!(triggered, vec!["a", "s"]);

    assert!(bquery(&mut session, json!({"identifier": "c", "operands": []})));
    assert!(bquery(&mut session, json!({"identifier": "synced", "operands": []})));
    assert!(!bquery(&mut session, json!({"identifier": "t", "operands": []})));
}

#[test]
fn triggering_a_disabled_act_violates_but_executes() {
    let mut session = Session::default();
    changes(&mut session, json!({"kind": "afact", "name": "person"}));
    changes(
        &mut session,
        json!({"kind": "predicate", "name": "done", "expression": false}),
    );
    changes(
        &mut session,
        json!({
            "kind": "act",
            "name": "sign",
            "actor": "person",
            "creates": [{"identifier": "done", "operands": []}],
        }),
    );

    let result = changes(
        &mut session,
        json!({"kind": "trigger", "operand": {"identifier": "sign", "operands": ["Bob"]}}),
    );
    assert!(result.violated);
    assert_eq!(result.violations[0].kind, "act");
    assert!(bquery(&mut session, json!({"identifier": "done", "operands": []})));
}

#[test]
fn iquery_enumerates_instances_in_insertion_order() {
    let mut session = Session::default();
    changes(&mut session, json!({"kind": "afact", "name": "a", "type": "Int"}));
    for n in [3, 1, 2] {
        changes(
            &mut session,
            json!({"kind": "create", "operand": {"identifier": "a", "operands": [n]}}),
        );
    }
    assert_eq!(iquery(&mut session, json!(["a"])), vec!["a(3)", "a(1)", "a(2)"]);
}

#[test]
fn iquery_enumerates_finite_ranges() {
    let mut session = Session::default();
    changes(
        &mut session,
        json!({"kind": "afact", "name": "die", "type": "Int", "range": [1, 2, 3]}),
    );
    assert_eq!(
        iquery(&mut session, json!(["die"])),
        vec!["die(1)", "die(2)", "die(3)"]
    );
}

#[test]
fn queries_do_not_mutate_state() {
    let mut session = Session::default();
    changes(&mut session, json!({"kind": "afact", "name": "a", "type": "Int"}));
    let before: Vec<String> = session
        .knowledge()
        .instances("a")
        .map(|i| i.expr.to_string())
        .collect();
    let _ = bquery(&mut session, json!({"identifier": "a", "operands": [1]}));
    let _ = iquery(&mut session, json!(["a"]));
    let after: Vec<String> = session
        .knowledge()
        .instances("a")
        .map(|i| i.expr.to_string())
        .collect();
    assert_eq!(before, after);
}

#[test]
fn placeholders_type_variables_in_queries() {
    let mut session = Session::default();
    changes(&mut session, json!({"kind": "afact", "name": "person"}));
    changes(
        &mut session,
        json!({"kind": "placeholder", "name": ["buyer"], "for": "person"}),
    );
    changes(
        &mut session,
        json!({"kind": "create", "operand": {"identifier": "person", "operands": ["Alice"]}}),
    );
    assert_eq!(
        iquery(&mut session, json!(["buyer"])),
        vec!["person(\"Alice\")"]
    );
    // Decorated names resolve the same way.
    assert_eq!(
        iquery(&mut session, json!(["buyer2'"])),
        vec!["person(\"Alice\")"]
    );
}

#[test]
fn unified_variables_share_one_binding() {
    let mut session = Session::default();
    changes(
        &mut session,
        json!({"kind": "afact", "name": "die", "type": "Int", "range": [1, 2]}),
    );
    let eq = json!({"operator": "EQ", "operands": [["die"], ["die"]]});
    assert_eq!(iquery(&mut session, eq), vec!["true", "true"]);
}

#[test]
fn composite_facts_convert_string_operands() {
    let mut session = Session::default();
    changes(&mut session, json!({"kind": "afact", "name": "person"}));
    changes(
        &mut session,
        json!({"kind": "cfact", "name": "parent", "identified-by": ["person", "person'"]}),
    );
    changes(
        &mut session,
        json!({"kind": "create", "operand": {"identifier": "parent", "operands": ["A", "B"]}}),
    );
    assert!(bquery(
        &mut session,
        json!({"identifier": "parent", "operands": ["A", "B"]})
    ));
    let stored: Vec<String> = session
        .knowledge()
        .instances("parent")
        .map(|i| i.expr.to_string())
        .collect();
    assert_eq!(stored, vec!["parent(person(\"A\"),person(\"B\"))"]);
}

#[test]
fn projection_reads_composite_fields() {
    let mut session = Session::default();
    changes(&mut session, json!({"kind": "afact", "name": "person"}));
    changes(
        &mut session,
        json!({"kind": "cfact", "name": "parent", "identified-by": ["person", "person'"]}),
    );
    changes(
        &mut session,
        json!({"kind": "create", "operand": {"identifier": "parent", "operands": ["A", "B"]}}),
    );
    assert_eq!(
        iquery(
            &mut session,
            json!({"parameter": "person'", "operand": ["parent"]})
        ),
        vec!["person(\"B\")"]
    );
}

#[test]
fn enabled_requires_holding_and_conditions() {
    let mut session = Session::default();
    changes(&mut session, json!({"kind": "afact", "name": "person"}));
    changes(
        &mut session,
        json!({"kind": "predicate", "name": "open", "expression": false}),
    );
    changes(
        &mut session,
        json!({
            "kind": "act",
            "name": "enter",
            "actor": "person",
            "conditioned-by": [{"operator": "HOLDS", "operands": [{"identifier": "open", "operands": []}]}],
        }),
    );
    let instance = json!({"identifier": "enter", "operands": ["Ann"]});
    changes(&mut session, json!({"kind": "create", "operand": instance}));

    let enabled = json!({"operator": "ENABLED", "operands": [instance]});
    assert!(!bquery(&mut session, enabled.clone()), "closed door disables");

    changes(
        &mut session,
        json!({"kind": "create", "operand": {"identifier": "open", "operands": []}}),
    );
    assert!(bquery(&mut session, enabled));
}

#[test]
fn stateless_and_updates_flags_round_trip() {
    let mut session = Session::default();
    let phrase: Phrase = serde_json::from_value(json!({
        "kind": "afact",
        "name": "a",
        "stateless": true,
        "updates": true,
    }))
    .unwrap();
    assert!(phrase.stateless);
    assert!(phrase.updates);
    let result = session.run_phrase(&phrase);
    assert!(matches!(result, PhraseResult::Changes(_)));
}
