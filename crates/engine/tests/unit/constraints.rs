//! Structural constraints: sequences, scopes, constant identity,
//! concatenation order, producers and call-chain bounds.

use crate::{fired, main_method, run};
use serde_json::json;

fn call(result: Option<&str>, class: &str, name: &str, args: serde_json::Value) -> serde_json::Value {
    let mut v = json!({ "op": "call",
                        "callee": { "class": class, "name": name },
                        "dispatch": "static", "args": args });
    if let Some(r) = result {
        v["result"] = json!(r);
    }
    v
}

fn get(result: &str) -> serde_json::Value {
    call(Some(result), "Src", "get", json!([]))
}

// --- required call sequences ---------------------------------------

const SEQ: &str = "
rules:
  - id: seq.rule
    sources:
      - method: { class: Src, name: get }
    sinks:
      - method: { class: S, name: f }
    sanitizers:
      - method: { class: Esc, name: clean }
    constraints:
      sequence:
        - { method: { class: S, name: g }, args: [] }
        - { method: { class: S, name: h }, args: [] }
";

#[test]
fn sequence_in_order_matches() {
    let report = run(
        main_method(json!([
            get("t"),
            call(None, "S", "g", json!([])),
            call(None, "S", "h", json!([])),
            call(None, "S", "f", json!([{ "local": "t" }]))
        ])),
        SEQ,
    );
    assert_eq!(fired(&report), vec!["seq.rule"]);
}

#[test]
fn sequence_out_of_order_does_not_match() {
    let report = run(
        main_method(json!([
            get("t"),
            call(None, "S", "h", json!([])),
            call(None, "S", "g", json!([])),
            call(None, "S", "f", json!([{ "local": "t" }]))
        ])),
        SEQ,
    );
    assert!(report.findings.is_empty());
}

#[test]
fn sanitizer_inside_the_sequence_span_breaks_it() {
    // The value is re-tainted after the cleaning, so the sink still sees
    // a tag; the span rule alone must reject it.
    let report = run(
        main_method(json!([
            get("t"),
            call(None, "S", "g", json!([])),
            call(None, "Esc", "clean", json!([{ "local": "t" }])),
            call(None, "S", "h", json!([])),
            get("t"),
            call(None, "S", "f", json!([{ "local": "t" }]))
        ])),
        SEQ,
    );
    assert!(report.findings.is_empty());
}

#[test]
fn sanitizer_after_the_sink_keeps_the_match() {
    let report = run(
        main_method(json!([
            get("t"),
            call(None, "S", "g", json!([])),
            call(None, "S", "h", json!([])),
            call(None, "S", "f", json!([{ "local": "t" }])),
            call(None, "Esc", "clean", json!([{ "local": "t" }]))
        ])),
        SEQ,
    );
    assert_eq!(fired(&report), vec!["seq.rule"]);
}

// --- scoped cleaners ------------------------------------------------

const PREFIX: &str = "
rules:
  - id: scope.prefix
    sources:
      - method: { class: Src, name: get }
    sinks:
      - method: { class: S, name: f }
    constraints:
      not_inside:
        - { position: prefix, method: { class: Guard, name: check } }
";

const SUFFIX: &str = "
rules:
  - id: scope.suffix
    sources:
      - method: { class: Src, name: get }
    sinks:
      - method: { class: S, name: f }
    constraints:
      not_inside:
        - { position: suffix, method: { class: Audit, name: log } }
";

#[test]
fn prefix_cleaner_before_the_sink_suppresses() {
    let report = run(
        main_method(json!([
            get("t"),
            call(None, "Guard", "check", json!([{ "local": "t" }])),
            call(None, "S", "f", json!([{ "local": "t" }]))
        ])),
        PREFIX,
    );
    assert!(report.findings.is_empty());
}

#[test]
fn prefix_cleaner_after_the_sink_does_not() {
    let report = run(
        main_method(json!([
            get("t"),
            call(None, "S", "f", json!([{ "local": "t" }])),
            call(None, "Guard", "check", json!([{ "local": "t" }]))
        ])),
        PREFIX,
    );
    assert_eq!(fired(&report), vec!["scope.prefix"]);
}

#[test]
fn cleaner_on_another_value_never_suppresses() {
    let report = run(
        main_method(json!([
            get("t"),
            { "op": "assign", "lhs": "u", "value": { "const": { "str": "x" } } },
            call(None, "Guard", "check", json!([{ "local": "u" }])),
            call(None, "S", "f", json!([{ "local": "t" }]))
        ])),
        PREFIX,
    );
    assert_eq!(fired(&report), vec!["scope.prefix"]);
}

#[test]
fn suffix_cleaner_after_the_sink_suppresses() {
    let report = run(
        main_method(json!([
            get("t"),
            call(None, "S", "f", json!([{ "local": "t" }])),
            call(None, "Audit", "log", json!([{ "local": "t" }]))
        ])),
        SUFFIX,
    );
    assert!(report.findings.is_empty());
}

#[test]
fn suffix_cleaner_before_the_sink_does_not() {
    let report = run(
        main_method(json!([
            get("t"),
            call(None, "Audit", "log", json!([{ "local": "t" }])),
            call(None, "S", "f", json!([{ "local": "t" }]))
        ])),
        SUFFIX,
    );
    assert_eq!(fired(&report), vec!["scope.suffix"]);
}

// --- constant-argument identity -------------------------------------

const MODE: &str = "
rules:
  - id: crypto.mode
    sources:
      - method: { class: Http, name: param }
    sinks:
      - { method: { class: Cipher, name: init }, args: [1] }
    constraints:
      const_arg: { position: 0, class: Mode, field: FIRST }
";

fn param(result: &str) -> serde_json::Value {
    call(Some(result), "Http", "param", json!([]))
}

#[test]
fn inline_enum_constant_selects_the_sink() {
    let flagged = run(
        main_method(json!([
            param("t"),
            call(None, "Cipher", "init",
                 json!([{ "static_field": { "class": "Mode", "name": "FIRST" } },
                        { "local": "t" }]))
        ])),
        MODE,
    );
    assert_eq!(fired(&flagged), vec!["crypto.mode"]);

    let clean = run(
        main_method(json!([
            param("t"),
            call(None, "Cipher", "init",
                 json!([{ "static_field": { "class": "Mode", "name": "SECOND" } },
                        { "local": "t" }]))
        ])),
        MODE,
    );
    assert!(clean.findings.is_empty());
}

#[test]
fn enum_identity_flows_through_a_local() {
    let report = run(
        main_method(json!([
            param("t"),
            { "op": "assign", "lhs": "m",
              "value": { "static_field": { "class": "Mode", "name": "FIRST" } } },
            call(None, "Cipher", "init", json!([{ "local": "m" }, { "local": "t" }]))
        ])),
        MODE,
    );
    assert_eq!(fired(&report), vec!["crypto.mode"]);
}

#[test]
fn conflicting_identities_join_to_unknown() {
    let report = run(
        main_method(json!([
            param("t"),
            { "op": "assign", "lhs": "m",
              "value": { "static_field": { "class": "Mode", "name": "FIRST" } } },
            { "op": "branch",
              "then": [{ "op": "assign", "lhs": "m",
                         "value": { "static_field": { "class": "Mode", "name": "SECOND" } } }],
              "else": [] },
            call(None, "Cipher", "init", json!([{ "local": "m" }, { "local": "t" }]))
        ])),
        MODE,
    );
    assert!(report.findings.is_empty());
}

// --- concatenation order and coverage -------------------------------

const CONCAT_ORDER: &str = "
rules:
  - id: cmd.concat
    sources:
      - { method: { class: Http, name: param }, name: user }
      - { method: { class: Sys, name: host }, name: host }
    sinks:
      - method: { class: Sh, name: exec }
    constraints:
      concat_order: { left: user, right: host }
";

#[test]
fn concat_order_matches_only_the_declared_sides() {
    let ordered = run(
        main_method(json!([
            param("a"),
            call(Some("b"), "Sys", "host", json!([])),
            { "op": "concat", "lhs": "q", "left": { "local": "a" }, "right": { "local": "b" } },
            call(None, "Sh", "exec", json!([{ "local": "q" }]))
        ])),
        CONCAT_ORDER,
    );
    assert_eq!(fired(&ordered), vec!["cmd.concat"]);

    let swapped = run(
        main_method(json!([
            param("a"),
            call(Some("b"), "Sys", "host", json!([])),
            { "op": "concat", "lhs": "q", "left": { "local": "b" }, "right": { "local": "a" } },
            call(None, "Sh", "exec", json!([{ "local": "q" }]))
        ])),
        CONCAT_ORDER,
    );
    assert!(swapped.findings.is_empty());
}

const BOTH: &str = "
rules:
  - id: both.sources
    sources:
      - method: { class: Http, name: param }
      - method: { class: Sys, name: env }
    sinks:
      - { method: { class: Db, name: exec }, requires: all }
";

#[test]
fn requires_all_needs_every_source() {
    let both = run(
        main_method(json!([
            param("a"),
            call(Some("b"), "Sys", "env", json!([])),
            { "op": "concat", "lhs": "q", "left": { "local": "a" }, "right": { "local": "b" } },
            call(None, "Db", "exec", json!([{ "local": "q" }]))
        ])),
        BOTH,
    );
    assert_eq!(fired(&both), vec!["both.sources"]);

    let one = run(
        main_method(json!([
            param("a"),
            { "op": "concat", "lhs": "q",
              "left": { "local": "a" }, "right": { "const": { "str": "x" } } },
            call(None, "Db", "exec", json!([{ "local": "q" }]))
        ])),
        BOTH,
    );
    assert!(one.findings.is_empty());
}

const ALLOWED: &str = "
rules:
  - id: allow.const
    sources:
      - method: { class: Http, name: param }
    sinks:
      - method: { class: Db, name: exec }
    constraints:
      allowed_constants:
        - { class: Esc, name: safe }
";

#[test]
fn allowed_constant_generator_output_is_benign_in_concat() {
    let report = run(
        main_method(json!([
            param("t"),
            call(Some("s"), "Esc", "safe", json!([{ "local": "t" }])),
            { "op": "concat", "lhs": "q",
              "left": { "local": "s" }, "right": { "const": { "str": "!" } } },
            call(None, "Db", "exec", json!([{ "local": "q" }])),
            { "op": "concat", "lhs": "q2",
              "left": { "local": "t" }, "right": { "const": { "str": "!" } } },
            call(None, "Db", "exec", json!([{ "local": "q2" }]))
        ])),
        ALLOWED,
    );
    // only the direct concatenation fires
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].rule_id, "allow.const");
}

// --- pattern anchoring and overloads --------------------------------

const PRNG: &str = "
rules:
  - id: crypto.weak-prng
    sources:
      - method: { class_pattern: 'java\\.util\\.Random', name_pattern: 'next.*' }
    sinks:
      - method: { class: Token, name: issue }
";

#[test]
fn anchored_class_pattern_spares_secure_random() {
    let report = run(
        main_method(json!([
            call(Some("r1"), "java.util.Random", "nextInt", json!([])),
            call(None, "Token", "issue", json!([{ "local": "r1" }])),
            call(Some("r2"), "java.security.SecureRandom", "nextInt", json!([])),
            call(None, "Token", "issue", json!([{ "local": "r2" }]))
        ])),
        PRNG,
    );
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].rule_id, "crypto.weak-prng");
}

const OVERLOAD: &str = "
rules:
  - id: overload.sink
    sources:
      - method: { class: Http, name: param }
    sinks:
      - { method: { class: S, name: f, params: ['java.lang.String'] }, args: [0] }
      - { method: { class: S, name: f, params: ['int', 'java.lang.String'] }, args: [1] }
";

fn overload_call(params: serde_json::Value, args: serde_json::Value) -> serde_json::Value {
    json!({ "op": "call",
            "callee": { "class": "S", "name": "f", "params": params },
            "dispatch": "static", "args": args })
}

#[test]
fn each_overload_checks_its_own_positions() {
    let uni = run(
        main_method(json!([
            param("t"),
            overload_call(json!(["java.lang.String"]), json!([{ "local": "t" }]))
        ])),
        OVERLOAD,
    );
    assert_eq!(fired(&uni), vec!["overload.sink"]);

    let second_arg = run(
        main_method(json!([
            param("t"),
            overload_call(json!(["int", "java.lang.String"]),
                          json!([{ "const": { "int": 1 } }, { "local": "t" }]))
        ])),
        OVERLOAD,
    );
    assert_eq!(fired(&second_arg), vec!["overload.sink"]);

    // taint on a position the matching overload does not check
    let unchecked = run(
        main_method(json!([
            param("t"),
            overload_call(json!(["int", "java.lang.String"]),
                          json!([{ "local": "t" }, { "const": { "str": "x" } }]))
        ])),
        OVERLOAD,
    );
    assert!(unchecked.findings.is_empty());
}

// --- call-chain bounds and producers --------------------------------

const CHAIN: &str = "
rules:
  - id: chain.bound
    sources:
      - method: { class: Http, name: param }
    sinks:
      - method: { class: Db, name: exec }
    constraints:
      call_chain: { min: 0, max: 1 }
";

fn chained_model(wrappers: usize) -> serde_json::Value {
    let mut methods = vec![];
    // wrap0 births the taint; wrapN forwards wrapN-1
    for i in 0..=wrappers {
        let body = if i == 0 {
            json!([
                param("t"),
                { "op": "return", "value": { "local": "t" } }
            ])
        } else {
            json!([
                { "op": "call", "result": "v",
                  "callee": { "class": "App", "name": format!("wrap{}", i - 1), "params": [] },
                  "dispatch": "static" },
                { "op": "return", "value": { "local": "v" } }
            ])
        };
        methods.push(json!({
            "sig": { "class": "App", "name": format!("wrap{i}"), "params": [] },
            "is_static": true,
            "body": body
        }));
    }
    methods.push(json!({
        "sig": { "class": "App", "name": "main", "params": [] },
        "is_static": true, "entry_point": true,
        "body": [
            { "op": "call", "result": "u",
              "callee": { "class": "App", "name": format!("wrap{wrappers}"), "params": [] },
              "dispatch": "static" },
            call(None, "Db", "exec", json!([{ "local": "u" }]))
        ]
    }));
    json!({ "classes": [{ "name": "App", "methods": methods }] })
}

#[test]
fn call_chain_bound_counts_pass_through_hops() {
    // one hop: source inside wrap0, called directly
    assert_eq!(fired(&run(chained_model(0), CHAIN)), vec!["chain.bound"]);
    // zero hops: source and sink in the same method
    let direct = run(
        main_method(json!([param("t"), call(None, "Db", "exec", json!([{ "local": "t" }]))])),
        CHAIN,
    );
    assert_eq!(fired(&direct), vec!["chain.bound"]);
    // two hops exceed the bound
    assert!(run(chained_model(1), CHAIN).findings.is_empty());
}

const VIA: &str = "
rules:
  - id: prod.via
    sources:
      - method: { class: Http, name: param }
    sinks:
      - { method: { class: S, name: use }, via: { class: Mk, name: build } }
";

#[test]
fn via_requires_the_declared_producer() {
    let made = run(
        main_method(json!([
            param("t"),
            call(Some("u"), "Mk", "build", json!([{ "local": "t" }])),
            call(None, "S", "use", json!([{ "local": "u" }]))
        ])),
        VIA,
    );
    assert_eq!(fired(&made), vec!["prod.via"]);

    let other = run(
        main_method(json!([
            param("t"),
            call(Some("u"), "Other", "mk", json!([{ "local": "t" }])),
            call(None, "S", "use", json!([{ "local": "u" }]))
        ])),
        VIA,
    );
    assert!(other.findings.is_empty());
}

const VIA_CHAIN: &str = "
rules:
  - id: chain.via
    sources:
      - method: { class: Http, name: param }
    sinks:
      - { method: { class: S, name: use },
          via: { class: App, name: helper } }
    constraints:
      call_chain: 0
  - id: chain.plain
    sources:
      - method: { class: Http, name: param }
    sinks:
      - method: { class: S, name: use }
    constraints:
      call_chain: 0
";

#[test]
fn via_producer_hop_is_not_an_intermediary() {
    // Passing through the producer the rule itself names must not count
    // against the chain bound; the rule without `via` sees one hop.
    let report = run(
        json!({ "classes": [{ "name": "App", "methods": [
            {
                "sig": { "class": "App", "name": "main", "params": [] },
                "is_static": true, "entry_point": true,
                "body": [
                    param("t"),
                    { "op": "call", "result": "u",
                      "callee": { "class": "App", "name": "helper",
                                  "params": ["java.lang.String"] },
                      "dispatch": "static", "args": [{ "local": "t" }] },
                    call(None, "S", "use", json!([{ "local": "u" }]))
                ]
            },
            {
                "sig": { "class": "App", "name": "helper",
                         "params": ["java.lang.String"] },
                "is_static": true,
                "body": [{ "op": "return", "value": { "local": "p0" } }]
            }
        ]}]}),
        VIA_CHAIN,
    );
    assert_eq!(fired(&report), vec!["chain.via"]);
}
