use super::*;
use serde_json::json;
// Tests for model JSON shape, normalization and validation.

fn model(v: serde_json::Value) -> Result<Program> {
    Program::from_json(&v.to_string())
}

#[test]
fn statement_ids_are_assigned_in_preorder() {
    let program = model(json!({ "classes": [{ "name": "A", "methods": [{
        "sig": { "class": "A", "name": "m" },
        "body": [
            { "op": "assign", "lhs": "x", "value": { "const": { "int": 1 } } },
            { "op": "branch",
              "then": [ { "op": "assign", "lhs": "y", "value": { "local": "x" } } ],
              "else": [ { "op": "return" } ] },
            { "op": "return", "value": { "local": "x" } }
        ]
    }]}]}))
    .unwrap();

    let body = &program.classes[0].methods[0].body;
    assert_eq!(body[0].id, 0);
    assert_eq!(body[1].id, 1);
    match &body[1].kind {
        StmtKind::Branch {
            then_branch,
            else_branch,
        } => {
            assert_eq!(then_branch[0].id, 2);
            assert_eq!(else_branch[0].id, 3);
        }
        other => panic!("expected branch, got {other:?}"),
    }
    assert_eq!(body[2].id, 4);
}

#[test]
fn normalization_is_deterministic() {
    let text = json!({ "classes": [{ "name": "A", "methods": [{
        "sig": { "class": "A", "name": "m", "params": ["int"] },
        "body": [
            { "op": "assign", "lhs": "x", "value": { "local": "p0" } },
            { "op": "return", "value": { "local": "x" } }
        ]
    }]}]})
    .to_string();
    let a = Program::from_json(&text).unwrap();
    let b = Program::from_json(&text).unwrap();
    assert_eq!(a, b);
}

#[test]
fn missing_parameter_names_are_synthesized() {
    let program = model(json!({ "classes": [{ "name": "A", "methods": [{
        "sig": { "class": "A", "name": "m", "params": ["int", "java.lang.String"] }
    }]}]}))
    .unwrap();
    assert_eq!(program.classes[0].methods[0].params, vec!["p0", "p1"]);
}

#[test]
fn duplicate_method_signature_is_rejected() {
    let err = model(json!({ "classes": [{ "name": "A", "methods": [
        { "sig": { "class": "A", "name": "m" } },
        { "sig": { "class": "A", "name": "m" } }
    ]}]}))
    .unwrap_err();
    assert!(format!("{err:#}").contains("duplicate method"));
}

#[test]
fn overloads_are_distinct_signatures() {
    let program = model(json!({ "classes": [{ "name": "A", "methods": [
        { "sig": { "class": "A", "name": "m" } },
        { "sig": { "class": "A", "name": "m", "params": ["int"] } }
    ]}]}));
    assert!(program.is_ok());
}

#[test]
fn duplicate_class_is_rejected() {
    let err = model(json!({ "classes": [
        { "name": "A" },
        { "name": "A" }
    ]}))
    .unwrap_err();
    assert!(format!("{err:#}").contains("duplicate class"));
}

#[test]
fn method_under_wrong_class_is_rejected() {
    let err = model(json!({ "classes": [{ "name": "A", "methods": [
        { "sig": { "class": "B", "name": "m" } }
    ]}]}))
    .unwrap_err();
    assert!(format!("{err:#}").contains("declared under class"));
}

#[test]
fn call_statement_round_trips() {
    let stmt = Statement {
        id: 0,
        line: 12,
        kind: StmtKind::Call(CallStmt {
            result: Some("x".into()),
            callee: MethodSig::new("java.util.Random", "nextInt", &[]),
            dispatch: Dispatch::Virtual,
            receiver: Some(Operand::Local("r".into())),
            args: vec![],
        }),
    };
    let text = serde_json::to_string(&stmt).unwrap();
    let v: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(v["op"], "call");
    assert_eq!(v["callee"]["class"], "java.util.Random");
    let back: Statement = serde_json::from_str(&text).unwrap();
    assert_eq!(back, stmt);
}

#[test]
fn static_field_operand_round_trips() {
    let op = Operand::StaticField(FieldRef::new("org.demo.Kind", "FIRST"));
    let text = serde_json::to_string(&op).unwrap();
    let back: Operand = serde_json::from_str(&text).unwrap();
    assert_eq!(back, op);
}

#[test]
fn dispatch_keys_a_resolution_cache() {
    let mut cache: std::collections::HashMap<(MethodSig, Dispatch), usize> =
        std::collections::HashMap::new();
    let sig = MethodSig::new("org.demo.App", "run", &[]);
    cache.insert((sig.clone(), Dispatch::Virtual), 2);
    cache.insert((sig.clone(), Dispatch::Static), 1);
    assert_eq!(cache.get(&(sig, Dispatch::Virtual)), Some(&2));
}

#[test]
fn signature_display_includes_parameter_types() {
    let sig = MethodSig::new("org.demo.Sink", "use", &["int", "java.lang.String"]);
    assert_eq!(sig.to_string(), "org.demo.Sink.use(int,java.lang.String)");
}

#[test]
fn defined_var_covers_defining_kinds() {
    let assign = Statement {
        id: 0,
        line: 0,
        kind: StmtKind::Assign {
            lhs: "x".into(),
            value: Operand::Const(Constant::Null),
        },
    };
    assert_eq!(assign.defined_var(), Some("x"));
    let ret = Statement {
        id: 0,
        line: 0,
        kind: StmtKind::Return { value: None },
    };
    assert_eq!(ret.defined_var(), None);
}
