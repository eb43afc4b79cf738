//! Tests for variables and lvalue resolution

use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;
use qore_runtime::*;

fn object_graph() -> (Arc<Var>, Arc<ObjectValue>, Arc<ObjectValue>) {
    let leaf = Arc::new(ObjectValue::new("Leaf").with_member("x", Value::Int(1)));
    let inner = Arc::new(ObjectValue::new("Inner").with_member("next", Value::Object(Arc::clone(&leaf))));
    let mut h = ValueHash::new();
    h.set("inner", Value::Object(Arc::clone(&inner)));
    let root = Var::with_value("root", Value::hash(h));
    (root, inner, leaf)
}

#[test]
fn test_chain_releases_in_reverse_order() {
    let ctx = EvalContext::new();
    let (root, inner, leaf) = object_graph();
    let expr = LValueExpr::var(&root).key("inner").member("next").member("x");

    let mut lv = LValueHelper::new(&expr, &ctx).unwrap();
    assert_eq!(lv.gate_names(), vec!["root", "Inner.next", "Leaf.x"]);
    assert!(root.is_locked() && inner.is_locked() && leaf.is_locked());
    lv.assign(Value::Int(10)).unwrap();

    let released = lv.release_all();
    assert_eq!(released, vec!["Leaf.x", "Inner.next", "root"]);
    assert!(!root.is_locked() && !inner.is_locked() && !leaf.is_locked());
    assert_eq!(leaf.get_member("x"), Value::Int(10));
}

#[test]
fn test_failure_deep_in_chain_releases_earlier_locks() {
    let ctx = EvalContext::new();
    let (root, inner, leaf) = object_graph();
    // root, Inner.next and Leaf.x are locked before `x` turns out not to be an object
    let expr = LValueExpr::var(&root)
        .key("inner")
        .member("next")
        .member("x")
        .member("missing");

    let err = LValueHelper::new(&expr, &ctx).err().unwrap();
    assert!(matches!(err, QoreError::TypeError { .. }));
    assert!(!root.is_locked());
    assert!(!inner.is_locked());
    assert!(!leaf.is_locked());

    // nothing is left behind: the same chain can be locked again
    let lv = LValueHelper::for_read(&LValueExpr::var(&root).key("inner").member("next").member("x"), &ctx).unwrap();
    assert_eq!(lv.get_value().unwrap(), Value::Int(1));
}

#[test]
fn test_interrupted_resolution_holds_no_locks() {
    let ctx = EvalContext::new();
    let v = Var::with_value("v", Value::Int(1));
    ctx.interrupt();
    let err = LValueHelper::new(&LValueExpr::var(&v), &ctx).err().unwrap();
    assert_eq!(err.code(), "INTERRUPTED");
    assert!(!v.is_locked());
    ctx.reset_interrupt();
    assert!(LValueHelper::new(&LValueExpr::var(&v), &ctx).is_ok());
}

#[test]
fn test_concurrent_updates_are_serialized() {
    let counter = Var::with_value("counter", Value::Int(0));
    let obj = Arc::new(ObjectValue::new("Stats").with_member("hits", Value::Int(0)));
    let holder = Var::with_value("stats", Value::Object(Arc::clone(&obj)));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let holder = Arc::clone(&holder);
            thread::spawn(move || {
                let ctx = EvalContext::new();
                for _ in 0..250 {
                    LValueHelper::new(&LValueExpr::var(&counter), &ctx)
                        .unwrap()
                        .plus_equals(&Value::Int(1))
                        .unwrap();
                    LValueHelper::new(&LValueExpr::var(&holder).member("hits"), &ctx)
                        .unwrap()
                        .plus_equals(&Value::Int(2))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(counter.get_value().unwrap(), Value::Int(1000));
    assert_eq!(obj.get_member("hits"), Value::Int(2000));
}

#[test]
fn test_readonly_import_rejects_writes() {
    let ctx = EvalContext::new();
    let source = GlobalVariables::new();
    let config = source.declare("config", TypeInfo::ANY, None).unwrap();
    config.set_value(Value::string("production")).unwrap();
    source.export("config").unwrap();

    let program = GlobalVariables::new();
    let imported = program.import_from(&source, "config", true).unwrap();
    assert!(imported.is_imported());
    assert!(imported.is_readonly());

    let err = LValueHelper::new(&LValueExpr::var(&imported), &ctx).err().unwrap();
    assert_eq!(err.code(), "ACCESS-ERROR");
    assert!(matches!(err, QoreError::ReadOnlyVariable { .. }));
    assert!(imported.set_value(Value::Int(1)).is_err());
    assert!(!imported.is_locked());
    assert!(!config.is_locked());

    assert_eq!(config.get_value().unwrap(), Value::string("production"));
    let lv = LValueHelper::for_read(&LValueExpr::var(&imported), &ctx).unwrap();
    assert_eq!(lv.get_value().unwrap(), Value::string("production"));
}

#[test]
fn test_writable_import_writes_through() {
    let ctx = EvalContext::new();
    let source = GlobalVariables::new();
    source.declare("total", TypeInfo::INT, None).unwrap();
    source.export("total").unwrap();

    let program = GlobalVariables::new();
    let imported = program.import_from(&source, "total", false).unwrap();
    assert_eq!(imported.type_info(), TypeInfo::INT);
    LValueHelper::new(&LValueExpr::var(&imported), &ctx)
        .unwrap()
        .assign(Value::Int(42))
        .unwrap();
    assert_eq!(source.lookup("total").unwrap().get_value().unwrap(), Value::Int(42));
    assert!(imported.set_value(Value::string("no")).is_err());
}

#[test]
fn test_import_requires_export() {
    let source = GlobalVariables::new();
    source.declare("secret", TypeInfo::ANY, None).unwrap();
    let program = GlobalVariables::new();
    let err = program.import_from(&source, "secret", false).unwrap_err();
    assert_eq!(err.code(), "IMPORT-ERROR");
    assert!(program.import_from(&source, "absent", false).is_err());
}

#[test]
fn test_redeclaration_with_other_type_conflicts() {
    let globals = GlobalVariables::new();
    globals.declare("n", TypeInfo::INT, None).unwrap();
    globals.declare("n", TypeInfo::ANY, None).unwrap();
    globals.declare("n", TypeInfo::INT, None).unwrap();
    let err = globals.declare("n", TypeInfo::STRING, None).unwrap_err();
    assert!(matches!(err, QoreError::TypeConflict { .. }));
    assert_eq!(globals.len(), 1);
}

#[test]
fn test_reference_chain_reaches_final_slot() {
    let ctx = EvalContext::new();
    let c = Var::with_value("c", Value::from(vec![1i64, 2, 3]));
    let b = Var::with_value("b", LValueExpr::var(&c).index(1).reference());
    let a = Var::with_value("a", LValueExpr::var(&b).reference());

    let mut lv = LValueHelper::new(&LValueExpr::var(&a), &ctx).unwrap();
    assert_eq!(lv.gate_names(), vec!["a", "b", "c"]);
    assert_eq!(lv.get_value().unwrap(), Value::Int(2));
    lv.assign(Value::Int(20)).unwrap();
    drop(lv);

    assert_eq!(c.get_value().unwrap(), Value::from(vec![1i64, 20, 3]));
    assert!(a.get_value().unwrap().is_reference());
    assert!(!a.is_locked() && !b.is_locked() && !c.is_locked());
}

#[test]
fn test_reference_cycle_detected() {
    let ctx = EvalContext::new();
    let a = Var::new("a");
    let b = Var::with_value("b", LValueExpr::var(&a).reference());
    a.set_value(LValueExpr::var(&b).reference()).unwrap();
    let err = LValueHelper::new(&LValueExpr::var(&a), &ctx).err().unwrap();
    assert_eq!(err.code(), "CIRCULAR-REFERENCE-ERROR");
    assert!(!a.is_locked() && !b.is_locked());
}

#[test]
fn test_local_reference_argument() {
    let ctx = EvalContext::new();
    let mut locals = LocalVarStack::new();
    locals.define("list", Value::Nothing);
    let arg = locals.reference("list").unwrap();
    {
        let mut scope = locals.scope_guard();
        let param = scope.define("out", arg);
        let mut lv = LValueHelper::new(&LValueExpr::var(&param), &ctx).unwrap();
        lv.push(Value::string("first")).unwrap();
        lv.push(Value::string("second")).unwrap();
    }
    assert!(!locals.contains("out"));
    let list = locals.get_value("list").unwrap();
    assert_eq!(list.as_list().unwrap().len(), 2);
}

#[test]
fn test_globals_clear_reports_nothing_for_plain_values() {
    let globals = GlobalVariables::new();
    let v = globals.declare("data", TypeInfo::ANY, None).unwrap();
    v.set_value(Value::from(vec![1i64, 2])).unwrap();
    let mut sink = ExceptionSink::new();
    globals.clear(&mut sink);
    assert!(!sink.is_exception());
    assert!(globals.is_empty());
    assert!(v.get_value().unwrap().is_nothing());
}

#[test]
fn test_typed_redeclaration_on_import_leaves_source_type() {
    let source = GlobalVariables::new();
    source.declare("mode", TypeInfo::ANY, None).unwrap();
    source.export("mode").unwrap();

    let program = GlobalVariables::new();
    program.import_from(&source, "mode", false).unwrap();
    let err = program.declare("mode", TypeInfo::STRING, None).unwrap_err();
    assert!(matches!(err, QoreError::TypeConflict { .. }));
    assert_eq!(source.lookup("mode").unwrap().type_info(), TypeInfo::ANY);
    // assigning an int through the source is still allowed
    source.lookup("mode").unwrap().set_value(Value::Int(3)).unwrap();
}
