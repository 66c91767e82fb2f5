//! End-to-end execution: instantiate modules and call their exports.

mod common;

use common::{instantiate, load_wat};
use rstest::rstest;
use std::cell::Cell;
use std::rc::Rc;
use wasmbox::parser::module::{FunctionType, Limits, RefType, TableType, ValueType};
use wasmbox::runtime::{new_runtime, LinkError, Linker, RuntimeConfig, RuntimeError, Store, Trap, Value};

const ADD: &str = r#"
(module
  (func (export "add") (param i32 i32) (result i32)
    local.get 0
    local.get 1
    i32.add))
"#;

#[rstest]
#[case(2, 3, 5)]
#[case(0x7FFF_FFFF, 1, i32::MIN)]
#[case(-1, 1, 0)]
fn add(#[case] a: i32, #[case] b: i32, #[case] expected: i32) {
    let (store, id) = instantiate(ADD, &Linker::new());
    let results = store.invoke_export(id, "add", &[Value::I32(a), Value::I32(b)]).unwrap();
    assert_eq!(results, vec![Value::I32(expected)]);
}

#[test]
fn arguments_are_checked() {
    let (store, id) = instantiate(ADD, &Linker::new());
    let result = store.invoke_export(id, "add", &[Value::I32(1), Value::I64(2)]);
    assert!(matches!(result, Err(RuntimeError::ArgumentMismatch { .. })));
    let result = store.invoke_export(id, "sub", &[]);
    assert!(matches!(result, Err(RuntimeError::UnknownExport(name)) if name == "sub"));
}

#[test]
fn memory_grow_respects_max() {
    let (store, id) = instantiate(
        r#"(module
             (memory 1 2)
             (func (export "grow") (param i32) (result i32) (memory.grow (local.get 0)))
             (func (export "size") (result i32) memory.size))"#,
        &Linker::new(),
    );
    assert_eq!(store.invoke_export(id, "grow", &[Value::I32(1)]).unwrap(), vec![Value::I32(1)]);
    assert_eq!(store.invoke_export(id, "grow", &[Value::I32(1)]).unwrap(), vec![Value::I32(-1)]);
    assert_eq!(store.invoke_export(id, "size", &[]).unwrap(), vec![Value::I32(2)]);
    assert_eq!(store.memory(id).unwrap().borrow().size(), 2);
}

#[test]
fn out_of_bounds_load_traps() {
    let (store, id) = instantiate(
        r#"(module
             (memory 1)
             (func (export "load") (param i32) (result i32) (i32.load (local.get 0))))"#,
        &Linker::new(),
    );
    assert_eq!(store.invoke_export(id, "load", &[Value::I32(65532)]).unwrap(), vec![Value::I32(0)]);
    let result = store.invoke_export(id, "load", &[Value::I32(65533)]);
    assert!(matches!(result, Err(RuntimeError::Trap(Trap::MemoryOutOfBounds))));
}

#[test]
fn indirect_call_checks_signature() {
    let (store, id) = instantiate(
        r#"(module
             (type $unary (func (param i32) (result i32)))
             (type $nullary (func (result i32)))
             (table 3 funcref)
             (elem (i32.const 0) $double $seven)
             (func $double (param i32) (result i32) (i32.mul (local.get 0) (i32.const 2)))
             (func $seven (result i32) i32.const 7)
             (func (export "call") (param i32 i32) (result i32)
               (call_indirect (type $unary) (local.get 1) (local.get 0))))"#,
        &Linker::new(),
    );
    let call = |slot: i32| store.invoke_export(id, "call", &[Value::I32(slot), Value::I32(21)]);
    assert_eq!(call(0).unwrap(), vec![Value::I32(42)]);
    assert!(matches!(
        call(1),
        Err(RuntimeError::Trap(Trap::IndirectCallTypeMismatch { .. }))
    ));
    assert!(matches!(call(2), Err(RuntimeError::Trap(Trap::UninitializedElement))));
    assert!(matches!(call(3), Err(RuntimeError::Trap(Trap::UndefinedElement))));
}

#[rstest]
#[case::divide_by_zero("(i32.div_s (i32.const 1) (i32.const 0))", Trap::IntegerDivideByZero)]
#[case::signed_overflow("(i32.div_s (i32.const 0x80000000) (i32.const -1))", Trap::IntegerOverflow)]
#[case::nan_truncation("(i32.trunc_f32_s (f32.const nan))", Trap::InvalidConversionToInteger)]
#[case::large_truncation("(i32.trunc_f64_u (f64.const 4294967296))", Trap::IntegerOverflow)]
#[case::unreachable("(unreachable)", Trap::Unreachable)]
fn numeric_traps(#[case] body: &str, #[case] expected: Trap) {
    let wat = format!(r#"(module (func (export "run") (result i32) {body}))"#);
    let (store, id) = instantiate(&wat, &Linker::new());
    assert_eq!(
        store.invoke_export(id, "run", &[]).unwrap_err().to_string(),
        RuntimeError::Trap(expected).to_string()
    );
}

#[test]
fn unregistered_import_is_a_link_error() {
    let module = load_wat(
        r#"(module
             (import "env" "missing" (func))
             (memory 1)
             (data (i32.const 0) "x"))"#,
    );
    let mut store = Store::new();
    match store.instantiate(&module, &Linker::new()) {
        Err(RuntimeError::Link(LinkError::UnknownImport { module, field })) => {
            assert_eq!((module.as_str(), field.as_str()), ("env", "missing"));
        }
        other => panic!("expected a link error, got {other:?}"),
    }
    assert!(store.instance(wasmbox::runtime::InstanceId(0)).is_err());
}

#[test]
fn import_signature_must_match() {
    let mut linker = Linker::new();
    linker.link_function("env", "f", |_, _| Ok(vec![]), FunctionType::new(vec![ValueType::I64], vec![]));
    let module = load_wat(r#"(module (import "env" "f" (func (param i32))))"#);
    let result = Store::new().instantiate(&module, &linker);
    assert!(matches!(result, Err(RuntimeError::Link(LinkError::IncompatibleImport { .. }))));
}

#[test]
fn start_trap_fails_instantiation() {
    let module = load_wat(
        r#"(module
             (func $boom unreachable)
             (start $boom))"#,
    );
    let mut store = Store::new();
    let result = store.instantiate(&module, &Linker::new());
    assert!(matches!(result, Err(RuntimeError::Trap(Trap::Unreachable))));

    // the store is still usable and the failed instance left nothing behind
    let (module, linker) = (load_wat(ADD), Linker::new());
    let id = store.instantiate(&module, &linker).unwrap();
    assert_eq!(id.0, 0);
}

#[test]
fn start_function_runs_once() {
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let mut linker = Linker::new();
    linker.link_function(
        "env",
        "hit",
        move |_, _| {
            counter.set(counter.get() + 1);
            Ok(vec![])
        },
        FunctionType::new(vec![], vec![]),
    );
    let (store, id) = instantiate(
        r#"(module
             (import "env" "hit" (func $hit))
             (func (export "again") (call $hit))
             (start $hit))"#,
        &linker,
    );
    assert_eq!(calls.get(), 1);
    store.invoke_export(id, "again", &[]).unwrap();
    assert_eq!(calls.get(), 2);
}

#[test]
fn host_function_reads_caller_memory() {
    let seen = Rc::new(Cell::new(0u32));
    let sink = seen.clone();
    let mut linker = Linker::new();
    linker.link_function(
        "env",
        "peek",
        move |caller, args| {
            let addr = args[0].as_i32().unwrap_or_default() as u32;
            sink.set(caller.memory()?.read_u32(addr)?);
            caller.memory_mut()?.write_u32(addr, 0xAABB)?;
            Ok(vec![Value::I32(1)])
        },
        FunctionType::new(vec![ValueType::I32], vec![ValueType::I32]),
    );
    let (store, id) = instantiate(
        r#"(module
             (import "env" "peek" (func $peek (param i32) (result i32)))
             (memory 1)
             (data (i32.const 8) "\78\56\34\12")
             (func (export "run") (result i32)
               (drop (call $peek (i32.const 8)))
               (i32.load (i32.const 8))))"#,
        &linker,
    );
    assert_eq!(store.invoke_export(id, "run", &[]).unwrap(), vec![Value::I32(0xAABB)]);
    assert_eq!(seen.get(), 0x1234_5678);
}

#[test]
fn host_trap_unwinds_guest_frames() {
    let mut linker = Linker::new();
    linker.link_function(
        "env",
        "fail",
        |_, _| Err(Trap::Host("no".to_string())),
        FunctionType::new(vec![], vec![]),
    );
    let (store, id) = instantiate(
        r#"(module
             (import "env" "fail" (func $fail))
             (func $inner (call $fail))
             (func (export "outer") (result i32) (call $inner) (i32.const 1)))"#,
        &linker,
    );
    let result = store.invoke_export(id, "outer", &[]);
    assert!(matches!(result, Err(RuntimeError::Trap(Trap::Host(message))) if message == "no"));
    // and the store can keep going
    assert!(matches!(
        store.invoke_export(id, "outer", &[]),
        Err(RuntimeError::Trap(Trap::Host(_)))
    ));
}

#[test]
fn linked_memory_and_globals_are_shared() {
    let mut linker = Linker::new();
    let memory = linker.link_memory("env", "memory", 1, Some(1)).unwrap();
    let global = linker.link_global("env", "base", Value::I32(16), false);
    let (store, id) = instantiate(
        r#"(module
             (import "env" "memory" (memory 1 1))
             (import "env" "base" (global $base i32))
             (func (export "store") (param i32)
               (i32.store (global.get $base) (local.get 0))))"#,
        &linker,
    );
    store.invoke_export(id, "store", &[Value::I32(99)]).unwrap();
    assert_eq!(memory.borrow().read_u32(16), Ok(99));
    assert_eq!(global.get(), Value::I32(16));
}

#[test]
fn exported_globals_are_readable() {
    let (store, id) = instantiate(
        r#"(module
             (global $g (export "counter") (mut i64) (i64.const 41))
             (func (export "inc") (global.set $g (i64.add (global.get $g) (i64.const 1)))))"#,
        &Linker::new(),
    );
    store.invoke_export(id, "inc", &[]).unwrap();
    assert_eq!(store.global(id, "counter").unwrap(), Value::I64(42));
}

#[test]
fn deep_recursion_exhausts_the_stack() {
    let module = load_wat(
        r#"(module
             (func $down (export "down") (param i32) (result i32)
               (if (result i32) (i32.eqz (local.get 0))
                 (then (i32.const 0))
                 (else (i32.add (i32.const 1) (call $down (i32.sub (local.get 0) (i32.const 1))))))))"#,
    );

    let mut store = new_runtime(16 * 1024);
    let id = store.instantiate(&module, &Linker::new()).unwrap();
    assert_eq!(store.invoke_export(id, "down", &[Value::I32(10)]).unwrap(), vec![Value::I32(10)]);
    assert!(matches!(
        store.invoke_export(id, "down", &[Value::I32(100_000)]),
        Err(RuntimeError::Trap(Trap::CallStackExhausted))
    ));

    let mut roomy = Store::with_config(RuntimeConfig::from_json(r#"{"stack_size": 4194304}"#).unwrap());
    let id = roomy.instantiate(&module, &Linker::new()).unwrap();
    assert_eq!(
        roomy.invoke_export(id, "down", &[Value::I32(10_000)]).unwrap(),
        vec![Value::I32(10_000)]
    );
}

#[test]
fn float_results() {
    let (store, id) = instantiate(
        r#"(module
             (func (export "mix") (param f32 f64) (result f64)
               (f64.add (f64.promote_f32 (f32.sqrt (local.get 0))) (f64.nearest (local.get 1))))
             (func (export "min") (param f32 f32) (result f32) (f32.min (local.get 0) (local.get 1))))"#,
        &Linker::new(),
    );
    assert_eq!(
        store.invoke_export(id, "mix", &[Value::F32(16.0), Value::F64(2.5)]).unwrap(),
        vec![Value::F64(6.0)]
    );
    let min = store.invoke_export(id, "min", &[Value::F32(0.0), Value::F32(-0.0)]).unwrap();
    assert!(min[0].bits_eq(&Value::F32(-0.0)));
}

#[test]
fn instances_can_share_a_store() {
    let module = load_wat(ADD);
    let mut store = Store::new();
    let a = store.instantiate(&module, &Linker::new()).unwrap();
    let b = store.instantiate(&module, &Linker::new()).unwrap();
    assert_ne!(a, b);
    let addr = store.find_function(b, "add").unwrap();
    assert_eq!(store.invoke(addr, &[Value::I32(4), Value::I32(5)]).unwrap(), vec![Value::I32(9)]);
}

fn funcref_table(min: u32, max: Option<u32>) -> TableType {
    TableType {
        element: RefType::FuncRef,
        limits: Limits { min, max },
    }
}

#[test]
fn linked_table_dispatches_indirect_calls() {
    let mut linker = Linker::new();
    let table = linker.link_table("env", "table", funcref_table(2, Some(4))).unwrap();
    let mut store = Store::new();

    let provider = load_wat(
        r#"(module
             (import "env" "table" (table 2 funcref))
             (elem (i32.const 1) $seven)
             (func $seven (result i32) i32.const 7))"#,
    );
    store.instantiate(&provider, &linker).unwrap();
    assert!(matches!(table.borrow().get(1), Ok(Value::FuncRef(Some(_)))));

    let caller = load_wat(
        r#"(module
             (type $nullary (func (result i32)))
             (import "env" "table" (table 1 funcref))
             (func (export "call") (param i32) (result i32)
               (call_indirect (type $nullary) (local.get 0))))"#,
    );
    let id = store.instantiate(&caller, &linker).unwrap();
    assert_eq!(store.invoke_export(id, "call", &[Value::I32(1)]).unwrap(), vec![Value::I32(7)]);
    assert!(matches!(
        store.invoke_export(id, "call", &[Value::I32(0)]),
        Err(RuntimeError::Trap(Trap::UninitializedElement))
    ));
}

#[test]
fn linked_table_must_be_large_enough() {
    let mut linker = Linker::new();
    linker.link_table("env", "table", funcref_table(1, None)).unwrap();
    let module = load_wat(r#"(module (import "env" "table" (table 2 funcref)))"#);
    assert!(matches!(
        Store::new().instantiate(&module, &linker),
        Err(RuntimeError::Link(LinkError::IncompatibleImport { .. }))
    ));

    let externs = load_wat(r#"(module (import "env" "table" (table 1 externref)))"#);
    assert!(matches!(
        Store::new().instantiate(&externs, &linker),
        Err(RuntimeError::Link(LinkError::IncompatibleImport { .. }))
    ));
}

#[test]
fn memory_borrowed_by_the_embedder_traps() {
    let (store, id) = instantiate(
        r#"(module
             (memory 1)
             (func (export "poke") (i32.store8 (i32.const 0) (i32.const 1)))
             (func (export "peek") (result i32) (i32.load8_u (i32.const 0))))"#,
        &Linker::new(),
    );
    let memory = store.memory(id).unwrap();
    {
        let _view = memory.borrow();
        assert!(matches!(
            store.invoke_export(id, "poke", &[]),
            Err(RuntimeError::Trap(Trap::Host(_)))
        ));
        // reading alongside the embedder is fine
        assert_eq!(store.invoke_export(id, "peek", &[]).unwrap(), vec![Value::I32(0)]);
    }
    {
        let _writer = memory.borrow_mut();
        assert!(matches!(
            store.invoke_export(id, "peek", &[]),
            Err(RuntimeError::Trap(Trap::Host(_)))
        ));
    }
    store.invoke_export(id, "poke", &[]).unwrap();
    assert_eq!(memory.borrow().data()[0], 1);
}

#[test]
fn table_borrowed_by_the_embedder_traps() {
    let mut linker = Linker::new();
    let table = linker.link_table("env", "table", funcref_table(1, None)).unwrap();
    let (store, id) = instantiate(
        r#"(module
             (import "env" "table" (table 1 funcref))
             (func (export "size") (result i32) (table.size 0)))"#,
        &linker,
    );
    let guard = table.borrow_mut();
    assert!(matches!(
        store.invoke_export(id, "size", &[]),
        Err(RuntimeError::Trap(Trap::Host(_)))
    ));
    drop(guard);
    assert_eq!(store.invoke_export(id, "size", &[]).unwrap(), vec![Value::I32(1)]);
}
