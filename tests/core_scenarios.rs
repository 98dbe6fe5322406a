//! End-to-end scenarios against the public API, one per §8 testable
//! property: constant/return, falsiness, method dispatch, inheritance, GC
//! boundedness under sustained allocation, and identity via `IS`.

use tottertalk::opcode::byte;
use tottertalk::value::Value;
use tottertalk::vm::{Vm, VmConfig};

#[test]
fn constant_then_end_round_trips_a_value() {
    let mut vm = Vm::new();
    let f = vm.new_function(vec![byte::CONSTANT, 0, byte::END], vec![Value::Num(3.5)]);
    let result = tottertalk::interpret(&mut vm, f).unwrap();
    assert_eq!(result, Value::Num(3.5));
}

#[test]
fn jump_if_treats_only_false_as_falsey() {
    let mut vm = Vm::new();
    // NULL is not falsey: JUMP_IF must not skip the CONSTANT push.
    let f = vm.new_function(
        vec![byte::NULL, byte::JUMP_IF, 2, byte::CONSTANT, 0, byte::END],
        vec![Value::Num(9.0)],
    );
    let result = tottertalk::interpret(&mut vm, f).unwrap();
    assert_eq!(result, Value::Num(9.0));
}

#[test]
fn class_definition_method_and_call_round_trip() {
    let mut vm = Vm::new();
    let body = vm.new_function(vec![byte::CONSTANT, 0, byte::END], vec![Value::Num(11.0)]);
    let selector = vm.methods.ensure("value").unwrap();
    let class = vm.define_class(None, "Counter".to_string());
    vm.register_method(class, selector, body);

    let instance = tottertalk::primitive::metaclass_new(&mut vm, &[Value::Obj(class)]);
    vm.fiber.push(instance).unwrap();
    let caller = vm.new_function(vec![byte::CALL_0, selector, byte::END], vec![]);
    let result = tottertalk::interpreter::interpret(&mut vm, caller).unwrap();
    assert_eq!(result, Value::Num(11.0));
}

#[test]
fn subclass_sees_superclass_methods_defined_before_it() {
    let mut vm = Vm::new();
    let body = vm.new_function(vec![byte::CONSTANT, 0, byte::END], vec![Value::Num(21.0)]);
    let selector = vm.methods.ensure("value").unwrap();
    let base = vm.define_class(None, "Base".to_string());
    vm.register_method(base, selector, body);
    let derived = vm.define_class(Some(base), "Derived".to_string());

    let instance = tottertalk::primitive::metaclass_new(&mut vm, &[Value::Obj(derived)]);
    vm.fiber.push(instance).unwrap();
    let caller = vm.new_function(vec![byte::CALL_0, selector, byte::END], vec![]);
    let result = tottertalk::interpreter::interpret(&mut vm, caller).unwrap();
    assert_eq!(result, Value::Num(21.0));
}

#[test]
fn a_method_defined_on_a_subclass_after_the_fact_does_not_leak_to_its_superclass() {
    let mut vm = Vm::new();
    let body = vm.new_function(vec![byte::TRUE, byte::END], vec![]);
    let selector = vm.methods.ensure("onlyOnChild").unwrap();
    let base = vm.define_class(None, "Base".to_string());
    let derived = vm.define_class(Some(base), "Derived".to_string());
    vm.register_method(derived, selector, body);

    let base_instance = tottertalk::primitive::metaclass_new(&mut vm, &[Value::Obj(base)]);
    vm.fiber.push(base_instance).unwrap();
    let caller = vm.new_function(vec![byte::CALL_0, selector, byte::END], vec![]);
    let err = tottertalk::interpreter::interpret(&mut vm, caller).unwrap_err();
    assert!(matches!(err, tottertalk::VmFault::MethodNotFound { .. }));
}

#[test]
fn is_checks_exact_class_identity_not_subclass_membership() {
    let mut vm = Vm::new();
    let base = vm.define_class(None, "Base".to_string());
    let derived = vm.define_class(Some(base), "Derived".to_string());
    let instance = tottertalk::primitive::metaclass_new(&mut vm, &[Value::Obj(derived)]);

    let base_value = Value::Obj(base);
    let f = vm.new_function(vec![byte::CONSTANT, 0, byte::CONSTANT, 1, byte::IS, byte::END], vec![instance, base_value]);
    let result = tottertalk::interpret(&mut vm, f).unwrap();
    assert_eq!(result, Value::False);
}

#[test]
fn sustained_allocation_is_bounded_by_collection() {
    let mut vm = Vm::with_config(VmConfig { gc_stress: true, gc_stats: true, trace: false });
    // Every allocated string is immediately unreachable once the loop
    // iterates (the FUNCTION's own constant pool is the only reference,
    // and it goes out of scope with the temporary function), so a
    // stress-GC'd run should never accumulate more than a handful of
    // live objects no matter how many iterations run.
    for i in 0..500 {
        let text = vm.new_string(&format!("scratch-{i}"));
        let f = vm.new_function(vec![byte::CONSTANT, 0, byte::END], vec![Value::Obj(text)]);
        let result = tottertalk::interpret(&mut vm, f).unwrap();
        assert_eq!(vm.print_value(result), format!("scratch-{i}"));
    }
    let stats = vm.gc_stats();
    assert!(stats.collections_performed > 0);
    assert!(stats.current_objects < 50, "expected bounded heap, found {} live objects", stats.current_objects);
}

#[test]
fn subclassing_under_gc_stress_does_not_dangle_the_superclass() {
    // Every allocation collects first, so the superclass handed to
    // `define_class` must survive the metaclass/class allocations that
    // follow it — this is the scenario SUBCLASS exercises at interpreter.rs.
    let mut vm = Vm::with_config(VmConfig { gc_stress: true, gc_stats: true, trace: false });
    let body = vm.new_function(vec![byte::CONSTANT, 0, byte::END], vec![Value::Num(5.0)]);
    let selector = vm.methods.ensure("value").unwrap();
    // `body` isn't reachable from any root until `register_method` links it
    // into `base`'s method table, so it must be pinned across the
    // allocating `define_class` call in between.
    let base = vm.with_pinned(Value::Obj(body), |vm| vm.define_class(None, "Base".to_string())).unwrap();
    vm.register_method(base, selector, body);
    let derived = vm.define_class(Some(base), "Derived".to_string());

    let instance = tottertalk::primitive::metaclass_new(&mut vm, &[Value::Obj(derived)]);
    vm.fiber.push(instance).unwrap();
    let caller = vm.new_function(vec![byte::CALL_0, selector, byte::END], vec![]);
    let result = tottertalk::interpreter::interpret(&mut vm, caller).unwrap();
    assert_eq!(result, Value::Num(5.0));
}
