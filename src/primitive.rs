use crate::value::{Obj, Value};
use crate::vm::Vm;

/// A host-provided method implementation (§4.G). `args[0]` is always the
/// receiver, `args[1..]` the explicit arguments. Returning `Value::NoValue`
/// tells the interpreter the primitive already pushed its own call frame
/// (via `Vm::call_function`) and the stack must be left untouched.
pub type PrimitiveFn = fn(vm: &mut Vm, args: &[Value]) -> Value;

/// Installed as `new` on every metaclass when a class is defined (§4.D).
/// Creates a fresh, field-less instance of the receiver (which here is the
/// class itself, since `new` is called on the metaclass's instance). The
/// receiver is pinned across the allocation: callers invoking this directly
/// (rather than through the interpreter's stack-rooted dispatch) pass a
/// reference that isn't otherwise a GC root.
pub fn metaclass_new(vm: &mut Vm, args: &[Value]) -> Value {
    let receiver = args[0];
    let class_ref = receiver.as_obj().expect("metaclass_new receiver must be a class");
    vm.with_pinned(receiver, |vm| {
        let instance = Obj::Instance(crate::value::Instance { class: class_ref, fields: Vec::new() });
        Value::Obj(vm.alloc(instance))
    })
    .expect("pinning a single receiver cannot overflow the pin stack")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn metaclass_new_creates_an_instance_of_the_receiver() {
        let mut vm = Vm::new();
        let class_ref = vm.define_class(None, "Widget".to_string());
        let instance = metaclass_new(&mut vm, &[Value::Obj(class_ref)]);
        let obj_ref = instance.as_obj().unwrap();
        let instance_obj = vm.heap().get(obj_ref).as_instance().unwrap();
        assert_eq!(instance_obj.class, class_ref);
    }
}
