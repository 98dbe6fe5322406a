use crate::error::{VmFault, VmResult};
use crate::fiber::Fiber;
use crate::heap::{GcStats, Heap};
use crate::primitive::{metaclass_new, PrimitiveFn};
use crate::symbol::SymbolTable;
use crate::value::{ClassObj, Method, Obj, ObjRef, Value};

/// Configuration controlling the ambient diagnostics around the core (§10).
/// None of these fields change language semantics.
#[derive(Debug, Clone, Default)]
pub struct VmConfig {
    pub gc_stress: bool,
    pub gc_stats: bool,
    pub trace: bool,
}

/// The virtual machine: every piece of global state the interpreter touches
/// lives here explicitly (§9: "no hidden singletons" is preserved from the
/// source). A `Vm` owns exactly one `Fiber`.
pub struct Vm {
    heap: Heap,
    pub fiber: Fiber,
    pub methods: SymbolTable,
    pub global_names: SymbolTable,
    pub globals: Vec<Value>,
    pub object_class: Option<ObjRef>,
    pub bool_class: ObjRef,
    pub null_class: ObjRef,
    pub num_class: ObjRef,
    pub fn_class: ObjRef,
    pub string_class: ObjRef,
    pub config: VmConfig,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let mut heap = Heap::new(config.gc_stress);

        // Bootstrap the five primitive-value singleton classes. None of
        // them have a superclass wired up explicitly (their instances are
        // never produced by SUBCLASS), so the metaclass link is also left
        // empty here -- they are not instances of anything script-visible.
        let bool_class = heap.insert(Obj::Class(ClassObj::new(None, None, "Bool".to_string())));
        let null_class = heap.insert(Obj::Class(ClassObj::new(None, None, "Null".to_string())));
        let num_class = heap.insert(Obj::Class(ClassObj::new(None, None, "Num".to_string())));
        let fn_class = heap.insert(Obj::Class(ClassObj::new(None, None, "Fn".to_string())));
        let string_class = heap.insert(Obj::Class(ClassObj::new(None, None, "String".to_string())));

        Vm {
            heap,
            fiber: Fiber::new(),
            methods: SymbolTable::new(),
            global_names: SymbolTable::new(),
            globals: vec![Value::Null; crate::symbol::MAX_SYMBOLS],
            object_class: None,
            bool_class,
            null_class,
            num_class,
            fn_class,
            string_class,
            config,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Allocates and links a heap object, running a collection first if the
    /// contract of §4.C demands it. `obj` arrives fully built, so it is
    /// never at risk from its own allocating call the way a two-phase
    /// malloc-then-link sequence would be — it simply isn't linked into the
    /// arena yet when `collect` runs. Any `Obj(ObjRef)` the new object
    /// refers to that lives in another slot is a different story: if that
    /// referent isn't otherwise rooted, this collection can sweep it out
    /// from under the caller. Callers building such a reference pin it
    /// first (see `new_class`, `new_function`, `primitive::metaclass_new`).
    pub fn alloc(&mut self, obj: Obj) -> ObjRef {
        let size = obj.retained_size();
        if self.heap.should_collect(size) {
            self.collect();
        }
        self.heap.insert(obj)
    }

    fn collect(&mut self) {
        let roots = self.gather_roots();
        self.heap.mark(&roots);
        self.heap.sweep();
        self.heap.next_gc = self.heap.total_allocated * 3 / 2;
    }

    /// Root order is part of the contract (§4.C): globals, then pins, then
    /// every active frame's function, then the live prefix of the value
    /// stack.
    fn gather_roots(&self) -> Vec<Value> {
        let mut roots = Vec::new();
        for &global in &self.globals {
            if !global.is_null() {
                roots.push(global);
            }
        }
        roots.extend(self.heap.pinned().iter().copied());
        for frame in &self.fiber.frames {
            roots.push(Value::Obj(frame.function));
        }
        roots.extend(self.fiber.stack.iter().copied());
        roots
    }

    pub fn pin(&mut self, value: Value) -> VmResult<()> {
        self.heap.pin(value)
    }

    pub fn unpin(&mut self, value: Value) -> VmResult<()> {
        self.heap.unpin(value)
    }

    /// Runs `f` with `value` pinned, unpinning afterward. The scoped
    /// root-guard the design notes call for, expressed as a closure rather
    /// than a `Drop` guard: a `Drop` guard would need to hold `&mut Vm` for
    /// its whole lifetime, which would make it impossible to call back into
    /// the VM (e.g. to perform the next allocation) while still pinned.
    pub fn with_pinned<T>(&mut self, value: Value, f: impl FnOnce(&mut Vm) -> T) -> VmResult<T> {
        self.heap.pin(value)?;
        let result = f(self);
        self.heap.unpin(value)?;
        Ok(result)
    }

    /// Creates a class and its metaclass (§4.D). If `superclass` is given,
    /// its method table is copied slot-wise into the new class (flat,
    /// compile-time inheritance — no superclass edge is kept for dispatch).
    /// `superclass` is pinned for the duration: it may be rooted by nothing
    /// else by the time this runs (e.g. `SUBCLASS` pops it off the value
    /// stack before calling in), and this function allocates twice before
    /// it is dereferenced.
    pub fn new_class(&mut self, superclass: Option<ObjRef>, name: String) -> VmResult<ObjRef> {
        match superclass {
            Some(super_ref) => self.with_pinned(Value::Obj(super_ref), |vm| vm.build_class(superclass, name))?,
            None => self.build_class(superclass, name),
        }
    }

    fn build_class(&mut self, superclass: Option<ObjRef>, name: String) -> VmResult<ObjRef> {
        let metaclass_ref = self.alloc(Obj::Class(ClassObj::new(None, None, format!("{name} metaclass"))));
        self.with_pinned(Value::Obj(metaclass_ref), |vm| {
            let mut class = ClassObj::new(Some(metaclass_ref), superclass, name);
            if let Some(super_ref) = superclass {
                let super_methods = vm.heap.get(super_ref).as_class()?.methods.clone();
                class.methods = super_methods;
            }
            let class_ref = vm.alloc(Obj::Class(class));

            let new_symbol = vm.methods.ensure("new").ok_or(VmFault::SymbolTableFull)?;
            vm.heap.get_mut(metaclass_ref).as_class_mut()?.methods[new_symbol as usize] =
                Method::Primitive(metaclass_new);

            Ok(class_ref)
        })?
    }

    /// Convenience used by tests and primitives: define a class without
    /// going through the CLASS/SUBCLASS opcodes.
    pub fn define_class(&mut self, superclass: Option<ObjRef>, name: String) -> ObjRef {
        self.new_class(superclass, name).expect("bootstrapping a class cannot fault")
    }

    pub fn register_primitive(&mut self, class: ObjRef, selector: &str, primitive: PrimitiveFn) -> VmResult<()> {
        let symbol = self.methods.ensure(selector).ok_or(VmFault::SymbolTableFull)?;
        self.heap.get_mut(class).as_class_mut()?.methods[symbol as usize] = Method::Primitive(primitive);
        Ok(())
    }

    pub fn new_string(&mut self, text: &str) -> ObjRef {
        self.alloc(Obj::Str(crate::value::StrObj { bytes: text.as_bytes().to_vec() }))
    }

    /// `constants` may hold `Value::Obj` refs (strings, nested functions)
    /// allocated moments ago and not yet rooted by anything but the
    /// caller's local variables — pin each before allocating the `FnObj`
    /// that will embed them, so a collection triggered by *this* allocation
    /// can't sweep them first.
    pub fn new_function(&mut self, code: Vec<u8>, constants: Vec<Value>) -> ObjRef {
        let to_pin: Vec<Value> = constants.iter().copied().filter(|v| matches!(v, Value::Obj(_))).collect();
        for &v in &to_pin {
            self.pin(v).expect("constant pin stack overflow");
        }
        let result = self.alloc(Obj::Fn(crate::value::FnObj { code, constants }));
        for &v in to_pin.iter().rev() {
            self.unpin(v).expect("constant unpin stack underflow");
        }
        result
    }

    /// Installs a `Block` method directly (used by the `METHOD` opcode and
    /// by tests that build classes without going through the assembler).
    pub fn register_method(&mut self, class: ObjRef, selector: u8, body: ObjRef) {
        self.heap.get_mut(class).as_class_mut().expect("METHOD on non-class").methods[selector as usize] =
            Method::Block(body);
    }

    /// Returns the class of a value (§4.D). `NoValue` is forbidden here by
    /// construction: it never reaches this function because the
    /// interpreter consumes it at the primitive-call step before anything
    /// else can observe it (§9 open questions).
    pub fn get_class(&self, value: Value) -> VmResult<ObjRef> {
        match value {
            Value::False | Value::True => Ok(self.bool_class),
            Value::Null => Ok(self.null_class),
            Value::Num(_) => Ok(self.num_class),
            Value::NoValue => Err(VmFault::InvalidValue("NoValue has no class")),
            Value::Obj(r) => match self.heap.get(r) {
                Obj::Class(class) => class.metaclass.ok_or(VmFault::InvalidValue("class has no metaclass")),
                Obj::Fn(_) => Ok(self.fn_class),
                Obj::Str(_) => Ok(self.string_class),
                Obj::Instance(instance) => Ok(instance.class),
            },
        }
    }

    /// The §4.A `print` operation: diagnostic rendering that, unlike
    /// `Display for Value`, can resolve a heap reference's kind.
    pub fn print_value(&self, value: Value) -> String {
        match value {
            Value::Obj(r) => match self.heap.get(r) {
                Obj::Str(s) => s.as_str().to_string(),
                Obj::Class(_) => format!("[class {:#x}]", r.index()),
                Obj::Fn(_) => format!("[fn {:#x}]", r.index()),
                Obj::Instance(_) => format!("[instance {:#x}]", r.index()),
            },
            other => other.to_string(),
        }
    }

    pub fn class_name(&self, class: ObjRef) -> &str {
        &self.heap.get(class).as_class().expect("class_name on non-class").name
    }

    pub fn global_slot(&self, symbol: u8) -> Value {
        self.globals[symbol as usize]
    }

    pub fn set_global(&mut self, symbol: u8, value: Value) {
        self.globals[symbol as usize] = value;
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_class_of_a_class_is_its_metaclass() {
        let mut vm = Vm::new();
        let class_ref = vm.define_class(None, "A".to_string());
        let metaclass = vm.get_class(Value::Obj(class_ref)).unwrap();
        let class = vm.heap().get(class_ref).as_class().unwrap();
        assert_eq!(Some(metaclass), class.metaclass);
    }

    #[test]
    fn subclass_inherits_methods_by_slot_copy() {
        let mut vm = Vm::new();
        let base = vm.define_class(None, "A".to_string());
        let selector = vm.methods.ensure("foo").unwrap();
        let body = vm.new_function(vec![28], vec![]); // just END
        vm.register_method(base, selector, body);

        let sub = vm.define_class(Some(base), "B".to_string());
        let sub_class = vm.heap().get(sub).as_class().unwrap();
        assert!(matches!(sub_class.methods[selector as usize], Method::Block(f) if f == body));
    }

    #[test]
    fn singleton_classes_are_distinct() {
        let vm = Vm::new();
        assert_ne!(vm.bool_class, vm.num_class);
        assert_ne!(vm.null_class, vm.string_class);
    }

    #[test]
    fn get_class_rejects_no_value() {
        let vm = Vm::new();
        assert!(vm.get_class(Value::NoValue).is_err());
    }
}
