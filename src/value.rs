use std::fmt;

use crate::error::VmFault;
use crate::primitive::PrimitiveFn;
use crate::symbol::MAX_SYMBOLS;

/// A handle into the heap arena (§9: the Rust replacement for the source's
/// raw `Obj*`). Equality is identity — two `ObjRef`s compare equal iff they
/// name the same arena slot, which is exactly the "pointer-identical" check
/// the language's `IS` opcode and `get_class` rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(pub(crate) u32);

impl ObjRef {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        ObjRef(index as u32)
    }
}

/// A uniformly sized tagged cell. `Value` is `Copy`: heap payloads always
/// live behind an `ObjRef`, never inline, so duplicating a `Value` never
/// duplicates heap state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    False,
    True,
    Null,
    /// Internal-only sentinel: a primitive returns this to signal that it
    /// has already pushed a call frame itself. It must never reach script
    /// code, a global slot, or `get_class` (§9 open questions).
    NoValue,
    Num(f64),
    Obj(ObjRef),
}

impl Value {
    pub fn bool(b: bool) -> Value {
        if b { Value::True } else { Value::False }
    }

    pub fn is_obj(&self) -> bool {
        matches!(self, Value::Obj(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Value::True | Value::False)
    }

    /// `False` is the sole falsy value (§4.F, `JUMP_IF`): not `Null`, not `0`.
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::False)
    }

    pub fn as_bool(&self) -> VmResultBool {
        match self {
            Value::True => Ok(true),
            Value::False => Ok(false),
            other => Err(VmFault::BadDowncast { expected: "bool", found: other.kind_name() }),
        }
    }

    pub fn as_num(&self) -> Result<f64, VmFault> {
        match self {
            Value::Num(n) => Ok(*n),
            other => Err(VmFault::BadDowncast { expected: "num", found: other.kind_name() }),
        }
    }

    pub fn as_obj(&self) -> Result<ObjRef, VmFault> {
        match self {
            Value::Obj(r) => Ok(*r),
            other => Err(VmFault::BadDowncast { expected: "obj", found: other.kind_name() }),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Value::False | Value::True => "bool",
            Value::Null => "null",
            Value::NoValue => "novalue",
            Value::Num(_) => "num",
            Value::Obj(_) => "obj",
        }
    }
}

type VmResultBool = Result<bool, VmFault>;

/// One slot of a class's method table.
#[derive(Debug, Clone, Copy)]
pub enum Method {
    None,
    Primitive(PrimitiveFn),
    Block(ObjRef),
}

/// A class object. `metaclass` is `None` only for the metaclass's own
/// metaclass slot (which the source leaves unset — see `new_class`).
/// `superclass` is `None` only for `Object` itself.
#[derive(Debug, Clone)]
pub struct ClassObj {
    pub metaclass: Option<ObjRef>,
    pub superclass: Option<ObjRef>,
    pub methods: Box<[Method; MAX_SYMBOLS]>,
    pub name: String,
}

impl ClassObj {
    pub fn new(metaclass: Option<ObjRef>, superclass: Option<ObjRef>, name: String) -> Self {
        ClassObj {
            metaclass,
            superclass,
            methods: Box::new([Method::None; MAX_SYMBOLS]),
            name,
        }
    }
}

/// A compiled function: a flat instruction buffer plus its constant pool.
#[derive(Debug, Clone)]
pub struct FnObj {
    pub code: Vec<u8>,
    pub constants: Vec<Value>,
}

/// A heap string. The source keeps a C-style trailing NUL; this
/// implementation just owns a `Vec<u8>`, which is the idiomatic
/// equivalent with no semantic change visible to script code.
#[derive(Debug, Clone)]
pub struct StrObj {
    pub bytes: Vec<u8>,
}

impl StrObj {
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("<invalid utf8>")
    }
}

/// An instance of a user-defined class. `fields` is empty today; field
/// access is not yet part of the bytecode contract, but the collector
/// already walks whatever is here (§4.C mark, Instance case).
#[derive(Debug, Clone)]
pub struct Instance {
    pub class: ObjRef,
    pub fields: Vec<Value>,
}

/// The tagged sum of heap object kinds (§9: replaces the source's common
/// header + type tag with a Rust enum; downcasts become pattern matches).
#[derive(Debug, Clone)]
pub enum Obj {
    Class(ClassObj),
    Fn(FnObj),
    Str(StrObj),
    Instance(Instance),
}

impl Obj {
    pub fn kind(&self) -> &'static str {
        match self {
            Obj::Class(_) => "class",
            Obj::Fn(_) => "fn",
            Obj::Str(_) => "string",
            Obj::Instance(_) => "instance",
        }
    }

    pub fn as_class(&self) -> Result<&ClassObj, VmFault> {
        match self {
            Obj::Class(c) => Ok(c),
            other => Err(VmFault::BadDowncast { expected: "class", found: other.kind() }),
        }
    }

    pub fn as_class_mut(&mut self) -> Result<&mut ClassObj, VmFault> {
        match self {
            Obj::Class(c) => Ok(c),
            _ => Err(VmFault::BadDowncast { expected: "class", found: self.kind() }),
        }
    }

    pub fn as_fn(&self) -> Result<&FnObj, VmFault> {
        match self {
            Obj::Fn(f) => Ok(f),
            other => Err(VmFault::BadDowncast { expected: "fn", found: other.kind() }),
        }
    }

    pub fn as_string(&self) -> Result<&StrObj, VmFault> {
        match self {
            Obj::Str(s) => Ok(s),
            other => Err(VmFault::BadDowncast { expected: "string", found: other.kind() }),
        }
    }

    pub fn as_instance(&self) -> Result<&Instance, VmFault> {
        match self {
            Obj::Instance(i) => Ok(i),
            other => Err(VmFault::BadDowncast { expected: "instance", found: other.kind() }),
        }
    }

    /// The true retained size of this object, used for GC accounting
    /// instead of the source's hard-coded worst-case buffer sizes
    /// (§9 open questions: `freeObj` sizing).
    pub fn retained_size(&self) -> usize {
        use std::mem::size_of;
        match self {
            Obj::Class(_) => size_of::<ClassObj>() + MAX_SYMBOLS * size_of::<Method>(),
            Obj::Fn(f) => size_of::<FnObj>() + f.code.len() + f.constants.len() * size_of::<Value>(),
            Obj::Str(s) => size_of::<StrObj>() + s.bytes.len(),
            Obj::Instance(i) => size_of::<Instance>() + i.fields.len() * size_of::<Value>(),
        }
    }
}

impl fmt::Display for Value {
    /// Renders primitive variants directly. Heap references print as a bare
    /// `[obj #N]`; the kind-specific `[class ADDR]` / `[fn ADDR]` / raw
    /// string contents rendering (§4.A) needs the heap to resolve the
    /// object's kind and lives on `Vm::print_value` instead.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::False => write!(f, "false"),
            Value::True => write!(f, "true"),
            Value::Null => write!(f, "null"),
            Value::NoValue => write!(f, "novalue"),
            Value::Num(n) => write!(f, "{}", format_num(*n)),
            Value::Obj(r) => write!(f, "[obj #{}]", r.0),
        }
    }
}

/// `%g`-equivalent rendering: integral doubles print without a trailing
/// `.0`, everything else prints its shortest round-tripping form.
pub fn format_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
