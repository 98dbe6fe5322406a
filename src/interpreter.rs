use crate::error::{VmFault, VmResult};
use crate::opcode::byte;
use crate::value::{Method, ObjRef, Value};
use crate::vm::Vm;

/// Pushes a top-level frame for `function` with zero arguments and runs the
/// dispatch loop to completion (§4.F). Returns the single `Value` the
/// top-level frame's `END` produces.
pub fn interpret(vm: &mut Vm, function: ObjRef) -> VmResult<Value> {
    vm.fiber.call_function(function, 0)?;
    run(vm)
}

fn run(vm: &mut Vm) -> VmResult<Value> {
    loop {
        let frame_depth = vm.fiber.frames.len();
        let frame = *vm.fiber.current_frame()?;
        let code_ptr = {
            // Bytecode buffers are never mutated while a frame is running,
            // so reading through the function's ObjRef for each
            // instruction is safe and keeps the interpreter from needing
            // an unsafe aliased borrow of the heap.
            let function = vm.heap().get(frame.function).as_fn()?;
            function.code.as_ptr()
        };
        let code_len = vm.heap().get(frame.function).as_fn()?.code.len();
        // SAFETY: `code_ptr`/`code_len` describe the same `Vec<u8>` read
        // just above; nothing reallocates a function's bytecode buffer
        // once it exists, so the slice stays valid for this iteration.
        let code: &[u8] = unsafe { std::slice::from_raw_parts(code_ptr, code_len) };

        if frame.ip >= code.len() {
            return Err(VmFault::TruncatedBytecode);
        }
        let op = code[frame.ip];

        if vm.config.trace {
            eprintln!("ip={:04} op=0x{:02X}", frame.ip, op);
        }

        match op {
            byte::CONSTANT => {
                let idx = read_arg(vm, code)?;
                let constant = vm.heap().get(frame.function).as_fn()?.constants[idx as usize];
                vm.fiber.current_frame_mut()?.ip += 2;
                vm.fiber.push(constant)?;
            }
            byte::NULL => {
                advance(vm)?;
                vm.fiber.push(Value::Null)?;
            }
            byte::FALSE => {
                advance(vm)?;
                vm.fiber.push(Value::False)?;
            }
            byte::TRUE => {
                advance(vm)?;
                vm.fiber.push(Value::True)?;
            }
            byte::CLASS => {
                advance(vm)?;
                define_class(vm, None)?;
            }
            byte::SUBCLASS => {
                advance(vm)?;
                let super_value = vm.fiber.pop()?;
                let super_ref = super_value.as_obj()?;
                define_class(vm, Some(super_ref))?;
            }
            byte::METACLASS => {
                advance(vm)?;
                let top = vm.fiber.peek()?;
                let class_ref = top.as_obj()?;
                let metaclass = vm.heap().get(class_ref).as_class()?.metaclass;
                let metaclass = metaclass.ok_or(VmFault::InvalidValue("class has no metaclass"))?;
                vm.fiber.push(Value::Obj(metaclass))?;
            }
            byte::METHOD => {
                let symbol = read_arg(vm, code)?;
                let constant_idx = read_arg2(vm, code)?;
                vm.fiber.current_frame_mut()?.ip += 3;
                let body = vm.heap().get(frame.function).as_fn()?.constants[constant_idx as usize];
                let body_ref = body.as_obj()?;
                let class_value = vm.fiber.peek()?;
                let class_ref = class_value.as_obj()?;
                vm.register_method(class_ref, symbol, body_ref);
            }
            byte::LOAD_LOCAL => {
                let idx = read_arg(vm, code)?;
                vm.fiber.current_frame_mut()?.ip += 2;
                let value = vm.fiber.stack[frame.stack_start + idx as usize];
                vm.fiber.push(value)?;
            }
            byte::STORE_LOCAL => {
                let idx = read_arg(vm, code)?;
                vm.fiber.current_frame_mut()?.ip += 2;
                let value = vm.fiber.peek()?;
                vm.fiber.stack[frame.stack_start + idx as usize] = value;
            }
            byte::LOAD_GLOBAL => {
                let idx = read_arg(vm, code)?;
                vm.fiber.current_frame_mut()?.ip += 2;
                vm.fiber.push(vm.global_slot(idx))?;
            }
            byte::STORE_GLOBAL => {
                let idx = read_arg(vm, code)?;
                vm.fiber.current_frame_mut()?.ip += 2;
                let value = vm.fiber.peek()?;
                vm.set_global(idx, value);
            }
            byte::DUP => {
                advance(vm)?;
                vm.fiber.push(vm.fiber.peek()?)?;
            }
            byte::POP => {
                advance(vm)?;
                vm.fiber.pop()?;
            }
            byte::JUMP => {
                let offset = read_arg(vm, code)?;
                vm.fiber.current_frame_mut()?.ip += 2 + offset as usize;
            }
            byte::JUMP_IF => {
                let offset = read_arg(vm, code)?;
                vm.fiber.current_frame_mut()?.ip += 2;
                let condition = vm.fiber.pop()?;
                if condition.is_falsey() {
                    vm.fiber.current_frame_mut()?.ip += offset as usize;
                }
            }
            byte::IS => {
                advance(vm)?;
                let expected = vm.fiber.pop()?.as_obj()?;
                let value = vm.fiber.pop()?;
                let actual = vm.get_class(value)?;
                vm.fiber.push(Value::bool(actual == expected))?;
            }
            byte::END => {
                let result = vm.fiber.pop()?;
                vm.fiber.frames.pop();
                if vm.fiber.frames.is_empty() {
                    return Ok(result);
                }
                vm.fiber.stack.truncate(frame.stack_start);
                vm.fiber.push(result)?;
            }
            n if (byte::CALL_0..=byte::CALL_10).contains(&n) => {
                let symbol = read_arg(vm, code)?;
                vm.fiber.current_frame_mut()?.ip += 2;
                let num_args = (n - byte::CALL_0) as usize;
                dispatch_call(vm, num_args, symbol)?;
            }
            other => return Err(VmFault::UnknownOpcode(other)),
        }

        // A primitive may have pushed a frame (NoValue convention) or a
        // Block call may have pushed one; either way the next loop
        // iteration re-reads `current_frame` fresh, so nothing more to do
        // here besides guarding against infinite same-depth spinning on a
        // decode error, which the match above already returns early on.
        let _ = frame_depth;
    }
}

fn advance(vm: &mut Vm) -> VmResult<()> {
    vm.fiber.current_frame_mut()?.ip += 1;
    Ok(())
}

fn read_arg(vm: &Vm, code: &[u8]) -> VmResult<u8> {
    let frame = vm.fiber.current_frame()?;
    code.get(frame.ip + 1).copied().ok_or(VmFault::TruncatedBytecode)
}

fn read_arg2(vm: &Vm, code: &[u8]) -> VmResult<u8> {
    let frame = vm.fiber.current_frame()?;
    code.get(frame.ip + 2).copied().ok_or(VmFault::TruncatedBytecode)
}

/// Shared by `CLASS` and `SUBCLASS`: the implicit superclass is `Object`
/// unless this is the very first class defined, in which case the new
/// class *becomes* `Object` (§4.F).
fn define_class(vm: &mut Vm, explicit_super: Option<ObjRef>) -> VmResult<()> {
    let superclass = match explicit_super {
        Some(r) => Some(r),
        None => vm.object_class,
    };
    let name = if explicit_super.is_none() && vm.object_class.is_none() {
        "Object".to_string()
    } else {
        "Class".to_string()
    };
    let class_ref = vm.new_class(superclass, name)?;
    if vm.object_class.is_none() {
        vm.object_class = Some(class_ref);
    }
    vm.fiber.push(Value::Obj(class_ref))
}

/// The call protocol (§4.F): look up the receiver's class, then its method
/// slot. `arity` includes the implicit receiver.
fn dispatch_call(vm: &mut Vm, num_args: usize, selector: u8) -> VmResult<()> {
    let arity = num_args + 1;
    if vm.fiber.stack.len() < arity {
        return Err(VmFault::ValueStackUnderflow);
    }
    let base = vm.fiber.stack.len() - arity;
    let receiver = vm.fiber.stack[base];
    let class_ref = vm.get_class(receiver)?;
    let method = vm.heap().get(class_ref).as_class()?.methods[selector as usize];

    match method {
        Method::None => {
            let selector_name = vm.methods.name(selector).unwrap_or("?").to_string();
            Err(VmFault::MethodNotFound { receiver: vm.print_value(receiver), selector: selector_name })
        }
        Method::Primitive(host) => {
            // Copied rather than borrowed: the primitive takes `&mut Vm`
            // and may itself push onto this very stack.
            let args: Vec<Value> = vm.fiber.stack[base..].to_vec();
            let result = host(vm, &args);
            if !matches!(result, Value::NoValue) {
                vm.fiber.stack[base] = result;
                vm.fiber.stack.truncate(base + 1);
            }
            Ok(())
        }
        Method::Block(fn_ref) => vm.fiber.call_function(fn_ref, arity),
    }
}
