use crate::error::VmFault;
use crate::value::{ObjRef, Value};

const MAX_STACK: usize = 4096;
const MAX_FRAMES: usize = 256;

/// A single in-flight function invocation: which function is running, where
/// its instruction pointer is, and where its locals begin on the value
/// stack. Slot 0 of a frame's window is always the receiver.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub function: ObjRef,
    pub ip: usize,
    pub stack_start: usize,
}

/// The single fiber every VM runs (§5: no concurrency across fibers). Owns
/// the value stack and the frame stack; `stack.len()` doubles as the
/// `stackSize` the spec's invariants refer to, so "slots beyond stackSize
/// are undefined" is true by construction rather than by convention.
#[derive(Debug, Default)]
pub struct Fiber {
    pub stack: Vec<Value>,
    pub frames: Vec<Frame>,
}

impl Fiber {
    pub fn new() -> Self {
        Fiber { stack: Vec::with_capacity(256), frames: Vec::with_capacity(64) }
    }

    pub fn push(&mut self, value: Value) -> Result<(), VmFault> {
        if self.stack.len() >= MAX_STACK {
            return Err(VmFault::ValueStackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, VmFault> {
        self.stack.pop().ok_or(VmFault::ValueStackUnderflow)
    }

    pub fn peek(&self) -> Result<Value, VmFault> {
        self.stack.last().copied().ok_or(VmFault::ValueStackUnderflow)
    }

    pub fn current_frame(&self) -> Result<&Frame, VmFault> {
        self.frames.last().ok_or(VmFault::FrameStackUnderflow)
    }

    pub fn current_frame_mut(&mut self) -> Result<&mut Frame, VmFault> {
        self.frames.last_mut().ok_or(VmFault::FrameStackUnderflow)
    }

    /// Pushes a new frame over the top `num_args` stack slots without
    /// moving them: the callee's locals start exactly where the caller left
    /// its arguments (§4.E).
    pub fn call_function(&mut self, function: ObjRef, num_args: usize) -> Result<(), VmFault> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(VmFault::FrameStackOverflow);
        }
        let stack_start = self.stack.len() - num_args;
        self.frames.push(Frame { function, ip: 0, stack_start });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_function_overlays_existing_arguments() {
        let mut fiber = Fiber::new();
        fiber.push(Value::Num(1.0)).unwrap();
        fiber.push(Value::Num(2.0)).unwrap();
        fiber.call_function(ObjRef::from_index(0), 2).unwrap();
        assert_eq!(fiber.current_frame().unwrap().stack_start, 0);
        assert_eq!(fiber.stack.len(), 2);
    }

    #[test]
    fn push_pop_round_trips() {
        let mut fiber = Fiber::new();
        fiber.push(Value::True).unwrap();
        assert_eq!(fiber.pop().unwrap(), Value::True);
        assert!(fiber.pop().is_err());
    }
}
