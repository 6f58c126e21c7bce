//! Main execution loop and opcode dispatch.
//!
//! [`run_slice`] runs one thread's innermost frame until it yields, its
//! top-level frame returns, it is aborted, or a fault stops the VM.

use std::mem;

use log::{debug, trace};
use tickvm_common::{Instruction, Opcode, Value, ValueKind};

use crate::builtin::{BuiltinCall, Verdict};
use crate::error::{FatalError, Fault};
use crate::frame::{Frame, FrameState, Thread, Timer};
use crate::runtime::Runtime;

/// How a slice of execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SliceOutcome {
    /// The thread paused; it is still alive.
    Yielded,
    /// The top-level frame returned this register value.
    Finished(Value),
    /// The thread was dropped.
    Aborted,
}

/// What the loop does after one instruction.
enum Flow {
    Next,
    Yield,
    Finish(Value),
    Abort,
}

/// Run `thread` until it stops for this tick.
pub(crate) fn run_slice(rt: &mut Runtime, thread: &mut Thread) -> Result<SliceOutcome, FatalError> {
    let mut machine = Machine { rt, thread };
    machine.run()
}

struct Machine<'a> {
    rt: &'a mut Runtime,
    thread: &'a mut Thread,
}

impl Machine<'_> {
    fn run(&mut self) -> Result<SliceOutcome, FatalError> {
        loop {
            let function = self.thread.current.function;
            let pc = self.thread.current.pc;
            let instr = match self.thread.current.body.instructions.get(pc) {
                Some(instr) => *instr,
                None => {
                    return Err(FatalError {
                        function,
                        pc,
                        opcode: None,
                        fault: Fault::UnexpectedEnd,
                    })
                }
            };
            self.thread.current.pc += 1;
            trace!("thread {} fn {function} {pc:>4}: {instr}", self.thread.id);

            let flow = self.step(instr, pc).map_err(|fault| FatalError {
                function,
                pc,
                opcode: Some(instr.opcode),
                fault,
            })?;

            match flow {
                Flow::Next => {}
                Flow::Yield => return Ok(SliceOutcome::Yielded),
                Flow::Finish(value) => return Ok(SliceOutcome::Finished(value)),
                Flow::Abort => return Ok(SliceOutcome::Aborted),
            }
        }
    }

    fn step(&mut self, instr: Instruction, pc: usize) -> Result<Flow, Fault> {
        match instr.opcode {
            // Control
            Opcode::Return => return self.exec_return(),
            Opcode::Branch => self.frame().pc = instr.operand as usize,
            Opcode::BranchIfZero => {
                if !self.frame().register.to_bool() {
                    self.frame().pc = instr.operand as usize;
                }
            }
            Opcode::Call => return self.exec_call(instr.operand as usize, pc),

            // Load
            Opcode::LoadValue => self.set_register(Value::Int(instr.signed_operand())),
            Opcode::LoadString => {
                let text = self.rt.loader.string(instr.operand)?.to_owned();
                self.set_register(Value::Str(text));
            }
            Opcode::LoadFunction => self.set_register(Value::Function(instr.operand)),
            Opcode::LoadBuiltin => self.set_register(Value::Builtin(instr.operand)),
            Opcode::LoadResource => self.set_register(Value::Resource(instr.operand)),
            Opcode::LoadObjectType => self.set_register(Value::ObjectType(instr.operand)),
            Opcode::LoadNull => self.set_register(Value::Nothing),
            Opcode::LoadLocal => {
                let value = self.local(instr.operand)?.clone();
                self.set_register(value);
            }
            Opcode::LoadGlobal => {
                let value = self.rt.global(instr.operand)?.clone();
                self.set_register(value);
            }

            // Store
            Opcode::SetLocal => {
                let value = self.frame().register.clone();
                *self.local(instr.operand)? = value;
            }
            Opcode::SetGlobal => {
                let value = self.frame().register.clone();
                *self.rt.global_mut(instr.operand)? = value;
            }
            Opcode::IncrementLocal => {
                let old = bump(self.local(instr.operand)?, 1)?;
                self.set_register(Value::Int(old));
            }
            Opcode::DecrementLocal => {
                let old = bump(self.local(instr.operand)?, -1)?;
                self.set_register(Value::Int(old));
            }
            Opcode::IncrementGlobal => {
                let old = bump(self.rt.global_mut(instr.operand)?, 1)?;
                self.set_register(Value::Int(old));
            }
            Opcode::DecrementGlobal => {
                let old = bump(self.rt.global_mut(instr.operand)?, -1)?;
                self.set_register(Value::Int(old));
            }

            // Stack
            Opcode::Push => {
                let value = self.frame().register.clone();
                self.frame().stack.push_front(value);
            }
            Opcode::QuickPush => {
                let value = mem::take(&mut self.frame().register);
                self.frame().stack.push_front(value);
            }

            // Binary
            Opcode::Plus => self.exec_plus()?,
            Opcode::Minus => self.exec_int_binary(|a, b| Ok(a.wrapping_sub(b)))?,
            Opcode::Multiply => self.exec_int_binary(|a, b| Ok(a.wrapping_mul(b)))?,
            Opcode::Divide => self.exec_int_binary(|a, b| {
                if b == 0 {
                    return Err(Fault::DivisionByZero);
                }
                Ok(a.wrapping_div(b))
            })?,
            Opcode::Modulus => self.exec_int_binary(|a, b| {
                if b == 0 {
                    return Err(Fault::DivisionByZero);
                }
                Ok(a.wrapping_rem(b))
            })?,
            Opcode::Equals => {
                let left = self.pop()?;
                let equal = left == self.frame().register;
                self.set_register(Value::from(equal));
            }
            Opcode::NotEquals => {
                let left = self.pop()?;
                let equal = left == self.frame().register;
                self.set_register(Value::from(!equal));
            }
            Opcode::LessThan => self.exec_int_binary(|a, b| Ok((a < b) as i32))?,
            Opcode::MoreThan => self.exec_int_binary(|a, b| Ok((a > b) as i32))?,
            Opcode::LessEqual => self.exec_int_binary(|a, b| Ok((a <= b) as i32))?,
            Opcode::MoreEqual => self.exec_int_binary(|a, b| Ok((a >= b) as i32))?,
            Opcode::And => {
                let left = self.pop()?.to_bool();
                let right = self.frame().register.to_bool();
                self.set_register(Value::from(left && right));
            }
            Opcode::Or => {
                let left = self.pop()?.to_bool();
                let right = self.frame().register.to_bool();
                self.set_register(Value::from(left || right));
            }

            // Unary
            Opcode::Not => {
                let truth = self.frame().register.to_bool();
                self.set_register(Value::from(!truth));
            }
            Opcode::Negative => {
                let n = self.frame().register.as_int()?;
                self.set_register(Value::Int(n.wrapping_neg()));
            }

            // Index
            Opcode::IndexGet => self.exec_index_get()?,
            Opcode::IndexSet => self.exec_index_set()?,
            Opcode::IndexIncrement => self.exec_index_bump(1)?,
            Opcode::IndexDecrement => self.exec_index_bump(-1)?,
        }
        Ok(Flow::Next)
    }

    // ---- Helpers ----

    fn frame(&mut self) -> &mut Frame {
        &mut self.thread.current
    }

    fn set_register(&mut self, value: Value) {
        self.thread.current.register = value;
    }

    fn pop(&mut self) -> Result<Value, Fault> {
        self.thread
            .current
            .stack
            .pop_front()
            .ok_or(Fault::StackUnderflow)
    }

    fn local(&mut self, slot: u32) -> Result<&mut Value, Fault> {
        let locals = &mut self.thread.current.locals;
        let len = locals.len();
        locals
            .get_mut(slot as usize)
            .ok_or(Fault::SlotOutOfRange { slot, len })
    }

    // ---- Control ----

    fn exec_return(&mut self) -> Result<Flow, Fault> {
        let remaining = self.thread.current.stack.len();
        if remaining != 0 {
            return Err(Fault::NonEmptyStackOnReturn { remaining });
        }
        let mut done = match self.thread.pop() {
            Some(done) => done,
            None => {
                self.thread.current.state = FrameState::Returned;
                let value = mem::take(&mut self.thread.current.register);
                return Ok(Flow::Finish(value));
            }
        };
        done.state = FrameState::Returned;
        if done.returns_value {
            self.thread.current.register = mem::take(&mut done.register);
        }
        Ok(Flow::Next)
    }

    fn exec_call(&mut self, args: usize, pc: usize) -> Result<Flow, Fault> {
        match self.frame().register.clone() {
            Value::Function(function) => {
                let args = self.pop_args(args)?;
                self.push_frame(function, args, true)?;
                Ok(Flow::Next)
            }
            Value::Builtin(id) => self.call_builtin(id, args, pc),
            other => Err(Fault::NotCallable(other.kind())),
        }
    }

    /// Pop `n` arguments. The top of the stack becomes the last argument.
    fn pop_args(&mut self, n: usize) -> Result<Vec<Value>, Fault> {
        let stack = &mut self.thread.current.stack;
        if stack.len() < n {
            return Err(Fault::StackUnderflow);
        }
        let mut args = vec![Value::Nothing; n];
        for slot in args.iter_mut().rev() {
            *slot = stack.pop_front().ok_or(Fault::StackUnderflow)?;
        }
        Ok(args)
    }

    fn push_frame(&mut self, function: u32, args: Vec<Value>, returns_value: bool) -> Result<(), Fault> {
        let limit = self.rt.config.max_call_depth;
        if self.thread.depth() >= limit {
            return Err(Fault::CallDepthExceeded { limit });
        }
        let body = self.rt.loader.load_function(function)?;
        let mut callee = Frame::new(function, body, args)?;
        callee.returns_value = returns_value;
        self.thread.push(callee);
        Ok(())
    }

    fn call_builtin(&mut self, id: u32, args: usize, pc: usize) -> Result<Flow, Fault> {
        let entry = self
            .rt
            .builtins
            .get(id)
            .cloned()
            .ok_or(Fault::UnknownBuiltin(id))?;
        entry.arity.check(args)?;
        if self.thread.current.stack.len() < args {
            return Err(Fault::StackUnderflow);
        }
        debug!("run built-in function {id}: {}", entry.name);

        self.thread.current.register = Value::Nothing;
        self.thread.current.retry_pending = false;
        let thread_id = self.thread.id;
        let mut call = BuiltinCall::new(self.rt, thread_id, &mut self.thread.current, args);
        let verdict = (entry.handler)(&mut call)?;
        let timed = call.is_timed();
        let aborted = call.is_aborted();
        if !matches!(verdict, Verdict::PauseAndRetryInstruction | Verdict::AlreadyHandled) {
            call.discard_remaining();
        }

        match verdict {
            Verdict::Continue => Ok(Flow::Next),
            Verdict::Pause => {
                self.park(timed);
                Ok(Flow::Yield)
            }
            Verdict::PauseAndRetryInstruction => {
                let frame = self.frame();
                frame.pc = pc;
                frame.register = Value::Builtin(id);
                frame.retry_pending = true;
                self.park(timed);
                Ok(Flow::Yield)
            }
            Verdict::ChainToFunction {
                function,
                args,
                returns_value,
            } => {
                self.push_frame(function, args, returns_value)?;
                Ok(Flow::Next)
            }
            Verdict::AlreadyHandled if aborted => Ok(Flow::Abort),
            Verdict::AlreadyHandled => Ok(Flow::Yield),
        }
    }

    /// A timed wait keeps the frame runnable; the scheduler's countdown
    /// resumes it. Anything else waits for the host.
    fn park(&mut self, timed: bool) {
        let frame = self.frame();
        if timed {
            frame.state = FrameState::Runnable;
        } else {
            frame.timer = Timer::Idle;
            frame.state = FrameState::AwaitingExternalEvent;
        }
    }

    // ---- Binary ----

    /// Integers add; anything else concatenates as text.
    fn exec_plus(&mut self) -> Result<(), Fault> {
        let left = self.pop()?;
        let result = match (&left, &self.thread.current.register) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
            (l, r) => {
                let mut text = self.rt.text_of(l);
                text.push_str(&self.rt.text_of(r));
                Value::Str(text)
            }
        };
        self.set_register(result);
        Ok(())
    }

    /// Integer operator with the stack top on the left and the register on
    /// the right.
    fn exec_int_binary(&mut self, op: fn(i32, i32) -> Result<i32, Fault>) -> Result<(), Fault> {
        let left = self.pop()?.as_int()?;
        let right = self.frame().register.as_int()?;
        self.set_register(Value::Int(op(left, right)?));
        Ok(())
    }

    // ---- Index ----

    fn exec_index_get(&mut self) -> Result<(), Fault> {
        let container = self.pop()?;
        let value = match container {
            Value::Nothing => Value::Nothing,
            Value::Sequence(seq) => {
                let index = self.frame().register.as_int()?;
                seq.get(index)?
            }
            Value::Array(arr) => {
                let index = self.frame().register.as_int()?;
                arr.get(index)?
            }
            other => return Err(other.mismatch(ValueKind::Sequence).into()),
        };
        self.set_register(value);
        Ok(())
    }

    /// Container on top, value beneath it, index in the register.
    fn exec_index_set(&mut self) -> Result<(), Fault> {
        let container = self.pop()?;
        let value = self.pop()?;
        let index = self.frame().register.as_int()?;
        match container {
            Value::Sequence(seq) => seq.set(index, value)?,
            Value::Array(arr) => arr.set(index, value)?,
            other => return Err(other.mismatch(ValueKind::Sequence).into()),
        }
        Ok(())
    }

    fn exec_index_bump(&mut self, delta: i32) -> Result<(), Fault> {
        let container = self.pop()?;
        let index = self.frame().register.as_int()?;
        let mut element = match &container {
            Value::Sequence(seq) => seq.get(index)?,
            Value::Array(arr) => arr.get(index)?,
            other => return Err(other.mismatch(ValueKind::Sequence).into()),
        };
        let old = bump(&mut element, delta)?;
        match &container {
            Value::Sequence(seq) => seq.set(index, element)?,
            Value::Array(arr) => arr.set(index, element)?,
            _ => {}
        }
        self.set_register(Value::Int(old));
        Ok(())
    }
}

/// Add `delta` to an integer slot in place, returning its old value.
fn bump(slot: &mut Value, delta: i32) -> Result<i32, Fault> {
    let old = slot.as_int()?;
    *slot = Value::Int(old.wrapping_add(delta));
    Ok(old)
}
