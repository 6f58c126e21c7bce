//! The core built-in library.
//!
//! Timing, freezing, sequence and string helpers, random choice and thread
//! control.
//! Hosts add their own built-ins next to these with
//! [`BuiltinRegistry::register`].

use tickvm_common::{ArrayRef, SequenceRef, Value, ValueKind, ValueStack};

use crate::builtin::{Arity, BuiltinCall, BuiltinRegistry, Verdict};
use crate::error::Fault;

/// Fixed ids of the core built-ins.
pub mod ids {
    pub const PAUSE: u32 = 0;
    pub const COMPLETE_TIMERS: u32 = 1;
    pub const FREEZE: u32 = 2;
    pub const UNFREEZE: u32 = 3;
    pub const HOW_FROZEN: u32 = 4;
    pub const NEW_STACK: u32 = 5;
    pub const STACK_SIZE: u32 = 6;
    pub const COPY_STACK: u32 = 7;
    pub const PUSH_TO_STACK: u32 = 8;
    pub const ENQUEUE: u32 = 9;
    pub const POP_FROM_STACK: u32 = 10;
    pub const PEEK_START: u32 = 11;
    pub const PEEK_END: u32 = 12;
    pub const DELETE_FROM_STACK: u32 = 13;
    pub const DELETE_ALL_FROM_STACK: u32 = 14;
    pub const MAKE_FAST_ARRAY: u32 = 15;
    pub const SUBSTRING: u32 = 16;
    pub const STRING_LENGTH: u32 = 17;
    pub const SPAWN_SUB: u32 = 18;
    pub const CANCEL_SUB: u32 = 19;
    pub const CALL_EVENT: u32 = 20;
    pub const FETCH_EVENT: u32 = 21;
    pub const QUIT_WITH_FATAL_ERROR: u32 = 22;
    pub const PICK_ONE: u32 = 23;
    pub const RANDOM: u32 = 24;
    pub const WAIT: u32 = 25;
}

pub(crate) fn register_core(r: &mut BuiltinRegistry) {
    use ids::*;

    // ---- Timing and freezing ----
    r.register(PAUSE, "pause", Arity::Fixed(1), pause);
    r.register(COMPLETE_TIMERS, "completeTimers", Arity::Fixed(0), |call| {
        call.complete_timers();
        Ok(Verdict::Continue)
    });
    r.register(FREEZE, "freeze", Arity::Fixed(0), |call| {
        call.freeze_others();
        Ok(Verdict::Continue)
    });
    r.register(UNFREEZE, "unfreeze", Arity::Fixed(0), |call| {
        call.unfreeze();
        Ok(Verdict::Continue)
    });
    r.register(HOW_FROZEN, "howFrozen", Arity::Fixed(0), |call| {
        let depth = call.freeze_depth();
        call.set_result(depth as i32);
        Ok(Verdict::Continue)
    });

    // ---- Sequences ----
    r.register(NEW_STACK, "newStack", Arity::Variable, new_stack);
    r.register(STACK_SIZE, "stackSize", Arity::Fixed(1), stack_size);
    r.register(COPY_STACK, "copyStack", Arity::Fixed(1), |call| {
        let seq = call.pop_sequence()?;
        call.set_result(Value::Sequence(seq.deep_copy()));
        Ok(Verdict::Continue)
    });
    r.register(PUSH_TO_STACK, "pushToStack", Arity::Fixed(2), |call| {
        let value = call.pop()?;
        let seq = call.pop_sequence()?;
        seq.borrow_mut().push_front(value);
        Ok(Verdict::Continue)
    });
    r.register(ENQUEUE, "enqueue", Arity::Fixed(2), |call| {
        let value = call.pop()?;
        let seq = call.pop_sequence()?;
        seq.borrow_mut().push_back(value);
        Ok(Verdict::Continue)
    });
    r.register(POP_FROM_STACK, "popFromStack", Arity::Fixed(1), |call| {
        let seq = call.pop_sequence()?;
        let top = seq.borrow_mut().pop_front().ok_or(Fault::EmptySequence)?;
        call.set_result(top);
        Ok(Verdict::Continue)
    });
    r.register(PEEK_START, "peekStart", Arity::Fixed(1), |call| {
        let seq = call.pop_sequence()?;
        let first = seq.borrow().front().cloned().ok_or(Fault::EmptySequence)?;
        call.set_result(first);
        Ok(Verdict::Continue)
    });
    r.register(PEEK_END, "peekEnd", Arity::Fixed(1), |call| {
        let seq = call.pop_sequence()?;
        let last = seq.borrow().back().cloned().ok_or(Fault::EmptySequence)?;
        call.set_result(last);
        Ok(Verdict::Continue)
    });
    r.register(DELETE_FROM_STACK, "deleteFromStack", Arity::Fixed(2), |call| {
        let needle = call.pop()?;
        let seq = call.pop_sequence()?;
        let found = seq.borrow_mut().delete_first_equal(&needle);
        call.set_result(found);
        Ok(Verdict::Continue)
    });
    r.register(
        DELETE_ALL_FROM_STACK,
        "deleteAllFromStack",
        Arity::Fixed(2),
        |call| {
            let needle = call.pop()?;
            let seq = call.pop_sequence()?;
            let removed = seq.borrow_mut().delete_all_equal(&needle);
            call.set_result(removed as i32);
            Ok(Verdict::Continue)
        },
    );
    r.register(WAIT, "wait", Arity::Fixed(2), new_stack);
    r.register(MAKE_FAST_ARRAY, "makeFastArray", Arity::Fixed(1), |call| {
        let size = call.pop_int()?;
        let size = usize::try_from(size).map_err(|_| {
            Fault::ScriptFatal(format!("cannot create a fast array with {size} elements"))
        })?;
        call.set_result(Value::Array(ArrayRef::with_size(size)));
        Ok(Verdict::Continue)
    });

    // ---- Chance ----
    r.register(PICK_ONE, "pickOne", Arity::Variable, pick_one);
    r.register(RANDOM, "random", Arity::Fixed(1), |call| {
        let bound = call.pop_int()?.max(1) as u32;
        let n = call.host().random(bound);
        call.set_result(n as i32);
        Ok(Verdict::Continue)
    });

    // ---- Strings ----
    r.register(SUBSTRING, "substring", Arity::Fixed(3), |call| {
        let length = call.pop_int()?.max(0) as usize;
        let start = call.pop_int()?.max(0) as usize;
        let text = call.pop_text()?;
        let part: String = text.chars().skip(start).take(length).collect();
        call.set_result(part);
        Ok(Verdict::Continue)
    });
    r.register(STRING_LENGTH, "stringLength", Arity::Fixed(1), |call| {
        let text = call.pop_text()?;
        call.set_result(text.chars().count() as i32);
        Ok(Verdict::Continue)
    });

    // ---- Threads ----
    r.register(SPAWN_SUB, "spawnSub", Arity::Fixed(1), |call| {
        let function = call.pop_function()?;
        let id = call.spawn(function, Vec::new())?;
        call.set_result(id as i32);
        Ok(Verdict::Continue)
    });
    r.register(CANCEL_SUB, "cancelSub", Arity::Fixed(1), |call| {
        let function = call.pop_function()?;
        if call.cancel_function(function) {
            return Ok(call.abort_caller());
        }
        Ok(Verdict::Continue)
    });
    r.register(CALL_EVENT, "callEvent", Arity::Fixed(2), |call| {
        let second = call.pop_object_type()?;
        let first = call.pop_object_type()?;
        let handler = call.host().event_handler(first, second);
        match handler {
            Some(function) => {
                call.set_result(1);
                Ok(Verdict::ChainToFunction {
                    function,
                    args: Vec::new(),
                    returns_value: false,
                })
            }
            None => {
                call.set_result(0);
                Ok(Verdict::Continue)
            }
        }
    });
    r.register(FETCH_EVENT, "fetchEvent", Arity::Fixed(2), |call| {
        let second = call.pop_object_type()?;
        let first = call.pop_object_type()?;
        let handler = call.host().event_handler(first, second);
        call.set_result(handler.map_or(Value::Int(0), Value::Function));
        Ok(Verdict::Continue)
    });
    r.register(
        QUIT_WITH_FATAL_ERROR,
        "quitWithFatalError",
        Arity::Fixed(1),
        |call| Err(Fault::ScriptFatal(call.pop_text()?)),
    );
}

fn pause(call: &mut BuiltinCall<'_>) -> Result<Verdict, Fault> {
    let ticks = call.pop_int()?;
    if ticks > 0 {
        call.wait_ticks(ticks as u32 - 1);
        return Ok(Verdict::Pause);
    }
    Ok(Verdict::Continue)
}

/// Arguments keep their order: the first becomes the top.
fn new_stack(call: &mut BuiltinCall<'_>) -> Result<Verdict, Fault> {
    let mut stack = ValueStack::new();
    while call.args() > 0 {
        stack.push_front(call.pop()?);
    }
    call.set_result(Value::Sequence(SequenceRef::new(stack)));
    Ok(Verdict::Continue)
}

/// Answers one of the arguments, counted from the first pushed.
fn pick_one(call: &mut BuiltinCall<'_>) -> Result<Verdict, Fault> {
    let count = call.args();
    if count == 0 {
        return Err(Fault::ArityMismatch {
            expected: 1,
            found: 0,
        });
    }
    let chosen = call.host().random(count as u32) as usize;
    // Arguments pop last-first.
    let depth = count - 1 - chosen.min(count - 1);
    let value = call.peek(depth)?.clone();
    call.set_result(value);
    Ok(Verdict::Continue)
}

fn stack_size(call: &mut BuiltinCall<'_>) -> Result<Verdict, Fault> {
    let size = match call.pop()? {
        Value::Sequence(seq) => seq.len(),
        Value::Array(arr) => arr.len(),
        other => return Err(other.mismatch(ValueKind::Sequence).into()),
    };
    call.set_result(size as i32);
    Ok(Verdict::Continue)
}
