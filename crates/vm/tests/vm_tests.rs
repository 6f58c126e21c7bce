//! Integration tests for the tickvm scheduler and instruction loop.
//!
//! Scripts are written in assembly and run through the public
//! [`Scheduler`] API, the way a host drives the VM.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use proptest::prelude::*;
use tickvm::{
    Arity, BuiltinRegistry, Fault, FrameState, Host, NullHost, Scheduler, SnapshotError,
    ThreadId, Timer, Verdict, VmConfig,
};
use tickvm_assembler::assemble;
use tickvm_common::{ArrayRef, NameResolver, NoNames, Opcode, Value};

// ---- Test helpers ----

const CONFIG: VmConfig = VmConfig {
    globals: 8,
    max_call_depth: 32,
};

fn vm_with(text: &str, builtins: BuiltinRegistry, host: impl Host + 'static) -> Scheduler {
    Scheduler::new(assemble(text).unwrap(), builtins, host, CONFIG)
}

fn vm(text: &str) -> Scheduler {
    vm_with(text, BuiltinRegistry::with_core(), NullHost)
}

/// Tick until `thread` returns, failing after `limit` ticks.
fn run_until_returned(vm: &mut Scheduler, thread: ThreadId, limit: usize) -> Value {
    for _ in 0..limit {
        let report = vm.tick().unwrap();
        if let Some(value) = report.returned(thread) {
            return value.clone();
        }
    }
    panic!("thread {thread} did not return within {limit} ticks");
}

/// Built-in 100: always waits for an external event.
fn with_wait_builtin() -> BuiltinRegistry {
    let mut builtins = BuiltinRegistry::with_core();
    builtins.register(100, "waitForEvent", Arity::Fixed(0), |_| Ok(Verdict::Pause));
    builtins
}

/// Host whose speech flag and event table tests control.
#[derive(Default)]
struct TestHost {
    speaking: Rc<Cell<bool>>,
    handler: Option<u32>,
}

impl NameResolver for TestHost {
    fn object_type_name(&self, id: u32) -> Option<String> {
        Some(format!("object{id}"))
    }
}

impl Host for TestHost {
    fn speech_playing(&self) -> bool {
        self.speaking.get()
    }

    fn event_handler(&self, first: u32, second: u32) -> Option<u32> {
        match (first, second) {
            (1, 2) => self.handler,
            _ => None,
        }
    }
}

// ---- Scenarios ----

#[test]
fn integer_addition() {
    let mut vm = vm("
FUNC 0 0 0
    LOAD_VALUE 3
    PUSH
    LOAD_VALUE 4
    PLUS
    RETURN
ENDFUNC");
    let id = vm.start(0, vec![]).unwrap();
    let report = vm.tick().unwrap();
    assert_eq!(report.finished.len(), 1);
    assert_eq!(report.finished[0].state, FrameState::Returned);
    assert_eq!(report.returned(id), Some(&Value::Int(7)));
    assert!(vm.thread(id).is_none());
}

#[test]
fn string_coercion() {
    let mut vm = vm(r#"
FUNC 0 0 0
    LOAD_STRING "a"
    PUSH
    LOAD_VALUE 1
    PLUS
    RETURN
ENDFUNC"#);
    let id = vm.start(0, vec![]).unwrap();
    assert_eq!(run_until_returned(&mut vm, id, 1), Value::from("a1"));
}

#[test]
fn out_of_range_index_aborts_the_run() {
    let mut vm = vm("
FUNC 0 0 0
    LOAD_BUILTIN 5          ; newStack
    CALL 0
    PUSH
    LOAD_VALUE 0
    INDEX_GET
    RETURN
ENDFUNC");
    vm.start(0, vec![]).unwrap();
    let err = vm.tick().unwrap_err();
    assert_eq!(err.fault, Fault::IndexOutOfRange { index: 0, len: 0 });
    assert_eq!(err.opcode, Some(Opcode::IndexGet));
    assert_eq!(err.pc, 4);
    assert!(vm.is_idle());
}

#[test]
fn paused_builtin_waits_for_resume() {
    let mut vm = vm_with(
        "
FUNC 0 0 0
    LOAD_BUILTIN 100
    CALL 0
    PUSH
    LOAD_VALUE 10
    PLUS
    RETURN
ENDFUNC",
        with_wait_builtin(),
        NullHost,
    );
    let id = vm.start(0, vec![]).unwrap();

    for _ in 0..3 {
        vm.tick().unwrap();
        let frame = vm.thread(id).unwrap().current();
        assert_eq!(frame.state, FrameState::AwaitingExternalEvent);
        assert_eq!(frame.pc, 2);
    }

    vm.resume(id, Some(Value::Int(5))).unwrap();
    assert_eq!(run_until_returned(&mut vm, id, 1), Value::Int(15));
}

// ---- Dispatch boundary ----

#[test]
fn pause_and_retry_reruns_the_call() {
    let attempts = Rc::new(Cell::new(0));
    let mut builtins = BuiltinRegistry::new();
    let seen = attempts.clone();
    builtins.register(101, "takeWhenReady", Arity::Fixed(1), move |call| {
        seen.set(seen.get() + 1);
        if seen.get() < 3 {
            return Ok(Verdict::PauseAndRetryInstruction);
        }
        let n = call.pop_int()?;
        call.set_result(n * 2);
        Ok(Verdict::Continue)
    });
    let mut vm = vm_with(
        "
FUNC 0 0 0
    LOAD_VALUE 21
    PUSH
    LOAD_BUILTIN 101
    CALL 1
    RETURN
ENDFUNC",
        builtins,
        NullHost,
    );
    let id = vm.start(0, vec![]).unwrap();

    for tries in 1..=2 {
        vm.tick().unwrap();
        assert_eq!(attempts.get(), tries);
        let frame = vm.thread(id).unwrap().current();
        assert_eq!(frame.pc, 3);
        assert_eq!(frame.register, Value::Builtin(101));
        assert_eq!(frame.stack.len(), 1);
        vm.resume(id, None).unwrap();
    }
    assert_eq!(run_until_returned(&mut vm, id, 1), Value::Int(42));
}

#[test]
fn resume_value_does_not_clobber_a_pending_retry() {
    let attempts = Rc::new(Cell::new(0));
    let mut builtins = BuiltinRegistry::new();
    let seen = attempts.clone();
    builtins.register(101, "takeWhenReady", Arity::Fixed(1), move |call| {
        seen.set(seen.get() + 1);
        if seen.get() == 1 {
            return Ok(Verdict::PauseAndRetryInstruction);
        }
        let n = call.pop_int()?;
        call.set_result(n * 2);
        Ok(Verdict::Continue)
    });
    let mut vm = vm_with(
        "
FUNC 0 0 0
    LOAD_VALUE 21
    PUSH
    LOAD_BUILTIN 101
    CALL 1
    RETURN
ENDFUNC",
        builtins,
        NullHost,
    );
    let id = vm.start(0, vec![]).unwrap();

    vm.tick().unwrap();
    assert!(vm.thread(id).unwrap().current().retry_pending);
    vm.resume(id, Some(Value::Int(7))).unwrap();
    let frame = vm.thread(id).unwrap().current();
    assert_eq!(frame.state, FrameState::Runnable);
    assert_eq!(frame.register, Value::Builtin(101));

    assert_eq!(run_until_returned(&mut vm, id, 1), Value::Int(42));
    assert_eq!(attempts.get(), 2);
}

#[test]
fn resume_value_replaces_the_register_after_a_plain_pause() {
    let mut vm = vm_with(
        "
FUNC 0 0 0
    LOAD_BUILTIN 100
    CALL 0
    RETURN
ENDFUNC",
        with_wait_builtin(),
        NullHost,
    );
    let id = vm.start(0, vec![]).unwrap();
    vm.tick().unwrap();
    assert!(!vm.thread(id).unwrap().current().retry_pending);
    vm.resume(id, Some(Value::Int(7))).unwrap();
    assert_eq!(run_until_returned(&mut vm, id, 1), Value::Int(7));
}

#[test]
fn builtin_arity_is_checked_before_running() {
    let mut vm = vm("
FUNC 0 0 0
    LOAD_VALUE 1
    PUSH
    LOAD_VALUE 2
    PUSH
    LOAD_BUILTIN 6          ; stackSize takes one argument
    CALL 2
    RETURN
ENDFUNC");
    vm.start(0, vec![]).unwrap();
    let err = vm.tick().unwrap_err();
    assert_eq!(
        err.fault,
        Fault::ArityMismatch {
            expected: 1,
            found: 2
        }
    );
    assert_eq!(err.opcode, Some(Opcode::Call));
}

#[test]
fn unconsumed_arguments_are_discarded() {
    let mut builtins = BuiltinRegistry::new();
    builtins.register(102, "ignoreAll", Arity::Variable, |_| Ok(Verdict::Continue));
    let mut vm = vm_with(
        "
FUNC 0 0 0
    LOAD_VALUE 1
    PUSH
    LOAD_VALUE 2
    PUSH
    LOAD_BUILTIN 102
    CALL 2
    RETURN
ENDFUNC",
        builtins,
        NullHost,
    );
    let id = vm.start(0, vec![]).unwrap();
    assert_eq!(run_until_returned(&mut vm, id, 1), Value::Nothing);
}

#[test]
fn call_event_chains_into_the_handler() {
    let host = TestHost {
        handler: Some(2),
        ..TestHost::default()
    };
    let mut vm = vm_with(
        "
FUNC 0 0 0
    LOAD_OBJECT_TYPE 1
    PUSH
    LOAD_OBJECT_TYPE 2
    PUSH
    LOAD_BUILTIN 20         ; callEvent
    CALL 2
    RETURN
ENDFUNC
FUNC 2 0 0
    LOAD_VALUE 99
    SET_GLOBAL 0
    LOAD_VALUE 7
    RETURN
ENDFUNC",
        BuiltinRegistry::with_core(),
        host,
    );
    let id = vm.start(0, vec![]).unwrap();
    // The handler ran, but its result is not copied back.
    assert_eq!(run_until_returned(&mut vm, id, 1), Value::Int(1));
    assert_eq!(vm.global(0), Ok(&Value::Int(99)));
}

#[test]
fn call_event_without_handler_answers_zero() {
    let mut vm = vm_with(
        "
FUNC 0 0 0
    LOAD_OBJECT_TYPE 2
    PUSH
    LOAD_OBJECT_TYPE 1
    PUSH
    LOAD_BUILTIN 20
    CALL 2
    RETURN
ENDFUNC",
        BuiltinRegistry::with_core(),
        TestHost {
            handler: Some(2),
            ..TestHost::default()
        },
    );
    let id = vm.start(0, vec![]).unwrap();
    assert_eq!(run_until_returned(&mut vm, id, 1), Value::Int(0));
}

#[test]
fn fetch_event_and_host_names() {
    let mut vm = vm_with(
        "
FUNC 0 0 0
    LOAD_OBJECT_TYPE 1
    PUSH
    LOAD_OBJECT_TYPE 2
    PUSH
    LOAD_BUILTIN 21         ; fetchEvent
    CALL 2
    SET_GLOBAL 0
    LOAD_OBJECT_TYPE 3
    PUSH
    LOAD_STRING \"!\"
    PLUS
    RETURN
ENDFUNC",
        BuiltinRegistry::with_core(),
        TestHost {
            handler: Some(2),
            ..TestHost::default()
        },
    );
    let id = vm.start(0, vec![]).unwrap();
    assert_eq!(run_until_returned(&mut vm, id, 1), Value::from("object3!"));
    assert_eq!(vm.global(0), Ok(&Value::Function(2)));
}

#[test]
fn speech_wait_polls_the_host() {
    let speaking = Rc::new(Cell::new(true));
    let mut builtins = BuiltinRegistry::new();
    builtins.register(103, "waitForSpeech", Arity::Fixed(0), |call| {
        call.wait_for_speech();
        Ok(Verdict::Pause)
    });
    let host = TestHost {
        speaking: speaking.clone(),
        handler: None,
    };
    let mut vm = vm_with(
        "
FUNC 0 0 0
    LOAD_BUILTIN 103
    CALL 0
    LOAD_VALUE 1
    RETURN
ENDFUNC",
        builtins,
        host,
    );
    let id = vm.start(0, vec![]).unwrap();
    vm.tick().unwrap();
    assert_eq!(vm.thread(id).unwrap().current().timer, Timer::UntilSpeechEnds);
    assert_eq!(vm.thread(id).unwrap().current().state, FrameState::Runnable);
    for _ in 0..3 {
        assert!(vm.tick().unwrap().ran.is_empty());
    }
    speaking.set(false);
    // One tick to notice, one to run.
    assert!(vm.tick().unwrap().ran.is_empty());
    assert_eq!(run_until_returned(&mut vm, id, 1), Value::Int(1));
}

// ---- Calls ----

#[test]
fn call_return_keeps_caller_stack_balanced() {
    let mut vm = vm_with(
        "
FUNC 0 0 0
    LOAD_VALUE 5
    PUSH                    ; pending operand for PLUS below
    LOAD_VALUE 10
    PUSH
    LOAD_VALUE 20
    PUSH
    LOAD_FUNCTION 1
    CALL 2
    PLUS
    RETURN
ENDFUNC
FUNC 1 2 1
    LOAD_BUILTIN 100
    CALL 0
    LOAD_LOCAL 0
    PUSH
    LOAD_LOCAL 1
    MINUS
    RETURN
ENDFUNC",
        with_wait_builtin(),
        NullHost,
    );
    let id = vm.start(0, vec![]).unwrap();
    vm.tick().unwrap();

    let thread = vm.thread(id).unwrap();
    assert_eq!(thread.depth(), 2);
    let callee = thread.current();
    assert_eq!(
        callee.locals,
        vec![Value::Int(10), Value::Int(20), Value::Nothing]
    );
    assert!(callee.returns_value);
    assert_eq!(thread.callers()[0].stack.len(), 1);

    vm.resume(id, None).unwrap();
    // 5 + (10 - 20)
    assert_eq!(run_until_returned(&mut vm, id, 1), Value::Int(-5));
}

#[test]
fn calling_with_wrong_arity_is_fatal() {
    let mut vm = vm("
FUNC 0 0 0
    LOAD_VALUE 1
    PUSH
    LOAD_FUNCTION 1
    CALL 1
    RETURN
ENDFUNC
FUNC 1 2 0
    RETURN
ENDFUNC");
    vm.start(0, vec![]).unwrap();
    let err = vm.tick().unwrap_err();
    assert_eq!(
        err.fault,
        Fault::ArityMismatch {
            expected: 2,
            found: 1
        }
    );
}

#[test]
fn runaway_recursion_hits_the_depth_limit() {
    let mut vm = vm("
FUNC 0 0 0
    LOAD_FUNCTION 0
    CALL 0
    RETURN
ENDFUNC");
    vm.start(0, vec![]).unwrap();
    let err = vm.tick().unwrap_err();
    assert_eq!(err.fault, Fault::CallDepthExceeded { limit: 32 });
}

#[test]
fn and_or_are_eager_integer_ops() {
    let mut vm = vm("
FUNC 0 0 0
    LOAD_VALUE 7
    PUSH
    LOAD_NULL
    OR                      ; 1
    PUSH
    LOAD_VALUE 0
    AND                     ; 0
    NOT                     ; 1
    PUSH
    LOAD_VALUE 3
    NEGATIVE
    MULTIPLY                ; -3
    RETURN
ENDFUNC");
    let id = vm.start(0, vec![]).unwrap();
    assert_eq!(run_until_returned(&mut vm, id, 1), Value::Int(-3));
}

#[test]
fn index_ops_on_arrays_and_sequences() {
    // arr = makeFastArray(2); arr[1] = 40; arr[1]++; seq = newStack(arr[1]);
    // return seq[0] + stackSize(arr)
    let mut vm = vm("
FUNC 0 0 2
    LOAD_VALUE 2
    PUSH
    LOAD_BUILTIN 15         ; makeFastArray
    CALL 1
    SET_LOCAL 0
    LOAD_VALUE 40
    PUSH
    LOAD_LOCAL 0
    PUSH
    LOAD_VALUE 1
    INDEX_SET
    LOAD_LOCAL 0
    PUSH
    LOAD_VALUE 1
    INDEX_INCREMENT         ; register holds 40
    LOAD_LOCAL 0
    PUSH
    LOAD_VALUE 1
    INDEX_GET               ; 41
    PUSH
    LOAD_BUILTIN 5          ; newStack
    CALL 1
    SET_LOCAL 1
    LOAD_LOCAL 1
    PUSH
    LOAD_VALUE 0
    INDEX_GET
    PUSH
    LOAD_LOCAL 0
    PUSH
    LOAD_BUILTIN 6          ; stackSize
    CALL 1
    PLUS
    RETURN
ENDFUNC");
    let id = vm.start(0, vec![]).unwrap();
    assert_eq!(run_until_returned(&mut vm, id, 1), Value::Int(43));
}

// ---- Scheduling ----

#[test]
fn threads_run_in_start_order() {
    let mut vm = vm("
FUNC 0 0 0
    LOAD_VALUE 1
    SET_GLOBAL 0
    RETURN
ENDFUNC
FUNC 1 0 0
    LOAD_GLOBAL 0
    RETURN
ENDFUNC");
    let writer = vm.start(0, vec![]).unwrap();
    let reader = vm.start(1, vec![]).unwrap();
    let report = vm.tick().unwrap();
    assert_eq!(report.ran, vec![writer, reader]);
    assert_eq!(report.returned(reader), Some(&Value::Int(1)));
}


#[test]
fn pause_counts_whole_ticks() {
    let mut vm = vm("
FUNC 0 0 0
    LOAD_VALUE 3
    PUSH
    LOAD_BUILTIN 0          ; pause(3)
    CALL 1
    LOAD_VALUE 1
    RETURN
ENDFUNC");
    let id = vm.start(0, vec![]).unwrap();
    assert_eq!(vm.tick().unwrap().ran, vec![id]);
    for _ in 0..2 {
        let report = vm.tick().unwrap();
        assert!(report.ran.is_empty());
    }
    assert_eq!(vm.tick().unwrap().returned(id), Some(&Value::Int(1)));
}

#[test]
fn complete_timers_wakes_sleepers() {
    let mut vm = vm("
FUNC 0 0 0
    LOAD_VALUE 100
    PUSH
    LOAD_BUILTIN 0          ; pause(100)
    CALL 1
    LOAD_VALUE 1
    RETURN
ENDFUNC
FUNC 1 0 0
    LOAD_BUILTIN 1          ; completeTimers
    CALL 0
    RETURN
ENDFUNC");
    let sleeper = vm.start(0, vec![]).unwrap();
    vm.start(1, vec![]).unwrap();
    vm.tick().unwrap();
    assert_eq!(vm.thread(sleeper).unwrap().current().timer, Timer::Idle);
    assert_eq!(vm.tick().unwrap().returned(sleeper), Some(&Value::Int(1)));
}

const FREEZER: &str = "
FUNC 0 0 0
    LOAD_BUILTIN 2          ; freeze
    CALL 0
    LOAD_BUILTIN 4          ; howFrozen
    CALL 0
    SET_GLOBAL 0
    LOAD_VALUE 1
    PUSH
    LOAD_BUILTIN 0          ; pause(1)
    CALL 1
    LOAD_BUILTIN 3          ; unfreeze
    CALL 0
    RETURN
ENDFUNC
FUNC 1 0 0
    LOAD_VALUE 5
    SET_GLOBAL 1
    RETURN
ENDFUNC
FUNC 2 0 0 UNFREEZABLE
    LOAD_VALUE 6
    SET_GLOBAL 2
    RETURN
ENDFUNC";

#[test]
fn script_freeze_holds_other_threads() {
    let mut vm = vm(FREEZER);
    let freezer = vm.start(0, vec![]).unwrap();
    let victim = vm.start(1, vec![]).unwrap();

    let report = vm.tick().unwrap();
    assert_eq!(report.ran, vec![freezer]);
    assert_eq!(vm.global(0), Ok(&Value::Int(1)));
    assert_eq!(vm.global(1), Ok(&Value::Nothing));
    assert_eq!(vm.freeze_depth(), 1);
    assert_eq!(vm.thread(victim).unwrap().current().freezer_level, 1);
    assert_eq!(vm.thread(freezer).unwrap().current().freezer_level, 0);

    // The freezer lifts the freeze and the victim runs in the same tick.
    let report = vm.tick().unwrap();
    assert_eq!(report.ran, vec![freezer, victim]);
    assert_eq!(vm.global(1), Ok(&Value::Int(5)));
    assert_eq!(vm.freeze_depth(), 0);
    assert!(vm.is_idle());
}

#[test]
fn unfreezable_threads_ignore_freezes() {
    let mut vm = vm(FREEZER);
    let held = vm.start(1, vec![]).unwrap();
    let free = vm.start(2, vec![]).unwrap();
    vm.freeze();
    let report = vm.tick().unwrap();
    assert_eq!(report.ran, vec![free]);
    assert_eq!(vm.global(2), Ok(&Value::Int(6)));
    assert!(vm.thread(held).is_some());
}

const COUNTER: &str = "
FUNC 0 0 1
    LOAD_VALUE 0
    SET_LOCAL 0
    INCREMENT_LOCAL 0       ; 2: loop
    LOAD_LOCAL 0
    SET_GLOBAL 0
    LOAD_VALUE 1
    PUSH
    LOAD_BUILTIN 0          ; pause(1)
    CALL 1
    BRANCH 2
ENDFUNC";

#[test]
fn freeze_then_unfreeze_changes_nothing() {
    let mut plain = vm(COUNTER);
    let mut frozen = vm(COUNTER);
    plain.start(0, vec![]).unwrap();
    frozen.start(0, vec![]).unwrap();

    plain.tick().unwrap();
    frozen.freeze();
    for _ in 0..3 {
        assert!(frozen.tick().unwrap().ran.is_empty());
    }
    frozen.unfreeze();
    frozen.tick().unwrap();

    assert_eq!(frozen.global(0), Ok(&Value::Int(1)));
    assert_eq!(plain.save_snapshot(), frozen.save_snapshot());
}

#[test]
fn cancel_sub_of_own_function_aborts_at_once() {
    let mut vm = vm("
FUNC 0 0 0
    LOAD_FUNCTION 0
    PUSH
    LOAD_BUILTIN 19         ; cancelSub
    CALL 1
    LOAD_VALUE 1
    SET_GLOBAL 0
    RETURN
ENDFUNC");
    let id = vm.start(0, vec![]).unwrap();
    let report = vm.tick().unwrap();
    assert!(report.aborted(id));
    assert_eq!(report.returned(id), None);
    assert_eq!(vm.global(0), Ok(&Value::Nothing));
    assert!(vm.is_idle());
}

#[test]
fn cancel_sub_stops_other_threads_next_visit() {
    let mut vm = vm("
FUNC 0 0 0
    LOAD_FUNCTION 1
    PUSH
    LOAD_BUILTIN 19         ; cancelSub
    CALL 1
    RETURN
ENDFUNC
FUNC 1 0 0
    LOAD_VALUE 1            ; 0: loop
    PUSH
    LOAD_BUILTIN 0          ; pause(1)
    CALL 1
    BRANCH 0
ENDFUNC");
    let looper = vm.start(1, vec![]).unwrap();
    let canceller = vm.start(0, vec![]).unwrap();

    let report = vm.tick().unwrap();
    assert_eq!(report.ran, vec![looper, canceller]);
    assert_eq!(report.returned(canceller), Some(&Value::Nothing));
    assert!(vm.thread(looper).unwrap().current().cancel_requested);

    let report = vm.tick().unwrap();
    assert!(report.ran.is_empty());
    assert!(report.aborted(looper));
    assert!(vm.is_idle());
}

#[test]
fn spawn_sub_runs_on_the_next_tick() {
    let mut vm = vm("
FUNC 0 0 0
    LOAD_FUNCTION 1
    PUSH
    LOAD_BUILTIN 18         ; spawnSub
    CALL 1
    RETURN
ENDFUNC
FUNC 1 0 0
    LOAD_VALUE 8
    RETURN
ENDFUNC");
    let parent = vm.start(0, vec![]).unwrap();
    let report = vm.tick().unwrap();
    assert_eq!(report.ran, vec![parent]);
    assert_eq!(report.returned(parent), Some(&Value::Int(2)));
    assert!(vm.thread(2).is_some());

    let report = vm.tick().unwrap();
    assert_eq!(report.ran, vec![2]);
    assert_eq!(report.returned(2), Some(&Value::Int(8)));
}

// ---- Fatal errors ----

#[test]
fn quit_with_fatal_error_halts_until_restore() {
    let mut vm = vm(r#"
FUNC 0 0 0
    LOAD_STRING "boom"
    PUSH
    LOAD_BUILTIN 22         ; quitWithFatalError
    CALL 1
    RETURN
ENDFUNC
FUNC 1 0 0
    LOAD_VALUE 1
    PUSH
    LOAD_BUILTIN 0
    CALL 1
    RETURN
ENDFUNC"#);
    let bystander = vm.start(1, vec![]).unwrap();
    let before = vm.save_snapshot();
    vm.start(0, vec![]).unwrap();

    let err = vm.tick().unwrap_err();
    assert_eq!(err.fault, Fault::ScriptFatal("boom".into()));
    assert_eq!(err.function, 0);
    assert_eq!(err.pc, 3);
    assert_eq!(err.opcode, Some(Opcode::Call));
    assert_eq!(vm.halted(), Some(&err));
    assert!(vm.is_idle());
    assert_eq!(vm.tick().unwrap_err(), err);

    vm.restore_snapshot(&before).unwrap();
    assert!(vm.halted().is_none());
    assert!(vm.thread(bystander).is_some());
    vm.tick().unwrap();
    assert_eq!(vm.tick().unwrap().returned(bystander), Some(&Value::Nothing));
}

// ---- Chance ----

/// Host whose random numbers are always `self.0`, capped to the bound.
struct LoadedDice(u32);

impl NameResolver for LoadedDice {}

impl Host for LoadedDice {
    fn random(&self, bound: u32) -> u32 {
        self.0.min(bound - 1)
    }
}

const PICK_ONE: &str = "
FUNC 0 0 0
    LOAD_VALUE 10
    PUSH
    LOAD_VALUE 20
    PUSH
    LOAD_VALUE 30
    PUSH
    LOAD_BUILTIN 23         ; pickOne
    CALL 3
    RETURN
ENDFUNC";

#[test]
fn pick_one_counts_from_the_first_argument() {
    for (roll, expected) in [(0, 10), (1, 20), (2, 30)] {
        let mut vm = vm_with(PICK_ONE, BuiltinRegistry::with_core(), LoadedDice(roll));
        let id = vm.start(0, vec![]).unwrap();
        assert_eq!(run_until_returned(&mut vm, id, 1), Value::Int(expected));
    }
}

#[test]
fn pick_one_without_arguments_is_fatal() {
    let mut vm = vm("
FUNC 0 0 0
    LOAD_BUILTIN 23
    CALL 0
    RETURN
ENDFUNC");
    vm.start(0, vec![]).unwrap();
    let err = vm.tick().unwrap_err();
    assert_eq!(
        err.fault,
        Fault::ArityMismatch {
            expected: 1,
            found: 0
        }
    );
}

fn random_script(bound: i32) -> String {
    format!(
        "
FUNC 0 0 0
    LOAD_VALUE {bound}
    PUSH
    LOAD_BUILTIN 24         ; random
    CALL 1
    RETURN
ENDFUNC"
    )
}

#[test]
fn random_asks_the_host() {
    let mut vm = vm_with(&random_script(6), BuiltinRegistry::with_core(), LoadedDice(4));
    let id = vm.start(0, vec![]).unwrap();
    assert_eq!(run_until_returned(&mut vm, id, 1), Value::Int(4));

    // A bound below one acts as one.
    let mut vm = vm_with(&random_script(-3), BuiltinRegistry::with_core(), LoadedDice(4));
    let id = vm.start(0, vec![]).unwrap();
    assert_eq!(run_until_returned(&mut vm, id, 1), Value::Int(0));
}

#[test]
fn default_random_stays_in_range() {
    let mut vm = vm(&random_script(5));
    for _ in 0..50 {
        let id = vm.start(0, vec![]).unwrap();
        let n = run_until_returned(&mut vm, id, 1).as_int().unwrap();
        assert!((0..5).contains(&n), "{n} out of range");
    }
}

#[test]
fn wait_builds_a_pair() {
    let mut vm = vm("
FUNC 0 0 0
    LOAD_VALUE 1
    PUSH
    LOAD_VALUE 2
    PUSH
    LOAD_BUILTIN 25         ; wait
    CALL 2
    RETURN
ENDFUNC");
    let id = vm.start(0, vec![]).unwrap();
    let pair = run_until_returned(&mut vm, id, 1);
    assert_eq!(pair.to_text(&NoNames), "ARRAY: 1 2");
}

// ---- Snapshots ----

/// Scheduler with built-in 1000 appending its argument to a shared log.
fn printing_vm(text: &str) -> (Scheduler, Rc<RefCell<Vec<String>>>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    let mut builtins = BuiltinRegistry::with_core();
    builtins.register(1000, "print", Arity::Fixed(1), move |call| {
        let line = call.pop_text()?;
        sink.borrow_mut().push(line);
        Ok(Verdict::Continue)
    });
    (vm_with(text, builtins, NullHost), log)
}

const COUNTDOWN: &str = include_str!("../../../demos/countdown.tks");

#[test]
fn countdown_demo_prints_once_per_tick() {
    let (mut vm, log) = printing_vm(COUNTDOWN);
    let id = vm.start(0, vec![]).unwrap();
    for expected in ["3", "2", "1"] {
        assert!(vm.tick().unwrap().finished.is_empty());
        assert_eq!(log.borrow().last().map(String::as_str), Some(expected));
    }
    assert_eq!(vm.tick().unwrap().returned(id), Some(&Value::from("done")));
    assert_eq!(log.borrow().len(), 3);
}

#[test]
fn restored_run_matches_uninterrupted_run() {
    let (mut whole, whole_log) = printing_vm(COUNTDOWN);
    let id = whole.start(0, vec![]).unwrap();
    let expected = run_until_returned(&mut whole, id, 10);

    let (mut first, first_log) = printing_vm(COUNTDOWN);
    first.start(0, vec![]).unwrap();
    first.tick().unwrap();
    first.tick().unwrap();
    let bytes = first.save_snapshot();

    let (mut second, second_log) = printing_vm(COUNTDOWN);
    second.restore_snapshot(&bytes).unwrap();
    assert_eq!(run_until_returned(&mut second, id, 10), expected);

    let mut combined = first_log.borrow().clone();
    combined.extend(second_log.borrow().iter().cloned());
    assert_eq!(combined, *whole_log.borrow());
    // New threads never reuse a restored id.
    assert_eq!(second.start(0, vec![]).unwrap(), 2);
}

const DOUBLER: &str = "
FUNC 0 0 0
    LOAD_VALUE 2
    PUSH
    LOAD_FUNCTION 1
    CALL 1
    RETURN
ENDFUNC
FUNC 1 1 0
    LOAD_BUILTIN 100
    CALL 0
    PUSH
    LOAD_LOCAL 0
    MULTIPLY
    RETURN
ENDFUNC";

#[test]
fn snapshot_keeps_paused_call_chain() {
    let mut vm = vm_with(
        DOUBLER,
        with_wait_builtin(),
        NullHost,
    );
    let id = vm.start(0, vec![]).unwrap();
    vm.tick().unwrap();
    let bytes = vm.save_snapshot();

    let mut copy = vm_with(
        DOUBLER,
        with_wait_builtin(),
        NullHost,
    );
    copy.restore_snapshot(&bytes).unwrap();
    let thread = copy.thread(id).unwrap();
    assert_eq!(thread.depth(), 2);
    assert_eq!(thread.current().state, FrameState::AwaitingExternalEvent);
    assert_eq!(thread.current().pc, 2);
    assert_eq!(thread.current().locals, vec![Value::Int(2)]);

    copy.resume(id, Some(Value::Int(21))).unwrap();
    assert_eq!(run_until_returned(&mut copy, id, 1), Value::Int(42));
}

#[test]
fn deeply_nested_globals_save_and_fail_restore_cleanly() {
    let mut deep = Value::Nothing;
    for _ in 0..200_000 {
        deep = Value::sequence([deep]);
    }
    let mut source = vm(COUNTER);
    source.set_global(0, deep).unwrap();
    let bytes = source.save_snapshot();

    let mut other = vm(COUNTER);
    other.start(0, vec![]).unwrap();
    let err = other.restore_snapshot(&bytes).unwrap_err();
    assert!(matches!(err, SnapshotError::TooDeep { what: "containers", .. }));
    assert!(other.thread(1).is_some());
    assert_eq!(other.global(0), Ok(&Value::Nothing));
}

#[test]
fn restore_rejects_mismatched_globals_and_keeps_state() {
    let mut small = Scheduler::new(
        assemble(COUNTER).unwrap(),
        BuiltinRegistry::with_core(),
        NullHost,
        VmConfig {
            globals: 2,
            ..CONFIG
        },
    );
    let mut vm = vm(COUNTER);
    vm.start(0, vec![]).unwrap();
    let bytes = vm.save_snapshot();

    small.start(0, vec![]).unwrap();
    let err = small.restore_snapshot(&bytes).unwrap_err();
    assert_eq!(
        err,
        SnapshotError::GlobalCountMismatch {
            expected: 2,
            found: 8
        }
    );
    assert!(small.thread(1).is_some());
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Nothing),
        any::<i32>().prop_map(Value::Int),
        "[a-z ]{0,8}".prop_map(Value::Str),
        any::<u32>().prop_map(Value::Function),
        any::<u32>().prop_map(Value::ObjectType),
        any::<u32>().prop_map(Value::Costume),
    ]
}

/// Containers, some holding each other, and which one each global slot
/// refers to. Out-of-range picks become plain integers.
fn arb_globals() -> impl Strategy<Value = Vec<Value>> {
    (
        prop::collection::vec((prop::collection::vec(arb_scalar(), 0..4), any::<bool>()), 1..4),
        prop::collection::vec(0usize..6, 7),
        any::<bool>(),
    )
        .prop_map(|(specs, picks, nest)| {
            let containers: Vec<Value> = specs
                .into_iter()
                .map(|(items, is_array)| {
                    if is_array {
                        Value::Array(ArrayRef::from_values(items))
                    } else {
                        Value::sequence(items)
                    }
                })
                .collect();
            if nest {
                if let Value::Sequence(outer) = &containers[0] {
                    // Includes the outer sequence itself.
                    for inner in &containers {
                        outer.borrow_mut().push_back(inner.clone());
                    }
                }
            }
            picks
                .into_iter()
                .map(|pick| match containers.get(pick) {
                    Some(value) => value.clone(),
                    None => Value::Int(pick as i32),
                })
                .collect()
        })
}

proptest! {
    #[test]
    fn snapshot_restore_save_is_identity(globals in arb_globals()) {
        let mut original = vm(COUNTER);
        original.start(0, vec![]).unwrap();
        original.tick().unwrap();
        for (slot, value) in globals.iter().enumerate() {
            original.set_global(slot as u32 + 1, value.clone()).unwrap();
        }
        let bytes = original.save_snapshot();

        let mut copy = vm(COUNTER);
        copy.restore_snapshot(&bytes).unwrap();
        prop_assert_eq!(copy.save_snapshot(), bytes);

        // Sharing survives: two slots hold the same container after the
        // restore exactly when they did before.
        for a in 1..8 {
            for b in 1..8 {
                let before = original.global(a).unwrap() == original.global(b).unwrap();
                let after = copy.global(a).unwrap() == copy.global(b).unwrap();
                prop_assert_eq!(before, after);
            }
        }
    }
}
