//! Call frames and threads.
//!
//! A thread is one top-level script activation plus everything it has
//! called. Its frames form a stack: `current` is the innermost frame and
//! `callers` holds the rest, outermost first. Returning pops the stack;
//! aborting drops all of it.

use std::rc::Rc;

use tickvm_common::{FunctionBody, Value, ValueStack};

use crate::error::Fault;

/// Identifies a thread for the lifetime of a scheduler.
pub type ThreadId = u32;

/// Lifecycle of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Will execute when the scheduler next visits it.
    Runnable,
    /// Parked until the host calls `Scheduler::resume`.
    AwaitingExternalEvent,
    /// Finished through RETURN.
    Returned,
    /// Dropped by cancellation or by a built-in.
    Aborted,
}

/// Countdown gating re-entry into a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timer {
    #[default]
    Idle,
    /// Skip this many more ticks.
    Ticks(u32),
    /// Skip ticks until the host reports speech has finished.
    UntilSpeechEnds,
}

impl Timer {
    /// A countdown of `n` ticks. Zero is idle.
    pub fn ticks(n: u32) -> Self {
        if n == 0 {
            Timer::Idle
        } else {
            Timer::Ticks(n)
        }
    }

    /// Snapshot encoding: 0 idle, n > 0 ticks, -1 speech.
    pub fn to_raw(self) -> i32 {
        match self {
            Timer::Idle => 0,
            Timer::Ticks(n) => n.min(i32::MAX as u32) as i32,
            Timer::UntilSpeechEnds => -1,
        }
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Timer::Idle),
            -1 => Some(Timer::UntilSpeechEnds),
            n if n > 0 => Some(Timer::Ticks(n as u32)),
            _ => None,
        }
    }
}

/// One activation of a user function.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Id of the function this frame runs.
    pub function: u32,
    /// Shared, never mutated bytecode.
    pub body: Rc<FunctionBody>,
    /// Index of the next instruction.
    pub pc: usize,
    /// Arguments first, then declared locals.
    pub locals: Vec<Value>,
    /// The accumulator.
    pub register: Value,
    /// Operands and pending call arguments.
    pub stack: ValueStack,
    pub timer: Timer,
    pub freezer_level: u16,
    pub cancel_requested: bool,
    pub unfreezable: bool,
    /// Copy the register into the caller's on RETURN.
    pub returns_value: bool,
    /// Parked on a built-in that asked to run its CALL again. The register
    /// holds that built-in until the retry.
    pub retry_pending: bool,
    pub state: FrameState,
}

impl Frame {
    /// Build a frame with `args` bound into the first local slots.
    pub fn new(function: u32, body: Rc<FunctionBody>, args: Vec<Value>) -> Result<Self, Fault> {
        if args.len() != body.arg_count as usize {
            return Err(Fault::ArityMismatch {
                expected: body.arg_count as usize,
                found: args.len(),
            });
        }
        let mut locals = args;
        locals.resize(body.frame_size(), Value::Nothing);
        Ok(Self {
            function,
            unfreezable: body.unfreezable,
            body,
            pc: 0,
            locals,
            register: Value::Nothing,
            stack: ValueStack::new(),
            timer: Timer::Idle,
            freezer_level: 0,
            cancel_requested: false,
            returns_value: false,
            retry_pending: false,
            state: FrameState::Runnable,
        })
    }

    pub fn is_frozen(&self) -> bool {
        self.freezer_level > 0
    }
}

/// A top-level script and its call chain.
#[derive(Debug, Clone)]
pub struct Thread {
    pub id: ThreadId,
    pub(crate) current: Frame,
    pub(crate) callers: Vec<Frame>,
}

impl Thread {
    pub fn new(id: ThreadId, frame: Frame) -> Self {
        Self {
            id,
            current: frame,
            callers: Vec::new(),
        }
    }

    /// The innermost frame.
    pub fn current(&self) -> &Frame {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut Frame {
        &mut self.current
    }

    /// Frames waiting on a callee, outermost first.
    pub fn callers(&self) -> &[Frame] {
        &self.callers
    }

    /// Number of frames in the chain.
    pub fn depth(&self) -> usize {
        self.callers.len() + 1
    }

    /// All frames, outermost first.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.callers.iter().chain(std::iter::once(&self.current))
    }

    /// Make `callee` current, suspending the present frame beneath it.
    pub(crate) fn push(&mut self, callee: Frame) {
        let caller = std::mem::replace(&mut self.current, callee);
        self.callers.push(caller);
    }

    /// Drop the current frame and resume its caller, if there is one.
    pub(crate) fn pop(&mut self) -> Option<Frame> {
        let caller = self.callers.pop()?;
        Some(std::mem::replace(&mut self.current, caller))
    }
}
