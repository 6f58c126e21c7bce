//! The built-in dispatch boundary.
//!
//! A built-in is a host function a script calls through `CALL n` with a
//! [`Value::Builtin`] in the register. It receives a [`BuiltinCall`] giving
//! access to its arguments, the calling frame's register and the runtime,
//! and answers with a [`Verdict`] telling the instruction loop what to do
//! next. Returning `Err` stops the VM.

use std::collections::BTreeMap;
use std::rc::Rc;

use log::debug;
use tickvm_common::{SequenceRef, Value, ValueKind};

use crate::error::Fault;
use crate::frame::{Frame, Thread, ThreadId, Timer};
use crate::runtime::{Host, Request, Runtime};

/// What the instruction loop does after a built-in returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Result is in the register; run the next instruction.
    Continue,
    /// Stop running this thread for now. If the built-in armed a timer the
    /// scheduler resumes it when the timer runs out; otherwise it waits for
    /// `Scheduler::resume`.
    Pause,
    /// Like `Pause`, but the same CALL runs again on resume. The built-in
    /// must leave its arguments on the stack.
    PauseAndRetryInstruction,
    /// Push a frame for `function` with `args`, as CALL would, and continue
    /// in it.
    ChainToFunction {
        function: u32,
        args: Vec<Value>,
        /// Copy the callee's register back on RETURN.
        returns_value: bool,
    },
    /// The built-in has already dealt with the thread. Nothing else about
    /// the frame is touched.
    AlreadyHandled,
}

/// Number of arguments a built-in accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variable,
}

impl Arity {
    pub(crate) fn check(self, found: usize) -> Result<(), Fault> {
        match self {
            Arity::Fixed(expected) if expected != found => {
                Err(Fault::ArityMismatch { expected, found })
            }
            _ => Ok(()),
        }
    }
}

/// Signature every built-in handler has.
pub type BuiltinFn = dyn Fn(&mut BuiltinCall<'_>) -> Result<Verdict, Fault>;

/// A registered built-in.
#[derive(Clone)]
pub struct BuiltinEntry {
    pub name: String,
    pub arity: Arity,
    pub handler: Rc<BuiltinFn>,
}

impl std::fmt::Debug for BuiltinEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinEntry")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Built-ins by id.
#[derive(Debug, Clone, Default)]
pub struct BuiltinRegistry {
    entries: BTreeMap<u32, BuiltinEntry>,
}

impl BuiltinRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the core library.
    pub fn with_core() -> Self {
        let mut registry = Self::new();
        crate::stdlib::register_core(&mut registry);
        registry
    }

    /// Add or replace the built-in with this id.
    pub fn register<F>(&mut self, id: u32, name: &str, arity: Arity, handler: F)
    where
        F: Fn(&mut BuiltinCall<'_>) -> Result<Verdict, Fault> + 'static,
    {
        self.entries.insert(
            id,
            BuiltinEntry {
                name: name.to_owned(),
                arity,
                handler: Rc::new(handler),
            },
        );
    }

    pub fn get(&self, id: u32) -> Option<&BuiltinEntry> {
        self.entries.get(&id)
    }

    /// Id of the built-in registered under `name`.
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(&id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One invocation of a built-in.
///
/// Arguments are popped last-first: the first `pop` returns the final
/// argument the script pushed.
pub struct BuiltinCall<'a> {
    rt: &'a mut Runtime,
    thread: ThreadId,
    frame: &'a mut Frame,
    remaining: usize,
    timed: bool,
    aborted: bool,
}

impl<'a> BuiltinCall<'a> {
    pub(crate) fn new(
        rt: &'a mut Runtime,
        thread: ThreadId,
        frame: &'a mut Frame,
        args: usize,
    ) -> Self {
        Self {
            rt,
            thread,
            frame,
            remaining: args,
            timed: false,
            aborted: false,
        }
    }

    // ---- Arguments ----

    /// Arguments not yet popped.
    pub fn args(&self) -> usize {
        self.remaining
    }

    /// Pop the last unconsumed argument.
    pub fn pop(&mut self) -> Result<Value, Fault> {
        if self.remaining == 0 {
            return Err(Fault::StackUnderflow);
        }
        let value = self.frame.stack.pop_front().ok_or(Fault::StackUnderflow)?;
        self.remaining -= 1;
        Ok(value)
    }

    /// Look at the argument `depth` places from the last without popping it.
    pub fn peek(&self, depth: usize) -> Result<&Value, Fault> {
        if depth >= self.remaining {
            return Err(Fault::StackUnderflow);
        }
        self.frame
            .stack
            .get(depth as i32)
            .map_err(|_| Fault::StackUnderflow)
    }

    pub fn pop_int(&mut self) -> Result<i32, Fault> {
        Ok(self.pop()?.as_int()?)
    }

    /// Pop any value and render it as text.
    pub fn pop_text(&mut self) -> Result<String, Fault> {
        let value = self.pop()?;
        Ok(self.rt.text_of(&value))
    }

    pub fn pop_sequence(&mut self) -> Result<SequenceRef, Fault> {
        match self.pop()? {
            Value::Sequence(seq) => Ok(seq),
            other => Err(other.mismatch(ValueKind::Sequence).into()),
        }
    }

    pub fn pop_function(&mut self) -> Result<u32, Fault> {
        Ok(self.pop()?.as_function()?)
    }

    pub fn pop_object_type(&mut self) -> Result<u32, Fault> {
        Ok(self.pop()?.as_object_type()?)
    }

    /// Drop arguments the handler left behind.
    pub(crate) fn discard_remaining(&mut self) {
        for _ in 0..self.remaining {
            self.frame.stack.pop_front();
        }
        self.remaining = 0;
    }

    // ---- Result ----

    /// Put the result in the caller's register.
    pub fn set_result(&mut self, value: impl Into<Value>) {
        self.frame.register = value.into();
    }

    pub fn result(&self) -> &Value {
        &self.frame.register
    }

    // ---- Environment ----

    pub fn host(&self) -> &dyn Host {
        &*self.rt.host
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Function id of the calling frame.
    pub fn function(&self) -> u32 {
        self.frame.function
    }

    pub fn global(&self, slot: u32) -> Result<&Value, Fault> {
        self.rt.global(slot)
    }

    pub fn set_global(&mut self, slot: u32, value: Value) -> Result<(), Fault> {
        *self.rt.global_mut(slot)? = value;
        Ok(())
    }

    pub fn text_of(&self, value: &Value) -> String {
        self.rt.text_of(value)
    }

    // ---- Waiting ----

    /// Arm the caller's timer. Answer [`Verdict::Pause`] afterwards; the
    /// frame resumes by itself after `ticks` more ticks.
    pub fn wait_ticks(&mut self, ticks: u32) {
        self.frame.timer = Timer::ticks(ticks);
        self.timed = true;
    }

    /// Park the caller until the host stops playing speech.
    pub fn wait_for_speech(&mut self) {
        self.frame.timer = Timer::UntilSpeechEnds;
        self.timed = true;
    }

    pub(crate) fn is_timed(&self) -> bool {
        self.timed
    }

    // ---- Scheduling ----

    /// Freeze every other thread.
    pub fn freeze_others(&mut self) {
        self.rt.freeze_depth += 1;
        self.rt.requests.push(Request::FreezeOthers {
            origin: self.thread,
        });
    }

    /// Undo one freeze.
    pub fn unfreeze(&mut self) {
        self.rt.freeze_depth = self.rt.freeze_depth.saturating_sub(1);
        self.rt.requests.push(Request::Unfreeze);
    }

    pub fn freeze_depth(&self) -> u32 {
        self.rt.freeze_depth
    }

    /// Reset countdown timers of every unfrozen thread.
    pub fn complete_timers(&mut self) {
        self.rt.requests.push(Request::CompleteTimers);
    }

    /// Cancel every thread running `function`. Returns true if that
    /// includes the caller, which should then answer [`Self::abort_caller`].
    pub fn cancel_function(&mut self, function: u32) -> bool {
        self.rt.requests.push(Request::Cancel { function });
        self.frame.function == function
    }

    /// Start `function` as a new thread. It first runs on the next tick.
    pub fn spawn(&mut self, function: u32, args: Vec<Value>) -> Result<ThreadId, Fault> {
        let body = self.rt.loader.load_function(function)?;
        let frame = Frame::new(function, body, args)?;
        let id = self.rt.allocate_thread_id();
        debug!("thread {} spawns thread {id} running function {function}", self.thread);
        self.rt.requests.push(Request::Spawn(Thread::new(id, frame)));
        Ok(id)
    }

    /// Abort the calling thread. Return the verdict this gives.
    pub fn abort_caller(&mut self) -> Verdict {
        self.aborted = true;
        Verdict::AlreadyHandled
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted
    }
}
