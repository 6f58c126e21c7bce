//! The cooperative scheduler.
//!
//! Each [`Scheduler::tick`] visits every live thread once, in id order.
//! Frozen threads are skipped, cancelled ones are aborted, countdowns are
//! decremented, and everything else runs until it yields. Requests raised
//! by built-ins (freeze, cancel, spawn) are applied right after the slice
//! that raised them.

use std::collections::BTreeMap;
use std::mem;

use log::{debug, error};
use tickvm_common::Value;

use crate::builtin::BuiltinRegistry;
use crate::error::{FatalError, Fault, ResumeError, SnapshotError};
use crate::execute::{run_slice, SliceOutcome};
use crate::frame::{Frame, FrameState, Thread, ThreadId, Timer};
use crate::runtime::{Host, Request, Runtime, ScriptLoader, VmConfig};
use crate::snapshot;

/// A thread that left the scheduler during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub thread: ThreadId,
    /// `Returned` or `Aborted`.
    pub state: FrameState,
    /// Final register of the top-level frame. Nothing when aborted.
    pub value: Value,
}

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Threads that executed instructions, in the order they ran.
    pub ran: Vec<ThreadId>,
    pub finished: Vec<Finished>,
}

impl TickReport {
    /// Final value of `thread` if it returned during this tick.
    pub fn returned(&self, thread: ThreadId) -> Option<&Value> {
        self.finished
            .iter()
            .find(|f| f.thread == thread && f.state == FrameState::Returned)
            .map(|f| &f.value)
    }

    /// Whether `thread` was aborted during this tick.
    pub fn aborted(&self, thread: ThreadId) -> bool {
        self.finished
            .iter()
            .any(|f| f.thread == thread && f.state == FrameState::Aborted)
    }
}

/// Owns every live thread and the runtime they share.
pub struct Scheduler {
    rt: Runtime,
    threads: BTreeMap<ThreadId, Thread>,
    halted: Option<FatalError>,
}

impl Scheduler {
    pub fn new(
        loader: impl ScriptLoader + 'static,
        builtins: BuiltinRegistry,
        host: impl Host + 'static,
        config: VmConfig,
    ) -> Self {
        Self {
            rt: Runtime::new(Box::new(loader), builtins, Box::new(host), config),
            threads: BTreeMap::new(),
            halted: None,
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.rt
    }

    /// Start `function` as a new top-level thread. It first runs on the
    /// next tick.
    pub fn start(&mut self, function: u32, args: Vec<Value>) -> Result<ThreadId, Fault> {
        let body = self.rt.loader.load_function(function)?;
        let frame = Frame::new(function, body, args)?;
        let id = self.rt.allocate_thread_id();
        debug!("start thread {id} running function {function}");
        self.threads.insert(id, Thread::new(id, frame));
        Ok(id)
    }

    /// Advance every thread by one tick.
    ///
    /// A fatal error aborts every thread and halts the scheduler; later
    /// calls return the same error until a snapshot is restored.
    pub fn tick(&mut self) -> Result<TickReport, FatalError> {
        if let Some(err) = &self.halted {
            return Err(err.clone());
        }

        let mut report = TickReport::default();
        // Threads spawned during this tick are not in the list.
        let ids: Vec<ThreadId> = self.threads.keys().copied().collect();
        for id in ids {
            let Some(thread) = self.threads.get_mut(&id) else {
                continue;
            };
            let frame = &mut thread.current;
            if frame.is_frozen() {
                continue;
            }
            if frame.cancel_requested {
                self.retire(id, FrameState::Aborted, Value::Nothing, &mut report);
                continue;
            }
            if frame.state == FrameState::AwaitingExternalEvent {
                continue;
            }
            match frame.timer {
                Timer::Idle => {}
                Timer::Ticks(n) => {
                    frame.timer = Timer::ticks(n - 1);
                    continue;
                }
                Timer::UntilSpeechEnds => {
                    if !self.rt.host.speech_playing() {
                        frame.timer = Timer::Idle;
                    }
                    continue;
                }
            }

            report.ran.push(id);
            let outcome = match run_slice(&mut self.rt, thread) {
                Ok(outcome) => outcome,
                Err(err) => return Err(self.halt(err)),
            };
            self.apply_requests();
            match outcome {
                SliceOutcome::Yielded => {}
                SliceOutcome::Finished(value) => {
                    self.retire(id, FrameState::Returned, value, &mut report)
                }
                SliceOutcome::Aborted => {
                    self.retire(id, FrameState::Aborted, Value::Nothing, &mut report)
                }
            }
        }
        Ok(report)
    }

    /// Wake a thread parked on an external event, optionally replacing its
    /// register. It continues after the CALL that paused it on the next
    /// tick.
    ///
    /// A thread parked by `PauseAndRetryInstruction` runs that CALL again
    /// instead, so `value` is ignored: the register must keep the built-in.
    pub fn resume(&mut self, id: ThreadId, value: Option<Value>) -> Result<(), ResumeError> {
        let thread = self
            .threads
            .get_mut(&id)
            .ok_or(ResumeError::UnknownThread(id))?;
        let frame = &mut thread.current;
        if frame.state != FrameState::AwaitingExternalEvent {
            return Err(ResumeError::NotAwaiting(id));
        }
        frame.state = FrameState::Runnable;
        match value {
            Some(_) if frame.retry_pending => {
                debug!("thread {id} retries its call; resume value dropped")
            }
            Some(value) => frame.register = value,
            None => {}
        }
        debug!("resume thread {id}");
        Ok(())
    }

    // ---- Freezing ----

    /// Freeze every thread that is not marked unfreezable.
    pub fn freeze(&mut self) {
        self.rt.freeze_depth += 1;
        self.freeze_all(None);
    }

    /// Undo one level of freezing.
    pub fn unfreeze(&mut self) {
        self.rt.freeze_depth = self.rt.freeze_depth.saturating_sub(1);
        self.unfreeze_all();
    }

    pub fn freeze_depth(&self) -> u32 {
        self.rt.freeze_depth
    }

    fn freeze_all(&mut self, except: Option<ThreadId>) {
        debug!("freeze threads (depth {})", self.rt.freeze_depth);
        for thread in self.threads.values_mut() {
            let frame = &mut thread.current;
            if Some(thread.id) != except && !frame.unfreezable {
                frame.freezer_level = frame.freezer_level.saturating_add(1);
            }
        }
    }

    fn unfreeze_all(&mut self) {
        debug!("unfreeze threads (depth {})", self.rt.freeze_depth);
        for thread in self.threads.values_mut() {
            let frame = &mut thread.current;
            frame.freezer_level = frame.freezer_level.saturating_sub(1);
        }
    }

    // ---- Cancellation and timers ----

    /// Mark every thread currently running `function` for abort. Returns how
    /// many were marked.
    pub fn cancel_function(&mut self, function: u32) -> usize {
        let mut marked = 0;
        for thread in self.threads.values_mut() {
            if thread.current.function == function {
                thread.current.cancel_requested = true;
                marked += 1;
            }
        }
        marked
    }

    /// Mark one thread for abort.
    pub fn cancel_thread(&mut self, id: ThreadId) -> bool {
        match self.threads.get_mut(&id) {
            Some(thread) => {
                thread.current.cancel_requested = true;
                true
            }
            None => false,
        }
    }

    /// Finish the countdown of every unfrozen thread.
    pub fn complete_timers(&mut self) {
        for thread in self.threads.values_mut() {
            let frame = &mut thread.current;
            if !frame.is_frozen() && matches!(frame.timer, Timer::Ticks(_)) {
                frame.timer = Timer::Idle;
            }
        }
    }

    // ---- Inspection ----

    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(&id)
    }

    /// Live threads in id order.
    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }

    /// True when no thread is left.
    pub fn is_idle(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn global(&self, slot: u32) -> Result<&Value, Fault> {
        self.rt.global(slot)
    }

    pub fn set_global(&mut self, slot: u32, value: Value) -> Result<(), Fault> {
        *self.rt.global_mut(slot)? = value;
        Ok(())
    }

    /// The error that halted the scheduler, if any.
    pub fn halted(&self) -> Option<&FatalError> {
        self.halted.as_ref()
    }

    // ---- Snapshots ----

    /// Serialize every thread and the global table.
    pub fn save_snapshot(&self) -> Vec<u8> {
        let bytes = snapshot::save(&self.rt, &self.threads);
        debug!(
            "saved snapshot of {} threads ({} bytes)",
            self.threads.len(),
            bytes.len()
        );
        bytes
    }

    /// Replace all threads and globals with a snapshot's contents. On error
    /// the scheduler is left unchanged.
    pub fn restore_snapshot(&mut self, bytes: &[u8]) -> Result<(), SnapshotError> {
        let restored = snapshot::restore(bytes, &self.rt)?;
        self.rt.freeze_depth = restored.freeze_depth;
        self.rt.globals = restored.globals;
        self.rt.requests.clear();
        let next = restored.threads.keys().next_back().map_or(1, |id| id + 1);
        self.rt.next_thread = self.rt.next_thread.max(next);
        self.threads = restored.threads;
        self.halted = None;
        debug!("restored snapshot of {} threads", self.threads.len());
        Ok(())
    }

    // ---- Internals ----

    fn apply_requests(&mut self) {
        for request in mem::take(&mut self.rt.requests) {
            match request {
                Request::FreezeOthers { origin } => self.freeze_all(Some(origin)),
                Request::Unfreeze => self.unfreeze_all(),
                Request::Cancel { function } => {
                    self.cancel_function(function);
                }
                Request::Spawn(thread) => {
                    self.threads.insert(thread.id, thread);
                }
                Request::CompleteTimers => self.complete_timers(),
            }
        }
    }

    fn retire(&mut self, id: ThreadId, state: FrameState, value: Value, report: &mut TickReport) {
        if self.threads.remove(&id).is_none() {
            return;
        }
        match state {
            FrameState::Aborted => debug!("thread {id} aborted"),
            _ => debug!("thread {id} finished: {value}"),
        }
        report.finished.push(Finished {
            thread: id,
            state,
            value,
        });
    }

    fn halt(&mut self, err: FatalError) -> FatalError {
        error!("{err}");
        self.threads.clear();
        self.rt.requests.clear();
        self.halted = Some(err.clone());
        err
    }
}
