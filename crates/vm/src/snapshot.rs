//! Snapshot encoding of live VM state.
//!
//! A snapshot holds every thread's frame chain, the freeze depth and the
//! global table. Bytecode is not included: restoring reloads each frame's
//! body by function id. Shared containers are written once and referenced
//! by index afterwards, so sharing and cycles survive a round trip.
//!
//! Layout (little-endian):
//!
//! ```text
//! "TKSV" u16 version, u32 freeze depth, u32 thread count
//! per thread: u32 id, frame
//! frame:      u32 function, u8 has-caller, [caller frame],
//!             u32 pc, i32 timer, u16 freezer level, u8 flags,
//!             value register, u32 n + n values (stack, top first),
//!             u32 n + n values (locals)
//! u32 global count + values
//! ```

use std::collections::{BTreeMap, HashMap};

use tickvm_common::codec::{ByteReader, ByteWriter};
use tickvm_common::{ArrayRef, SequenceRef, Value, ValueKind, ValueStack};

use crate::error::SnapshotError;
use crate::frame::{Frame, FrameState, Thread, ThreadId, Timer};
use crate::runtime::{Runtime, ScriptLoader};

/// Magic prefix of a snapshot.
pub const SNAPSHOT_MAGIC: &str = "TKSV";

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Deepest container nesting a snapshot may hold.
pub const MAX_NESTING: usize = 512;

const FLAG_CANCEL: u8 = 1 << 0;
const FLAG_RETURNS_VALUE: u8 = 1 << 1;
const FLAG_UNFREEZABLE: u8 = 1 << 2;
const FLAG_AWAITING: u8 = 1 << 3;
const FLAG_RETRY: u8 = 1 << 4;

const MARKER_NEW: u8 = 0;
const MARKER_SEEN: u8 = 1;

/// State read back from a snapshot.
pub(crate) struct Restored {
    pub freeze_depth: u32,
    pub threads: BTreeMap<ThreadId, Thread>,
    pub globals: Vec<Value>,
}

pub(crate) fn save(rt: &Runtime, threads: &BTreeMap<ThreadId, Thread>) -> Vec<u8> {
    let mut enc = Encoder::default();
    enc.w.raw(SNAPSHOT_MAGIC.as_bytes());
    enc.w.u16(SNAPSHOT_VERSION);
    enc.w.u32(rt.freeze_depth);
    enc.w.len(threads.len());
    for (id, thread) in threads {
        enc.w.u32(*id);
        let frames: Vec<&Frame> = thread.frames().collect();
        enc.frames(&frames);
    }
    enc.w.len(rt.globals.len());
    for value in &rt.globals {
        enc.value(value);
    }
    enc.w.finish()
}

pub(crate) fn restore(bytes: &[u8], rt: &Runtime) -> Result<Restored, SnapshotError> {
    let mut dec = Decoder {
        r: ByteReader::new(bytes),
        loader: &*rt.loader,
        max_frames: rt.config.max_call_depth,
        containers: Vec::new(),
        nesting: 0,
    };
    dec.r.expect_magic(SNAPSHOT_MAGIC)?;
    let version = dec.r.u16()?;
    if version != SNAPSHOT_VERSION {
        return Err(tickvm_common::DecodeError::UnsupportedVersion(version).into());
    }
    let freeze_depth = dec.r.u32()?;

    let count = dec.r.count(4)?;
    let mut threads = BTreeMap::new();
    for _ in 0..count {
        let id = dec.r.u32()?;
        let (callers, current) = dec.frames()?;
        if threads.contains_key(&id) {
            return Err(SnapshotError::DuplicateThread(id));
        }
        threads.insert(
            id,
            Thread {
                id,
                current,
                callers,
            },
        );
    }

    let count = dec.r.count(1)?;
    if count != rt.config.globals {
        return Err(SnapshotError::GlobalCountMismatch {
            expected: rt.config.globals,
            found: count,
        });
    }
    let globals = dec.values(count)?;
    dec.r.finish()?;

    Ok(Restored {
        freeze_depth,
        threads,
        globals,
    })
}

#[derive(Default)]
struct Encoder {
    w: ByteWriter,
    /// Container identity to table index.
    seen: HashMap<usize, u32>,
}

impl Encoder {
    /// Write a call chain given outermost first. Function ids and
    /// has-caller flags come innermost first, then the rest of each frame
    /// from the outermost in.
    fn frames(&mut self, frames: &[&Frame]) {
        for (depth, frame) in frames.iter().rev().enumerate() {
            self.w.u32(frame.function);
            self.w.u8((depth + 1 < frames.len()) as u8);
        }
        for frame in frames {
            self.frame(frame);
        }
    }

    fn frame(&mut self, frame: &Frame) {
        let mut flags = 0;
        if frame.cancel_requested {
            flags |= FLAG_CANCEL;
        }
        if frame.returns_value {
            flags |= FLAG_RETURNS_VALUE;
        }
        if frame.unfreezable {
            flags |= FLAG_UNFREEZABLE;
        }
        if frame.state == FrameState::AwaitingExternalEvent {
            flags |= FLAG_AWAITING;
        }
        if frame.retry_pending {
            flags |= FLAG_RETRY;
        }

        self.w.u32(frame.pc as u32);
        self.w.i32(frame.timer.to_raw());
        self.w.u16(frame.freezer_level);
        self.w.u8(flags);
        self.value(&frame.register);
        self.w.len(frame.stack.len());
        for value in frame.stack.iter() {
            self.value(value);
        }
        self.w.len(frame.locals.len());
        for value in &frame.locals {
            self.value(value);
        }
    }

    fn value(&mut self, value: &Value) {
        let mut pending = vec![value.clone()];
        while let Some(value) = pending.pop() {
            self.w.u8(value.kind() as u8);
            let items = match &value {
                Value::Nothing => continue,
                Value::Int(n) => {
                    self.w.i32(*n);
                    continue;
                }
                Value::Str(s) => {
                    self.w.str(s);
                    continue;
                }
                Value::Function(id)
                | Value::Builtin(id)
                | Value::Resource(id)
                | Value::ObjectType(id)
                | Value::Animation(id)
                | Value::Costume(id) => {
                    self.w.u32(*id);
                    continue;
                }
                Value::Sequence(seq) => {
                    if self.seen_before(seq.identity()) {
                        continue;
                    }
                    seq.borrow().iter().cloned().collect::<Vec<_>>()
                }
                Value::Array(arr) => {
                    if self.seen_before(arr.identity()) {
                        continue;
                    }
                    arr.values()
                }
            };
            // Elements follow their container depth first, in order.
            self.w.len(items.len());
            pending.extend(items.into_iter().rev());
        }
    }

    /// Write the container marker. Returns true if a back reference was
    /// written and the contents must be skipped.
    fn seen_before(&mut self, identity: usize) -> bool {
        if let Some(&index) = self.seen.get(&identity) {
            self.w.u8(MARKER_SEEN);
            self.w.u32(index);
            return true;
        }
        let index = self.seen.len() as u32;
        self.seen.insert(identity, index);
        self.w.u8(MARKER_NEW);
        false
    }
}

struct Decoder<'a> {
    r: ByteReader<'a>,
    loader: &'a dyn ScriptLoader,
    max_frames: usize,
    /// Containers in the order they were first written.
    containers: Vec<Value>,
    /// Containers currently being read.
    nesting: usize,
}

impl Decoder<'_> {
    /// Read a call chain. Returns the callers outermost first, then the
    /// innermost frame.
    fn frames(&mut self) -> Result<(Vec<Frame>, Frame), SnapshotError> {
        let mut functions = Vec::new();
        loop {
            if functions.len() == self.max_frames {
                return Err(SnapshotError::TooDeep {
                    what: "call chain",
                    limit: self.max_frames,
                });
            }
            functions.push(self.r.u32()?);
            if self.r.u8()? == 0 {
                break;
            }
        }

        let mut callers = Vec::with_capacity(functions.len());
        for &function in functions.iter().rev() {
            callers.push(self.frame(function)?);
        }
        let current = callers.pop().ok_or(SnapshotError::TooDeep {
            what: "call chain",
            limit: self.max_frames,
        })?;
        Ok((callers, current))
    }

    fn frame(&mut self, function: u32) -> Result<Frame, SnapshotError> {
        let pc = self.r.u32()? as usize;
        let raw_timer = self.r.i32()?;
        let timer = Timer::from_raw(raw_timer).ok_or(SnapshotError::InvalidTimer(raw_timer))?;
        let freezer_level = self.r.u16()?;
        let flags = self.r.u8()?;
        let register = self.value()?;
        let count = self.r.count(1)?;
        let stack: ValueStack = self.values(count)?.into_iter().collect();
        let count = self.r.count(1)?;
        let locals = self.values(count)?;

        let body = self
            .loader
            .load_function(function)
            .map_err(|_| SnapshotError::UnknownFunction(function))?;
        if locals.len() != body.frame_size() {
            return Err(SnapshotError::LocalCountMismatch {
                function,
                expected: body.frame_size(),
                found: locals.len(),
            });
        }

        let frame = Frame {
            function,
            body,
            pc,
            locals,
            register,
            stack,
            timer,
            freezer_level,
            cancel_requested: flags & FLAG_CANCEL != 0,
            unfreezable: flags & FLAG_UNFREEZABLE != 0,
            returns_value: flags & FLAG_RETURNS_VALUE != 0,
            retry_pending: flags & FLAG_RETRY != 0,
            state: if flags & FLAG_AWAITING != 0 {
                FrameState::AwaitingExternalEvent
            } else {
                FrameState::Runnable
            },
        };
        Ok(frame)
    }

    fn values(&mut self, count: usize) -> Result<Vec<Value>, SnapshotError> {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.value()?);
        }
        Ok(values)
    }

    fn value(&mut self) -> Result<Value, SnapshotError> {
        let kind = ValueKind::try_from(self.r.u8()?)?;
        let value = match kind {
            ValueKind::Nothing => Value::Nothing,
            ValueKind::Int => Value::Int(self.r.i32()?),
            ValueKind::Str => Value::Str(self.r.str()?),
            ValueKind::Function => Value::Function(self.r.u32()?),
            ValueKind::Builtin => Value::Builtin(self.r.u32()?),
            ValueKind::Resource => Value::Resource(self.r.u32()?),
            ValueKind::ObjectType => Value::ObjectType(self.r.u32()?),
            ValueKind::Animation => Value::Animation(self.r.u32()?),
            ValueKind::Costume => Value::Costume(self.r.u32()?),
            ValueKind::Sequence => match self.r.u8()? {
                MARKER_NEW => {
                    // Registered before its elements so they can refer to it.
                    let seq = SequenceRef::default();
                    self.containers.push(Value::Sequence(seq.clone()));
                    let count = self.r.count(1)?;
                    self.enter()?;
                    for _ in 0..count {
                        let item = self.value()?;
                        seq.borrow_mut().push_back(item);
                    }
                    self.nesting -= 1;
                    Value::Sequence(seq)
                }
                MARKER_SEEN => self.back_reference(kind)?,
                other => return Err(SnapshotError::InvalidMarker(other)),
            },
            ValueKind::Array => match self.r.u8()? {
                MARKER_NEW => {
                    let count = self.r.count(1)?;
                    let arr = ArrayRef::with_size(count);
                    self.containers.push(Value::Array(arr.clone()));
                    self.enter()?;
                    for index in 0..count {
                        let item = self.value()?;
                        arr.set(index as i32, item)
                            .map_err(|_| SnapshotError::DanglingReference(index as u32))?;
                    }
                    self.nesting -= 1;
                    Value::Array(arr)
                }
                MARKER_SEEN => self.back_reference(kind)?,
                other => return Err(SnapshotError::InvalidMarker(other)),
            },
        };
        Ok(value)
    }

    fn enter(&mut self) -> Result<(), SnapshotError> {
        if self.nesting == MAX_NESTING {
            return Err(SnapshotError::TooDeep {
                what: "containers",
                limit: MAX_NESTING,
            });
        }
        self.nesting += 1;
        Ok(())
    }

    fn back_reference(&mut self, kind: ValueKind) -> Result<Value, SnapshotError> {
        let index = self.r.u32()?;
        match self.containers.get(index as usize) {
            Some(value) if value.kind() == kind => Ok(value.clone()),
            _ => Err(SnapshotError::DanglingReference(index)),
        }
    }
}
