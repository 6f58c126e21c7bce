//! Runtime errors for the tickvm VM.
//!
//! A [`Fault`] is what an instruction or built-in reports. The instruction
//! loop wraps it into a [`FatalError`] carrying the function id, the
//! instruction index and the opcode, and the scheduler halts.

use thiserror::Error;
use tickvm_common::{DecodeError, Opcode, ValueError, ValueKind};

use crate::frame::ThreadId;

/// Conditions that stop the whole VM.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// Operation required one kind of value but found another.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: ValueKind,
        found: ValueKind,
    },

    /// Function or built-in called with the wrong number of arguments.
    #[error("arity mismatch: expected {expected} argument(s), got {found}")]
    ArityMismatch { expected: usize, found: usize },

    /// Container index outside `0..len`.
    #[error("index {index} out of range (length {len})")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("unknown function {0}")]
    UnknownFunction(u32),

    #[error("unknown built-in function {0}")]
    UnknownBuiltin(u32),

    #[error("unknown string {0}")]
    UnknownString(u32),

    /// An operand was needed but the value stack was empty.
    #[error("stack underflow")]
    StackUnderflow,

    /// RETURN executed while operands were still on the value stack.
    #[error("non-empty stack on return ({remaining} value(s) left)")]
    NonEmptyStackOnReturn { remaining: usize },

    #[error("division by zero")]
    DivisionByZero,

    /// Local or global slot index outside the table.
    #[error("slot {slot} out of range (size {len})")]
    SlotOutOfRange { slot: u32, len: usize },

    /// CALL with something other than a function in the register.
    #[error("cannot call a {0}")]
    NotCallable(ValueKind),

    #[error("call depth exceeded limit {limit}")]
    CallDepthExceeded { limit: usize },

    /// The program counter ran past the last instruction.
    #[error("unexpected end of function")]
    UnexpectedEnd,

    /// Read from a sequence with no elements.
    #[error("the sequence is empty")]
    EmptySequence,

    /// A script asked to stop with a message.
    #[error("{0}")]
    ScriptFatal(String),
}

impl From<ValueError> for Fault {
    fn from(e: ValueError) -> Self {
        match e {
            ValueError::TypeMismatch { expected, found } => Fault::TypeMismatch { expected, found },
            ValueError::IndexOutOfRange { index, len } => Fault::IndexOutOfRange { index, len },
            ValueError::EmptySequence => Fault::EmptySequence,
        }
    }
}

/// The single report surfaced to the host when the VM halts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fatal error in function {function} at instruction {pc} ({op}): {fault}", op = mnemonic(.opcode))]
pub struct FatalError {
    /// Function whose frame was executing.
    pub function: u32,
    /// Index of the offending instruction.
    pub pc: usize,
    /// The offending opcode, when one had been fetched.
    pub opcode: Option<Opcode>,
    pub fault: Fault,
}

fn mnemonic(opcode: &Option<Opcode>) -> &'static str {
    opcode.map_or("no instruction", |op| op.mnemonic())
}

/// Errors from restoring a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("malformed snapshot: {0}")]
    Decode(#[from] DecodeError),

    /// A container back-reference pointed past the containers seen so far.
    #[error("dangling container reference {0}")]
    DanglingReference(u32),

    /// A frame named a function the loader does not have.
    #[error("snapshot refers to unknown function {0}")]
    UnknownFunction(u32),

    /// A frame's local count disagrees with the loaded function.
    #[error("function {function} expects {expected} local(s), snapshot has {found}")]
    LocalCountMismatch {
        function: u32,
        expected: usize,
        found: usize,
    },

    #[error("snapshot has {found} global(s), VM is configured for {expected}")]
    GlobalCountMismatch { expected: usize, found: usize },

    #[error("invalid timer value {0}")]
    InvalidTimer(i32),

    #[error("invalid container marker {0}")]
    InvalidMarker(u8),

    #[error("thread {0} appears twice")]
    DuplicateThread(ThreadId),

    /// A caller chain or container nesting went past its limit.
    #[error("{what} nested deeper than {limit}")]
    TooDeep { what: &'static str, limit: usize },
}

/// Errors from handing an external event to a thread.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResumeError {
    #[error("no thread {0}")]
    UnknownThread(ThreadId),

    #[error("thread {0} is not waiting for an external event")]
    NotAwaiting(ThreadId),
}
