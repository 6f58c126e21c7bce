//! tickvm virtual machine: runs compiled scripts cooperatively, one tick
//! at a time.
//!
//! The VM is a register/stack hybrid:
//! - Each frame has one accumulator (the register) and an operand stack
//! - Built-ins are host functions that answer with a scheduling [`Verdict`]
//! - The [`Scheduler`] advances every live thread once per tick, applying
//!   freezing, cancellation and timed waits
//! - Live state, including suspended call chains, saves to a snapshot
//!
//! # Usage
//!
//! ```
//! use tickvm::{BuiltinRegistry, NullHost, Scheduler, VmConfig};
//! use tickvm_common::{FunctionBody, Instruction, Opcode, ScriptImage, Value};
//!
//! let mut image = ScriptImage::new();
//! image.insert_function(0, FunctionBody::new(0, 0, vec![
//!     Instruction::load_value(3),
//!     Instruction::bare(Opcode::Push),
//!     Instruction::load_value(4),
//!     Instruction::bare(Opcode::Plus),
//!     Instruction::bare(Opcode::Return),
//! ]));
//!
//! let mut vm = Scheduler::new(image, BuiltinRegistry::with_core(), NullHost, VmConfig::default());
//! let thread = vm.start(0, vec![]).unwrap();
//! let report = vm.tick().unwrap();
//! assert_eq!(report.returned(thread), Some(&Value::Int(7)));
//! ```

pub mod builtin;
pub mod error;
mod execute;
pub mod frame;
pub mod runtime;
pub mod scheduler;
pub mod snapshot;
pub mod stdlib;

pub use builtin::{Arity, BuiltinCall, BuiltinRegistry, Verdict};
pub use error::{FatalError, Fault, ResumeError, SnapshotError};
pub use frame::{Frame, FrameState, Thread, ThreadId, Timer};
pub use runtime::{Host, NullHost, Runtime, ScriptLoader, VmConfig};
pub use scheduler::{Finished, Scheduler, TickReport};
