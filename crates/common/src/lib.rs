//! tickvm common types and encodings.
//!
//! This crate provides the data structures shared by the VM, the
//! assembler and the command-line host:
//!
//! - [`Opcode`] and [`Instruction`], with the 5-byte instruction encoding
//! - [`Value`], its [`ValueKind`] and the shared containers [`SequenceRef`]
//!   and [`ArrayRef`]
//! - [`ValueStack`], the ordered list behind operand stacks and Sequences
//! - [`FunctionBody`] and [`ScriptImage`], the compiled form of a script
//! - [`DecodeError`] and [`ValueError`]
//!
//! # Dependencies
//!
//! This crate uses `thiserror` and has no other dependencies.

pub mod codec;
pub mod error;
pub mod image;
pub mod instruction;
pub mod kind;
pub mod opcode;
pub mod stack;
pub mod value;

// Re-export commonly used types at the crate root.
pub use error::{DecodeError, ValueError};
pub use image::{FunctionBody, ScriptImage};
pub use instruction::Instruction;
pub use kind::ValueKind;
pub use opcode::Opcode;
pub use stack::ValueStack;
pub use value::{ArrayRef, NameResolver, NoNames, SequenceRef, Value};
