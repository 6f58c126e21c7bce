//! Error types for the tickvm assembler.

use thiserror::Error;

/// Errors produced while assembling text into a script image.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    /// An unrecognized mnemonic or directive was encountered.
    #[error("line {line}: unknown opcode '{token}'")]
    UnknownOpcode { line: usize, token: String },

    /// An opcode or directive did not have enough arguments.
    #[error("line {line}: {opcode} expects {expected} argument(s)")]
    MissingArgument {
        line: usize,
        opcode: &'static str,
        expected: usize,
    },

    /// A numeric literal could not be parsed or is out of range.
    #[error("line {line}: invalid number '{token}'")]
    InvalidNumber { line: usize, token: String },

    /// A token appeared where it was not expected.
    #[error("line {line}: unexpected token '{token}'")]
    UnexpectedToken { line: usize, token: String },

    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: usize },

    #[error("line {line}: unknown escape '\\{escape}'")]
    InvalidEscape { line: usize, escape: char },

    /// STRING directives must number the table in order.
    #[error("line {line}: expected string index {expected}, found {found}")]
    StringOutOfOrder {
        line: usize,
        expected: u32,
        found: u32,
    },

    #[error("line {line}: function {id} is defined twice")]
    DuplicateFunction { line: usize, id: u32 },

    #[error("line {line}: FUNC inside a function body")]
    NestedFunction { line: usize },

    #[error("line {line}: ENDFUNC without FUNC")]
    UnmatchedEnd { line: usize },

    #[error("line {line}: instruction outside a function body")]
    OutsideFunction { line: usize },

    /// End of input reached inside the function opened on `line`.
    #[error("line {line}: FUNC is never closed")]
    UnclosedFunction { line: usize },
}
