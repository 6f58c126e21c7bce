//! Decode and value errors for tickvm data.

use thiserror::Error;

use crate::kind::ValueKind;

/// Errors that occur while decoding instructions or script images.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Opcode byte does not name any instruction.
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Value kind byte does not name any variant.
    #[error("unknown value kind: {0:#04x}")]
    UnknownValueKind(u8),

    /// Byte stream ended in the middle of a field.
    #[error("unexpected end of data at byte {offset} (needed {needed} more)")]
    Truncated { offset: usize, needed: usize },

    /// Image or snapshot did not start with the expected magic bytes.
    #[error("bad magic: expected {expected:?}")]
    BadMagic { expected: &'static str },

    /// Format version is not one this build understands.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    /// A string field did not contain valid UTF-8.
    #[error("invalid UTF-8 in string at byte {offset}")]
    InvalidUtf8 { offset: usize },

    /// The same function id appeared twice in an image.
    #[error("duplicate function id {0}")]
    DuplicateFunction(u32),

    /// Bytes were left over after the last field.
    #[error("{0} trailing byte(s) after end of data")]
    TrailingBytes(usize),
}

/// Errors raised by operations on a single [`Value`](crate::Value).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// Operation required one variant but the value held another.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: ValueKind,
        found: ValueKind,
    },

    /// Container index outside `0..len`.
    #[error("index {index} out of range (length {len})")]
    IndexOutOfRange { index: i64, len: usize },

    /// Read from a sequence with no elements.
    #[error("the sequence is empty")]
    EmptySequence,
}
