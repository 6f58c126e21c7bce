//! Value kind tags.
//!
//! Every [`Value`](crate::Value) has exactly one kind. The byte values are
//! stable: they are written into snapshots ahead of each value payload.

use std::fmt;

use crate::error::DecodeError;

/// Identifies which variant a value holds.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// No value.
    Nothing = 0x00,
    /// Signed 32-bit integer.
    Int = 0x01,
    /// Reference to a compiled user function.
    Function = 0x02,
    /// Owned text.
    Str = 0x03,
    /// Reference to a built-in function.
    Builtin = 0x04,
    /// Handle into the external resource table.
    Resource = 0x05,
    /// Shared, ordered sequence.
    Sequence = 0x06,
    /// Reference to an object type.
    ObjectType = 0x07,
    /// Handle to an externally owned animation.
    Animation = 0x08,
    /// Handle to an externally owned costume.
    Costume = 0x09,
    /// Shared, fixed-size array.
    Array = 0x0A,
}

/// All value kinds, in byte order.
pub const ALL_VALUE_KINDS: [ValueKind; 11] = [
    ValueKind::Nothing,
    ValueKind::Int,
    ValueKind::Function,
    ValueKind::Str,
    ValueKind::Builtin,
    ValueKind::Resource,
    ValueKind::Sequence,
    ValueKind::ObjectType,
    ValueKind::Animation,
    ValueKind::Costume,
    ValueKind::Array,
];

impl TryFrom<u8> for ValueKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ValueKind::Nothing),
            0x01 => Ok(ValueKind::Int),
            0x02 => Ok(ValueKind::Function),
            0x03 => Ok(ValueKind::Str),
            0x04 => Ok(ValueKind::Builtin),
            0x05 => Ok(ValueKind::Resource),
            0x06 => Ok(ValueKind::Sequence),
            0x07 => Ok(ValueKind::ObjectType),
            0x08 => Ok(ValueKind::Animation),
            0x09 => Ok(ValueKind::Costume),
            0x0A => Ok(ValueKind::Array),
            _ => Err(DecodeError::UnknownValueKind(value)),
        }
    }
}

impl ValueKind {
    /// The name scripts see for this kind, e.g. in diagnostics or when a
    /// handle cannot be resolved to anything better.
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Nothing => "undefined",
            ValueKind::Int => "number",
            ValueKind::Function => "user function",
            ValueKind::Str => "string",
            ValueKind::Builtin => "built-in function",
            ValueKind::Resource => "file",
            ValueKind::Sequence => "stack",
            ValueKind::ObjectType => "object type",
            ValueKind::Animation => "animation",
            ValueKind::Costume => "costume",
            ValueKind::Array => "fast array",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
