//! Instruction encoding and decoding.
//!
//! Every instruction is exactly 5 bytes, encoded little-endian:
//! ```text
//! Byte 0:    opcode (u8)
//! Bytes 1-4: operand (u32, little-endian)
//! ```

use std::fmt;

use crate::error::DecodeError;
use crate::opcode::Opcode;

/// Size of one encoded instruction in bytes.
pub const INSTRUCTION_SIZE: usize = 5;

/// A single instruction: an opcode and its 32-bit operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// The operation to perform.
    pub opcode: Opcode,
    /// Operand. Meaning depends on opcode; zero when unused.
    pub operand: u32,
}

impl Instruction {
    /// Create a new instruction.
    pub fn new(opcode: Opcode, operand: u32) -> Self {
        Self { opcode, operand }
    }

    /// Create an instruction whose operand is unused.
    pub fn bare(opcode: Opcode) -> Self {
        Self { opcode, operand: 0 }
    }

    /// Create a `LOAD_VALUE` carrying a signed constant.
    pub fn load_value(value: i32) -> Self {
        Self {
            opcode: Opcode::LoadValue,
            operand: value as u32,
        }
    }

    /// The operand reinterpreted as a signed integer.
    pub fn signed_operand(&self) -> i32 {
        self.operand as i32
    }

    /// Encode this instruction to 5 bytes (little-endian).
    pub fn encode(&self) -> [u8; INSTRUCTION_SIZE] {
        let mut bytes = [0u8; INSTRUCTION_SIZE];
        bytes[0] = self.opcode as u8;
        bytes[1..5].copy_from_slice(&self.operand.to_le_bytes());
        bytes
    }

    /// Decode 5 bytes into an instruction (little-endian).
    pub fn decode(bytes: [u8; INSTRUCTION_SIZE]) -> Result<Self, DecodeError> {
        let opcode = Opcode::try_from(bytes[0])?;
        let operand = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        Ok(Self { opcode, operand })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode {
            Opcode::LoadValue => write!(f, "{} {}", self.opcode.mnemonic(), self.signed_operand()),
            op if op.takes_operand() || self.operand != 0 => {
                write!(f, "{} {}", op.mnemonic(), self.operand)
            }
            op => f.write_str(op.mnemonic()),
        }
    }
}
