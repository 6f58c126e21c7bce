//! Opcode definitions for the tickvm instruction set.
//!
//! Opcodes are grouped by family, one byte range per family. Bytes outside
//! the defined set decode to [`DecodeError::UnknownOpcode`].

use crate::error::DecodeError;

/// Identifies the operation to perform.
///
/// Unless noted otherwise, results are left in the frame's register and
/// binary operators take their left operand from the top of the value stack.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Control
    /// Leave the current function.
    Return = 0x01,
    /// Jump to instruction `operand`.
    Branch = 0x02,
    /// Jump to instruction `operand` when the register is false-ish.
    BranchIfZero = 0x03,
    /// Call the function or built-in in the register with `operand` arguments.
    Call = 0x04,

    // Load
    /// Load `operand` as a signed integer.
    LoadValue = 0x10,
    /// Load string table entry `operand`.
    LoadString = 0x11,
    /// Load a reference to user function `operand`.
    LoadFunction = 0x12,
    /// Load a reference to built-in `operand`.
    LoadBuiltin = 0x13,
    /// Load resource handle `operand`.
    LoadResource = 0x14,
    /// Load object type `operand`.
    LoadObjectType = 0x15,
    /// Load Nothing.
    LoadNull = 0x16,
    /// Load local slot `operand`.
    LoadLocal = 0x17,
    /// Load global slot `operand`.
    LoadGlobal = 0x18,

    // Store
    /// Copy the register into local slot `operand`.
    SetLocal = 0x20,
    /// Copy the register into global slot `operand`.
    SetGlobal = 0x21,
    /// Add one to a local; the register receives the old value.
    IncrementLocal = 0x22,
    /// Subtract one from a local; the register receives the old value.
    DecrementLocal = 0x23,
    /// Add one to a global; the register receives the old value.
    IncrementGlobal = 0x24,
    /// Subtract one from a global; the register receives the old value.
    DecrementGlobal = 0x25,

    // Stack
    /// Push a copy of the register.
    Push = 0x30,
    /// Move the register onto the stack, leaving Nothing behind.
    QuickPush = 0x31,

    // Binary
    /// Integer sum, or text concatenation for any other pair.
    Plus = 0x40,
    Minus = 0x41,
    Multiply = 0x42,
    /// Integer quotient. Division by zero is fatal.
    Divide = 0x43,
    /// Integer remainder. Division by zero is fatal.
    Modulus = 0x44,
    Equals = 0x45,
    NotEquals = 0x46,
    LessThan = 0x47,
    MoreThan = 0x48,
    LessEqual = 0x49,
    MoreEqual = 0x4A,
    /// Both operands are evaluated before this runs.
    And = 0x4B,
    /// Both operands are evaluated before this runs.
    Or = 0x4C,

    // Unary
    /// Invert the truthiness of the register.
    Not = 0x50,
    /// Negate the integer in the register.
    Negative = 0x51,

    // Index
    /// Pop a container, read the element at the register's index.
    IndexGet = 0x60,
    /// Pop a container and a value, store the value at the register's index.
    IndexSet = 0x61,
    /// Pop a container, add one to the indexed element.
    IndexIncrement = 0x62,
    /// Pop a container, subtract one from the indexed element.
    IndexDecrement = 0x63,
}

/// All valid opcodes, in byte order.
pub const ALL_OPCODES: [Opcode; 40] = [
    Opcode::Return,
    Opcode::Branch,
    Opcode::BranchIfZero,
    Opcode::Call,
    Opcode::LoadValue,
    Opcode::LoadString,
    Opcode::LoadFunction,
    Opcode::LoadBuiltin,
    Opcode::LoadResource,
    Opcode::LoadObjectType,
    Opcode::LoadNull,
    Opcode::LoadLocal,
    Opcode::LoadGlobal,
    Opcode::SetLocal,
    Opcode::SetGlobal,
    Opcode::IncrementLocal,
    Opcode::DecrementLocal,
    Opcode::IncrementGlobal,
    Opcode::DecrementGlobal,
    Opcode::Push,
    Opcode::QuickPush,
    Opcode::Plus,
    Opcode::Minus,
    Opcode::Multiply,
    Opcode::Divide,
    Opcode::Modulus,
    Opcode::Equals,
    Opcode::NotEquals,
    Opcode::LessThan,
    Opcode::MoreThan,
    Opcode::LessEqual,
    Opcode::MoreEqual,
    Opcode::And,
    Opcode::Or,
    Opcode::Not,
    Opcode::Negative,
    Opcode::IndexGet,
    Opcode::IndexSet,
    Opcode::IndexIncrement,
    Opcode::IndexDecrement,
];

impl TryFrom<u8> for Opcode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            // Control
            0x01 => Ok(Opcode::Return),
            0x02 => Ok(Opcode::Branch),
            0x03 => Ok(Opcode::BranchIfZero),
            0x04 => Ok(Opcode::Call),

            // Load
            0x10 => Ok(Opcode::LoadValue),
            0x11 => Ok(Opcode::LoadString),
            0x12 => Ok(Opcode::LoadFunction),
            0x13 => Ok(Opcode::LoadBuiltin),
            0x14 => Ok(Opcode::LoadResource),
            0x15 => Ok(Opcode::LoadObjectType),
            0x16 => Ok(Opcode::LoadNull),
            0x17 => Ok(Opcode::LoadLocal),
            0x18 => Ok(Opcode::LoadGlobal),

            // Store
            0x20 => Ok(Opcode::SetLocal),
            0x21 => Ok(Opcode::SetGlobal),
            0x22 => Ok(Opcode::IncrementLocal),
            0x23 => Ok(Opcode::DecrementLocal),
            0x24 => Ok(Opcode::IncrementGlobal),
            0x25 => Ok(Opcode::DecrementGlobal),

            // Stack
            0x30 => Ok(Opcode::Push),
            0x31 => Ok(Opcode::QuickPush),

            // Binary
            0x40 => Ok(Opcode::Plus),
            0x41 => Ok(Opcode::Minus),
            0x42 => Ok(Opcode::Multiply),
            0x43 => Ok(Opcode::Divide),
            0x44 => Ok(Opcode::Modulus),
            0x45 => Ok(Opcode::Equals),
            0x46 => Ok(Opcode::NotEquals),
            0x47 => Ok(Opcode::LessThan),
            0x48 => Ok(Opcode::MoreThan),
            0x49 => Ok(Opcode::LessEqual),
            0x4A => Ok(Opcode::MoreEqual),
            0x4B => Ok(Opcode::And),
            0x4C => Ok(Opcode::Or),

            // Unary
            0x50 => Ok(Opcode::Not),
            0x51 => Ok(Opcode::Negative),

            // Index
            0x60 => Ok(Opcode::IndexGet),
            0x61 => Ok(Opcode::IndexSet),
            0x62 => Ok(Opcode::IndexIncrement),
            0x63 => Ok(Opcode::IndexDecrement),

            _ => Err(DecodeError::UnknownOpcode(value)),
        }
    }
}

impl Opcode {
    /// Returns the assembly mnemonic for this opcode.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Return => "RETURN",
            Opcode::Branch => "BRANCH",
            Opcode::BranchIfZero => "BRANCH_IF_ZERO",
            Opcode::Call => "CALL",
            Opcode::LoadValue => "LOAD_VALUE",
            Opcode::LoadString => "LOAD_STRING",
            Opcode::LoadFunction => "LOAD_FUNCTION",
            Opcode::LoadBuiltin => "LOAD_BUILTIN",
            Opcode::LoadResource => "LOAD_RESOURCE",
            Opcode::LoadObjectType => "LOAD_OBJECT_TYPE",
            Opcode::LoadNull => "LOAD_NULL",
            Opcode::LoadLocal => "LOAD_LOCAL",
            Opcode::LoadGlobal => "LOAD_GLOBAL",
            Opcode::SetLocal => "SET_LOCAL",
            Opcode::SetGlobal => "SET_GLOBAL",
            Opcode::IncrementLocal => "INCREMENT_LOCAL",
            Opcode::DecrementLocal => "DECREMENT_LOCAL",
            Opcode::IncrementGlobal => "INCREMENT_GLOBAL",
            Opcode::DecrementGlobal => "DECREMENT_GLOBAL",
            Opcode::Push => "PUSH",
            Opcode::QuickPush => "QUICK_PUSH",
            Opcode::Plus => "PLUS",
            Opcode::Minus => "MINUS",
            Opcode::Multiply => "MULTIPLY",
            Opcode::Divide => "DIVIDE",
            Opcode::Modulus => "MODULUS",
            Opcode::Equals => "EQUALS",
            Opcode::NotEquals => "NOT_EQUALS",
            Opcode::LessThan => "LESS_THAN",
            Opcode::MoreThan => "MORE_THAN",
            Opcode::LessEqual => "LESS_EQUAL",
            Opcode::MoreEqual => "MORE_EQUAL",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Not => "NOT",
            Opcode::Negative => "NEGATIVE",
            Opcode::IndexGet => "INDEX_GET",
            Opcode::IndexSet => "INDEX_SET",
            Opcode::IndexIncrement => "INDEX_INCREMENT",
            Opcode::IndexDecrement => "INDEX_DECREMENT",
        }
    }

    /// Looks an opcode up by mnemonic, ignoring ASCII case.
    pub fn from_mnemonic(text: &str) -> Option<Opcode> {
        ALL_OPCODES
            .iter()
            .copied()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(text))
    }

    /// Returns true when the operand is meaningful for this opcode.
    pub fn takes_operand(&self) -> bool {
        !matches!(
            self,
            Opcode::Return
                | Opcode::LoadNull
                | Opcode::Push
                | Opcode::QuickPush
                | Opcode::Plus
                | Opcode::Minus
                | Opcode::Multiply
                | Opcode::Divide
                | Opcode::Modulus
                | Opcode::Equals
                | Opcode::NotEquals
                | Opcode::LessThan
                | Opcode::MoreThan
                | Opcode::LessEqual
                | Opcode::MoreEqual
                | Opcode::And
                | Opcode::Or
                | Opcode::Not
                | Opcode::Negative
                | Opcode::IndexGet
                | Opcode::IndexSet
                | Opcode::IndexIncrement
                | Opcode::IndexDecrement
        )
    }
}
