//! Compiled script images.
//!
//! An image holds a string table and the bytecode of every user function,
//! keyed by numeric id. Binary files (`.tkb`) use this layout:
//!
//! ```text
//! "TKIM"  u16 version
//! u32 string count, then each string (u32 length + UTF-8)
//! u32 function count, then each function:
//!   u32 id, u8 flags (bit0 unfreezable), u16 arg count, u16 local count,
//!   u32 instruction count, then 5 bytes per instruction
//! ```

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::codec::{ByteReader, ByteWriter};
use crate::error::DecodeError;
use crate::instruction::{Instruction, INSTRUCTION_SIZE};

/// Magic prefix of an encoded image.
pub const IMAGE_MAGIC: &str = "TKIM";

/// Image format version written by [`ScriptImage::encode`].
pub const IMAGE_VERSION: u16 = 1;

const FLAG_UNFREEZABLE: u8 = 0x01;

/// Bytecode and frame layout of one user function.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionBody {
    /// Keeps running while the rest of the world is frozen.
    pub unfreezable: bool,
    /// Number of arguments bound into the first local slots.
    pub arg_count: u16,
    /// Additional local slots after the arguments.
    pub local_count: u16,
    pub instructions: Vec<Instruction>,
}

impl FunctionBody {
    pub fn new(arg_count: u16, local_count: u16, instructions: Vec<Instruction>) -> Self {
        Self {
            unfreezable: false,
            arg_count,
            local_count,
            instructions,
        }
    }

    /// Total local slots a frame of this function needs.
    pub fn frame_size(&self) -> usize {
        self.arg_count as usize + self.local_count as usize
    }
}

/// A complete compiled script: strings plus functions by id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptImage {
    pub strings: Vec<String>,
    pub functions: BTreeMap<u32, Rc<FunctionBody>>,
}

impl ScriptImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a function.
    pub fn insert_function(&mut self, id: u32, body: FunctionBody) {
        self.functions.insert(id, Rc::new(body));
    }

    pub fn function(&self, id: u32) -> Option<&Rc<FunctionBody>> {
        self.functions.get(&id)
    }

    /// Index of `text` in the string table, appending it if absent.
    pub fn intern(&mut self, text: &str) -> u32 {
        match self.strings.iter().position(|s| s == text) {
            Some(i) => i as u32,
            None => {
                self.strings.push(text.to_owned());
                (self.strings.len() - 1) as u32
            }
        }
    }

    /// Encode the image to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.raw(IMAGE_MAGIC.as_bytes());
        w.u16(IMAGE_VERSION);

        w.len(self.strings.len());
        for s in &self.strings {
            w.str(s);
        }

        w.len(self.functions.len());
        for (&id, body) in &self.functions {
            w.u32(id);
            w.u8(if body.unfreezable { FLAG_UNFREEZABLE } else { 0 });
            w.u16(body.arg_count);
            w.u16(body.local_count);
            w.len(body.instructions.len());
            for instr in &body.instructions {
                w.raw(&instr.encode());
            }
        }
        w.finish()
    }

    /// Decode an image from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = ByteReader::new(bytes);
        r.expect_magic(IMAGE_MAGIC)?;
        let version = r.u16()?;
        if version != IMAGE_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let string_count = r.len()?;
        let mut strings = Vec::new();
        for _ in 0..string_count {
            strings.push(r.str()?);
        }

        let function_count = r.len()?;
        let mut functions = BTreeMap::new();
        for _ in 0..function_count {
            let id = r.u32()?;
            let flags = r.u8()?;
            let arg_count = r.u16()?;
            let local_count = r.u16()?;
            let instr_count = r.len()?;
            let mut instructions = Vec::new();
            for _ in 0..instr_count {
                instructions.push(Instruction::decode(r.bytes::<INSTRUCTION_SIZE>()?)?);
            }
            let body = FunctionBody {
                unfreezable: flags & FLAG_UNFREEZABLE != 0,
                arg_count,
                local_count,
                instructions,
            };
            if functions.insert(id, Rc::new(body)).is_some() {
                return Err(DecodeError::DuplicateFunction(id));
            }
        }

        r.finish()?;
        Ok(Self { strings, functions })
    }
}
