//! tickvm assembler: text ↔ script image translation.
//!
//! The assembler is a mechanical translation: one line per instruction,
//! no labels, no macros. It exists to author test scripts and to inspect
//! compiled images.
//!
//! # Usage
//!
//! ```
//! use tickvm_assembler::{assemble, disassemble};
//!
//! let text = "FUNC 0 0 0\n    LOAD_VALUE 42\n    RETURN\nENDFUNC\n";
//! let image = assemble(text).unwrap();
//! assert_eq!(disassemble(&image), text);
//! ```
//!
//! # Format
//!
//! ```text
//! ; comment
//! STRING 0 "hello"            ; string table entry, indices in order
//! FUNC 1 2 0 UNFREEZABLE      ; id, arguments, extra locals, flag
//!     LOAD_STRING "world"     ; literal interned into the table
//!     LOAD_VALUE -0x10
//!     RETURN
//! ENDFUNC
//! ```
//!
//! # Roundtrip Guarantee
//!
//! `assemble(disassemble(image)) == image` holds for all images.
//! The disassembler outputs canonical text; the assembler also accepts
//! lowercase mnemonics, hex operands and string literals.

pub mod error;

mod disassembler;
mod lexer;
mod parser;

pub use error::AsmError;

use lexer::tokenize_line;
use parser::{parse_line, Line, Operand};
use tickvm_common::{FunctionBody, Instruction, ScriptImage};

/// A function whose ENDFUNC has not been seen yet.
struct OpenFunction {
    line: usize,
    id: u32,
    body: FunctionBody,
}

/// Assemble text into a script image.
///
/// Returns the first error encountered. Fix one error at a time.
pub fn assemble(text: &str) -> Result<ScriptImage, AsmError> {
    let mut image = ScriptImage::new();
    let mut open: Option<OpenFunction> = None;

    for (idx, text_line) in text.lines().enumerate() {
        let line = idx + 1;
        let tokens = tokenize_line(text_line, line)?;
        let Some(parsed) = parse_line(&tokens, line)? else {
            continue;
        };

        match parsed {
            Line::String { index, text } => {
                let expected = image.strings.len() as u32;
                if index != expected {
                    return Err(AsmError::StringOutOfOrder {
                        line,
                        expected,
                        found: index,
                    });
                }
                image.strings.push(text);
            }
            Line::Func {
                id,
                arg_count,
                local_count,
                unfreezable,
            } => {
                if open.is_some() {
                    return Err(AsmError::NestedFunction { line });
                }
                if image.function(id).is_some() {
                    return Err(AsmError::DuplicateFunction { line, id });
                }
                let mut body = FunctionBody::new(arg_count, local_count, Vec::new());
                body.unfreezable = unfreezable;
                open = Some(OpenFunction { line, id, body });
            }
            Line::EndFunc => {
                let done = open.take().ok_or(AsmError::UnmatchedEnd { line })?;
                image.insert_function(done.id, done.body);
            }
            Line::Instr { opcode, operand } => {
                let current = open.as_mut().ok_or(AsmError::OutsideFunction { line })?;
                let operand = match operand {
                    Operand::Number(n) => n,
                    Operand::Text(s) => image.intern(&s),
                };
                current.body.instructions.push(Instruction::new(opcode, operand));
            }
        }
    }

    match open {
        Some(unclosed) => Err(AsmError::UnclosedFunction {
            line: unclosed.line,
        }),
        None => Ok(image),
    }
}

/// Disassemble a script image into canonical assembly text.
pub fn disassemble(image: &ScriptImage) -> String {
    disassembler::disassemble(image)
}
