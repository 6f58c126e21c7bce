//! Parser for tickvm assembly tokens → directives and instructions.

use crate::error::AsmError;
use crate::lexer::Token;
use tickvm_common::Opcode;

/// Instruction operand as written in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Operand {
    Number(u32),
    /// `LOAD_STRING "text"`, interned during assembly.
    Text(String),
}

/// One parsed, non-blank line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Line {
    /// `STRING <index> "<text>"`
    String { index: u32, text: String },
    /// `FUNC <id> <args> <locals> [UNFREEZABLE]`
    Func {
        id: u32,
        arg_count: u16,
        local_count: u16,
        unfreezable: bool,
    },
    /// `ENDFUNC`
    EndFunc,
    /// `MNEMONIC [operand]`
    Instr { opcode: Opcode, operand: Operand },
}

/// Parse the tokens of a single line.
///
/// Returns `Ok(None)` for blank lines (empty token list).
pub(crate) fn parse_line(tokens: &[Token], line: usize) -> Result<Option<Line>, AsmError> {
    let Some(first) = tokens.first() else {
        return Ok(None);
    };
    let word = match first {
        Token::Ident(s) => s.as_str(),
        other => {
            return Err(AsmError::UnexpectedToken {
                line,
                token: other.text(),
            })
        }
    };
    let args = &tokens[1..];

    let parsed = match word {
        "STRING" => {
            let index = expect_u32(args, 0, line, "STRING", 2)?;
            let text = match args.get(1) {
                Some(Token::Str(s)) => s.clone(),
                Some(other) => {
                    return Err(AsmError::UnexpectedToken {
                        line,
                        token: other.text(),
                    })
                }
                None => {
                    return Err(AsmError::MissingArgument {
                        line,
                        opcode: "STRING",
                        expected: 2,
                    })
                }
            };
            expect_end(&args[2..], line)?;
            Line::String { index, text }
        }
        "FUNC" => {
            let id = expect_u32(args, 0, line, "FUNC", 3)?;
            let arg_count = expect_u16(args, 1, line, "FUNC", 3)?;
            let local_count = expect_u16(args, 2, line, "FUNC", 3)?;
            let unfreezable = match args.get(3) {
                None => false,
                Some(Token::Ident(s)) if s == "UNFREEZABLE" => true,
                Some(other) => {
                    return Err(AsmError::UnexpectedToken {
                        line,
                        token: other.text(),
                    })
                }
            };
            expect_end(args.get(4..).unwrap_or_default(), line)?;
            Line::Func {
                id,
                arg_count,
                local_count,
                unfreezable,
            }
        }
        "ENDFUNC" => {
            expect_end(args, line)?;
            Line::EndFunc
        }
        mnemonic => {
            let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(|| AsmError::UnknownOpcode {
                line,
                token: mnemonic.to_string(),
            })?;
            let operand = match (opcode, args.first()) {
                (Opcode::LoadString, Some(Token::Str(s))) => Operand::Text(s.clone()),
                // Operand-free opcodes still accept one, so any encoded
                // instruction can be written back.
                (op, None) if !op.takes_operand() => Operand::Number(0),
                (op, _) => Operand::Number(expect_u32(args, 0, line, op.mnemonic(), 1)?),
            };
            expect_end(args.get(1..).unwrap_or_default(), line)?;
            Line::Instr { opcode, operand }
        }
    };
    Ok(Some(parsed))
}

/// Extract a number from the token at position `idx`.
fn expect_number(
    args: &[Token],
    idx: usize,
    line: usize,
    opcode: &'static str,
    expected: usize,
) -> Result<i64, AsmError> {
    match args.get(idx) {
        Some(Token::Number(n)) => Ok(*n),
        Some(other) => Err(AsmError::UnexpectedToken {
            line,
            token: other.text(),
        }),
        None => Err(AsmError::MissingArgument {
            line,
            opcode,
            expected,
        }),
    }
}

/// A 32-bit operand. Negative values are stored as their two's
/// complement bits.
fn expect_u32(
    args: &[Token],
    idx: usize,
    line: usize,
    opcode: &'static str,
    expected: usize,
) -> Result<u32, AsmError> {
    let n = expect_number(args, idx, line, opcode, expected)?;
    if n < 0 {
        return i32::try_from(n)
            .map(|v| v as u32)
            .map_err(|_| AsmError::InvalidNumber {
                line,
                token: n.to_string(),
            });
    }
    u32::try_from(n).map_err(|_| AsmError::InvalidNumber {
        line,
        token: n.to_string(),
    })
}

fn expect_u16(
    args: &[Token],
    idx: usize,
    line: usize,
    opcode: &'static str,
    expected: usize,
) -> Result<u16, AsmError> {
    let n = expect_number(args, idx, line, opcode, expected)?;
    u16::try_from(n).map_err(|_| AsmError::InvalidNumber {
        line,
        token: n.to_string(),
    })
}

/// Check that there are no extra tokens.
fn expect_end(remaining: &[Token], line: usize) -> Result<(), AsmError> {
    match remaining.first() {
        Some(tok) => Err(AsmError::UnexpectedToken {
            line,
            token: tok.text(),
        }),
        None => Ok(()),
    }
}
