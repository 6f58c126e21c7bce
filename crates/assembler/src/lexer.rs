//! Tokenizer for tickvm assembly text.

use crate::error::AsmError;

/// A single token from an assembly line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// A mnemonic or directive. Always uppercase.
    Ident(String),
    /// A numeric literal (decimal or hex, optionally negative).
    Number(i64),
    /// A double-quoted string literal with escapes resolved.
    Str(String),
}

impl Token {
    /// The token as it would be written back, for error messages.
    pub(crate) fn text(&self) -> String {
        match self {
            Token::Ident(s) => s.clone(),
            Token::Number(n) => n.to_string(),
            Token::Str(s) => format!("{s:?}"),
        }
    }
}

/// Tokenize a single line of assembly text.
///
/// Returns an empty Vec for blank lines and comment-only lines.
/// Comments start with `;` outside a string and extend to end of line.
pub(crate) fn tokenize_line(line: &str, line_num: usize) -> Result<Vec<Token>, AsmError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == ';' {
            break;
        } else if c == '"' {
            chars.next();
            tokens.push(Token::Str(string_literal(&mut chars, line_num)?));
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == ';' || c == '"' {
                    break;
                }
                word.push(c);
                chars.next();
            }
            tokens.push(word_token(&word, line_num)?);
        }
    }

    Ok(tokens)
}

fn string_literal(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    line: usize,
) -> Result<String, AsmError> {
    let mut text = String::new();
    loop {
        match chars.next() {
            None => return Err(AsmError::UnterminatedString { line }),
            Some('"') => return Ok(text),
            Some('\\') => {
                let escaped = match chars.next() {
                    Some('n') => '\n',
                    Some('r') => '\r',
                    Some('t') => '\t',
                    Some('0') => '\0',
                    Some('"') => '"',
                    Some('\\') => '\\',
                    Some(other) => return Err(AsmError::InvalidEscape { line, escape: other }),
                    None => return Err(AsmError::UnterminatedString { line }),
                };
                text.push(escaped);
            }
            Some(c) => text.push(c),
        }
    }
}

fn word_token(word: &str, line: usize) -> Result<Token, AsmError> {
    let (negative, digits) = match word.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, word),
    };
    if !negative && !digits.as_bytes().first().is_some_and(|b| b.is_ascii_digit()) {
        return Ok(Token::Ident(word.to_uppercase()));
    }

    let invalid = || AsmError::InvalidNumber {
        line,
        token: word.to_string(),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).map_err(|_| invalid())?,
        None => digits.parse::<i64>().map_err(|_| invalid())?,
    };
    Ok(Token::Number(if negative { -magnitude } else { magnitude }))
}
