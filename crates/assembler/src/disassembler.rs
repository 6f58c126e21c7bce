//! Disassembler: script image → canonical assembly text.
//!
//! The string table comes first, one `STRING` line per entry, then each
//! function in id order as a `FUNC` … `ENDFUNC` block with its
//! instructions indented by four spaces.

use std::fmt::Write;

use tickvm_common::ScriptImage;

/// Disassemble an image into canonical assembly text.
///
/// The output is guaranteed to reassemble to an identical image
/// (`assemble(disassemble(image)) == image`).
pub fn disassemble(image: &ScriptImage) -> String {
    let mut out = String::new();

    for (index, text) in image.strings.iter().enumerate() {
        let _ = writeln!(out, "STRING {index} {}", quote(text));
    }

    for (id, body) in &image.functions {
        let _ = write!(out, "FUNC {id} {} {}", body.arg_count, body.local_count);
        if body.unfreezable {
            out.push_str(" UNFREEZABLE");
        }
        out.push('\n');
        for instr in &body.instructions {
            let _ = writeln!(out, "    {instr}");
        }
        out.push_str("ENDFUNC\n");
    }

    out
}

/// Quote a string so the lexer reads it back unchanged.
pub(crate) fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
