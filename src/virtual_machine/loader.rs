//! Assembly text parser.
//!
//! Converts BASM module source into a [`Program`]. Parsing is line
//! oriented: lines are trimmed, blank lines and `;` comments are ignored,
//! and the recognized top-level constructs are
//!
//! ```text
//! module <name>                 ; acknowledged, no effect
//! memory <decl>                 ; acknowledged, no effect
//! data $<name> { ... }          ; write.len / write.i64 / write.bytes
//! func $<name>(params) { ... }  ; labels and instructions
//! export $<name> as "<alias>"
//! ```
//!
//! Inside a function body a line starting with `.` and ending with `:`
//! records a label whose target is the next 1-based instruction index.
//! Unknown mnemonics parse as `nop`, matching the engine rule that
//! undefined instructions are no-ops.

use crate::utils::log::Logger;
use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::isa::Opcode;
use crate::virtual_machine::module::{DataDirective, Function, Instruction, Program};
use crate::virtual_machine::operand::Operand;

const COMMENT_CHAR: char = ';';

/// Shorthand for a [`VmError::ModuleLoad`] with line context.
fn load_error(line: usize, reason: impl Into<String>) -> VmError {
    VmError::ModuleLoad {
        line,
        reason: reason.into(),
    }
}

/// Strips a trailing `;` comment, ignoring `;` inside string literals.
fn strip_comment(line: &str) -> &str {
    let mut in_str = false;
    for (i, b) in line.bytes().enumerate() {
        match b {
            b'"' => in_str = !in_str,
            b if b == COMMENT_CHAR as u8 && !in_str => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Splits an operand list on top-level commas.
///
/// Commas inside `[...]` belong to the memory reference and are preserved.
fn split_operands(rest: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, b) in rest.bytes().enumerate() {
        match b {
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                out.push(&rest[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&rest[start..]);
    out
}

/// Decodes the escapes supported in `write.bytes` payloads: `\n`, `\t`, `\\`.
///
/// Unrecognized escapes pass through verbatim.
fn unescape(payload: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    let mut chars = payload.bytes();
    while let Some(b) = chars.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match chars.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b't') => out.push(b'\t'),
            Some(b'\\') => out.push(b'\\'),
            Some(other) => {
                out.push(b'\\');
                out.push(other);
            }
            None => out.push(b'\\'),
        }
    }
    out
}

/// Extracts the quoted payload of a string argument.
///
/// The payload is everything between the first and the last double quote,
/// so embedded quotes survive without escaping.
fn quoted_payload(arg: &str, line_no: usize) -> Result<&str, VmError> {
    let first = arg
        .find('"')
        .ok_or_else(|| load_error(line_no, format!("expected string literal, got `{arg}`")))?;
    let last = arg.rfind('"').unwrap();
    if last == first {
        return Err(load_error(line_no, "unterminated string literal"));
    }
    Ok(&arg[first + 1..last])
}

/// Parses an integer directive argument (decimal, hex or binary).
fn directive_int(arg: &str, line_no: usize) -> Result<i64, VmError> {
    match Operand::parse(arg) {
        Ok(Operand::Int(v)) => Ok(v),
        _ => Err(load_error(line_no, format!("expected integer, got `{arg}`"))),
    }
}

/// Parses a `func $name(params) {` header, returning (name, params).
fn parse_func_header(line: &str, line_no: usize) -> Result<(String, Vec<String>), VmError> {
    let rest = line["func".len()..].trim();
    let rest = rest
        .strip_suffix('{')
        .ok_or_else(|| load_error(line_no, "expected `{` after function header"))?
        .trim();
    let rest = rest
        .strip_prefix('$')
        .ok_or_else(|| load_error(line_no, "expected `$` before function name"))?;
    let open = rest
        .find('(')
        .ok_or_else(|| load_error(line_no, "expected `(` in function header"))?;
    let close = rest
        .rfind(')')
        .ok_or_else(|| load_error(line_no, "expected `)` in function header"))?;
    let name = rest[..open].trim();
    if name.is_empty() {
        return Err(load_error(line_no, "missing function name"));
    }
    let params = rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    Ok((name.to_string(), params))
}

/// Parses an `export $name as "alias"` line, returning (name, alias).
fn parse_export(line: &str, line_no: usize) -> Result<(String, String), VmError> {
    let rest = line["export".len()..].trim();
    let rest = rest
        .strip_prefix('$')
        .ok_or_else(|| load_error(line_no, "expected `$` before exported function name"))?;
    let (name, tail) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| load_error(line_no, "expected `as \"alias\"` in export"))?;
    let tail = tail.trim();
    let tail = tail
        .strip_prefix("as")
        .ok_or_else(|| load_error(line_no, "expected `as` in export"))?;
    let alias = quoted_payload(tail, line_no)?;
    let alias = String::from_utf8(unescape(alias)).map_err(|_| VmError::InvalidUtf8)?;
    Ok((name.to_string(), alias))
}

/// Parses a single instruction line inside a function body.
fn parse_instruction(line: &str, line_no: usize, log: &Logger) -> Result<Instruction, VmError> {
    let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
        Some((m, rest)) => (m, rest.trim()),
        None => (line, ""),
    };

    let opcode = Opcode::from_mnemonic(mnemonic).unwrap_or_else(|| {
        log.warn(&format!(
            "line {line_no}: unknown instruction `{mnemonic}`, treated as nop"
        ));
        Opcode::Nop
    });

    let mut operands = Vec::new();
    if !rest.is_empty() {
        for piece in split_operands(rest) {
            let operand = Operand::parse(piece)
                .map_err(|e| load_error(line_no, format!("bad operand: {e}")))?;
            operands.push(operand);
        }
    }

    Ok(Instruction { opcode, operands })
}

/// Parses a full module source into a [`Program`].
pub(crate) fn parse(source: &str) -> Result<Program, VmError> {
    let log = Logger::new("loader");
    let mut program = Program::default();

    let mut lines = source.lines().enumerate();
    while let Some((idx, raw)) = lines.next() {
        let line_no = idx + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("module ") || line.starts_with("memory ") {
            // Acknowledged only; the module name is informational and the
            // memory capacity is fixed.
            continue;
        }

        if line.starts_with("data ") {
            let (name, directives) = parse_data_block(line, line_no, &mut lines)?;
            program.data_builders.insert(name, directives);
            continue;
        }

        if line.starts_with("func ") {
            let function = parse_func_block(line, line_no, &mut lines, &log)?;
            program.functions.insert(function.name.clone(), function);
            continue;
        }

        if line.starts_with("export ") {
            let (name, alias) = parse_export(line, line_no)?;
            program.exports.insert(alias, name);
            continue;
        }

        return Err(load_error(line_no, format!("unrecognized construct `{line}`")));
    }

    log.debug(&format!(
        "loaded module: {} functions, {} data builders, {} exports",
        program.functions.len(),
        program.data_builders.len(),
        program.exports.len()
    ));
    Ok(program)
}

/// Consumes a `data $name { ... }` block.
fn parse_data_block(
    header: &str,
    header_line: usize,
    lines: &mut std::iter::Enumerate<std::str::Lines<'_>>,
) -> Result<(String, Vec<DataDirective>), VmError> {
    let rest = header["data".len()..].trim();
    let rest = rest
        .strip_suffix('{')
        .ok_or_else(|| load_error(header_line, "expected `{` after data header"))?
        .trim();
    let name = rest
        .strip_prefix('$')
        .ok_or_else(|| load_error(header_line, "expected `$` before data builder name"))?
        .trim();
    if name.is_empty() {
        return Err(load_error(header_line, "missing data builder name"));
    }

    let mut directives = Vec::new();
    for (idx, raw) in lines.by_ref() {
        let line_no = idx + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        if line == "}" {
            return Ok((name.to_string(), directives));
        }

        let (op, arg) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| load_error(line_no, format!("malformed directive `{line}`")))?;
        let arg = arg.trim();
        let directive = match op {
            "write.len" => DataDirective::WriteLen(directive_int(arg, line_no)?),
            "write.i64" => DataDirective::WriteI64(directive_int(arg, line_no)?),
            "write.bytes" => DataDirective::WriteBytes(unescape(quoted_payload(arg, line_no)?)),
            _ => return Err(load_error(line_no, format!("unknown directive `{op}`"))),
        };
        directives.push(directive);
    }

    Err(load_error(header_line, "unterminated data block"))
}

/// Consumes a `func $name(params) { ... }` block.
fn parse_func_block(
    header: &str,
    header_line: usize,
    lines: &mut std::iter::Enumerate<std::str::Lines<'_>>,
    log: &Logger,
) -> Result<Function, VmError> {
    let (name, params) = parse_func_header(header, header_line)?;
    let mut function = Function::new(name, params);

    for (idx, raw) in lines.by_ref() {
        let line_no = idx + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        if line == "}" {
            return Ok(function);
        }

        // `.name:` records a label targeting the next instruction index.
        if line.starts_with('.') && line.ends_with(':') {
            let label = &line[..line.len() - 1];
            function
                .labels
                .insert(label.to_string(), function.instructions.len() + 1);
            continue;
        }

        let instruction = parse_instruction(line, line_no, log)?;
        function.instructions.push(instruction);
    }

    Err(load_error(header_line, "unterminated function body"))
}
