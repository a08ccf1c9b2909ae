//! BASMB binary module format.
//!
//! A BASMB module is the magic bytes `BASM`, a little-endian u32 version
//! whose major byte must be 1, and a sequence of `{u8 id, u32 len, bytes}`
//! sections. The decoder reconstructs an equivalent textual module and
//! hands it to the loader, which keeps the execution engine format
//! agnostic: both paths produce the same [`Program`].
//!
//! The writer emits the binary-expressible subset of a loaded program
//! (wire-byte opcodes, i32 immediates, string-shaped data builders,
//! `[reg±imm]` memory references) and rejects the rest with
//! [`VmError::Unencodable`].

use crate::types::encoding::{Decode, Encode, Str16, read_bytes};
use crate::utils::log::Logger;
use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::isa::Opcode;
use crate::virtual_machine::module::{DataDirective, Program};
use crate::virtual_machine::operand::Operand;
use basm_derive::BinaryCodec;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Magic bytes identifying a BASMB module.
pub(crate) const MAGIC: &[u8; 4] = b"BASM";

/// Version emitted by the writer. The major byte is the low byte.
const CURRENT_VERSION: u32 = 1;

/// Major revision this decoder understands.
const SUPPORTED_MAJOR: u8 = 1;

/// Section identifiers.
mod section {
    pub const STRINGS: u8 = 0x01;
    pub const FUNCTIONS: u8 = 0x02;
    pub const EXPORTS: u8 = 0x03;
    pub const CODE: u8 = 0x05;
}

/// Operand tag bytes.
mod tag {
    pub const REG: u8 = 0x01;
    pub const IMM_I32: u8 = 0x02;
    pub const STRING: u8 = 0x03;
    pub const FUNC: u8 = 0x04;
    pub const SYMBOL: u8 = 0x05;
    pub const LABEL: u8 = 0x06;
    pub const MEM: u8 = 0x07;
}

/// `{u8 id, u32 len}` section framing.
#[derive(Debug, BinaryCodec)]
struct SectionHeader {
    id: u8,
    len: u32,
}

/// Per-function record in the Functions section.
#[derive(Debug, BinaryCodec)]
struct FuncDecl {
    name: Str16,
    param_count: u8,
    instr_count: u16,
}

/// Per-export record in the Exports section.
#[derive(Debug, BinaryCodec)]
struct ExportDecl {
    alias: Str16,
    func_index: u16,
}

/// Label entry in the Code section: 1-based instruction index.
#[derive(Debug, BinaryCodec)]
struct LabelDecl {
    name: Str16,
    position: u16,
}

/// Escapes a payload for a `write.bytes` string literal.
fn escape_bytes(payload: &[u8]) -> String {
    let mut out = String::with_capacity(payload.len());
    for &b in payload {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            _ => out.push(b as char),
        }
    }
    out
}

/// Decoded body of one function from the Code section.
#[derive(Default)]
struct CodeBody {
    labels: Vec<LabelDecl>,
    /// Instructions as (mnemonic, rendered operand texts).
    instructions: Vec<(&'static str, Vec<String>)>,
}

/// Decodes a BASMB module into equivalent assembly text.
pub(crate) fn decode_to_text(bytes: &[u8]) -> Result<String, VmError> {
    let log = Logger::new("decoder");
    let mut input = bytes;

    if read_bytes(&mut input, 4).map_err(|_| VmError::BadMagic)? != MAGIC.as_slice() {
        return Err(VmError::BadMagic);
    }
    let version = u32::decode(&mut input)?;
    let major = (version & 0xFF) as u8;
    if major != SUPPORTED_MAJOR {
        return Err(VmError::UnsupportedVersion { version, major });
    }

    let mut strings: Vec<Vec<u8>> = Vec::new();
    let mut functions: Vec<FuncDecl> = Vec::new();
    let mut exports: Vec<ExportDecl> = Vec::new();
    let mut bodies: HashMap<u16, CodeBody> = HashMap::new();

    while !input.is_empty() {
        let header = SectionHeader::decode(&mut input)?;
        let mut body = read_bytes(&mut input, header.len as usize)?;
        match header.id {
            section::STRINGS => {
                let count = u16::decode(&mut body)?;
                for _ in 0..count {
                    strings.push(Vec::<u8>::decode(&mut body)?);
                }
            }
            section::FUNCTIONS => {
                let count = u16::decode(&mut body)?;
                for _ in 0..count {
                    functions.push(FuncDecl::decode(&mut body)?);
                }
            }
            section::EXPORTS => {
                let count = u16::decode(&mut body)?;
                for _ in 0..count {
                    exports.push(ExportDecl::decode(&mut body)?);
                }
            }
            section::CODE => {
                while !body.is_empty() {
                    let func_index = u16::decode(&mut body)?;
                    let entry = decode_code_entry(&mut body, &functions, &log)?;
                    bodies.insert(func_index, entry);
                }
            }
            other => {
                log.warn(&format!("skipping unknown section {other:#04x}"));
            }
        }
    }

    render_text(&strings, &functions, &exports, &mut bodies)
}

/// Decodes one function entry of the Code section (labels + instructions).
fn decode_code_entry(
    body: &mut &[u8],
    functions: &[FuncDecl],
    log: &Logger,
) -> Result<CodeBody, VmError> {
    let mut entry = CodeBody::default();

    let label_count = u16::decode(body)?;
    for _ in 0..label_count {
        entry.labels.push(LabelDecl::decode(body)?);
    }

    let instr_count = u16::decode(body)?;
    for _ in 0..instr_count {
        let byte = u8::decode(body)?;
        let opcode = Opcode::from_wire_byte(byte);
        if opcode == Opcode::Nop && byte != Opcode::Nop.wire_byte().unwrap() {
            log.warn(&format!("unknown opcode byte {byte:#04x}, decoded as nop"));
        }
        let operand_count = u8::decode(body)?;
        let mut operands = Vec::with_capacity(operand_count as usize);
        for _ in 0..operand_count {
            operands.push(decode_operand_text(body, functions)?);
        }
        entry.instructions.push((opcode.mnemonic(), operands));
    }

    Ok(entry)
}

/// Decodes one tagged operand into its textual form.
fn decode_operand_text(body: &mut &[u8], functions: &[FuncDecl]) -> Result<String, VmError> {
    let tag = u8::decode(body)?;
    Ok(match tag {
        tag::REG => format!("r{}", u8::decode(body)?),
        tag::IMM_I32 => i32::decode(body)?.to_string(),
        tag::STRING => format!("$str_{}", u16::decode(body)? + 1),
        tag::FUNC => {
            let index = u16::decode(body)? as usize;
            let decl = functions.get(index).ok_or(VmError::Decode {
                reason: "function index out of range",
            })?;
            format!("${}", &*decl.name)
        }
        tag::SYMBOL => format!("${}", &*Str16::decode(body)?),
        tag::LABEL => Str16::decode(body)?.into_inner(),
        tag::MEM => {
            let base = u8::decode(body)?;
            let offset = i32::decode(body)?;
            if offset < 0 {
                format!("[r{base}-{}]", offset.unsigned_abs())
            } else {
                format!("[r{base}+{offset}]")
            }
        }
        // Raw payload: length-prefixed bytes, rendered lossily.
        _ => String::from_utf8_lossy(&Vec::<u8>::decode(body)?).into_owned(),
    })
}

/// Renders decoded sections as a textual module.
fn render_text(
    strings: &[Vec<u8>],
    functions: &[FuncDecl],
    exports: &[ExportDecl],
    bodies: &mut HashMap<u16, CodeBody>,
) -> Result<String, VmError> {
    let mut text = String::new();

    for (i, payload) in strings.iter().enumerate() {
        writeln!(text, "data $str_{} {{", i + 1).unwrap();
        writeln!(text, "    write.len {}", payload.len()).unwrap();
        writeln!(text, "    write.bytes \"{}\"", escape_bytes(payload)).unwrap();
        writeln!(text, "}}").unwrap();
    }

    for (index, decl) in functions.iter().enumerate() {
        let params: Vec<String> = (1..=decl.param_count)
            .map(|n| format!("arg{n}"))
            .collect();
        writeln!(text, "func ${}({}) {{", &*decl.name, params.join(", ")).unwrap();

        let body = bodies.remove(&(index as u16)).unwrap_or_default();
        for pc in 1..=body.instructions.len() {
            for label in &body.labels {
                if label.position as usize == pc {
                    writeln!(text, "{}:", &*label.name).unwrap();
                }
            }
            let (mnemonic, operands) = &body.instructions[pc - 1];
            if operands.is_empty() {
                writeln!(text, "    {mnemonic}").unwrap();
            } else {
                writeln!(text, "    {mnemonic} {}", operands.join(", ")).unwrap();
            }
        }
        // Labels that point one past the last instruction.
        for label in &body.labels {
            if label.position as usize > body.instructions.len() {
                writeln!(text, "{}:", &*label.name).unwrap();
            }
        }
        writeln!(text, "}}").unwrap();
    }

    for export in exports {
        let index = export.func_index as usize;
        let decl = functions.get(index).ok_or(VmError::Decode {
            reason: "export function index out of range",
        })?;
        writeln!(text, "export ${} as \"{}\"", &*decl.name, &*export.alias).unwrap();
    }

    Ok(text)
}

// =========================
// Writer
// =========================

/// Encodes a loaded program as a BASMB module.
///
/// Only the binary-expressible subset is accepted; see the module docs.
pub(crate) fn encode(program: &Program) -> Result<Vec<u8>, VmError> {
    // Deterministic ordering: sorted names for builders and functions.
    let mut builder_names: Vec<&String> = program.data_builders.keys().collect();
    builder_names.sort();
    let string_index: HashMap<&str, u16> = builder_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i as u16))
        .collect();

    let mut func_names: Vec<&String> = program.functions.keys().collect();
    func_names.sort();
    let func_index: HashMap<&str, u16> = func_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i as u16))
        .collect();

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    CURRENT_VERSION.encode(&mut out);

    // Strings section: every builder must be string-shaped.
    let mut body = Vec::new();
    (builder_names.len() as u16).encode(&mut body);
    for name in &builder_names {
        let payload = string_payload(&program.data_builders[*name]).ok_or_else(|| {
            VmError::Unencodable {
                mnemonic: format!("data ${name}"),
            }
        })?;
        payload.to_vec().encode(&mut body);
    }
    push_section(&mut out, section::STRINGS, body);

    // Functions section.
    let mut body = Vec::new();
    (func_names.len() as u16).encode(&mut body);
    for name in &func_names {
        let function = &program.functions[*name];
        FuncDecl {
            name: Str16::new(name.as_str()),
            param_count: function.params.len() as u8,
            instr_count: function.instructions.len() as u16,
        }
        .encode(&mut body);
    }
    push_section(&mut out, section::FUNCTIONS, body);

    // Exports section, sorted by alias.
    let mut aliases: Vec<&String> = program.exports.keys().collect();
    aliases.sort();
    let mut body = Vec::new();
    (aliases.len() as u16).encode(&mut body);
    for alias in aliases {
        let target = &program.exports[alias];
        let index = *func_index
            .get(target.as_str())
            .ok_or_else(|| VmError::FunctionNotFound {
                name: target.clone(),
            })?;
        ExportDecl {
            alias: Str16::new(alias.as_str()),
            func_index: index,
        }
        .encode(&mut body);
    }
    push_section(&mut out, section::EXPORTS, body);

    // Code section.
    let mut body = Vec::new();
    for name in &func_names {
        let function = &program.functions[*name];
        func_index[name.as_str()].encode(&mut body);

        let mut labels: Vec<(&String, &usize)> = function.labels.iter().collect();
        labels.sort();
        (labels.len() as u16).encode(&mut body);
        for (label, position) in labels {
            LabelDecl {
                name: Str16::new(label.as_str()),
                position: *position as u16,
            }
            .encode(&mut body);
        }

        (function.instructions.len() as u16).encode(&mut body);
        for instruction in &function.instructions {
            let byte =
                instruction
                    .opcode
                    .wire_byte()
                    .ok_or_else(|| VmError::Unencodable {
                        mnemonic: instruction.opcode.mnemonic().to_string(),
                    })?;
            byte.encode(&mut body);
            (instruction.operands.len() as u8).encode(&mut body);
            for operand in &instruction.operands {
                encode_operand(&mut body, operand, &string_index, &func_index)?;
            }
        }
    }
    push_section(&mut out, section::CODE, body);

    Ok(out)
}

/// Frames a section payload with its `{id, len}` header.
fn push_section(out: &mut Vec<u8>, id: u8, body: Vec<u8>) {
    SectionHeader {
        id,
        len: body.len() as u32,
    }
    .encode(out);
    out.extend_from_slice(&body);
}

/// Returns the payload of a string-shaped builder:
/// `[write.len n, write.bytes payload]` with matching length.
fn string_payload(directives: &[DataDirective]) -> Option<&[u8]> {
    match directives {
        [DataDirective::WriteLen(len), DataDirective::WriteBytes(payload)]
            if *len == payload.len() as i64 =>
        {
            Some(payload)
        }
        _ => None,
    }
}

/// Encodes one operand with its tag byte.
fn encode_operand(
    out: &mut Vec<u8>,
    operand: &Operand,
    string_index: &HashMap<&str, u16>,
    func_index: &HashMap<&str, u16>,
) -> Result<(), VmError> {
    match operand {
        Operand::Reg(idx) => {
            tag::REG.encode(out);
            idx.encode(out);
        }
        Operand::Int(v) => {
            let v = i32::try_from(*v).map_err(|_| VmError::Unencodable {
                mnemonic: v.to_string(),
            })?;
            tag::IMM_I32.encode(out);
            v.encode(out);
        }
        Operand::Sym(name) => {
            if let Some(index) = string_index.get(name.as_str()) {
                tag::STRING.encode(out);
                index.encode(out);
            } else if let Some(index) = func_index.get(name.as_str()) {
                tag::FUNC.encode(out);
                index.encode(out);
            } else {
                tag::SYMBOL.encode(out);
                Str16::new(name.as_str()).encode(out);
            }
        }
        Operand::Label(name) => {
            tag::LABEL.encode(out);
            Str16::new(name.as_str()).encode(out);
        }
        Operand::Mem {
            base,
            offset,
            negate,
        } => {
            let Operand::Reg(base) = **base else {
                return Err(VmError::Unencodable {
                    mnemonic: operand.to_string(),
                });
            };
            let off = match offset.as_deref() {
                None => 0i64,
                Some(Operand::Int(v)) => {
                    if *negate {
                        -*v
                    } else {
                        *v
                    }
                }
                Some(_) => {
                    return Err(VmError::Unencodable {
                        mnemonic: operand.to_string(),
                    });
                }
            };
            let off = i32::try_from(off).map_err(|_| VmError::Unencodable {
                mnemonic: operand.to_string(),
            })?;
            tag::MEM.encode(out);
            base.encode(out);
            off.encode(out);
        }
        Operand::Float(_) => {
            return Err(VmError::Unencodable {
                mnemonic: operand.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::loader;

    /// Builds a minimal valid header (magic + version 1).
    fn header() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        CURRENT_VERSION.encode(&mut out);
        out
    }

    fn str16(out: &mut Vec<u8>, s: &str) {
        Str16::new(s).encode(out);
    }

    #[test]
    fn bad_magic() {
        assert!(matches!(
            decode_to_text(b"NOPE\x01\x00\x00\x00"),
            Err(VmError::BadMagic)
        ));
        assert!(matches!(decode_to_text(b"BA"), Err(VmError::BadMagic)));
    }

    #[test]
    fn unsupported_major_version() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        2u32.encode(&mut bytes);
        assert!(matches!(
            decode_to_text(&bytes),
            Err(VmError::UnsupportedVersion {
                version: 2,
                major: 2
            })
        ));
    }

    #[test]
    fn empty_module_decodes_to_empty_text() {
        let text = decode_to_text(&header()).unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn truncated_section_is_a_decode_error() {
        let mut bytes = header();
        SectionHeader {
            id: section::STRINGS,
            len: 100,
        }
        .encode(&mut bytes);
        assert!(matches!(decode_to_text(&bytes), Err(VmError::Decode { .. })));
    }

    #[test]
    fn strings_become_data_builders() {
        let mut body = Vec::new();
        2u16.encode(&mut body);
        b"hello".to_vec().encode(&mut body);
        b"hi\n".to_vec().encode(&mut body);

        let mut bytes = header();
        push_section(&mut bytes, section::STRINGS, body);

        let text = decode_to_text(&bytes).unwrap();
        assert!(text.contains("data $str_1 {"));
        assert!(text.contains("write.len 5"));
        assert!(text.contains("write.bytes \"hello\""));
        assert!(text.contains("data $str_2 {"));
        assert!(text.contains("write.bytes \"hi\\n\""));
    }

    #[test]
    fn function_and_code_roundtrip_through_text() {
        // func $main() { mov r0, 42; ret r0 } with export "main"
        let mut funcs = Vec::new();
        1u16.encode(&mut funcs);
        str16(&mut funcs, "main");
        funcs.push(0); // param count
        2u16.encode(&mut funcs); // instr count

        let mut exports = Vec::new();
        1u16.encode(&mut exports);
        str16(&mut exports, "main");
        0u16.encode(&mut exports);

        let mut code = Vec::new();
        0u16.encode(&mut code); // func index
        0u16.encode(&mut code); // label count
        2u16.encode(&mut code); // instr count
        // mov r0, 42
        code.push(0x01);
        code.push(2);
        code.push(tag::REG);
        code.push(0);
        code.push(tag::IMM_I32);
        42i32.encode(&mut code);
        // ret r0
        code.push(0x71);
        code.push(1);
        code.push(tag::REG);
        code.push(0);

        let mut bytes = header();
        push_section(&mut bytes, section::FUNCTIONS, funcs);
        push_section(&mut bytes, section::EXPORTS, exports);
        push_section(&mut bytes, section::CODE, code);

        let text = decode_to_text(&bytes).unwrap();
        assert!(text.contains("func $main() {"));
        assert!(text.contains("mov r0, 42"));
        assert!(text.contains("ret r0"));
        assert!(text.contains("export $main as \"main\""));

        // The reconstructed text must load.
        let program = loader::parse(&text).unwrap();
        assert_eq!(program.exports["main"], "main");
        assert_eq!(program.functions["main"].instructions.len(), 2);
    }

    #[test]
    fn labels_are_placed_before_their_instruction() {
        let mut funcs = Vec::new();
        1u16.encode(&mut funcs);
        str16(&mut funcs, "f");
        funcs.push(0);
        2u16.encode(&mut funcs);

        let mut code = Vec::new();
        0u16.encode(&mut code);
        1u16.encode(&mut code); // one label
        str16(&mut code, ".skip");
        2u16.encode(&mut code); // position: second instruction
        2u16.encode(&mut code); // two instructions
        code.push(0xFF); // nop
        code.push(0);
        code.push(0x71); // ret
        code.push(1);
        code.push(tag::REG);
        code.push(0);

        let mut bytes = header();
        push_section(&mut bytes, section::FUNCTIONS, funcs);
        push_section(&mut bytes, section::CODE, code);

        let text = decode_to_text(&bytes).unwrap();
        let nop_at = text.find("nop").unwrap();
        let label_at = text.find(".skip:").unwrap();
        let ret_at = text.find("ret").unwrap();
        assert!(nop_at < label_at && label_at < ret_at);

        let program = loader::parse(&text).unwrap();
        assert_eq!(program.functions["f"].labels[".skip"], 2);
    }

    #[test]
    fn unknown_opcode_byte_decodes_to_nop() {
        let mut funcs = Vec::new();
        1u16.encode(&mut funcs);
        str16(&mut funcs, "f");
        funcs.push(0);
        1u16.encode(&mut funcs);

        let mut code = Vec::new();
        0u16.encode(&mut code);
        0u16.encode(&mut code);
        1u16.encode(&mut code);
        code.push(0xE7); // no such opcode
        code.push(0);

        let mut bytes = header();
        push_section(&mut bytes, section::FUNCTIONS, funcs);
        push_section(&mut bytes, section::CODE, code);

        let text = decode_to_text(&bytes).unwrap();
        assert!(text.contains("nop"));
    }

    #[test]
    fn unknown_section_is_skipped() {
        let mut bytes = header();
        push_section(&mut bytes, 0x7E, vec![1, 2, 3]);
        assert!(decode_to_text(&bytes).unwrap().is_empty());
    }

    #[test]
    fn mem_operand_renders_signed_offsets() {
        let mut body: &[u8] = &{
            let mut v = vec![tag::MEM, 3];
            (-8i32).encode(&mut v);
            v
        };
        assert_eq!(decode_operand_text(&mut body, &[]).unwrap(), "[r3-8]");

        let mut body: &[u8] = &{
            let mut v = vec![tag::MEM, 1];
            16i32.encode(&mut v);
            v
        };
        assert_eq!(decode_operand_text(&mut body, &[]).unwrap(), "[r1+16]");
    }

    #[test]
    fn encode_decode_roundtrip() {
        let source = r#"
data $msg {
    write.len 5
    write.bytes "hello"
}
func $main() {
    data.load r1, $msg
    mov r0, 42
    cmp r0, 42
    jz .done
    mov r0, 0
.done:
    ret r0
}
export $main as "main"
"#;
        let program = loader::parse(source).unwrap();
        let bytes = encode(&program).unwrap();
        assert_eq!(&bytes[..4], MAGIC);

        let text = decode_to_text(&bytes).unwrap();
        let reloaded = loader::parse(&text).unwrap();

        assert_eq!(reloaded.exports["main"], "main");
        let main = &reloaded.functions["main"];
        assert_eq!(main.instructions.len(), 6);
        assert_eq!(main.labels[".done"], 6);
        // The $msg reference now points at the synthesized str_1 builder.
        assert_eq!(
            main.instructions[0].operands[1],
            Operand::Sym("str_1".to_string())
        );
        assert_eq!(
            reloaded.data_builders["str_1"],
            vec![
                DataDirective::WriteLen(5),
                DataDirective::WriteBytes(b"hello".to_vec()),
            ]
        );
    }

    #[test]
    fn encode_rejects_text_only_opcodes() {
        let program = loader::parse("func $f() {\n    fadd r0, r1, r2\n    ret r0\n}\n").unwrap();
        assert!(matches!(
            encode(&program),
            Err(VmError::Unencodable { mnemonic }) if mnemonic == "fadd"
        ));
    }

    #[test]
    fn encode_rejects_non_string_builders() {
        let program = loader::parse("data $t {\n    write.i64 7\n}\n").unwrap();
        assert!(matches!(encode(&program), Err(VmError::Unencodable { .. })));
    }
}
